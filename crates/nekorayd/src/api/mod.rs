//! HTTP API exposing the orchestrator's lifecycle operations.
//!
//! Every orchestrator call may block for several seconds while a subprocess
//! starts or stops, so handlers hop onto the blocking pool before touching
//! the service. Responses are JSON; failures carry a single `error` string.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use nekoray_core::{ConfigDocument, ProfileId, ServiceOrchestrator, ServiceState};
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::logs::{LogBuffer, LogEntry};

mod error;

pub use error::ApiError;

pub(crate) const API_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::api");

/// Single-page dashboard driving the `/api` routes from a browser.
const DASHBOARD: &str = include_str!("dashboard.html");

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct ApiState {
    service: Arc<ServiceOrchestrator>,
    logs: LogBuffer,
}

impl ApiState {
    /// Bundles the orchestrator with the log history it feeds.
    #[must_use]
    pub const fn new(service: Arc<ServiceOrchestrator>, logs: LogBuffer) -> Self {
        Self { service, logs }
    }
}

/// Builds the dashboard and `/api` router with permissive CORS and request
/// tracing.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/index.html", get(dashboard))
        .route("/api/status", get(status))
        .route("/api/start", post(start))
        .route("/api/stop", post(stop))
        .route("/api/restart", post(restart))
        .route("/api/tun/start", post(tun_start))
        .route("/api/tun/stop", post(tun_stop))
        .route("/api/config", get(config).post(update_config))
        .route("/api/traffic", get(traffic))
        .route("/api/logs", get(logs))
        .fallback(not_found)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    current_profile: Option<ProfileId>,
    tun_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<ProxyEndpoints>,
}

#[derive(Debug, Serialize)]
struct ProxyEndpoints {
    socks_address: String,
    socks_port: u16,
    http_address: String,
    http_port: u16,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile_id: Option<ProfileId>,
}

impl ActionResponse {
    const fn ok(message: &'static str) -> Self {
        Self {
            success: true,
            message,
            profile_id: None,
        }
    }

    fn with_profile(mut self, profile_id: Option<ProfileId>) -> Self {
        self.profile_id = profile_id;
        self
    }
}

#[derive(Debug, Serialize)]
struct TrafficResponse {
    upload_bytes: u64,
    download_bytes: u64,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    logs: Vec<LogEntry>,
}

/// Runs `work` against the orchestrator on the blocking pool.
async fn blocking<T, F>(state: &ApiState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ServiceOrchestrator) -> Result<T, ApiError> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || work(&service))
        .await
        .map_err(|source| ApiError::Worker { source })?
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD)
}

async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    let response = blocking(&state, |service| {
        let status = service.status();
        let proxy = (status == ServiceState::Running).then(|| ProxyEndpoints {
            socks_address: service.socks_address(),
            socks_port: service.socks_port(),
            http_address: service.http_address(),
            http_port: service.http_port(),
        });
        Ok(StatusResponse {
            status: status.as_lowercase(),
            current_profile: service.current_profile_id(),
            tun_running: service.is_tun_mode_running(),
            proxy,
        })
    })
    .await?;
    Ok(Json(response))
}

async fn start(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<ActionResponse>, ApiError> {
    let profile = requested_profile(&body)?.ok_or(ApiError::MissingProfile)?;
    info!(target: API_TARGET, profile, "start requested");
    let selected = blocking(&state, move |service| {
        service.load_profile(profile)?;
        service
            .start_proxy()
            .map_err(ApiError::failed("Failed to start proxy"))?;
        Ok(service.current_profile_id())
    })
    .await?;
    Ok(Json(
        ActionResponse::ok("Proxy started successfully").with_profile(selected),
    ))
}

async fn stop(State(state): State<ApiState>) -> Result<Json<ActionResponse>, ApiError> {
    blocking(&state, |service| {
        service
            .stop_proxy()
            .map_err(ApiError::failed("Failed to stop proxy"))
    })
    .await?;
    Ok(Json(ActionResponse::ok("Proxy stopped successfully")))
}

async fn restart(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<ActionResponse>, ApiError> {
    let profile = requested_profile(&body)?;
    let selected = blocking(&state, move |service| {
        if let Some(profile) = profile {
            service.load_profile(profile)?;
        }
        service
            .restart_proxy()
            .map_err(ApiError::failed("Failed to restart proxy"))?;
        Ok(service.current_profile_id())
    })
    .await?;
    Ok(Json(
        ActionResponse::ok("Proxy restarted successfully").with_profile(selected),
    ))
}

async fn tun_start(State(state): State<ApiState>) -> Result<Json<ActionResponse>, ApiError> {
    blocking(&state, |service| {
        service
            .start_tun_mode()
            .map_err(ApiError::failed("Failed to start TUN mode"))
    })
    .await?;
    Ok(Json(ActionResponse::ok("TUN mode started successfully")))
}

async fn tun_stop(State(state): State<ApiState>) -> Result<Json<ActionResponse>, ApiError> {
    blocking(&state, |service| {
        service
            .stop_tun_mode()
            .map_err(ApiError::failed("Failed to stop TUN mode"))
    })
    .await?;
    Ok(Json(ActionResponse::ok("TUN mode stopped successfully")))
}

async fn config(State(state): State<ApiState>) -> Result<Json<ConfigDocument>, ApiError> {
    let document = blocking(&state, |service| Ok(service.current_config())).await?;
    Ok(Json(document))
}

async fn update_config(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<ActionResponse>, ApiError> {
    let updates = parse_object(&body)?;
    blocking(&state, move |service| {
        for (key, value) in updates {
            service.set_config_value(&key, value)?;
        }
        service
            .save_config()
            .map_err(ApiError::failed("Failed to save configuration"))
    })
    .await?;
    Ok(Json(ActionResponse::ok("Configuration updated successfully")))
}

async fn traffic(State(state): State<ApiState>) -> Result<Json<TrafficResponse>, ApiError> {
    let response = blocking(&state, |service| {
        Ok(TrafficResponse {
            upload_bytes: service.upload_bytes(),
            download_bytes: service.download_bytes(),
            timestamp: OffsetDateTime::now_utc().unix_timestamp(),
        })
    })
    .await?;
    Ok(Json(response))
}

async fn logs(State(state): State<ApiState>) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.logs.snapshot(),
    })
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(object)) => Ok(object),
        _ => Err(ApiError::InvalidJson),
    }
}

/// Extracts `profile_id` from an optional JSON body.
///
/// An empty body means no profile was supplied.
fn requested_profile(body: &[u8]) -> Result<Option<i64>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match parse_object(body)?.get("profile_id") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or(ApiError::ProfileType),
    }
}

#[cfg(test)]
mod tests;
