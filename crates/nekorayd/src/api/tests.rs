use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tower::ServiceExt;

use super::*;
use crate::tests::support::ServiceHarness;

#[fixture]
fn harness() -> ServiceHarness {
    ServiceHarness::without_core()
}

async fn send(state: &ApiState, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_owned()))
        .expect("build request");
    let response = router(state.clone())
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get_json(state: &ApiState, uri: &str) -> (StatusCode, Value) {
    send(state, Method::GET, uri, "").await
}

async fn post_json(state: &ApiState, uri: &str, body: &str) -> (StatusCode, Value) {
    send(state, Method::POST, uri, body).await
}

fn error_message(body: &Value) -> &str {
    body["error"].as_str().expect("error payload carries a message")
}

#[rstest]
#[tokio::test]
async fn status_of_idle_service(harness: ServiceHarness) {
    let (status, body) = get_json(&harness.state, "/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "stopped", "current_profile": null, "tun_running": false })
    );
}

#[rstest]
#[case::empty_body("", "Missing profile_id")]
#[case::no_profile("{}", "Missing profile_id")]
#[case::not_json("profile=1", "Invalid JSON request")]
#[case::not_an_object("[1]", "Invalid JSON request")]
#[case::wrong_type(r#"{"profile_id": "one"}"#, "profile_id must be an integer")]
#[tokio::test]
async fn start_rejects_malformed_requests(
    harness: ServiceHarness,
    #[case] body: &str,
    #[case] expected: &str,
) {
    let (status, response) = post_json(&harness.state, "/api/start", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&response), expected);
}

#[rstest]
#[case(0)]
#[case(101)]
#[tokio::test]
async fn start_rejects_out_of_range_profiles(harness: ServiceHarness, #[case] profile: i64) {
    let body = json!({ "profile_id": profile }).to_string();
    let (status, response) = post_json(&harness.state, "/api/start", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        error_message(&response).contains(&format!("invalid profile id {profile}")),
        "unexpected error: {response}"
    );
    assert_eq!(harness.service.current_profile_id(), None);
}

#[rstest]
#[tokio::test]
async fn start_failure_is_a_server_error(harness: ServiceHarness) {
    let (status, response) = post_json(&harness.state, "/api/start", r#"{"profile_id": 4}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        error_message(&response).starts_with("Failed to start proxy: core executable not found"),
        "unexpected error: {response}"
    );

    let (_, status_body) = get_json(&harness.state, "/api/status").await;
    assert_eq!(status_body["status"], "error");
    assert_eq!(status_body["current_profile"], 4);
}

#[rstest]
#[tokio::test]
async fn stop_on_idle_service_succeeds(harness: ServiceHarness) {
    let (status, body) = post_json(&harness.state, "/api/stop", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "success": true, "message": "Proxy stopped successfully" })
    );
}

#[rstest]
#[tokio::test]
async fn restart_without_a_profile_is_refused(harness: ServiceHarness) {
    let (status, body) = post_json(&harness.state, "/api/restart", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_message(&body), "Failed to restart proxy: No profile selected");
}

#[rstest]
#[tokio::test]
async fn config_lists_effective_settings(harness: ServiceHarness) {
    let (status, body) = get_json(&harness.state, "/api/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inbound_address"], "127.0.0.1");
    assert_eq!(body["inbound_socks_port"], 2080);
    assert_eq!(body["inbound_http_port"], 2081);
    assert_eq!(body["spmode_vpn"], false);
    assert_eq!(body["vpn_internal_tun"], true);
}

#[rstest]
#[tokio::test]
async fn config_updates_are_persisted(harness: ServiceHarness) {
    let (status, body) = post_json(
        &harness.state,
        "/api/config",
        r#"{"inbound_socks_port": 3080, "theme": "dark"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Configuration updated successfully");

    let (_, config) = get_json(&harness.state, "/api/config").await;
    assert_eq!(config["inbound_socks_port"], 3080);
    assert_eq!(config["theme"], "dark");

    let stored: Value = serde_json::from_str(
        &fs::read_to_string(harness.settings_path()).expect("read settings"),
    )
    .expect("parse settings");
    assert_eq!(stored["inbound_socks_port"], 3080);
}

#[rstest]
#[tokio::test]
async fn config_update_requires_an_object(harness: ServiceHarness) {
    let (status, body) = post_json(&harness.state, "/api/config", r#""socks""#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_message(&body), "Invalid JSON request");
}

#[rstest]
#[tokio::test]
async fn traffic_reports_counters_with_timestamp(harness: ServiceHarness) {
    let (status, body) = get_json(&harness.state, "/api/traffic").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["upload_bytes"], 0);
    assert_eq!(body["download_bytes"], 0);
    assert!(body["timestamp"].as_i64().is_some_and(|seconds| seconds > 0));
}

#[rstest]
#[tokio::test]
async fn logs_capture_service_failures(harness: ServiceHarness) {
    post_json(&harness.state, "/api/restart", "").await;

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut messages = Vec::new();
    while Instant::now() < deadline {
        let (status, body) = get_json(&harness.state, "/api/logs").await;
        assert_eq!(status, StatusCode::OK);
        messages = body["logs"]
            .as_array()
            .expect("logs array")
            .iter()
            .map(|entry| (entry["level"].clone(), entry["message"].clone()))
            .collect();
        if messages.iter().any(|(level, _)| level == "error") {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(
        messages.contains(&(json!("error"), json!("No profile selected"))),
        "missing error entry in {messages:?}"
    );
}

#[rstest]
#[case(Method::GET, "/api/unknown")]
#[case(Method::GET, "/settings")]
#[case(Method::DELETE, "/api/import")]
#[tokio::test]
async fn unknown_routes_are_not_found(
    harness: ServiceHarness,
    #[case] method: Method,
    #[case] uri: &str,
) {
    let (status, body) = send(&harness.state, method, uri, "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "Not found");
}

#[rstest]
#[case("/")]
#[case("/index.html")]
#[tokio::test]
async fn dashboard_is_served_as_html(harness: ServiceHarness, #[case] uri: &str) {
    let request = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let response = router(harness.state.clone())
        .oneshot(request)
        .await
        .expect("router is infallible");

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    assert!(
        content_type
            .as_deref()
            .is_some_and(|value| value.starts_with("text/html")),
        "unexpected content type {content_type:?}"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    let page = String::from_utf8(bytes.to_vec()).expect("utf-8 page");
    assert!(page.starts_with("<!DOCTYPE html>"));
    for route in ["status", "traffic", "logs", "tun/start"] {
        assert!(page.contains(route), "dashboard never references {route}");
    }
}

#[rstest]
#[tokio::test]
async fn responses_allow_any_origin(harness: ServiceHarness) {
    let request = Request::builder()
        .uri("/api/status")
        .header(header::ORIGIN, "http://dashboard.local")
        .body(Body::empty())
        .expect("build request");
    let response = router(harness.state.clone())
        .oneshot(request)
        .await
        .expect("router is infallible");
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|value| value.to_str().ok()),
        Some("*")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn running_proxy_reports_endpoints() {
    let harness = ServiceHarness::with_sleeping_core();

    let (status, body) = post_json(&harness.state, "/api/start", r#"{"profile_id": 7}"#).await;
    assert_eq!(status, StatusCode::OK, "start failed: {body}");
    assert_eq!(
        body,
        json!({ "success": true, "message": "Proxy started successfully", "profile_id": 7 })
    );

    let (_, status_body) = get_json(&harness.state, "/api/status").await;
    assert_eq!(status_body["status"], "running");
    assert_eq!(
        status_body["proxy"],
        json!({
            "socks_address": "127.0.0.1",
            "socks_port": 2080,
            "http_address": "127.0.0.1",
            "http_port": 2081,
        })
    );

    let (status, body) = post_json(&harness.state, "/api/restart", r#"{"profile_id": 8}"#).await;
    assert_eq!(status, StatusCode::OK, "restart failed: {body}");
    assert_eq!(body["profile_id"], 8);

    let (status, _) = post_json(&harness.state, "/api/stop", "").await;
    assert_eq!(status, StatusCode::OK);
    let (_, status_body) = get_json(&harness.state, "/api/status").await;
    assert_eq!(status_body["status"], "stopped");
    assert!(status_body.get("proxy").is_none());
}
