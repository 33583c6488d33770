//! JSON error payloads returned by the HTTP API.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nekoray_core::ServiceError;
use serde_json::json;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::warn;

use super::API_TARGET;

/// Failures surfaced to HTTP clients as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The body was not a JSON object.
    #[error("Invalid JSON request")]
    InvalidJson,
    /// `POST /api/start` arrived without a profile.
    #[error("Missing profile_id")]
    MissingProfile,
    /// `profile_id` was present but not an integer.
    #[error("profile_id must be an integer")]
    ProfileType,
    /// The service refused the request without changing state.
    #[error("{source}")]
    Rejected {
        /// Underlying service error.
        #[source]
        source: ServiceError,
    },
    /// A lifecycle operation failed.
    #[error("{action}: {source}")]
    Failed {
        /// What the handler was doing.
        action: &'static str,
        /// Underlying service error.
        #[source]
        source: ServiceError,
    },
    /// The blocking worker panicked or was cancelled.
    #[error("request worker failed: {source}")]
    Worker {
        /// Underlying join error.
        #[source]
        source: JoinError,
    },
    /// No route matched.
    #[error("Not found")]
    NotFound,
}

impl ApiError {
    /// Adapter for `map_err` on lifecycle operations.
    pub(crate) fn failed(action: &'static str) -> impl FnOnce(ServiceError) -> Self {
        move |source| Self::Failed { action, source }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson | Self::MissingProfile | Self::ProfileType | Self::Rejected { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Failed { .. } | Self::Worker { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(source: ServiceError) -> Self {
        Self::Rejected { source }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(target: API_TARGET, error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
