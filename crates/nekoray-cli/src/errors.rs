//! Error types for the CLI runtime.

use std::io;
use std::sync::Arc;

use nekoray_core::{ServiceError, TelemetryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("{action}: {source}")]
    Service {
        action: &'static str,
        #[source]
        source: ServiceError,
    },
    #[error("DRY RUN: Validation failed: {reason}")]
    DryRun { reason: String },
    #[error("failed to render configuration: {0}")]
    RenderConfig(serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl AppError {
    pub(crate) fn service(action: &'static str) -> impl FnOnce(ServiceError) -> Self {
        move |source| Self::Service { action, source }
    }
}
