//! Shared configuration for the nekoray CLI and daemon.
//!
//! Values are layered by `ortho_config`: built-in defaults, then a
//! `nekoray.toml` file, then `NEKORAY_*` environment variables, then command
//! line flags. The proxy settings document managed by the service layer is a
//! separate artefact and lives beneath [`Config::config_dir`].

mod defaults;
mod logging;
mod runtime;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    APP_DIRECTORY, DEFAULT_HTTP_BIND, DEFAULT_HTTP_PORT, DEFAULT_LOG_FILTER, default_config_dir,
    default_http_bind, default_log_filter, default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};

/// Runtime configuration shared by the binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(
    prefix = "NEKORAY",
    discovery(
        app_name = "nekoray",
        env_var = "NEKORAY_CONFIG_PATH",
        config_file_name = "nekoray.toml",
        dotfile_name = ".nekoray.toml",
        project_file_name = ".nekoray.toml",
        config_cli_long = "config-path",
        config_cli_visible = true,
    )
)]
pub struct Config {
    /// Directory holding the settings document and profile folders.
    #[serde(default)]
    pub config_dir: Option<Utf8PathBuf>,
    /// Explicit proxy-core executable, bypassing the candidate search.
    #[serde(default)]
    pub core_path: Option<Utf8PathBuf>,
    /// Address the daemon's HTTP API binds to.
    #[ortho_config(default = default_http_bind())]
    pub http_bind: String,
    /// Port the daemon's HTTP API listens on.
    #[ortho_config(default = DEFAULT_HTTP_PORT)]
    pub http_port: u16,
    /// `tracing` filter directive applied to telemetry.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for telemetry.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: None,
            core_path: None,
            http_bind: default_http_bind(),
            http_port: DEFAULT_HTTP_PORT,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Settings directory, falling back to the platform default.
    #[must_use]
    pub fn config_dir(&self) -> Utf8PathBuf {
        self.config_dir.clone().unwrap_or_else(default_config_dir)
    }

    /// Explicit proxy-core override, when configured.
    #[must_use]
    pub fn core_path(&self) -> Option<&Utf8Path> {
        self.core_path.as_deref()
    }

    /// Socket address string for the HTTP API.
    #[must_use]
    pub fn http_listen_address(&self) -> String {
        format!("{}:{}", self.http_bind, self.http_port)
    }

    /// Filter expression for telemetry.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Selected telemetry format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
