use camino::Utf8PathBuf;
use std::env;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Address the daemon's HTTP API binds to unless overridden.
pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1";

/// Port the daemon's HTTP API listens on unless overridden.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Directory name used beneath the platform configuration root.
pub const APP_DIRECTORY: &str = "nekoray";

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Owned bind address for the HTTP API.
pub fn default_http_bind() -> String {
    DEFAULT_HTTP_BIND.to_owned()
}

/// Computes the settings directory used when none is configured.
///
/// Prefers `<XDG config>/nekoray` and falls back to the temporary directory
/// on hosts without a configuration root.
pub fn default_config_dir() -> Utf8PathBuf {
    dirs::config_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(fallback_base_directory)
        .join(APP_DIRECTORY)
}

fn fallback_base_directory() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir()).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_dir_ends_with_app_directory() {
        let dir = default_config_dir();
        assert_eq!(dir.file_name(), Some(APP_DIRECTORY));
    }
}
