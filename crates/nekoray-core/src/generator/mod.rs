//! Renders the JSON documents handed to the proxy core.

mod core_config;
mod tun_config;

use std::fs;
use std::io;
use std::path::Path;

use serde_json::Value;

use crate::store::{
    ConfigDocument, DEFAULT_HTTP_PORT, DEFAULT_INBOUND_ADDRESS, DEFAULT_SOCKS_PORT, keys,
};

pub use self::core_config::{CoreConfigGenerator, core_config_file_name};
pub use self::tun_config::{TunConfigGenerator, TunSettings, tun_file_stem};

/// Listener settings taken from the effective configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSettings {
    /// Address both listeners bind to.
    pub address: String,
    /// SOCKS listener port.
    pub socks_port: u16,
    /// HTTP listener port.
    pub http_port: u16,
}

impl Default for InboundSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_INBOUND_ADDRESS.to_owned(),
            socks_port: DEFAULT_SOCKS_PORT,
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

impl InboundSettings {
    /// Extracts listener settings, falling back to defaults per key.
    #[must_use]
    pub fn from_document(document: &ConfigDocument) -> Self {
        Self {
            address: document_str(document, keys::INBOUND_ADDRESS)
                .unwrap_or(DEFAULT_INBOUND_ADDRESS)
                .to_owned(),
            socks_port: document_port(document, keys::INBOUND_SOCKS_PORT)
                .unwrap_or(DEFAULT_SOCKS_PORT),
            http_port: document_port(document, keys::INBOUND_HTTP_PORT)
                .unwrap_or(DEFAULT_HTTP_PORT),
        }
    }
}

/// Reads a string value.
pub(crate) fn document_str<'a>(document: &'a ConfigDocument, key: &str) -> Option<&'a str> {
    document.get(key).and_then(Value::as_str)
}

/// Reads a port stored either as a number or as a numeric string.
pub(crate) fn document_port(document: &ConfigDocument, key: &str) -> Option<u16> {
    match document.get(key)? {
        Value::Number(number) => number.as_u64().and_then(|raw| u16::try_from(raw).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a boolean stored either as a bool or as `"true"`/`"false"`.
pub(crate) fn document_bool(document: &ConfigDocument, key: &str) -> Option<bool> {
    match document.get(key)? {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Writes a rendered document as pretty JSON.
pub(crate) fn write_json(path: &Path, document: &Value) -> io::Result<()> {
    let mut payload = serde_json::to_vec_pretty(document).map_err(io::Error::other)?;
    payload.push(b'\n');
    fs::write(path, payload)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn inbound_settings_accept_string_ports() {
        let mut document = ConfigDocument::new();
        document.insert(keys::INBOUND_SOCKS_PORT.to_owned(), json!("7890"));
        document.insert(keys::INBOUND_ADDRESS.to_owned(), json!("0.0.0.0"));

        let inbound = InboundSettings::from_document(&document);

        assert_eq!(inbound.address, "0.0.0.0");
        assert_eq!(inbound.socks_port, 7890);
        assert_eq!(inbound.http_port, DEFAULT_HTTP_PORT);
    }

    #[test]
    fn out_of_range_port_falls_back_to_default() {
        let mut document = ConfigDocument::new();
        document.insert(keys::INBOUND_HTTP_PORT.to_owned(), json!(70000));
        assert_eq!(InboundSettings::from_document(&document).http_port, DEFAULT_HTTP_PORT);
    }

    #[test]
    fn booleans_parse_from_strings() {
        let mut document = ConfigDocument::new();
        document.insert(keys::SPMODE_VPN.to_owned(), json!("true"));
        assert_eq!(document_bool(&document, keys::SPMODE_VPN), Some(true));
        assert_eq!(document_bool(&document, keys::VPN_INTERNAL_TUN), None);
    }
}
