use serde_json::{Value, json};

use super::InboundSettings;
use crate::state::ProfileId;

/// Name of the generated core configuration for a profile.
#[must_use]
pub fn core_config_file_name(profile: ProfileId) -> String {
    format!("nekoray_core_{profile}.json")
}

/// Emits the minimal runnable configuration for the proxy core.
///
/// Outbound selection for a profile is handled elsewhere; this document only
/// guarantees that the SOCKS and HTTP inbounds exist and that traffic has a
/// route.
#[derive(Debug, Clone, Default)]
pub struct CoreConfigGenerator {
    inbound: InboundSettings,
}

impl CoreConfigGenerator {
    /// Creates a generator for the given listener settings.
    #[must_use]
    pub const fn new(inbound: InboundSettings) -> Self {
        Self { inbound }
    }

    /// Renders the configuration for `profile`.
    #[must_use]
    pub fn render(&self, profile: ProfileId) -> Value {
        tracing::debug!(
            target: concat!(env!("CARGO_PKG_NAME"), "::generator"),
            profile = %profile,
            socks_port = self.inbound.socks_port,
            http_port = self.inbound.http_port,
            "rendering core configuration"
        );
        json!({
            "log": { "level": "info" },
            "inbounds": [
                {
                    "type": "socks",
                    "tag": "socks-in",
                    "listen": self.inbound.address,
                    "listen_port": self.inbound.socks_port,
                },
                {
                    "type": "http",
                    "tag": "http-in",
                    "listen": self.inbound.address,
                    "listen_port": self.inbound.http_port,
                },
            ],
            "outbounds": [
                { "type": "direct", "tag": "direct" },
                { "type": "block", "tag": "block" },
            ],
            "route": { "final": "direct" },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(raw: i64) -> ProfileId {
        ProfileId::new(raw).expect("valid profile")
    }

    #[test]
    fn renders_both_inbounds_on_configured_ports() {
        let generator = CoreConfigGenerator::new(InboundSettings {
            address: "0.0.0.0".to_owned(),
            socks_port: 1080,
            http_port: 1081,
        });
        let document = generator.render(profile(3));

        let inbounds = document["inbounds"].as_array().expect("inbounds array");
        assert_eq!(inbounds.len(), 2);
        assert_eq!(inbounds[0]["type"], "socks");
        assert_eq!(inbounds[0]["listen"], "0.0.0.0");
        assert_eq!(inbounds[0]["listen_port"], 1080);
        assert_eq!(inbounds[1]["type"], "http");
        assert_eq!(inbounds[1]["listen_port"], 1081);
    }

    #[test]
    fn routes_to_a_declared_outbound() {
        let document = CoreConfigGenerator::default().render(profile(1));
        let final_tag = document["route"]["final"].as_str().expect("final outbound");
        let outbounds = document["outbounds"].as_array().expect("outbounds array");

        assert!(outbounds.iter().any(|outbound| outbound["tag"] == final_tag));
        assert!(outbounds.iter().any(|outbound| outbound["type"] == "block"));
        assert_eq!(document["log"]["level"], "info");
    }

    #[test]
    fn file_name_is_unique_per_profile() {
        assert_eq!(core_config_file_name(profile(7)), "nekoray_core_7.json");
        assert_ne!(
            core_config_file_name(profile(7)),
            core_config_file_name(profile(8))
        );
    }
}
