use serde_json::{Value, json};

use super::InboundSettings;
use crate::state::ProfileId;

/// Parameters of the virtual interface and its upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunSettings {
    /// Name of the interface created by the tunnel process.
    pub interface_name: String,
    /// Private address block assigned to the interface.
    pub inet4_address: String,
    /// Interface MTU.
    pub mtu: u32,
    /// Address of the core's SOCKS listener.
    pub socks_address: String,
    /// Port of the core's SOCKS listener.
    pub socks_port: u16,
    /// Profile the tunnel runs alongside, naming its generated files.
    pub profile: Option<ProfileId>,
}

impl Default for TunSettings {
    fn default() -> Self {
        Self::for_inbound(&InboundSettings::default())
    }
}

impl TunSettings {
    /// Points the tunnel at the core's SOCKS listener.
    ///
    /// Wildcard listen addresses are dialled through loopback.
    #[must_use]
    pub fn for_inbound(inbound: &InboundSettings) -> Self {
        let socks_address = match inbound.address.as_str() {
            "0.0.0.0" | "::" | "" => "127.0.0.1".to_owned(),
            address => address.to_owned(),
        };
        Self {
            interface_name: "nekoray-tun".to_owned(),
            inet4_address: "172.19.0.1/28".to_owned(),
            mtu: 9000,
            socks_address,
            socks_port: inbound.socks_port,
            profile: None,
        }
    }

    /// Associates the tunnel with `profile`.
    #[must_use]
    pub fn with_profile(mut self, profile: Option<ProfileId>) -> Self {
        self.profile = profile;
        self
    }
}

/// File stem shared by the tunnel configuration and launch script.
///
/// Follows the core's per-profile naming; a tunnel started before any
/// profile is loaded uses the bare stem.
#[must_use]
pub fn tun_file_stem(settings: &TunSettings) -> String {
    match settings.profile {
        Some(profile) => format!("nekoray_tun_{profile}"),
        None => "nekoray_tun".to_owned(),
    }
}

/// Emits the configuration run by the privileged tunnel process.
#[derive(Debug, Clone, Default)]
pub struct TunConfigGenerator {
    settings: TunSettings,
}

impl TunConfigGenerator {
    /// Creates a generator for the given interface settings.
    #[must_use]
    pub const fn new(settings: TunSettings) -> Self {
        Self { settings }
    }

    /// Settings the generator renders.
    #[must_use]
    pub const fn settings(&self) -> &TunSettings {
        &self.settings
    }

    /// Renders the tunnel configuration.
    #[must_use]
    pub fn render(&self) -> Value {
        let settings = &self.settings;
        json!({
            "log": { "level": "info" },
            "dns": {
                "fakeip": {
                    "enabled": true,
                    "inet4_range": "198.18.0.0/15",
                    "inet6_range": "fc00::/18",
                },
                "servers": [
                    { "tag": "dns-remote", "address": "8.8.8.8", "detour": "direct" },
                    { "tag": "dns-direct", "address": "223.5.5.5", "detour": "direct" },
                    { "tag": "dns-fake", "address": "fakeip" },
                ],
            },
            "inbounds": [
                {
                    "type": "tun",
                    "tag": "tun-in",
                    "interface_name": settings.interface_name,
                    "inet4_address": settings.inet4_address,
                    "mtu": settings.mtu,
                    "auto_route": true,
                    "strict_route": true,
                    "stack": "system",
                    "endpoint_independent_nat": true,
                    "sniff": true,
                },
            ],
            "outbounds": [
                {
                    "type": "socks",
                    "tag": "proxy",
                    "server": settings.socks_address,
                    "server_port": settings.socks_port,
                    "udp_fragment": true,
                },
                { "type": "direct", "tag": "direct" },
                { "type": "block", "tag": "block" },
                { "type": "dns", "tag": "dns-out" },
            ],
            "route": {
                "auto_detect_interface": true,
                "final": "proxy",
                "rules": [
                    { "ip_cidr": ["224.0.0.0/3", "ff00::/8"], "outbound": "block" },
                    { "port": 53, "outbound": "dns-out" },
                ],
            },
        })
    }
}
