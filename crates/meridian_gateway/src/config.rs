//! Gateway process configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Everything the gateway process needs to start. Deserialized from the
/// launcher's TOML config with per-field defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server name reported to MSSP crawlers.
    pub server_name: String,
    /// Raw telnet listener. An SSH terminator may sit in front of this
    /// bind; the gateway itself speaks plain telnet on it.
    pub telnet_bind: Option<SocketAddr>,
    /// TLS-wrapped telnet listener.
    pub tls_bind: Option<SocketAddr>,
    /// PEM certificate chain for the TLS listener.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key for the TLS listener.
    pub tls_key: Option<PathBuf>,
    /// WebSocket listener.
    pub websocket_bind: Option<SocketAddr>,
    /// Address of the logic process's wire server.
    pub logic_address: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_name: "Meridian".into(),
            telnet_bind: Some("0.0.0.0:4000".parse().expect("static address")),
            tls_bind: None,
            tls_cert: None,
            tls_key: None,
            websocket_bind: Some("0.0.0.0:4002".parse().expect("static address")),
            logic_address: "127.0.0.1:4005".parse().expect("static address"),
        }
    }
}
