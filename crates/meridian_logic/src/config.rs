//! Logic process configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Everything the logic process needs to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogicConfig {
    /// Server name used in status replies.
    pub server_name: String,
    /// Bind address of the wire server the gateways connect to.
    pub wire_bind: SocketAddr,
    /// Concurrent task cap for the blocking pool.
    pub blocking_pool_size: usize,
}

impl Default for LogicConfig {
    fn default() -> Self {
        Self {
            server_name: "Meridian".into(),
            wire_bind: "127.0.0.1:4005".parse().expect("static address"),
            blocking_pool_size: 16,
        }
    }
}
