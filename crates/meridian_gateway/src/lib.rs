//! # Gateway process
//!
//! The half of Meridian that faces the clients. It accepts telnet, TLS
//! telnet and WebSocket connections, negotiates capabilities, assigns
//! sessids, and relays traffic over the wire link to the logic process.
//! The gateway is the stable half of the deployment: the logic process
//! may restart at will and every client stays connected, because the
//! gateway holds the sockets and the authoritative session table and
//! re-syncs it over each fresh link.
//!
//! Layout:
//!
//! * [`state::GatewayShared`] - session registry, wire link set and
//!   per-connection output channels
//! * [`pump`] - the per-connection telnet pump (parser, negotiator,
//!   hard negotiation timeout, MCCP2 output path)
//! * [`ws`] - the WebSocket connection pump (JSON command triples)
//! * [`listener`] - accept loops for the three transports
//! * [`format`] - capability-driven output formatting
//! * [`gateway`] - the process event loop tying it all together

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use state::{ClientOutput, GatewayShared};

pub mod config;
pub mod format;
pub mod gateway;
pub mod listener;
pub mod pump;
pub mod state;
pub mod ws;

use thiserror::Error;

/// Gateway process errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] meridian_wire::WireError),

    #[error(transparent)]
    Session(#[from] meridian_session::SessionError),

    #[error("tls configuration error: {0}")]
    Tls(String),

    #[error("websocket error: {0}")]
    WebSocket(String),
}
