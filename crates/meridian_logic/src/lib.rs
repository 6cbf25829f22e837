//! # Logic process
//!
//! The restartable half of Meridian. It listens for gateway wire links,
//! mirrors the session table from gateway snapshots, owns accounts,
//! puppets and per-session command-set stacks, and routes every inbound
//! line through the session's folded command set. Because all durable
//! connection state lives on the gateway side, this process can restart
//! at any moment: the next link the gateway opens carries a full
//! re-sync and the registries here are rebuilt from it.
//!
//! Layout:
//!
//! * [`state::LogicShared`] - registries, link set, authenticator,
//!   remembered-flag store and the bounded blocking pool
//! * [`auth`] - the [`auth::Authenticator`] seam plus the in-memory
//!   reference implementation with throttling
//! * [`entity`] - the puppet arena and the tagged puppet-control results
//! * [`commands`] - command-set factories and the line dispatcher
//! * [`logic`] - the wire event loop and administrative op handling

pub use auth::{AuthOutcome, Authenticator, MemoryAuthenticator};
pub use config::LogicConfig;
pub use entity::{Entity, EntityArena, PuppetOutcome};
pub use logic::Logic;
pub use remembered::{FlagStore, MemoryFlagStore};
pub use state::LogicShared;

pub mod auth;
pub mod blocking;
pub mod commands;
pub mod config;
pub mod entity;
pub mod logic;
pub mod remembered;
pub mod state;

use thiserror::Error;

/// Logic process errors.
#[derive(Debug, Error)]
pub enum LogicError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] meridian_wire::WireError),

    #[error(transparent)]
    Session(#[from] meridian_session::SessionError),

    #[error(transparent)]
    CmdSet(#[from] meridian_cmdset::CmdSetError),

    /// A blocking-pool task was cancelled or panicked.
    #[error("blocking task failed: {0}")]
    Blocking(String),
}
