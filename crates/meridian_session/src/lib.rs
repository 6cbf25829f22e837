//! # Session Registries and the Sync Protocol
//!
//! Every live client connection exists twice: as a gateway-side record
//! (owned by the process terminating the socket) and a mirrored logic-side
//! record sharing the same numeric `sessid`. The two registries are kept
//! consistent across independent restarts of either process by the sync
//! events defined here, carried over the wire transport's administrative
//! commands.
//!
//! ## Ownership invariant
//!
//! Capability flags learned from protocol negotiation are gateway-owned;
//! `logged_in`, `account_uid` and `puppet_id` are logic-owned. Partial
//! updates declare their origin and the registries reject writes to
//! fields the sender does not own.
//!
//! ## Restart invariant
//!
//! A logic restart must not drop a single gateway-held connection. A
//! freshly started logic process sends nothing; the gateway notices the
//! new link and pushes a [`SyncEvent::FullResync`] snapshot from which the
//! logic registry is rebuilt wholesale.

pub use registry::{GatewaySessions, LogicSessions};
pub use session::{
    current_timestamp, AccountUid, DisconnectReason, GatewayPhase, LogicPhase, ProtocolFlagMap,
    PuppetId, SessionRecord, Sessid,
};
pub use sync::{PatchOrigin, SessionPatch, SyncEvent};

pub mod registry;
pub mod session;
pub mod sync;

use thiserror::Error;

/// Errors raised by registry and sync operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with the given id in this registry.
    #[error("unknown session {0}")]
    UnknownSession(u32),

    /// A partial update touched a field its origin does not own.
    #[error("field '{field}' is not writable from the {origin} side")]
    FieldNotOwned {
        field: &'static str,
        origin: &'static str,
    },

    /// A sync payload failed to (de)serialize.
    #[error("sync payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A sync event arrived under the wrong administrative op.
    #[error("unexpected sync payload: {0}")]
    Protocol(String),
}
