//! # Wire Transport Protocol
//!
//! Private binary RPC used exclusively between the Meridian gateway and
//! logic processes. The two processes have independent lifecycles - the
//! logic side restarts to pick up code changes while the gateway keeps
//! every client socket alive - so this link is built for reattachment:
//! multiple gateway connections may be attached at once, the connecting
//! side reconnects with growing backoff, and a full session re-sync always
//! precedes normal traffic after a reconnect.
//!
//! ## Message shape
//!
//! Every message is `{command, sessid, payload}`. Payloads larger than
//! [`frame::MAX_PAYLOAD`] are split into sequential numbered chunks
//! sharing a message id and reassembled before delivery. The two
//! high-volume deliver-text commands are always zlib-compressed on the
//! wire; administrative control commands are not.
//!
//! ## Failure containment
//!
//! A malformed frame drops only the offending connection. A failing
//! remote function call is caught at the responder and returned as a
//! structured error reply, never as a transport fault.

pub use frame::{Frame, FrameFlags, MAX_FRAME, MAX_PAYLOAD};
pub use link::{LinkEvent, LinkHandle, LinkId, LinkSet, WireConnector, WireServer};
pub use message::{AdminMessage, AdminOp, WireCommand, WireMessage};
pub use rpc::{FunctionCall, FunctionOutcome, FunctionRegistry, FunctionReply};

pub mod chunk;
pub mod compress;
pub mod frame;
pub mod link;
pub mod message;
pub mod rpc;

use thiserror::Error;

/// Errors raised by the wire transport layer.
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying socket failure.
    #[error("wire i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame failed structural validation; the connection is dropped.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A command or admin op byte outside the stable enum.
    #[error("unknown wire code {0:#04x}")]
    UnknownCode(u8),

    /// Payload failed to (de)compress.
    #[error("payload compression error: {0}")]
    Compression(String),

    /// Structured payload failed to (de)serialize.
    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No link is attached to carry the message.
    #[error("no wire link attached")]
    NoLink,

    /// The peer closed the link mid-operation.
    #[error("wire link closed")]
    LinkClosed,
}
