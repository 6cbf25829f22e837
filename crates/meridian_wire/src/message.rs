//! Wire message envelopes, command taxonomy and administrative op codes.
//!
//! The single-byte identifiers here are stable across builds: gateway and
//! logic processes from different deployments must interoperate, so codes
//! are never renumbered.

use crate::WireError;
use serde::{Deserialize, Serialize};

/// Top-level wire command carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireCommand {
    /// Client text bound for the logic process. Always compressed.
    DeliverToLogic = 0x01,
    /// Server text bound for a client via the gateway. Always compressed.
    DeliverToGateway = 0x02,
    /// Administrative instruction for the logic process.
    AdminToLogic = 0x03,
    /// Administrative instruction for the gateway process.
    AdminToGateway = 0x04,
    /// Liveness/status probe, answered with counters.
    StatusPing = 0x05,
    /// Named cross-process function invocation.
    FunctionCall = 0x06,
    /// Reply to a [`WireCommand::FunctionCall`].
    FunctionReply = 0x07,
}

impl WireCommand {
    /// Whether payloads for this command are compressed on the wire.
    ///
    /// Only the two high-volume deliver-text commands pay the cost of the
    /// zlib round trip; control traffic stays plain.
    pub fn compressed(self) -> bool {
        matches!(self, WireCommand::DeliverToLogic | WireCommand::DeliverToGateway)
    }
}

impl TryFrom<u8> for WireCommand {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::DeliverToLogic),
            0x02 => Ok(Self::DeliverToGateway),
            0x03 => Ok(Self::AdminToLogic),
            0x04 => Ok(Self::AdminToGateway),
            0x05 => Ok(Self::StatusPing),
            0x06 => Ok(Self::FunctionCall),
            0x07 => Ok(Self::FunctionReply),
            other => Err(WireError::UnknownCode(other)),
        }
    }
}

/// Administrative operation codes carried inside Admin* payloads.
///
/// Stable identifiers; see the crate docs on interoperability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum AdminOp {
    /// New session announcement (gateway to logic, full data).
    SessionConnect = 0x01,
    /// Session closing, payload carries a reason.
    SessionDisconnect = 0x02,
    /// Drop every session (logic to gateway).
    SessionDisconnectAll = 0x03,
    /// Full-table snapshot or incremental sync payload.
    SessionSync = 0x04,
    /// Authentication result for a session.
    Login = 0x05,
    /// Orderly shutdown of the receiving process.
    Shutdown = 0x06,
    /// Logic restart that must keep gateway connections alive.
    Reload = 0x07,
    /// Logic state reset without a process restart.
    Reset = 0x08,
    /// Status probe answered with runtime counters.
    StatusPing = 0x09,
}

impl From<AdminOp> for u8 {
    fn from(op: AdminOp) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for AdminOp {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::SessionConnect),
            0x02 => Ok(Self::SessionDisconnect),
            0x03 => Ok(Self::SessionDisconnectAll),
            0x04 => Ok(Self::SessionSync),
            0x05 => Ok(Self::Login),
            0x06 => Ok(Self::Shutdown),
            0x07 => Ok(Self::Reload),
            0x08 => Ok(Self::Reset),
            0x09 => Ok(Self::StatusPing),
            other => Err(format!("unknown admin op {other:#04x}")),
        }
    }
}

/// The transport envelope: command, owning session and opaque payload.
///
/// Transient by design - constructed per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub command: WireCommand,
    /// Session the message concerns; 0 addresses the process itself.
    pub sessid: u32,
    /// Serialized payload. UTF-8 text for the deliver commands, JSON for
    /// everything else.
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Messages not tied to any one session use sessid 0.
    pub const PROCESS_SESSID: u32 = 0;

    /// Client text headed for the logic process.
    pub fn text_to_logic(sessid: u32, text: &str) -> Self {
        Self {
            command: WireCommand::DeliverToLogic,
            sessid,
            payload: text.as_bytes().to_vec(),
        }
    }

    /// Server text headed for a client.
    pub fn text_to_gateway(sessid: u32, text: &str) -> Self {
        Self {
            command: WireCommand::DeliverToGateway,
            sessid,
            payload: text.as_bytes().to_vec(),
        }
    }

    /// Administrative instruction for the logic process.
    pub fn admin_to_logic(sessid: u32, admin: &AdminMessage) -> Result<Self, WireError> {
        Ok(Self {
            command: WireCommand::AdminToLogic,
            sessid,
            payload: serde_json::to_vec(admin)?,
        })
    }

    /// Administrative instruction for the gateway process.
    pub fn admin_to_gateway(sessid: u32, admin: &AdminMessage) -> Result<Self, WireError> {
        Ok(Self {
            command: WireCommand::AdminToGateway,
            sessid,
            payload: serde_json::to_vec(admin)?,
        })
    }

    /// Parses the payload of an Admin* message.
    pub fn parse_admin(&self) -> Result<AdminMessage, WireError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Payload interpreted as UTF-8 text (deliver commands).
    pub fn text(&self) -> Result<&str, WireError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| WireError::Malformed(format!("non-utf8 text payload: {e}")))
    }
}

/// Structured payload of the administrative commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminMessage {
    /// The operation requested.
    pub op: AdminOp,
    /// Op-specific data; sync snapshots, disconnect reasons and the like.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl AdminMessage {
    /// An op with no attached data.
    pub fn bare(op: AdminOp) -> Self {
        Self {
            op,
            data: serde_json::Value::Null,
        }
    }

    /// An op carrying structured data.
    pub fn with_data(op: AdminOp, data: serde_json::Value) -> Self {
        Self { op, data }
    }
}
