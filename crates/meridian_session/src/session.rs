//! The session record and its lifecycle enums.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Numeric session identifier, assigned monotonically by the gateway and
/// shared verbatim by the mirrored logic-side record.
pub type Sessid = u32;

/// Account identifier handed out by the external authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountUid(pub u64);

impl std::fmt::Display for AccountUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "account-{}", self.0)
    }
}

/// Index into the logic process's entity arena. The gateway never holds
/// more than this id; the authoritative entity table lives with logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PuppetId(pub u64);

impl std::fmt::Display for PuppetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "puppet-{}", self.0)
    }
}

/// Flat capability map as learned by protocol negotiation.
///
/// Keys are stable capability names ("screen_width", "ttype", ...); values
/// are whatever JSON shape the capability calls for.
pub type ProtocolFlagMap = serde_json::Map<String, serde_json::Value>;

/// Gateway-side lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayPhase {
    /// Transport accepted, negotiation in progress.
    Connecting,
    /// Announced to logic, awaiting acknowledgement.
    Registered,
    /// Normal traffic flowing.
    Active,
    /// Teardown started; late negotiation callbacks become no-ops.
    Disconnecting,
    /// Removed from the registry.
    Gone,
}

/// Logic-side lifecycle; mirrors the gateway phases and refines Active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicPhase {
    Registered,
    Active,
    /// Post-login, not yet controlling an entity.
    Authenticated,
    /// Controlling an in-world entity.
    Puppeting,
    Disconnecting,
    Gone,
}

/// Why a session ended. Carried in disconnect sync events and surfaced to
/// the client as a reason string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// Client closed the connection or asked to quit.
    ClientDisconnect,
    /// Idle or transport timeout.
    Timeout,
    /// Orderly server shutdown.
    ServerShutdown,
    /// Something went wrong; the string is shown to the client.
    Error(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientDisconnect => write!(f, "disconnected"),
            Self::Timeout => write!(f, "timed out"),
            Self::ServerShutdown => write!(f, "server shutdown"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// One live connection, as mirrored on both sides of the wire.
///
/// The sync-relevant subset (everything serialized here) must agree
/// between the gateway and logic records at all times; `server_data` is an
/// opaque bag for protocol-specific state that syncs but is never
/// interpreted by the registries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sessid: Sessid,
    /// Which transport produced this session ("telnet", "telnet_tls",
    /// "websocket").
    pub protocol_key: String,
    /// Client network address, kept as a string for display and logs.
    pub address: String,
    /// Logic-owned: set true after a successful login.
    pub logged_in: bool,
    /// Logic-owned: the authenticated account, if any.
    pub account_uid: Option<AccountUid>,
    /// Logic-owned: the entity currently controlled, if any.
    pub puppet_id: Option<PuppetId>,
    /// Gateway-owned: negotiated capability flags.
    pub protocol_flags: ProtocolFlagMap,
    /// Connection epoch seconds.
    pub conn_time: u64,
    /// Epoch seconds of the last command of any kind.
    pub cmd_last: u64,
    /// Epoch seconds of the last *visible* command; hidden keepalives and
    /// OOB traffic update only `cmd_last`.
    pub cmd_last_visible: u64,
    /// Opaque protocol-specific state.
    #[serde(default)]
    pub server_data: serde_json::Value,
}

impl SessionRecord {
    /// Creates a fresh record at the current time.
    pub fn new(sessid: Sessid, protocol_key: impl Into<String>, address: impl Into<String>) -> Self {
        let now = current_timestamp();
        Self {
            sessid,
            protocol_key: protocol_key.into(),
            address: address.into(),
            logged_in: false,
            account_uid: None,
            puppet_id: None,
            protocol_flags: ProtocolFlagMap::new(),
            conn_time: now,
            cmd_last: now,
            cmd_last_visible: now,
            server_data: serde_json::Value::Null,
        }
    }

    /// Marks command activity for idle tracking.
    pub fn touch(&mut self, visible: bool) {
        let now = current_timestamp();
        self.cmd_last = now;
        if visible {
            self.cmd_last_visible = now;
        }
    }

    /// Seconds since the last visible command.
    pub fn idle_seconds(&self) -> u64 {
        current_timestamp().saturating_sub(self.cmd_last_visible)
    }

    /// Seconds connected.
    pub fn conn_seconds(&self) -> u64 {
        current_timestamp().saturating_sub(self.conn_time)
    }
}

/// Current unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_defaults() {
        let session = SessionRecord::new(1, "telnet", "127.0.0.1:50000");
        assert!(!session.logged_in);
        assert!(session.account_uid.is_none());
        assert!(session.puppet_id.is_none());
        assert!(session.protocol_flags.is_empty());
        assert_eq!(session.cmd_last, session.conn_time);
    }

    #[test]
    fn test_touch_distinguishes_visible_commands() {
        let mut session = SessionRecord::new(1, "telnet", "127.0.0.1:50000");
        session.cmd_last = 0;
        session.cmd_last_visible = 0;

        session.touch(false);
        assert!(session.cmd_last > 0);
        assert_eq!(session.cmd_last_visible, 0);

        session.touch(true);
        assert!(session.cmd_last_visible > 0);
    }

    #[test]
    fn test_record_serialization_round_trip() {
        let mut session = SessionRecord::new(9, "websocket", "10.0.0.1:1234");
        session.logged_in = true;
        session.account_uid = Some(AccountUid(77));
        session.puppet_id = Some(PuppetId(3));
        session
            .protocol_flags
            .insert("screen_width".into(), serde_json::json!(120));

        let raw = serde_json::to_string(&session).unwrap();
        let back: SessionRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, session);
    }
}
