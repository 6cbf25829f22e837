//! Sync protocol events and their administrative-command encoding.
//!
//! Events about one session are applied in send order; events about
//! different sessions carry no ordering relative to each other. The TCP
//! wire link preserves per-connection order, which is what the per-session
//! guarantee rides on.

use crate::session::{AccountUid, DisconnectReason, ProtocolFlagMap, PuppetId, SessionRecord, Sessid};
use crate::SessionError;
use meridian_wire::{AdminMessage, AdminOp};
use serde::{Deserialize, Serialize};

/// Which process authored a partial update. Determines which fields the
/// update may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOrigin {
    Gateway,
    Logic,
}

impl PatchOrigin {
    fn name(self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::Logic => "logic",
        }
    }
}

/// Incremental field update for one session.
///
/// `None` means "leave unchanged"; the double-`Option` fields distinguish
/// "unchanged" from "cleared".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    /// Gateway-owned: replaces the negotiated capability map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_flags: Option<ProtocolFlagMap>,
    /// Gateway-owned idle tracking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_last: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_last_visible: Option<u64>,
    /// Logic-owned authentication state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_in: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_uid: Option<Option<AccountUid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub puppet_id: Option<Option<PuppetId>>,
    /// Either side may stash protocol-specific state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<serde_json::Value>,
}

impl SessionPatch {
    /// Applies the patch, enforcing the field-ownership invariant.
    pub fn apply(&self, record: &mut SessionRecord, origin: PatchOrigin) -> Result<(), SessionError> {
        if self.protocol_flags.is_some() && origin != PatchOrigin::Gateway {
            return Err(SessionError::FieldNotOwned {
                field: "protocol_flags",
                origin: origin.name(),
            });
        }
        if (self.cmd_last.is_some() || self.cmd_last_visible.is_some())
            && origin != PatchOrigin::Gateway
        {
            return Err(SessionError::FieldNotOwned {
                field: "cmd_last",
                origin: origin.name(),
            });
        }
        if (self.logged_in.is_some() || self.account_uid.is_some() || self.puppet_id.is_some())
            && origin != PatchOrigin::Logic
        {
            return Err(SessionError::FieldNotOwned {
                field: "logged_in",
                origin: origin.name(),
            });
        }

        if let Some(flags) = &self.protocol_flags {
            record.protocol_flags = flags.clone();
        }
        if let Some(v) = self.cmd_last {
            record.cmd_last = v;
        }
        if let Some(v) = self.cmd_last_visible {
            record.cmd_last_visible = v;
        }
        if let Some(v) = self.logged_in {
            record.logged_in = v;
        }
        if let Some(v) = self.account_uid {
            record.account_uid = v;
        }
        if let Some(v) = self.puppet_id {
            record.puppet_id = v;
        }
        if let Some(v) = &self.server_data {
            record.server_data = v.clone();
        }
        Ok(())
    }
}

/// The session-sync protocol events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Gateway to logic: a new session with its full record.
    Connect { session: SessionRecord },
    /// Either direction: a session is closing.
    Disconnect {
        sessid: Sessid,
        reason: DisconnectReason,
    },
    /// Logic to gateway: drop everyone.
    DisconnectAll,
    /// Whoever just (re)started replaces the peer's entire table.
    FullResync { sessions: Vec<SessionRecord> },
    /// Incremental owned-field update.
    PartialUpdate {
        sessid: Sessid,
        origin: PatchOrigin,
        patch: SessionPatch,
    },
}

impl SyncEvent {
    /// The sessid this event concerns, if any single one.
    pub fn sessid(&self) -> Option<Sessid> {
        match self {
            Self::Connect { session } => Some(session.sessid),
            Self::Disconnect { sessid, .. } | Self::PartialUpdate { sessid, .. } => Some(*sessid),
            Self::DisconnectAll | Self::FullResync { .. } => None,
        }
    }

    /// Encodes the event into the administrative message carrying it.
    ///
    /// Connect, Disconnect and DisconnectAll ride their dedicated op
    /// codes; resyncs and partial updates share the SessionSync op.
    pub fn to_admin(&self) -> Result<AdminMessage, SessionError> {
        let op = match self {
            Self::Connect { .. } => AdminOp::SessionConnect,
            Self::Disconnect { .. } => AdminOp::SessionDisconnect,
            Self::DisconnectAll => AdminOp::SessionDisconnectAll,
            Self::FullResync { .. } | Self::PartialUpdate { .. } => AdminOp::SessionSync,
        };
        Ok(AdminMessage::with_data(op, serde_json::to_value(self)?))
    }

    /// Decodes an administrative message into a sync event.
    pub fn from_admin(admin: &AdminMessage) -> Result<Self, SessionError> {
        match admin.op {
            AdminOp::SessionConnect
            | AdminOp::SessionDisconnect
            | AdminOp::SessionDisconnectAll
            | AdminOp::SessionSync => {
                let event: SyncEvent = serde_json::from_value(admin.data.clone())?;
                Ok(event)
            }
            other => Err(SessionError::Protocol(format!(
                "admin op {other:?} does not carry sync events"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_patch_cannot_touch_logic_fields() {
        let mut record = SessionRecord::new(1, "telnet", "addr");
        let patch = SessionPatch {
            logged_in: Some(true),
            ..Default::default()
        };
        let err = patch.apply(&mut record, PatchOrigin::Gateway).unwrap_err();
        assert!(matches!(err, SessionError::FieldNotOwned { .. }));
        assert!(!record.logged_in);
    }

    #[test]
    fn test_logic_patch_cannot_touch_gateway_fields() {
        let mut record = SessionRecord::new(1, "telnet", "addr");
        let mut flags = ProtocolFlagMap::new();
        flags.insert("screen_width".into(), serde_json::json!(80));
        let patch = SessionPatch {
            protocol_flags: Some(flags),
            ..Default::default()
        };
        assert!(patch.apply(&mut record, PatchOrigin::Logic).is_err());
    }

    #[test]
    fn test_owned_patches_apply() {
        let mut record = SessionRecord::new(1, "telnet", "addr");

        let mut flags = ProtocolFlagMap::new();
        flags.insert("ansi".into(), serde_json::json!(true));
        SessionPatch {
            protocol_flags: Some(flags.clone()),
            cmd_last: Some(1000),
            ..Default::default()
        }
        .apply(&mut record, PatchOrigin::Gateway)
        .unwrap();
        assert_eq!(record.protocol_flags, flags);
        assert_eq!(record.cmd_last, 1000);

        SessionPatch {
            logged_in: Some(true),
            account_uid: Some(Some(AccountUid(5))),
            puppet_id: Some(Some(PuppetId(9))),
            ..Default::default()
        }
        .apply(&mut record, PatchOrigin::Logic)
        .unwrap();
        assert!(record.logged_in);
        assert_eq!(record.account_uid, Some(AccountUid(5)));

        // Clearing the puppet is distinct from leaving it alone.
        SessionPatch {
            puppet_id: Some(None),
            ..Default::default()
        }
        .apply(&mut record, PatchOrigin::Logic)
        .unwrap();
        assert_eq!(record.puppet_id, None);
    }

    #[test]
    fn test_sync_event_admin_round_trip() {
        let events = vec![
            SyncEvent::Connect {
                session: SessionRecord::new(3, "telnet", "addr"),
            },
            SyncEvent::Disconnect {
                sessid: 3,
                reason: DisconnectReason::Timeout,
            },
            SyncEvent::DisconnectAll,
            SyncEvent::FullResync {
                sessions: vec![SessionRecord::new(1, "telnet", "a")],
            },
            SyncEvent::PartialUpdate {
                sessid: 1,
                origin: PatchOrigin::Logic,
                patch: SessionPatch {
                    logged_in: Some(true),
                    ..Default::default()
                },
            },
        ];

        for event in events {
            let admin = event.to_admin().unwrap();
            let back = SyncEvent::from_admin(&admin).unwrap();
            assert_eq!(back, event);
        }
    }

    #[test]
    fn test_sync_event_op_codes() {
        let connect = SyncEvent::Connect {
            session: SessionRecord::new(1, "telnet", "a"),
        };
        assert_eq!(connect.to_admin().unwrap().op, AdminOp::SessionConnect);
        assert_eq!(
            SyncEvent::DisconnectAll.to_admin().unwrap().op,
            AdminOp::SessionDisconnectAll
        );
        assert_eq!(
            SyncEvent::FullResync { sessions: vec![] }.to_admin().unwrap().op,
            AdminOp::SessionSync
        );

        let foreign = AdminMessage::bare(AdminOp::Shutdown);
        assert!(SyncEvent::from_admin(&foreign).is_err());
    }
}
