//! The two per-process session registries.
//!
//! Each process mutates only its own registry and only from its own event
//! loop; the registries converge through [`SyncEvent`]s rather than shared
//! state. `DashMap` keeps lookups cheap from the many per-connection
//! tasks.

use crate::session::{
    AccountUid, GatewayPhase, LogicPhase, ProtocolFlagMap, PuppetId, SessionRecord, Sessid,
};
use crate::sync::{PatchOrigin, SessionPatch, SyncEvent};
use crate::SessionError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct GatewayEntry {
    record: SessionRecord,
    phase: GatewayPhase,
}

/// Gateway-side registry: assigns sessids and owns negotiation-sourced
/// fields.
#[derive(Debug, Default)]
pub struct GatewaySessions {
    sessions: DashMap<Sessid, GatewayEntry>,
    next_sessid: AtomicU32,
}

impl GatewaySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session in the `Connecting` phase with a fresh sessid.
    pub fn create(&self, protocol_key: &str, address: &str) -> SessionRecord {
        let sessid = self.next_sessid.fetch_add(1, Ordering::Relaxed) + 1;
        let record = SessionRecord::new(sessid, protocol_key, address);
        self.sessions.insert(
            sessid,
            GatewayEntry {
                record: record.clone(),
                phase: GatewayPhase::Connecting,
            },
        );
        debug!(sessid, protocol_key, address, "session created");
        record
    }

    /// Current lifecycle phase, if the session exists.
    pub fn phase(&self, sessid: Sessid) -> Option<GatewayPhase> {
        self.sessions.get(&sessid).map(|e| e.phase)
    }

    /// Advances the lifecycle phase.
    pub fn set_phase(&self, sessid: Sessid, phase: GatewayPhase) -> Result<(), SessionError> {
        let mut entry = self
            .sessions
            .get_mut(&sessid)
            .ok_or(SessionError::UnknownSession(sessid))?;
        entry.phase = phase;
        Ok(())
    }

    /// True once teardown has begun; negotiation callbacks check this and
    /// become no-ops.
    pub fn tearing_down(&self, sessid: Sessid) -> bool {
        match self.phase(sessid) {
            Some(GatewayPhase::Disconnecting) | Some(GatewayPhase::Gone) | None => true,
            _ => false,
        }
    }

    /// Snapshot of one record.
    pub fn get(&self, sessid: Sessid) -> Option<SessionRecord> {
        self.sessions.get(&sessid).map(|e| e.record.clone())
    }

    /// Replaces the negotiated capability map (gateway-owned field).
    pub fn update_flags(&self, sessid: Sessid, flags: ProtocolFlagMap) -> Result<(), SessionError> {
        let mut entry = self
            .sessions
            .get_mut(&sessid)
            .ok_or(SessionError::UnknownSession(sessid))?;
        entry.record.protocol_flags = flags;
        Ok(())
    }

    /// Marks command activity for idle tracking.
    pub fn touch(&self, sessid: Sessid, visible: bool) {
        if let Some(mut entry) = self.sessions.get_mut(&sessid) {
            entry.record.touch(visible);
        }
    }

    /// Applies a logic-originated patch to the mirror.
    pub fn apply_patch(&self, sessid: Sessid, patch: &SessionPatch) -> Result<(), SessionError> {
        let mut entry = self
            .sessions
            .get_mut(&sessid)
            .ok_or(SessionError::UnknownSession(sessid))?;
        patch.apply(&mut entry.record, PatchOrigin::Logic)
    }

    /// Removes a session outright.
    pub fn remove(&self, sessid: Sessid) -> Option<SessionRecord> {
        self.sessions.remove(&sessid).map(|(_, e)| {
            debug!(sessid, "session removed from gateway registry");
            e.record
        })
    }

    /// Full table snapshot, the payload of a
    /// [`SyncEvent::FullResync`].
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.sessions.iter().map(|e| e.record.clone()).collect()
    }

    /// The FullResync event a gateway sends whenever it detects a freshly
    /// attached logic link.
    pub fn full_resync_event(&self) -> SyncEvent {
        SyncEvent::FullResync {
            sessions: self.snapshot(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All live sessids.
    pub fn sessids(&self) -> Vec<Sessid> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }
}

#[derive(Debug, Clone)]
struct LogicEntry {
    record: SessionRecord,
    phase: LogicPhase,
}

/// Logic-side registry: the mirror rebuilt from gateway snapshots, owner
/// of authentication and puppeting state.
#[derive(Debug, Default)]
pub struct LogicSessions {
    sessions: DashMap<Sessid, LogicEntry>,
}

impl LogicSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one inbound sync event, returning the sessions that were
    /// removed so the caller can clean up attached state.
    pub fn apply(&self, event: SyncEvent) -> Result<Vec<SessionRecord>, SessionError> {
        match event {
            SyncEvent::Connect { session } => {
                let sessid = session.sessid;
                self.sessions.insert(
                    sessid,
                    LogicEntry {
                        record: session,
                        phase: LogicPhase::Active,
                    },
                );
                info!(sessid, "session registered with logic");
                Ok(Vec::new())
            }
            SyncEvent::Disconnect { sessid, reason } => {
                match self.sessions.remove(&sessid) {
                    Some((_, entry)) => {
                        info!(sessid, %reason, "session disconnected");
                        Ok(vec![entry.record])
                    }
                    None => {
                        warn!(sessid, "disconnect for unknown session");
                        Ok(Vec::new())
                    }
                }
            }
            SyncEvent::DisconnectAll => {
                let removed: Vec<SessionRecord> =
                    self.sessions.iter().map(|e| e.record.clone()).collect();
                self.sessions.clear();
                info!(count = removed.len(), "all sessions disconnected");
                Ok(removed)
            }
            SyncEvent::FullResync { sessions } => {
                // Replace the entire table with the snapshot; this is the
                // restart-recovery path.
                self.sessions.clear();
                let count = sessions.len();
                for record in sessions {
                    let phase = match (record.logged_in, record.puppet_id) {
                        (_, Some(_)) => LogicPhase::Puppeting,
                        (true, None) => LogicPhase::Authenticated,
                        (false, None) => LogicPhase::Active,
                    };
                    self.sessions.insert(record.sessid, LogicEntry { record, phase });
                }
                info!(count, "logic registry rebuilt from gateway snapshot");
                Ok(Vec::new())
            }
            SyncEvent::PartialUpdate {
                sessid,
                origin,
                patch,
            } => {
                let mut entry = self
                    .sessions
                    .get_mut(&sessid)
                    .ok_or(SessionError::UnknownSession(sessid))?;
                patch.apply(&mut entry.record, origin)?;
                Ok(Vec::new())
            }
        }
    }

    /// Logic-owned login transition. Produces the patch the gateway mirror
    /// needs.
    pub fn set_login(&self, sessid: Sessid, account: AccountUid) -> Result<SessionPatch, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(&sessid)
            .ok_or(SessionError::UnknownSession(sessid))?;
        entry.record.logged_in = true;
        entry.record.account_uid = Some(account);
        entry.phase = LogicPhase::Authenticated;
        Ok(SessionPatch {
            logged_in: Some(true),
            account_uid: Some(Some(account)),
            ..Default::default()
        })
    }

    /// Logic-owned puppet assignment. Produces the mirror patch.
    pub fn set_puppet(
        &self,
        sessid: Sessid,
        puppet: Option<PuppetId>,
    ) -> Result<SessionPatch, SessionError> {
        let mut entry = self
            .sessions
            .get_mut(&sessid)
            .ok_or(SessionError::UnknownSession(sessid))?;
        entry.record.puppet_id = puppet;
        entry.phase = match puppet {
            Some(_) => LogicPhase::Puppeting,
            None if entry.record.logged_in => LogicPhase::Authenticated,
            None => LogicPhase::Active,
        };
        Ok(SessionPatch {
            puppet_id: Some(puppet),
            ..Default::default()
        })
    }

    /// The session currently controlling `puppet`, if any.
    pub fn puppeteer(&self, puppet: PuppetId) -> Option<Sessid> {
        self.sessions
            .iter()
            .find(|e| e.record.puppet_id == Some(puppet))
            .map(|e| *e.key())
    }

    pub fn phase(&self, sessid: Sessid) -> Option<LogicPhase> {
        self.sessions.get(&sessid).map(|e| e.phase)
    }

    pub fn get(&self, sessid: Sessid) -> Option<SessionRecord> {
        self.sessions.get(&sessid).map(|e| e.record.clone())
    }

    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.sessions.iter().map(|e| e.record.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions logged into the given account.
    pub fn sessions_for_account(&self, account: AccountUid) -> Vec<Sessid> {
        self.sessions
            .iter()
            .filter(|e| e.record.account_uid == Some(account))
            .map(|e| *e.key())
            .collect()
    }
}
