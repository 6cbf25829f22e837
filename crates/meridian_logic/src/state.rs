//! Shared logic process state.

use crate::auth::{Authenticator, MemoryAuthenticator};
use crate::blocking::BlockingPool;
use crate::commands;
use crate::entity::EntityArena;
use crate::remembered::{remembered_subset, FlagStore, MemoryFlagStore};
use crate::LogicError;
use dashmap::DashMap;
use meridian_cmdset::{CmdSetRegistry, CommandSetStack};
use meridian_session::{
    AccountUid, LogicSessions, PatchOrigin, SessionPatch, SessionRecord, Sessid, SyncEvent,
};
use meridian_wire::{FunctionRegistry, LinkSet, WireMessage};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// State shared by every task in the logic process.
pub struct LogicShared {
    pub config: crate::LogicConfig,
    /// Identifies this process incarnation in logs and status replies;
    /// changes on every restart while sessids survive.
    pub instance_id: Uuid,
    pub sessions: LogicSessions,
    pub links: Arc<LinkSet>,
    pub entities: EntityArena,
    pub authenticator: Arc<dyn Authenticator>,
    pub flag_store: Arc<dyn FlagStore>,
    pub cmdsets: CmdSetRegistry,
    pub functions: FunctionRegistry,
    pub blocking: Arc<BlockingPool>,
    stacks: DashMap<Sessid, Arc<CommandSetStack>>,
    account_names: DashMap<u64, String>,
    started: Instant,
    shutdown: broadcast::Sender<()>,
}

impl LogicShared {
    /// Standard construction with the in-memory authenticator and flag
    /// store.
    pub fn new(config: crate::LogicConfig) -> Arc<Self> {
        let pool = Arc::new(BlockingPool::new(config.blocking_pool_size));
        let authenticator = Arc::new(MemoryAuthenticator::new(pool.clone()));
        Self::with_parts(config, pool, authenticator, Arc::new(MemoryFlagStore::new()))
    }

    /// Construction with injected authenticator and flag store.
    pub fn with_parts(
        config: crate::LogicConfig,
        blocking: Arc<BlockingPool>,
        authenticator: Arc<dyn Authenticator>,
        flag_store: Arc<dyn FlagStore>,
    ) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(4);
        let cmdsets = CmdSetRegistry::new();
        commands::register_factories(&cmdsets);

        let shared = Arc::new(Self {
            config,
            instance_id: Uuid::new_v4(),
            sessions: LogicSessions::new(),
            links: Arc::new(LinkSet::new()),
            entities: EntityArena::new(),
            authenticator,
            flag_store,
            cmdsets,
            functions: FunctionRegistry::new(),
            blocking,
            stacks: DashMap::new(),
            account_names: DashMap::new(),
            started: Instant::now(),
            shutdown,
        });
        shared.register_functions();
        info!(instance = %shared.instance_id, "logic state initialized");
        shared
    }

    /// Remote functions the gateway may call on this process.
    fn register_functions(self: &Arc<Self>) {
        let me = Arc::downgrade(self);
        self.functions.register("status", move |_args, _kwargs| {
            me.upgrade()
                .map(|s| s.status())
                .ok_or_else(|| "logic state gone".to_string())
        });
    }

    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn uptime(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Runtime counters for status pings and the status function.
    pub fn status(&self) -> serde_json::Value {
        json!({
            "instance": self.instance_id.to_string(),
            "uptime": self.uptime(),
            "sessions": self.sessions.len(),
            "links": self.links.attached(),
            "entities": self.entities.len(),
            "blocking_available": self.blocking.available(),
        })
    }

    /// The session's command-set stack, created on first use.
    pub fn stack_for(&self, sessid: Sessid) -> Arc<CommandSetStack> {
        self.stacks
            .entry(sessid)
            .or_insert_with(|| {
                Arc::new(CommandSetStack::new(
                    self.cmdsets.resolve(commands::SESSION_CMDSET),
                ))
            })
            .clone()
    }

    /// Rebuilds every session's stack from registry state. Used after a
    /// full re-sync or a state reset: logged-in sessions get their
    /// account commands back without replaying logins.
    pub async fn rebuild_stacks(&self) {
        self.stacks.clear();
        for record in self.sessions.snapshot() {
            let stack = self.stack_for(record.sessid);
            if record.logged_in {
                stack.push(self.cmdsets.resolve(commands::ACCOUNT_CMDSET)).await;
            }
        }
        debug!(count = self.stacks.len(), "command stacks rebuilt");
    }

    /// Records the display name for an account.
    pub fn set_account_name(&self, account: AccountUid, name: &str) {
        self.account_names.insert(account.0, name.to_string());
    }

    pub fn account_name(&self, account: AccountUid) -> String {
        self.account_names
            .get(&account.0)
            .map(|n| n.clone())
            .unwrap_or_else(|| format!("account-{}", account.0))
    }

    /// Sends server text to one session's client.
    pub async fn send_text(&self, sessid: Sessid, text: &str) {
        let msg = WireMessage::text_to_gateway(sessid, text);
        if let Err(e) = self.links.send_to_session(sessid, msg).await {
            warn!(sessid, error = %e, "text not delivered");
        }
    }

    /// Sends one sync event to the attached gateways.
    pub fn send_sync(&self, event: &SyncEvent) -> Result<(), LogicError> {
        let admin = event.to_admin()?;
        let sessid = event.sessid().unwrap_or(WireMessage::PROCESS_SESSID);
        self.links
            .broadcast(&WireMessage::admin_to_gateway(sessid, &admin)?)?;
        Ok(())
    }

    /// Mirrors a logic-owned patch to the gateway's session record.
    pub fn mirror_patch(&self, sessid: Sessid, patch: SessionPatch) {
        let event = SyncEvent::PartialUpdate {
            sessid,
            origin: PatchOrigin::Logic,
            patch,
        };
        if let Err(e) = self.send_sync(&event) {
            warn!(sessid, error = %e, "mirror patch not delivered");
        }
    }

    /// Post-removal cleanup for one session: remembered flags, stack and
    /// route teardown.
    pub fn cleanup_session(&self, record: &SessionRecord) {
        if let Some(account) = record.account_uid {
            let subset = remembered_subset(&record.protocol_flags);
            if !subset.is_empty() {
                self.flag_store.remember(account, subset);
                debug!(sessid = record.sessid, account = account.0, "display flags remembered");
            }
        }
        self.stacks.remove(&record.sessid);
        self.links.release_session(record.sessid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogicConfig;
    use meridian_session::ProtocolFlagMap;

    #[tokio::test]
    async fn test_stack_for_creates_session_base() {
        let shared = LogicShared::new(LogicConfig::default());
        let stack = shared.stack_for(1);
        assert!(stack.current().get("connect").is_some());
        // Same stack on repeat lookups.
        assert!(Arc::ptr_eq(&stack, &shared.stack_for(1)));
    }

    #[tokio::test]
    async fn test_rebuild_restores_account_commands() {
        let shared = LogicShared::new(LogicConfig::default());
        shared
            .sessions
            .apply(SyncEvent::Connect {
                session: SessionRecord::new(1, "telnet", "addr"),
            })
            .unwrap();
        shared.sessions.set_login(1, AccountUid(5)).unwrap();

        shared.rebuild_stacks().await;
        let current = shared.stack_for(1).current();
        assert!(current.get("say").is_some());
        assert!(current.get("connect").is_none());
    }

    #[test]
    fn test_cleanup_remembers_flags_for_logged_in_sessions() {
        let shared = LogicShared::new(LogicConfig::default());
        let mut record = SessionRecord::new(3, "telnet", "addr");
        record.account_uid = Some(AccountUid(9));
        let mut flags = ProtocolFlagMap::new();
        flags.insert("ansi".into(), serde_json::json!(true));
        record.protocol_flags = flags;

        shared.cleanup_session(&record);
        let recalled = shared.flag_store.recall(AccountUid(9)).unwrap();
        assert_eq!(recalled["ansi"], serde_json::json!(true));
    }

    #[test]
    fn test_status_shape() {
        let shared = LogicShared::new(LogicConfig::default());
        let status = shared.status();
        assert_eq!(status["sessions"], 0);
        assert!(status["instance"].as_str().is_some());
    }
}
