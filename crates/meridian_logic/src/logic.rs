//! The logic process event loop.
//!
//! Listens for gateway wire links and services their traffic: inbound
//! client lines go through the command dispatcher, administrative sync
//! events mutate the mirrored session table, and restart recovery is
//! entirely passive - a freshly attached gateway pushes a full re-sync
//! and the registries here rebuild from it. This process never
//! announces sessions; it only learns about them.

use crate::commands;
use crate::state::LogicShared;
use crate::{LogicConfig, LogicError};
use meridian_session::SyncEvent;
use meridian_wire::{
    AdminMessage, AdminOp, FunctionCall, LinkEvent, LinkId, WireCommand, WireMessage, WireServer,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Depth of the wire event channel feeding the loop.
const EVENT_QUEUE: usize = 256;

/// The logic process.
pub struct Logic {
    shared: Arc<LogicShared>,
}

impl Logic {
    pub fn new(config: LogicConfig) -> Self {
        Self {
            shared: LogicShared::new(config),
        }
    }

    pub fn with_shared(shared: Arc<LogicShared>) -> Self {
        Self { shared }
    }

    pub fn shared(&self) -> Arc<LogicShared> {
        self.shared.clone()
    }

    /// Runs the process until shutdown.
    pub async fn run(&self) -> Result<(), LogicError> {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        let bind = self.shared.config.wire_bind;
        let links = self.shared.links.clone();
        let shutdown = self.shared.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = WireServer::run(bind, links, events_tx, shutdown).await {
                error!("wire server failed: {e}");
            }
        });

        self.event_loop(events_rx).await;
        Ok(())
    }

    /// Services wire events until the shutdown signal or channel close.
    pub async fn event_loop(&self, mut events: mpsc::Receiver<LinkEvent>) {
        let mut shutdown = self.shared.shutdown_signal();
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => handle_event(&self.shared, event).await,
                        None => {
                            debug!("wire event channel closed");
                            return;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("logic event loop stopping");
                    return;
                }
            }
        }
    }
}

/// Dispatches one wire event.
pub async fn handle_event(shared: &Arc<LogicShared>, event: LinkEvent) {
    match event {
        LinkEvent::Connected(id) => {
            // The gateway speaks first: its full re-sync arrives as a
            // normal admin message on this link.
            info!(link = %id, "gateway link up, awaiting re-sync");
        }
        LinkEvent::Disconnected(id) => {
            warn!(link = %id, "gateway link down");
        }
        LinkEvent::Message(id, msg) => {
            if let Err(e) = handle_message(shared, id, &msg).await {
                warn!(link = %id, error = %e, "wire message mishandled");
            }
        }
    }
}

/// Handles one reassembled inbound message from a gateway.
pub async fn handle_message(
    shared: &Arc<LogicShared>,
    link: LinkId,
    msg: &WireMessage,
) -> Result<(), LogicError> {
    match msg.command {
        WireCommand::DeliverToLogic => {
            shared.links.claim_session(msg.sessid, link);
            commands::dispatch(shared, msg.sessid, msg.text()?).await;
            Ok(())
        }
        WireCommand::AdminToLogic => handle_admin(shared, link, msg).await,
        WireCommand::StatusPing => {
            let reply = WireMessage {
                command: WireCommand::StatusPing,
                sessid: WireMessage::PROCESS_SESSID,
                payload: serde_json::to_vec(&shared.status())
                    .map_err(meridian_wire::WireError::from)?,
            };
            shared.links.broadcast(&reply)?;
            Ok(())
        }
        WireCommand::FunctionCall => {
            let call = FunctionCall::from_message(msg)?;
            let reply = shared.functions.handle(call);
            shared.links.broadcast(&reply.into_message(msg.sessid)?)?;
            Ok(())
        }
        WireCommand::FunctionReply => {
            debug!(sessid = msg.sessid, "function reply received");
            Ok(())
        }
        WireCommand::DeliverToGateway | WireCommand::AdminToGateway => {
            warn!(command = ?msg.command, "gateway-bound message arrived at logic, dropped");
            Ok(())
        }
    }
}

/// Handles one administrative instruction from a gateway.
async fn handle_admin(
    shared: &Arc<LogicShared>,
    link: LinkId,
    msg: &WireMessage,
) -> Result<(), LogicError> {
    let admin = msg.parse_admin()?;
    match admin.op {
        AdminOp::SessionConnect
        | AdminOp::SessionDisconnect
        | AdminOp::SessionDisconnectAll
        | AdminOp::SessionSync => handle_sync(shared, link, SyncEvent::from_admin(&admin)?).await,
        AdminOp::Shutdown => {
            info!("shutdown instructed by gateway");
            let _ = shared.send_sync(&SyncEvent::DisconnectAll);
            shared.trigger_shutdown();
            Ok(())
        }
        AdminOp::Reload => {
            // Announce the restart so gateways hold their clients, then
            // stop; the supervisor brings a fresh process up and the
            // re-sync restores every session.
            info!("reload instructed, restarting logic");
            shared.links.broadcast(&WireMessage::admin_to_gateway(
                WireMessage::PROCESS_SESSID,
                &AdminMessage::bare(AdminOp::Reload),
            )?)?;
            shared.trigger_shutdown();
            Ok(())
        }
        AdminOp::Reset => {
            // In-place state reset: sessions survive, everything layered
            // on top of them is rebuilt.
            info!("state reset instructed");
            shared.rebuild_stacks().await;
            Ok(())
        }
        AdminOp::StatusPing => {
            let reply = AdminMessage::with_data(AdminOp::StatusPing, shared.status());
            shared.links.broadcast(&WireMessage::admin_to_gateway(
                WireMessage::PROCESS_SESSID,
                &reply,
            )?)?;
            Ok(())
        }
        AdminOp::Login => {
            // Login state travels the other way, as partial updates.
            debug!(sessid = msg.sessid, "login admin op ignored at logic");
            Ok(())
        }
    }
}

/// Applies one gateway-originated sync event to the mirror.
async fn handle_sync(
    shared: &Arc<LogicShared>,
    link: LinkId,
    event: SyncEvent,
) -> Result<(), LogicError> {
    match event {
        SyncEvent::Connect { session } => {
            let sessid = session.sessid;
            shared.links.claim_session(sessid, link);
            shared.sessions.apply(SyncEvent::Connect { session })?;
            // Instantiating the stack up front keeps first-command latency
            // off the dispatch path.
            shared.stack_for(sessid);
            shared
                .send_text(
                    sessid,
                    &format!(
                        "Welcome to {}! Type 'connect <account> <password>' to log in.\n",
                        shared.config.server_name
                    ),
                )
                .await;
            Ok(())
        }
        SyncEvent::FullResync { sessions } => {
            for record in &sessions {
                shared.links.claim_session(record.sessid, link);
            }
            shared.sessions.apply(SyncEvent::FullResync { sessions })?;
            shared.rebuild_stacks().await;
            Ok(())
        }
        SyncEvent::Disconnect { sessid, reason } => {
            let removed = shared.sessions.apply(SyncEvent::Disconnect { sessid, reason })?;
            for record in removed {
                shared.cleanup_session(&record);
            }
            Ok(())
        }
        SyncEvent::DisconnectAll => {
            let removed = shared.sessions.apply(SyncEvent::DisconnectAll)?;
            for record in removed {
                shared.cleanup_session(&record);
            }
            Ok(())
        }
        SyncEvent::PartialUpdate {
            sessid,
            origin,
            patch,
        } => {
            shared.sessions.apply(SyncEvent::PartialUpdate {
                sessid,
                origin,
                patch,
            })?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryAuthenticator;
    use crate::blocking::BlockingPool;
    use crate::remembered::MemoryFlagStore;
    use meridian_session::{
        AccountUid, DisconnectReason, PatchOrigin, ProtocolFlagMap, SessionRecord,
    };
    use meridian_wire::LinkHandle;

    const LINK: LinkId = LinkId(1);

    fn shared_with_link() -> (Arc<LogicShared>, mpsc::Receiver<WireMessage>) {
        let pool = Arc::new(BlockingPool::new(2));
        let auth = MemoryAuthenticator::new(pool.clone());
        auth.add_account("mira", "sekrit");
        let shared = LogicShared::with_parts(
            LogicConfig::default(),
            pool,
            Arc::new(auth),
            Arc::new(MemoryFlagStore::new()),
        );
        let (tx, rx) = mpsc::channel(64);
        shared.links.attach(LinkHandle::new(LINK, tx));
        (shared, rx)
    }

    async fn connect_session(shared: &Arc<LogicShared>, sessid: u32) {
        let event = SyncEvent::Connect {
            session: SessionRecord::new(sessid, "telnet", "addr"),
        };
        let msg = WireMessage::admin_to_logic(sessid, &event.to_admin().unwrap()).unwrap();
        handle_message(shared, LINK, &msg).await.unwrap();
    }

    async fn send_line(shared: &Arc<LogicShared>, sessid: u32, line: &str) {
        handle_message(shared, LINK, &WireMessage::text_to_logic(sessid, line))
            .await
            .unwrap();
    }

    /// Drains queued outbound messages, returning the deliver-text lines.
    fn drain_texts(rx: &mut mpsc::Receiver<WireMessage>) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if msg.command == WireCommand::DeliverToGateway {
                texts.push(msg.text().unwrap().to_string());
            }
        }
        texts
    }

    #[tokio::test]
    async fn test_connect_greets_and_creates_mirror() {
        let (shared, mut rx) = shared_with_link();
        connect_session(&shared, 1).await;

        assert!(shared.sessions.get(1).is_some());
        let greeting = rx.recv().await.unwrap();
        assert_eq!(greeting.command, WireCommand::DeliverToGateway);
        assert!(greeting.text().unwrap().contains("connect <account> <password>"));
    }

    #[tokio::test]
    async fn test_unknown_command_answers_in_band() {
        let (shared, mut rx) = shared_with_link();
        connect_session(&shared, 1).await;
        drain_texts(&mut rx);

        send_line(&shared, 1, "frobnicate now").await;
        let texts = drain_texts(&mut rx);
        assert!(texts.iter().any(|t| t.contains("Unknown command: 'frobnicate'")));
    }

    #[tokio::test]
    async fn test_login_flow_mirrors_state_and_swaps_commands() {
        let (shared, mut rx) = shared_with_link();
        connect_session(&shared, 1).await;
        drain_texts(&mut rx);

        send_line(&shared, 1, "connect mira sekrit").await;

        let record = shared.sessions.get(1).unwrap();
        assert!(record.logged_in);
        assert!(record.account_uid.is_some());

        // The account set replaced the bootstrap set.
        let current = shared.stack_for(1).current();
        assert!(current.get("say").is_some());
        assert!(current.get("connect").is_none());

        // A mirror patch carrying the login state went out.
        let mut saw_patch = false;
        while let Ok(msg) = rx.try_recv() {
            if msg.command != WireCommand::AdminToGateway {
                continue;
            }
            let admin = msg.parse_admin().unwrap();
            if admin.op != AdminOp::SessionSync {
                continue;
            }
            if let SyncEvent::PartialUpdate { patch, origin, .. } =
                SyncEvent::from_admin(&admin).unwrap()
            {
                assert_eq!(origin, PatchOrigin::Logic);
                if patch.logged_in == Some(true) {
                    saw_patch = true;
                }
            }
        }
        assert!(saw_patch);
    }

    #[tokio::test]
    async fn test_bad_credentials_answer_in_band() {
        let (shared, mut rx) = shared_with_link();
        connect_session(&shared, 1).await;
        drain_texts(&mut rx);

        send_line(&shared, 1, "connect mira wrong").await;
        assert!(!shared.sessions.get(1).unwrap().logged_in);
        let texts = drain_texts(&mut rx);
        assert!(texts.iter().any(|t| t.contains("Wrong account name or password")));
    }

    #[tokio::test]
    async fn test_full_resync_rebuilds_registry_and_stacks() {
        let (shared, _rx) = shared_with_link();

        let mut logged_in = SessionRecord::new(7, "telnet", "a");
        logged_in.logged_in = true;
        logged_in.account_uid = Some(AccountUid(3));
        let fresh = SessionRecord::new(8, "websocket", "b");

        let event = SyncEvent::FullResync {
            sessions: vec![logged_in, fresh],
        };
        let msg = WireMessage::admin_to_logic(0, &event.to_admin().unwrap()).unwrap();
        handle_message(&shared, LINK, &msg).await.unwrap();

        assert_eq!(shared.sessions.len(), 2);
        // Logged-in sessions get their account commands back without a
        // fresh login.
        assert!(shared.stack_for(7).current().get("say").is_some());
        assert!(shared.stack_for(8).current().get("connect").is_some());
    }

    #[tokio::test]
    async fn test_quit_notifies_gateway_and_removes_session() {
        let (shared, mut rx) = shared_with_link();
        connect_session(&shared, 1).await;
        drain_texts(&mut rx);

        send_line(&shared, 1, "quit").await;
        assert!(shared.sessions.get(1).is_none());

        let mut saw_disconnect = false;
        while let Ok(msg) = rx.try_recv() {
            if msg.command != WireCommand::AdminToGateway {
                continue;
            }
            let admin = msg.parse_admin().unwrap();
            if admin.op == AdminOp::SessionDisconnect {
                let event = SyncEvent::from_admin(&admin).unwrap();
                assert!(matches!(
                    event,
                    SyncEvent::Disconnect {
                        sessid: 1,
                        reason: DisconnectReason::ClientDisconnect,
                    }
                ));
                saw_disconnect = true;
            }
        }
        assert!(saw_disconnect);
    }

    #[tokio::test]
    async fn test_puppet_lifecycle_over_the_wire() {
        let (shared, mut rx) = shared_with_link();
        connect_session(&shared, 1).await;
        send_line(&shared, 1, "connect mira sekrit").await;
        drain_texts(&mut rx);

        let body = shared
            .entities
            .owned_by(shared.sessions.get(1).unwrap().account_uid.unwrap())
            .pop()
            .unwrap();
        send_line(&shared, 1, &format!("puppet {}", body.id.0)).await;
        assert_eq!(shared.sessions.get(1).unwrap().puppet_id, Some(body.id));

        send_line(&shared, 1, "unpuppet").await;
        assert_eq!(shared.sessions.get(1).unwrap().puppet_id, None);
    }

    #[tokio::test]
    async fn test_say_fans_out_to_every_session() {
        let (shared, mut rx) = shared_with_link();
        connect_session(&shared, 1).await;
        connect_session(&shared, 2).await;
        send_line(&shared, 1, "connect mira sekrit").await;
        drain_texts(&mut rx);

        send_line(&shared, 1, "say hello all").await;
        let mut heard: Vec<u32> = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if msg.command == WireCommand::DeliverToGateway
                && msg.text().unwrap().contains("hello all")
            {
                heard.push(msg.sessid);
            }
        }
        heard.sort();
        assert_eq!(heard, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_disconnect_remembers_flags() {
        let (shared, _rx) = shared_with_link();
        connect_session(&shared, 1).await;
        send_line(&shared, 1, "connect mira sekrit").await;
        let account = shared.sessions.get(1).unwrap().account_uid.unwrap();

        // Gateway mirrors the negotiated flags, then the client drops.
        let mut flags = ProtocolFlagMap::new();
        flags.insert("ansi".into(), serde_json::json!(true));
        flags.insert("screen_width".into(), serde_json::json!(120));
        let update = SyncEvent::PartialUpdate {
            sessid: 1,
            origin: PatchOrigin::Gateway,
            patch: meridian_session::SessionPatch {
                protocol_flags: Some(flags),
                ..Default::default()
            },
        };
        let msg = WireMessage::admin_to_logic(1, &update.to_admin().unwrap()).unwrap();
        handle_message(&shared, LINK, &msg).await.unwrap();

        let event = SyncEvent::Disconnect {
            sessid: 1,
            reason: DisconnectReason::ClientDisconnect,
        };
        let msg = WireMessage::admin_to_logic(1, &event.to_admin().unwrap()).unwrap();
        handle_message(&shared, LINK, &msg).await.unwrap();

        let recalled = shared.flag_store.recall(account).unwrap();
        assert_eq!(recalled["ansi"], serde_json::json!(true));
        // Non-display flags are not kept.
        assert!(recalled.get("screen_width").is_none());
    }

    #[tokio::test]
    async fn test_status_ping_answered_with_counters() {
        let (shared, mut rx) = shared_with_link();
        connect_session(&shared, 1).await;
        drain_texts(&mut rx);

        let ping = WireMessage {
            command: WireCommand::StatusPing,
            sessid: WireMessage::PROCESS_SESSID,
            payload: Vec::new(),
        };
        handle_message(&shared, LINK, &ping).await.unwrap();

        let reply = loop {
            let msg = rx.recv().await.unwrap();
            if msg.command == WireCommand::StatusPing {
                break msg;
            }
        };
        let status: serde_json::Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(status["sessions"], 1);
        assert_eq!(status["instance"], shared.instance_id.to_string());
    }

    #[tokio::test]
    async fn test_shutdown_op_disconnects_all_and_stops() {
        let (shared, mut rx) = shared_with_link();
        connect_session(&shared, 1).await;
        drain_texts(&mut rx);
        let mut shutdown = shared.shutdown_signal();

        let msg = WireMessage::admin_to_logic(0, &AdminMessage::bare(AdminOp::Shutdown)).unwrap();
        handle_message(&shared, LINK, &msg).await.unwrap();

        let mut saw_disconnect_all = false;
        while let Ok(msg) = rx.try_recv() {
            if msg.command == WireCommand::AdminToGateway
                && msg.parse_admin().unwrap().op == AdminOp::SessionDisconnectAll
            {
                saw_disconnect_all = true;
            }
        }
        assert!(saw_disconnect_all);
        shutdown.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_function_call_answered() {
        let (shared, mut rx) = shared_with_link();

        let call = FunctionCall::new(9, "status");
        handle_message(&shared, LINK, &call.into_message(0).unwrap())
            .await
            .unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.command, WireCommand::FunctionReply);
        let reply = meridian_wire::FunctionReply::from_message(&reply).unwrap();
        assert_eq!(reply.call_id, 9);
        assert!(matches!(reply.outcome, meridian_wire::FunctionOutcome::Ok(_)));
    }
}
