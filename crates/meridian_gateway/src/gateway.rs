//! The gateway process event loop.
//!
//! Spawns the configured listeners and the wire client, then services
//! wire events until shutdown: inbound text fans out to connection
//! pumps, administrative instructions mutate the session table, and
//! every fresh logic link is greeted with a full session re-sync.

use crate::listener;
use crate::state::GatewayShared;
use crate::{GatewayConfig, GatewayError};
use meridian_session::{DisconnectReason, GatewayPhase, SyncEvent};
use meridian_wire::{
    AdminMessage, AdminOp, FunctionCall, LinkEvent, WireCommand, WireConnector, WireMessage,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Depth of the wire event channel feeding the loop.
const EVENT_QUEUE: usize = 256;

/// The gateway process.
pub struct Gateway {
    shared: Arc<GatewayShared>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            shared: GatewayShared::new(config),
        }
    }

    pub fn shared(&self) -> Arc<GatewayShared> {
        self.shared.clone()
    }

    /// Runs the process until shutdown.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let shared = self.shared.clone();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        if let Some(bind) = shared.config.telnet_bind {
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(e) = listener::run_telnet_listener(bind, shared).await {
                    error!("telnet listener failed: {e}");
                }
            });
        }
        if let Some(bind) = shared.config.tls_bind {
            let (cert, key) = match (&shared.config.tls_cert, &shared.config.tls_key) {
                (Some(cert), Some(key)) => (cert.clone(), key.clone()),
                _ => {
                    return Err(GatewayError::Tls(
                        "tls_bind set without tls_cert and tls_key".into(),
                    ))
                }
            };
            let acceptor = listener::load_tls_acceptor(&cert, &key)?;
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(e) = listener::run_tls_listener(bind, acceptor, shared).await {
                    error!("tls listener failed: {e}");
                }
            });
        }
        if let Some(bind) = shared.config.websocket_bind {
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(e) = listener::run_websocket_listener(bind, shared).await {
                    error!("websocket listener failed: {e}");
                }
            });
        }

        tokio::spawn(WireConnector::run(
            shared.config.logic_address,
            shared.links.clone(),
            events_tx,
            shared.shutdown_signal(),
        ));

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
                        Some(event) => handle_event(&self.shared, event),
                        None => {
                            debug!("wire event channel closed");
                            return;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("gateway event loop stopping");
                    return;
                }
            }
        }
    }
}

/// Dispatches one wire event.
pub fn handle_event(shared: &Arc<GatewayShared>, event: LinkEvent) {
    match event {
        LinkEvent::Connected(id) => {
            // A fresh logic link knows nothing; push the whole table
            // before any other traffic concerns it.
            let resync = shared.sessions.full_resync_event();
            info!(link = %id, sessions = shared.sessions.len(), "logic link up, sending full re-sync");
            if let Err(e) = shared.send_sync(&resync) {
                warn!(link = %id, error = %e, "full re-sync not delivered");
            }
        }
        LinkEvent::Disconnected(id) => {
            warn!(link = %id, "logic link down, clients held");
        }
        LinkEvent::Message(id, msg) => {
            if let Err(e) = handle_message(shared, &msg) {
                warn!(link = %id, error = %e, "wire message mishandled");
            }
        }
    }
}

/// Handles one reassembled inbound message from the logic process.
pub fn handle_message(shared: &Arc<GatewayShared>, msg: &WireMessage) -> Result<(), GatewayError> {
    match msg.command {
        WireCommand::DeliverToGateway => {
            shared.deliver(msg.sessid, msg.text()?);
            Ok(())
        }
        WireCommand::AdminToGateway => handle_admin(shared, msg),
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
        WireCommand::DeliverToLogic | WireCommand::AdminToLogic => {
            warn!(command = ?msg.command, "logic-bound message arrived at gateway, dropped");
            Ok(())
        }
    }
}

/// Handles one administrative instruction from the logic process.
fn handle_admin(shared: &Arc<GatewayShared>, msg: &WireMessage) -> Result<(), GatewayError> {
    let admin = msg.parse_admin()?;
    match admin.op {
        AdminOp::SessionConnect
        | AdminOp::SessionDisconnect
        | AdminOp::SessionDisconnectAll
        | AdminOp::SessionSync => handle_sync(shared, SyncEvent::from_admin(&admin)?),
        AdminOp::Shutdown => {
            info!("shutdown instructed by logic");
            shared.disconnect_all(DisconnectReason::ServerShutdown);
            shared.trigger_shutdown();
            Ok(())
        }
        AdminOp::Reload => {
            // The logic process is restarting; hold every client and
            // wait for the link to come back.
            info!("logic reloading, holding client connections");
            Ok(())
        }
        AdminOp::Reset => {
            info!("logic state reset");
            Ok(())
        }
        AdminOp::StatusPing => {
            let reply = AdminMessage::with_data(AdminOp::StatusPing, shared.status());
            shared.links.broadcast(&WireMessage::admin_to_logic(
                WireMessage::PROCESS_SESSID,
                &reply,
            )?)?;
            Ok(())
        }
        AdminOp::Login => {
            // Login outcomes reach the gateway as partial updates.
            debug!(sessid = msg.sessid, "login admin op ignored at gateway");
            Ok(())
        }
    }
}

/// Applies one logic-originated sync event to the gateway table.
fn handle_sync(shared: &Arc<GatewayShared>, event: SyncEvent) -> Result<(), GatewayError> {
    match event {
        SyncEvent::Disconnect { sessid, reason } => {
            let _ = shared.sessions.set_phase(sessid, GatewayPhase::Disconnecting);
            shared.disconnect(sessid, reason);
            Ok(())
        }
        SyncEvent::DisconnectAll => {
            info!("logic instructed disconnect of all sessions");
            shared.disconnect_all(DisconnectReason::ServerShutdown);
            Ok(())
        }
        SyncEvent::PartialUpdate { sessid, patch, .. } => {
            shared.sessions.apply_patch(sessid, &patch)?;
            Ok(())
        }
        SyncEvent::Connect { .. } | SyncEvent::FullResync { .. } => {
            // Sessions are born on this side; logic never announces them.
            warn!("gateway received a gateway-originated sync event, dropped");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ClientOutput;
    use meridian_session::{AccountUid, SessionPatch};
    use meridian_wire::{LinkHandle, LinkId};
    use serde_json::json;

    fn shared_with_link() -> (
        Arc<GatewayShared>,
        mpsc::Receiver<WireMessage>,
    ) {
        let shared = GatewayShared::new(GatewayConfig::default());
        let (tx, rx) = mpsc::channel(16);
        shared.links.attach(LinkHandle::new(LinkId(1), tx));
        (shared, rx)
    }

    #[tokio::test]
    async fn test_deliver_text_reaches_pump() {
        let (shared, _rx) = shared_with_link();
        let session = shared.sessions.create("telnet", "addr");
        let mut output = shared.register_output(session.sessid);

        handle_message(&shared, &WireMessage::text_to_gateway(session.sessid, "hello")).unwrap();
        assert_eq!(output.recv().await.unwrap(), ClientOutput::Text("hello".into()));
    }

    #[tokio::test]
    async fn test_logic_disconnect_instruction() {
        let (shared, _rx) = shared_with_link();
        let session = shared.sessions.create("telnet", "addr");
        let mut output = shared.register_output(session.sessid);

        let event = SyncEvent::Disconnect {
            sessid: session.sessid,
            reason: DisconnectReason::Timeout,
        };
        let msg = WireMessage::admin_to_gateway(session.sessid, &event.to_admin().unwrap()).unwrap();
        handle_message(&shared, &msg).unwrap();

        assert!(matches!(
            output.recv().await.unwrap(),
            ClientOutput::Disconnect(DisconnectReason::Timeout)
        ));
        assert!(shared.sessions.tearing_down(session.sessid));
    }

    #[tokio::test]
    async fn test_partial_update_mirrors_login_state() {
        let (shared, _rx) = shared_with_link();
        let session = shared.sessions.create("telnet", "addr");

        let event = SyncEvent::PartialUpdate {
            sessid: session.sessid,
            origin: meridian_session::PatchOrigin::Logic,
            patch: SessionPatch {
                logged_in: Some(true),
                account_uid: Some(Some(AccountUid(7))),
                ..Default::default()
            },
        };
        let msg = WireMessage::admin_to_gateway(session.sessid, &event.to_admin().unwrap()).unwrap();
        handle_message(&shared, &msg).unwrap();

        let record = shared.sessions.get(session.sessid).unwrap();
        assert!(record.logged_in);
        assert_eq!(record.account_uid, Some(AccountUid(7)));
    }

    #[tokio::test]
    async fn test_connected_link_triggers_full_resync() {
        let (shared, mut rx) = shared_with_link();
        shared.sessions.create("telnet", "a");
        shared.sessions.create("telnet", "b");

        handle_event(&shared, LinkEvent::Connected(LinkId(1)));
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.command, WireCommand::AdminToLogic);
        let event = SyncEvent::from_admin(&msg.parse_admin().unwrap()).unwrap();
        match event {
            SyncEvent::FullResync { sessions } => assert_eq!(sessions.len(), 2),
            other => panic!("expected full resync, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_status_ping_answered_with_counters() {
        let (shared, mut rx) = shared_with_link();
        shared.sessions.create("telnet", "a");

        let ping = WireMessage {
            command: WireCommand::StatusPing,
            sessid: WireMessage::PROCESS_SESSID,
            payload: Vec::new(),
        };
        handle_message(&shared, &ping).unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.command, WireCommand::StatusPing);
        let status: serde_json::Value = serde_json::from_slice(&reply.payload).unwrap();
        assert_eq!(status["sessions"], 1);
    }

    #[tokio::test]
    async fn test_function_call_answered() {
        let (shared, mut rx) = shared_with_link();
        shared.sessions.create("telnet", "a");

        let call = FunctionCall::new(3, "session_count");
        handle_message(&shared, &call.into_message(0).unwrap()).unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.command, WireCommand::FunctionReply);
        let reply = meridian_wire::FunctionReply::from_message(&reply).unwrap();
        assert_eq!(reply.call_id, 3);
        assert_eq!(reply.outcome, meridian_wire::FunctionOutcome::Ok(json!(1)));
    }

    #[tokio::test]
    async fn test_shutdown_op_disconnects_and_stops() {
        let (shared, _rx) = shared_with_link();
        let session = shared.sessions.create("telnet", "addr");
        let mut output = shared.register_output(session.sessid);
        let mut shutdown = shared.shutdown_signal();

        let msg = WireMessage::admin_to_gateway(0, &AdminMessage::bare(AdminOp::Shutdown)).unwrap();
        handle_message(&shared, &msg).unwrap();

        assert!(matches!(
            output.recv().await.unwrap(),
            ClientOutput::Disconnect(DisconnectReason::ServerShutdown)
        ));
        shutdown.recv().await.unwrap();
    }
}
