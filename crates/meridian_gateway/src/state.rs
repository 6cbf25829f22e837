//! Shared gateway process state.
//!
//! One `GatewayShared` lives behind an `Arc` and is reached from every
//! listener task, connection pump and the wire event loop. It owns the
//! authoritative session table, the wire link set, and the per-session
//! output channels the pumps drain.

use crate::config::GatewayConfig;
use crate::GatewayError;
use dashmap::DashMap;
use meridian_session::{
    DisconnectReason, GatewaySessions, ProtocolFlagMap, SessionPatch, Sessid, SyncEvent,
};
use meridian_wire::{FunctionRegistry, LinkSet, WireMessage};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Per-connection output queue depth. A pump that cannot drain this is a
/// stalled client.
const OUTPUT_QUEUE: usize = 128;

/// What the event loop hands a connection pump.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOutput {
    /// Text to render and write.
    Text(String),
    /// Close the connection with a reason shown to the client.
    Disconnect(DisconnectReason),
}

/// State shared by every task in the gateway process.
pub struct GatewayShared {
    pub config: GatewayConfig,
    pub sessions: GatewaySessions,
    pub links: Arc<LinkSet>,
    pub functions: FunctionRegistry,
    outputs: DashMap<Sessid, mpsc::Sender<ClientOutput>>,
    started: Instant,
    shutdown: broadcast::Sender<()>,
}

impl GatewayShared {
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let (shutdown, _) = broadcast::channel(4);
        let shared = Arc::new(Self {
            config,
            sessions: GatewaySessions::new(),
            links: Arc::new(LinkSet::new()),
            functions: FunctionRegistry::new(),
            outputs: DashMap::new(),
            started: Instant::now(),
            shutdown,
        });
        shared.register_functions();
        shared
    }

    /// Remote functions the logic process may call on this gateway.
    fn register_functions(self: &Arc<Self>) {
        let me = Arc::downgrade(self);
        self.functions.register("session_count", move |_args, _kwargs| {
            let count = me.upgrade().map(|s| s.sessions.len()).unwrap_or(0);
            Ok(json!(count))
        });
    }

    /// A fresh receiver on the process shutdown channel.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Begins process shutdown; all listeners and pumps observe it.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Seconds since the process started.
    pub fn uptime(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Runtime counters answered to status pings and MSSP queries.
    pub fn status(&self) -> serde_json::Value {
        json!({
            "uptime": self.uptime(),
            "sessions": self.sessions.len(),
            "links": self.links.attached(),
        })
    }

    /// Installs a pump's output channel, returning the receiving half.
    pub fn register_output(&self, sessid: Sessid) -> mpsc::Receiver<ClientOutput> {
        let (tx, rx) = mpsc::channel(OUTPUT_QUEUE);
        self.outputs.insert(sessid, tx);
        rx
    }

    /// Removes a pump's output channel at teardown.
    pub fn unregister_output(&self, sessid: Sessid) {
        self.outputs.remove(&sessid);
    }

    /// Queues text for one session; sessid 0 fans out to every session.
    pub fn deliver(&self, sessid: Sessid, text: &str) {
        if sessid == WireMessage::PROCESS_SESSID {
            for entry in self.outputs.iter() {
                if entry.value().try_send(ClientOutput::Text(text.to_string())).is_err() {
                    warn!(sessid = entry.key(), "output queue full, dropping broadcast text");
                }
            }
            return;
        }
        match self.outputs.get(&sessid) {
            Some(tx) => {
                if tx.try_send(ClientOutput::Text(text.to_string())).is_err() {
                    warn!(sessid, "output queue full, dropping text");
                }
            }
            None => debug!(sessid, "text for unknown session dropped"),
        }
    }

    /// Asks one pump to close its connection.
    pub fn disconnect(&self, sessid: Sessid, reason: DisconnectReason) {
        if let Some(tx) = self.outputs.get(&sessid) {
            let _ = tx.try_send(ClientOutput::Disconnect(reason));
        }
    }

    /// Asks every pump to close.
    pub fn disconnect_all(&self, reason: DisconnectReason) {
        for entry in self.outputs.iter() {
            let _ = entry.value().try_send(ClientOutput::Disconnect(reason.clone()));
        }
    }

    /// Sends one sync event to the logic process.
    pub fn send_sync(&self, event: &SyncEvent) -> Result<(), GatewayError> {
        let admin = event.to_admin()?;
        let sessid = event.sessid().unwrap_or(WireMessage::PROCESS_SESSID);
        self.links
            .broadcast(&WireMessage::admin_to_logic(sessid, &admin)?)?;
        Ok(())
    }

    /// Announces a gateway-owned field change to the logic mirror.
    pub fn send_patch(&self, sessid: Sessid, patch: SessionPatch) -> Result<(), GatewayError> {
        self.send_sync(&SyncEvent::PartialUpdate {
            sessid,
            origin: meridian_session::PatchOrigin::Gateway,
            patch,
        })
    }

    /// Updates the registry's capability map and mirrors it to logic.
    pub fn update_flags(&self, sessid: Sessid, flags: ProtocolFlagMap) -> Result<(), GatewayError> {
        self.sessions.update_flags(sessid, flags.clone())?;
        self.send_patch(
            sessid,
            SessionPatch {
                protocol_flags: Some(flags),
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<GatewayShared> {
        GatewayShared::new(GatewayConfig::default())
    }

    #[tokio::test]
    async fn test_deliver_routes_to_registered_output() {
        let shared = shared();
        let session = shared.sessions.create("telnet", "addr");
        let mut rx = shared.register_output(session.sessid);

        shared.deliver(session.sessid, "hello");
        assert_eq!(rx.recv().await.unwrap(), ClientOutput::Text("hello".into()));

        // Unknown sessions are dropped quietly.
        shared.deliver(9999, "nobody home");
    }

    #[tokio::test]
    async fn test_process_sessid_broadcasts_to_all_outputs() {
        let shared = shared();
        let a = shared.sessions.create("telnet", "a");
        let b = shared.sessions.create("telnet", "b");
        let mut rx_a = shared.register_output(a.sessid);
        let mut rx_b = shared.register_output(b.sessid);

        shared.deliver(WireMessage::PROCESS_SESSID, "announcement");
        assert_eq!(rx_a.recv().await.unwrap(), ClientOutput::Text("announcement".into()));
        assert_eq!(rx_b.recv().await.unwrap(), ClientOutput::Text("announcement".into()));
    }

    #[tokio::test]
    async fn test_disconnect_all_reaches_every_pump() {
        let shared = shared();
        let a = shared.sessions.create("telnet", "a");
        let mut rx = shared.register_output(a.sessid);

        shared.disconnect_all(DisconnectReason::ServerShutdown);
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientOutput::Disconnect(DisconnectReason::ServerShutdown)
        ));
    }

    #[test]
    fn test_status_counters() {
        let shared = shared();
        shared.sessions.create("telnet", "a");
        let status = shared.status();
        assert_eq!(status["sessions"], 1);
        assert_eq!(status["links"], 0);
    }

    #[test]
    fn test_sync_without_logic_link_is_an_error() {
        let shared = shared();
        let err = shared.send_sync(&SyncEvent::DisconnectAll).unwrap_err();
        assert!(matches!(err, GatewayError::Wire(_)));
    }
}
