//! Wire link endpoints: the listening side, the reconnecting side and the
//! shared attached-connection set.
//!
//! The logic process listens; one or more gateway processes connect. More
//! than one connection may be attached at a time, which is what lets either
//! process restart while the other keeps running. Outbound administrative
//! traffic fans out to every attached link (first delivery suffices, the
//! rest are best-effort); session-addressed traffic is routed to the link
//! that owns the sessid and degrades to a broadcast when ownership is
//! unknown.

use crate::chunk::{encode_message, Reassembler};
use crate::frame::{read_frame, write_frame};
use crate::message::WireMessage;
use crate::WireError;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Initial reconnect delay for the connecting side.
const BACKOFF_START: Duration = Duration::from_secs(1);
/// Multiplier applied after each failed attempt.
const BACKOFF_FACTOR: f64 = 1.5;
/// Ceiling on the reconnect delay.
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Outbound queue depth per attached connection.
const OUTBOUND_QUEUE: usize = 256;

/// Identifier of one attached wire connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Events delivered to the owning process's event loop.
#[derive(Debug)]
pub enum LinkEvent {
    /// A connection attached (fresh connect or reconnect). The receiver
    /// decides whether a full re-sync must follow.
    Connected(LinkId),
    /// A connection detached; its session routes were purged.
    Disconnected(LinkId),
    /// A fully reassembled inbound message.
    Message(LinkId, WireMessage),
}

/// Sending half of one attached connection.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    pub id: LinkId,
    outbound: mpsc::Sender<WireMessage>,
}

impl LinkHandle {
    /// Pairs an id with the channel a connection task drains.
    pub fn new(id: LinkId, outbound: mpsc::Sender<WireMessage>) -> Self {
        Self { id, outbound }
    }

    /// Queues a message for this connection.
    pub async fn send(&self, msg: WireMessage) -> Result<(), WireError> {
        self.outbound.send(msg).await.map_err(|_| WireError::LinkClosed)
    }

    fn try_send(&self, msg: WireMessage) -> Result<(), WireError> {
        self.outbound.try_send(msg).map_err(|_| WireError::LinkClosed)
    }
}

/// The set of currently attached connections plus per-session routing.
///
/// Mutated only from the owning process's tasks; DashMap keeps the
/// broadcast path lock-light.
#[derive(Debug, Default)]
pub struct LinkSet {
    links: DashMap<u64, LinkHandle>,
    routes: DashMap<u32, LinkId>,
    next_id: AtomicU64,
}

impl LinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next link id.
    pub fn next_link_id(&self) -> LinkId {
        LinkId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Attaches a connection's sending half.
    pub fn attach(&self, handle: LinkHandle) {
        info!(link = %handle.id, "wire link attached");
        self.links.insert(handle.id.0, handle);
    }

    /// Detaches a connection and purges its session routes.
    pub fn detach(&self, id: LinkId) {
        self.links.remove(&id.0);
        self.routes.retain(|_, owner| *owner != id);
        info!(link = %id, "wire link detached");
    }

    /// Records which link owns a session.
    pub fn claim_session(&self, sessid: u32, id: LinkId) {
        self.routes.insert(sessid, id);
    }

    /// Drops the routing entry for a closed session.
    pub fn release_session(&self, sessid: u32) {
        self.routes.remove(&sessid);
    }

    /// Number of attached connections.
    pub fn attached(&self) -> usize {
        self.links.len()
    }

    /// Sends to every attached connection.
    ///
    /// Succeeds when at least one connection accepted the message; the
    /// remainder are best-effort.
    pub fn broadcast(&self, msg: &WireMessage) -> Result<(), WireError> {
        let mut delivered = 0usize;
        for entry in self.links.iter() {
            match entry.value().try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(link = %entry.value().id, "broadcast skipped saturated link"),
            }
        }
        if delivered == 0 {
            return Err(WireError::NoLink);
        }
        Ok(())
    }

    /// Sends to the connection owning `sessid`, degrading to a broadcast
    /// when no owner is known.
    pub async fn send_to_session(&self, sessid: u32, msg: WireMessage) -> Result<(), WireError> {
        let owner = self.routes.get(&sessid).map(|r| *r.value());
        if let Some(id) = owner {
            if let Some(handle) = self.links.get(&id.0).map(|e| e.value().clone()) {
                return handle.send(msg).await;
            }
            // Stale route; fall through to broadcast.
            self.routes.remove(&sessid);
        }
        self.broadcast(&msg)
    }
}

/// Drives one attached connection: a write pump draining the outbound
/// queue and a read loop feeding reassembled messages to the event
/// channel. Returns when the peer goes away or a malformed frame forces a
/// drop.
pub async fn run_connection<S>(
    stream: S,
    id: LinkId,
    links: Arc<LinkSet>,
    events: mpsc::Sender<LinkEvent>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<WireMessage>(OUTBOUND_QUEUE);

    links.attach(LinkHandle {
        id,
        outbound: outbound_tx,
    });
    if events.send(LinkEvent::Connected(id)).await.is_err() {
        links.detach(id);
        return;
    }

    let writer = tokio::spawn(async move {
        let message_id = AtomicU32::new(1);
        while let Some(msg) = outbound_rx.recv().await {
            let frames = match encode_message(&msg, message_id.fetch_add(1, Ordering::Relaxed)) {
                Ok(frames) => frames,
                Err(e) => {
                    error!(link = %id, error = %e, "failed to encode outbound message");
                    continue;
                }
            };
            for frame in frames {
                if let Err(e) = write_frame(&mut write_half, &frame).await {
                    debug!(link = %id, error = %e, "write pump stopping");
                    return;
                }
            }
        }
    });

    let mut reassembler = Reassembler::new();
    loop {
        match read_frame(&mut read_half).await {
            Ok(Some(frame)) => match reassembler.accept(frame) {
                Ok(Some(msg)) => {
                    if events.send(LinkEvent::Message(id, msg)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Protocol violation: drop this connection, leave the
                    // rest of the set untouched.
                    warn!(link = %id, error = %e, "malformed traffic, dropping link");
                    break;
                }
            },
            Ok(None) => {
                debug!(link = %id, "peer closed wire link");
                break;
            }
            Err(e) => {
                warn!(link = %id, error = %e, "wire read error");
                break;
            }
        }
    }

    writer.abort();
    links.detach(id);
    let _ = events.send(LinkEvent::Disconnected(id)).await;
}

/// Listening endpoint (the logic process side).
pub struct WireServer;

impl WireServer {
    /// Accepts gateway connections until the shutdown signal fires.
    pub async fn run(
        bind_address: std::net::SocketAddr,
        links: Arc<LinkSet>,
        events: mpsc::Sender<LinkEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), WireError> {
        let listener = TcpListener::bind(bind_address).await?;
        info!("wire server listening on {bind_address}");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            stream.set_nodelay(true).ok();
                            let id = links.next_link_id();
                            debug!(link = %id, %addr, "gateway link accepted");
                            let links = links.clone();
                            let events = events.clone();
                            tokio::spawn(run_connection(stream, id, links, events));
                        }
                        Err(e) => {
                            error!("wire accept failed: {e}");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("wire server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Connecting endpoint (the gateway process side).
///
/// Retries with growing backoff forever; every successful attach emits
/// [`LinkEvent::Connected`], which is the receiver's cue to run a full
/// session re-sync before resuming normal traffic.
pub struct WireConnector;

impl WireConnector {
    pub async fn run(
        remote_address: std::net::SocketAddr,
        links: Arc<LinkSet>,
        events: mpsc::Sender<LinkEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut backoff = BACKOFF_START;
        loop {
            tokio::select! {
                connected = TcpStream::connect(remote_address) => {
                    match connected {
                        Ok(stream) => {
                            stream.set_nodelay(true).ok();
                            backoff = BACKOFF_START;
                            let id = links.next_link_id();
                            info!(link = %id, %remote_address, "connected to logic process");
                            // Runs inline so loss of the link re-enters the
                            // backoff loop.
                            run_connection(stream, id, links.clone(), events.clone()).await;
                            warn!(link = %id, "logic link lost, reconnecting");
                        }
                        Err(e) => {
                            debug!(%remote_address, error = %e, "logic connect failed, backing off {:?}", backoff);
                            tokio::select! {
                                _ = tokio::time::sleep(backoff) => {}
                                _ = shutdown.recv() => return,
                            }
                            backoff = next_backoff(backoff);
                        }
                    }
                }
                _ = shutdown.recv() => return,
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    let next = current.mul_f64(BACKOFF_FACTOR);
    if next > BACKOFF_CAP {
        BACKOFF_CAP
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AdminMessage, AdminOp, WireCommand};

    fn handle(id: u64) -> (LinkHandle, mpsc::Receiver<WireMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (
            LinkHandle {
                id: LinkId(id),
                outbound: tx,
            },
            rx,
        )
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut delay = BACKOFF_START;
        for _ in 0..20 {
            delay = next_backoff(delay);
        }
        assert_eq!(delay, BACKOFF_CAP);
        assert_eq!(next_backoff(BACKOFF_START), Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_attached_link() {
        let links = LinkSet::new();
        let (h1, mut rx1) = handle(1);
        let (h2, mut rx2) = handle(2);
        links.attach(h1);
        links.attach(h2);

        let msg = WireMessage::admin_to_gateway(0, &AdminMessage::bare(AdminOp::Reload)).unwrap();
        links.broadcast(&msg).unwrap();

        assert_eq!(rx1.recv().await.unwrap(), msg);
        assert_eq!(rx2.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn test_broadcast_with_no_links_is_an_error() {
        let links = LinkSet::new();
        let msg = WireMessage::admin_to_gateway(0, &AdminMessage::bare(AdminOp::Reload)).unwrap();
        assert!(matches!(links.broadcast(&msg), Err(WireError::NoLink)));
    }

    #[tokio::test]
    async fn test_session_routing_prefers_owner_then_degrades() {
        let links = LinkSet::new();
        let (h1, mut rx1) = handle(1);
        let (h2, mut rx2) = handle(2);
        links.attach(h1);
        links.attach(h2);
        links.claim_session(42, LinkId(2));

        let msg = WireMessage::text_to_gateway(42, "routed");
        links.send_to_session(42, msg.clone()).await.unwrap();
        assert_eq!(rx2.recv().await.unwrap(), msg);
        assert!(rx1.try_recv().is_err());

        // Unknown session falls back to broadcast.
        let msg = WireMessage::text_to_gateway(99, "fanout");
        links.send_to_session(99, msg.clone()).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap(), msg);
        assert_eq!(rx2.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn test_detach_purges_routes() {
        let links = LinkSet::new();
        let (h1, mut rx1) = handle(1);
        let (h2, _rx2) = handle(2);
        links.attach(h1);
        links.attach(h2);
        links.claim_session(7, LinkId(2));

        links.detach(LinkId(2));
        assert_eq!(links.attached(), 1);

        // Route is gone, so the message degrades to the surviving link.
        let msg = WireMessage::text_to_gateway(7, "after detach");
        links.send_to_session(7, msg.clone()).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap(), msg);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connection_pair_exchanges_messages() {
        let (gateway_stream, logic_stream) = tokio::io::duplex(64 * 1024);

        let gateway_links = Arc::new(LinkSet::new());
        let logic_links = Arc::new(LinkSet::new());
        let (gw_events_tx, mut gw_events) = mpsc::channel(16);
        let (logic_events_tx, mut logic_events) = mpsc::channel(16);

        tokio::spawn(run_connection(
            gateway_stream,
            LinkId(1),
            gateway_links.clone(),
            gw_events_tx,
        ));
        tokio::spawn(run_connection(
            logic_stream,
            LinkId(1),
            logic_links.clone(),
            logic_events_tx,
        ));

        assert!(matches!(gw_events.recv().await, Some(LinkEvent::Connected(_))));
        assert!(matches!(logic_events.recv().await, Some(LinkEvent::Connected(_))));

        // Gateway -> logic text, compressed+framed on the wire.
        gateway_links
            .send_to_session(5, WireMessage::text_to_logic(5, "look"))
            .await
            .unwrap();
        match logic_events.recv().await {
            Some(LinkEvent::Message(_, msg)) => {
                assert_eq!(msg.command, WireCommand::DeliverToLogic);
                assert_eq!(msg.text().unwrap(), "look");
            }
            other => panic!("expected message, got {other:?}"),
        }

        // Logic -> gateway admin op.
        let admin = AdminMessage::bare(AdminOp::SessionDisconnectAll);
        logic_links
            .broadcast(&WireMessage::admin_to_gateway(0, &admin).unwrap())
            .unwrap();
        match gw_events.recv().await {
            Some(LinkEvent::Message(_, msg)) => {
                assert_eq!(msg.parse_admin().unwrap().op, AdminOp::SessionDisconnectAll);
            }
            other => panic!("expected message, got {other:?}"),
        }
    }
}
