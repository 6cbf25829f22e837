//! The per-connection telnet pump.
//!
//! One task per client socket: inbound bytes run through the telnet
//! parser into the negotiator and the line assembler; outbound text is
//! rendered against the negotiated flags, IAC-escaped and, once MCCP2 is
//! accepted, compressed. The pump owns the hard negotiation deadline -
//! a client that stalls the handshake is forced onto defaults after
//! [`NEGOTIATION_TIMEOUT`] and registered anyway.
//!
//! Teardown from any direction (socket close, logic instruction, process
//! shutdown) converges here: the session leaves the registry exactly
//! once and late negotiation input becomes a no-op.

use crate::format;
use crate::state::{ClientOutput, GatewayShared};
use meridian_session::{
    DisconnectReason, GatewayPhase, ProtocolFlagMap, Sessid, SyncEvent,
};
use meridian_telnet::parser::escape_iac;
use meridian_telnet::{
    MccpStream, Negotiator, OobUpdate, ServerStatus, TelnetEvent, TelnetParser,
    NEGOTIATION_TIMEOUT,
};
use meridian_wire::WireMessage;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

const READ_BUFFER: usize = 4096;

/// Outgoing byte path: plain until MCCP2 is accepted, compressed after.
struct ClientWriter<W> {
    inner: W,
    mccp: Option<MccpStream>,
}

impl<W: AsyncWrite + Unpin> ClientWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, mccp: None }
    }

    fn compressing(&self) -> bool {
        self.mccp.is_some()
    }

    /// Switches the stream to compressed output. Everything already
    /// written (including the MCCP2 start marker) went out plain.
    fn enable_compression(&mut self) {
        if self.mccp.is_none() {
            self.mccp = Some(MccpStream::new());
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        match &mut self.mccp {
            Some(stream) => {
                let compressed = stream
                    .push(bytes)
                    .map_err(|e| IoError::new(ErrorKind::Other, e.to_string()))?;
                self.inner.write_all(&compressed).await
            }
            None => self.inner.write_all(bytes).await,
        }
    }
}

/// Appends inbound application bytes to the line buffer and returns the
/// lines completed by this chunk, stripped of their endings.
fn split_lines(buffer: &mut Vec<u8>, data: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    for &byte in data {
        match byte {
            b'\n' => {
                if buffer.last() == Some(&b'\r') {
                    buffer.pop();
                }
                lines.push(String::from_utf8_lossy(buffer).into_owned());
                buffer.clear();
            }
            // Some clients send a bare CR as the line ending; treat a CR
            // followed by NUL the same way.
            b'\0' if buffer.last() == Some(&b'\r') => {
                buffer.pop();
                lines.push(String::from_utf8_lossy(buffer).into_owned());
                buffer.clear();
            }
            _ => buffer.push(byte),
        }
    }
    lines
}

/// Runs one telnet-family connection to completion.
///
/// Works for the raw and TLS-wrapped listeners alike; `protocol_key`
/// tells them apart in the session record.
pub async fn run_telnet_connection<S>(
    stream: S,
    shared: Arc<GatewayShared>,
    protocol_key: &str,
    address: String,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let session = shared.sessions.create(protocol_key, &address);
    let sessid = session.sessid;
    let mut output_rx = shared.register_output(sessid);
    let mut shutdown = shared.shutdown_signal();

    let (mut read_half, write_half) = tokio::io::split(stream);
    let mut writer = ClientWriter::new(write_half);
    let mut parser = TelnetParser::new();
    let mut negotiator = Negotiator::with_status(ServerStatus {
        name: shared.config.server_name.clone(),
        players: shared.sessions.len() as u64,
        uptime: shared.uptime(),
    });
    negotiator.start();
    if writer.send(&negotiator.take_output()).await.is_err() {
        finish(&shared, sessid, false, DisconnectReason::ClientDisconnect, false).await;
        return;
    }

    let deadline = tokio::time::sleep(NEGOTIATION_TIMEOUT);
    tokio::pin!(deadline);

    let mut read_buf = [0u8; READ_BUFFER];
    let mut line_buf: Vec<u8> = Vec::new();
    let mut pending_lines: Vec<String> = Vec::new();
    let mut flag_map = ProtocolFlagMap::new();
    let mut registered = false;
    let mut reason = DisconnectReason::ClientDisconnect;
    // False when the logic process initiated the disconnect and already
    // knows about it.
    let mut notify_logic = true;

    'conn: loop {
        tokio::select! {
            read = read_half.read(&mut read_buf) => {
                match read {
                    Ok(0) => break 'conn,
                    Ok(n) => {
                        for event in parser.feed(&read_buf[..n]) {
                            match event {
                                TelnetEvent::Data(bytes) => {
                                    pending_lines.extend(split_lines(&mut line_buf, &bytes));
                                }
                                TelnetEvent::Negotiate { verb, option } => {
                                    negotiator.handle_negotiation(verb, option);
                                }
                                TelnetEvent::Subnegotiate { option, payload } => {
                                    negotiator.handle_subnegotiation(option, &payload);
                                }
                                TelnetEvent::Command(cmd) => {
                                    debug!(sessid, cmd, "bare telnet command ignored");
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!(sessid, error = %e, "client read failed");
                        reason = DisconnectReason::Error(e.to_string());
                        break 'conn;
                    }
                }
            }
            _ = &mut deadline, if !registered => {
                debug!(sessid, "negotiation deadline reached, forcing defaults");
                negotiator.force_complete();
            }
            output = output_rx.recv() => {
                match output {
                    Some(ClientOutput::Text(text)) => {
                        let rendered = format::render(&text, &flag_map);
                        if writer.send(&escape_iac(rendered.as_bytes())).await.is_err() {
                            break 'conn;
                        }
                    }
                    Some(ClientOutput::Disconnect(r)) => {
                        let farewell = format!("\r\n{r}\r\n");
                        let _ = writer.send(farewell.as_bytes()).await;
                        reason = r;
                        notify_logic = false;
                        break 'conn;
                    }
                    None => break 'conn,
                }
            }
            _ = shutdown.recv() => {
                let _ = writer.send(b"\r\nserver shutting down\r\n").await;
                reason = DisconnectReason::ServerShutdown;
                notify_logic = false;
                break 'conn;
            }
        }

        // Negotiation side effects accumulated by the arms above. Reply
        // bytes (including the MCCP2 start marker) go out before
        // compression switches on.
        let replies = negotiator.take_output();
        if writer.send(&replies).await.is_err() {
            break 'conn;
        }
        if negotiator.flags().compress && !writer.compressing() {
            info!(sessid, "outgoing compression enabled");
            writer.enable_compression();
        }
        for oob in negotiator.take_oob() {
            match oob {
                OobUpdate::Resize { width, height } => {
                    flag_map = negotiator.flags().clone().into_map();
                    if registered {
                        if let Err(e) = shared.update_flags(sessid, flag_map.clone()) {
                            debug!(sessid, error = %e, "resize mirror update failed");
                        }
                    }
                    debug!(sessid, width, height, "client window resized");
                }
                OobUpdate::Gmcp { package, .. } => {
                    debug!(sessid, %package, "gmcp message received");
                }
                OobUpdate::Msdp { pairs } => {
                    debug!(sessid, count = pairs.len(), "msdp report received");
                }
            }
        }
        if !registered && negotiator.just_completed() {
            registered = true;
            flag_map = negotiator.flags().clone().into_map();
            if shared.sessions.tearing_down(sessid) {
                // Disconnect raced the handshake; nothing to register.
                break 'conn;
            }
            if let Err(e) = shared.sessions.update_flags(sessid, flag_map.clone()) {
                warn!(sessid, error = %e, "failed to store negotiated flags");
            }
            let _ = shared.sessions.set_phase(sessid, GatewayPhase::Registered);
            if let Some(record) = shared.sessions.get(sessid) {
                match shared.send_sync(&SyncEvent::Connect { session: record }) {
                    Ok(()) => info!(sessid, forced = negotiator.flags().forced, "session registered"),
                    // The logic link is down; the next FullResync carries
                    // this session instead.
                    Err(e) => warn!(sessid, error = %e, "session announce deferred"),
                }
            }
            let _ = shared.sessions.set_phase(sessid, GatewayPhase::Active);
        }
        if registered && !pending_lines.is_empty() {
            for line in pending_lines.drain(..) {
                forward_line(&shared, sessid, &line, &mut writer).await;
            }
        }
    }

    finish(&shared, sessid, registered, reason, notify_logic).await;
}

/// Sends one input line to the logic process, telling the client when no
/// link is up to carry it.
async fn forward_line<W: AsyncWrite + Unpin>(
    shared: &Arc<GatewayShared>,
    sessid: Sessid,
    line: &str,
    writer: &mut ClientWriter<W>,
) {
    shared.sessions.touch(sessid, true);
    let msg = WireMessage::text_to_logic(sessid, line);
    if shared.links.broadcast(&msg).is_err() {
        warn!(sessid, "no logic link, input dropped");
        let _ = writer
            .send(b"\r\nThe server is temporarily unavailable, please try again.\r\n")
            .await;
    }
}

/// Common teardown: registry removal, logic notification, output channel
/// cleanup. Safe to reach from every exit path.
pub(crate) async fn finish(
    shared: &Arc<GatewayShared>,
    sessid: Sessid,
    registered: bool,
    reason: DisconnectReason,
    notify_logic: bool,
) {
    let _ = shared.sessions.set_phase(sessid, GatewayPhase::Disconnecting);
    shared.unregister_output(sessid);
    if registered && notify_logic {
        if let Err(e) = shared.send_sync(&SyncEvent::Disconnect {
            sessid,
            reason: reason.clone(),
        }) {
            debug!(sessid, error = %e, "disconnect notice not delivered");
        }
    }
    shared.sessions.remove(sessid);
    info!(sessid, %reason, "connection closed");
}
