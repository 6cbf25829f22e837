//! The WebSocket connection pump.
//!
//! Browser clients speak JSON triples `[command, args, kwargs]` over a
//! WebSocket instead of telnet bytes. There is no capability handshake:
//! the web client renders ANSI itself, so the session registers
//! immediately with a fixed capable flag set. Only the `text` command is
//! routed to the logic process; other commands are client-side concerns.

use crate::pump::finish;
use crate::state::{ClientOutput, GatewayShared};
use futures::{SinkExt, StreamExt};
use meridian_session::{DisconnectReason, GatewayPhase, SyncEvent};
use meridian_telnet::ProtocolFlags;
use meridian_wire::WireMessage;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Capability flags for a web client: it draws ANSI and resizes itself.
fn websocket_flags() -> ProtocolFlags {
    ProtocolFlags {
        ttype: "websocket".into(),
        ansi: true,
        xterm256: true,
        truecolor: true,
        utf8: true,
        ..Default::default()
    }
}

/// Extracts the input lines from a `["text", [...], {...}]` triple.
fn text_lines(raw: &str) -> Option<Vec<String>> {
    let triple: Vec<Value> = serde_json::from_str(raw).ok()?;
    let command = triple.first()?.as_str()?;
    if command != "text" {
        debug!(command, "non-text websocket command ignored");
        return Some(Vec::new());
    }
    let args = triple.get(1)?.as_array()?;
    Some(
        args.iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
    )
}

/// Wraps outbound text in the client triple format.
fn text_triple(text: &str) -> String {
    json!(["text", [text], {}]).to_string()
}

/// Runs one WebSocket connection to completion.
pub async fn run_websocket_connection<S>(stream: S, shared: Arc<GatewayShared>, address: String)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(%address, error = %e, "websocket handshake failed");
            return;
        }
    };

    let session = shared.sessions.create("websocket", &address);
    let sessid = session.sessid;
    let mut output_rx = shared.register_output(sessid);
    let mut shutdown = shared.shutdown_signal();

    // No negotiation: register at once with the fixed web flag set.
    let flag_map = websocket_flags().into_map();
    if shared.sessions.update_flags(sessid, flag_map.clone()).is_err() {
        shared.unregister_output(sessid);
        return;
    }
    let _ = shared.sessions.set_phase(sessid, GatewayPhase::Registered);
    if let Some(record) = shared.sessions.get(sessid) {
        match shared.send_sync(&SyncEvent::Connect { session: record }) {
            Ok(()) => info!(sessid, "websocket session registered"),
            Err(e) => warn!(sessid, error = %e, "session announce deferred"),
        }
    }
    let _ = shared.sessions.set_phase(sessid, GatewayPhase::Active);

    let (mut sink, mut inbound) = ws.split();
    let mut reason = DisconnectReason::ClientDisconnect;
    let mut notify_logic = true;

    loop {
        tokio::select! {
            msg = inbound.next() => {
                match msg {
                    Some(Ok(Message::Text(raw))) => {
                        let Some(lines) = text_lines(raw.as_str()) else {
                            debug!(sessid, "unparseable websocket triple ignored");
                            continue;
                        };
                        for line in lines {
                            shared.sessions.touch(sessid, true);
                            let msg = WireMessage::text_to_logic(sessid, &line);
                            if shared.links.broadcast(&msg).is_err() {
                                warn!(sessid, "no logic link, input dropped");
                                let notice = text_triple(
                                    "The server is temporarily unavailable, please try again.",
                                );
                                let _ = sink.send(Message::Text(notice.into())).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(sessid, error = %e, "websocket read failed");
                        reason = DisconnectReason::Error(e.to_string());
                        break;
                    }
                }
            }
            output = output_rx.recv() => {
                match output {
                    Some(ClientOutput::Text(text)) => {
                        let triple = text_triple(&text);
                        if sink.send(Message::Text(triple.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(ClientOutput::Disconnect(r)) => {
                        let _ = sink.send(Message::Text(text_triple(&r.to_string()).into())).await;
                        let _ = sink.send(Message::Close(None)).await;
                        reason = r;
                        notify_logic = false;
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                reason = DisconnectReason::ServerShutdown;
                notify_logic = false;
                break;
            }
        }
    }

    finish(&shared, sessid, true, reason, notify_logic).await;
}
