//! Message-to-frame encoding and lossless chunk reassembly.
//!
//! Senders run [`encode_message`]: compress (for the deliver commands),
//! then split anything over [`MAX_PAYLOAD`] into sequential chunks sharing
//! one message id. Receivers push every arriving frame through a
//! [`Reassembler`], which buffers partial messages per message id and
//! releases a complete [`WireMessage`] only once every chunk is in place.
//! Chunks of one message arrive in order on the TCP link, but interleaving
//! with other messages' chunks is allowed.

use crate::compress::{compress, decompress};
use crate::frame::{Frame, FrameFlags, MAX_PAYLOAD};
use crate::message::WireMessage;
use crate::WireError;
use std::collections::HashMap;

/// Splits a message into the frames that carry it.
///
/// `message_id` is the sender-assigned base key shared by all chunks of
/// this message; it only needs to be unique among the sender's in-flight
/// messages on one connection.
pub fn encode_message(msg: &WireMessage, message_id: u32) -> Result<Vec<Frame>, WireError> {
    let mut flags = FrameFlags::default();
    let payload = if msg.command.compressed() {
        flags.set_compressed();
        compress(&msg.payload)?
    } else {
        msg.payload.clone()
    };

    if payload.len() <= MAX_PAYLOAD {
        return Ok(vec![Frame {
            command: msg.command,
            flags,
            sessid: msg.sessid,
            message_id,
            chunk_index: 0,
            chunk_total: 1,
            payload,
        }]);
    }

    flags.set_chunked();
    let chunks: Vec<&[u8]> = payload.chunks(MAX_PAYLOAD).collect();
    let total = u16::try_from(chunks.len())
        .map_err(|_| WireError::Malformed(format!("message needs {} chunks", chunks.len())))?;

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| Frame {
            command: msg.command,
            flags,
            sessid: msg.sessid,
            message_id,
            chunk_index: index as u16,
            chunk_total: total,
            payload: chunk.to_vec(),
        })
        .collect())
}

#[derive(Debug)]
struct PartialMessage {
    frames: Vec<Option<Vec<u8>>>,
    received: usize,
}

/// Per-connection reassembly state.
///
/// One instance per wire connection; message ids from different
/// connections are unrelated.
#[derive(Debug, Default)]
pub struct Reassembler {
    partial: HashMap<u32, PartialMessage>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one frame; returns the complete message once all of its
    /// chunks have arrived.
    pub fn accept(&mut self, frame: Frame) -> Result<Option<WireMessage>, WireError> {
        if !frame.flags.chunked() {
            let payload = if frame.flags.compressed() {
                decompress(&frame.payload)?
            } else {
                frame.payload
            };
            return Ok(Some(WireMessage {
                command: frame.command,
                sessid: frame.sessid,
                payload,
            }));
        }

        let entry = self
            .partial
            .entry(frame.message_id)
            .or_insert_with(|| PartialMessage {
                frames: vec![None; frame.chunk_total as usize],
                received: 0,
            });

        if entry.frames.len() != frame.chunk_total as usize {
            self.partial.remove(&frame.message_id);
            return Err(WireError::Malformed(
                "chunk_total changed mid-message".to_string(),
            ));
        }
        let slot = &mut entry.frames[frame.chunk_index as usize];
        if slot.is_none() {
            entry.received += 1;
        }
        *slot = Some(frame.payload);

        if entry.received < entry.frames.len() {
            return Ok(None);
        }

        let entry = self
            .partial
            .remove(&frame.message_id)
            .expect("complete entry present");
        let mut payload = Vec::new();
        for part in entry.frames {
            payload.extend_from_slice(&part.expect("all chunks received"));
        }
        if frame.flags.compressed() {
            payload = decompress(&payload)?;
        }
        Ok(Some(WireMessage {
            command: frame.command,
            sessid: frame.sessid,
            payload,
        }))
    }

    /// Number of messages still awaiting chunks.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Drops all partial state, e.g. when the connection resets.
    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WireCommand;

    #[test]
    fn test_small_message_is_single_frame() {
        let msg = WireMessage {
            command: WireCommand::AdminToLogic,
            sessid: 3,
            payload: b"{\"op\":6}".to_vec(),
        };
        let frames = encode_message(&msg, 1).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].flags.chunked());
        assert!(!frames[0].flags.compressed());

        let mut reasm = Reassembler::new();
        assert_eq!(reasm.accept(frames[0].clone()).unwrap(), Some(msg));
    }

    #[test]
    fn test_oversized_payload_round_trips_byte_for_byte() {
        // Incompressible (xorshift noise) payload well past the frame cap,
        // so chunking happens even after the zlib pass.
        let mut state: u32 = 0x1234_5678;
        let payload: Vec<u8> = (0..(MAX_PAYLOAD * 3 + 1234))
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                (state & 0xFF) as u8
            })
            .collect();
        let msg = WireMessage {
            command: WireCommand::DeliverToGateway,
            sessid: 9,
            payload: payload.clone(),
        };

        let frames = encode_message(&msg, 77).unwrap();
        assert!(frames.len() > 1, "payload should have chunked");
        assert!(frames.iter().all(|f| f.payload.len() <= MAX_PAYLOAD));
        assert!(frames.iter().all(|f| f.flags.chunked() && f.flags.compressed()));

        let mut reasm = Reassembler::new();
        let mut out = None;
        for frame in frames {
            if let Some(done) = reasm.accept(frame).unwrap() {
                out = Some(done);
            }
        }
        let out = out.expect("message should reassemble");
        assert_eq!(out.payload, payload);
        assert_eq!(out.sessid, 9);
        assert_eq!(reasm.pending(), 0);
    }

    #[test]
    fn test_interleaved_messages_reassemble_independently() {
        // Admin payloads skip compression, so the chunk counts are
        // deterministic here: two chunks per message.
        let big: Vec<u8> = (0..MAX_PAYLOAD * 2).map(|i| (i % 256) as u8).collect();
        let a = WireMessage {
            command: WireCommand::AdminToLogic,
            sessid: 1,
            payload: big.clone(),
        };
        let b = WireMessage {
            command: WireCommand::AdminToLogic,
            sessid: 2,
            payload: big.iter().rev().cloned().collect(),
        };

        let frames_a = encode_message(&a, 100).unwrap();
        let frames_b = encode_message(&b, 200).unwrap();
        assert_eq!(frames_a.len(), 2);
        assert_eq!(frames_b.len(), 2);

        let mut reasm = Reassembler::new();
        let mut done = Vec::new();
        for (fa, fb) in frames_a.into_iter().zip(frames_b) {
            if let Some(m) = reasm.accept(fa).unwrap() {
                done.push(m);
            }
            if let Some(m) = reasm.accept(fb).unwrap() {
                done.push(m);
            }
        }
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].payload, a.payload);
        assert_eq!(done[1].payload, b.payload);
    }

    #[test]
    fn test_deliver_text_is_compressed_on_the_wire() {
        let text = "the quick brown fox ".repeat(500);
        let msg = WireMessage::text_to_gateway(5, &text);
        let frames = encode_message(&msg, 8).unwrap();
        let wire_bytes: usize = frames.iter().map(|f| f.payload.len()).sum();
        assert!(wire_bytes < text.len());
    }
}
