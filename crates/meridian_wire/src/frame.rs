//! Frame layout and the async read/write codec.
//!
//! Each frame is a 4-byte big-endian length prefix followed by a fixed
//! 14-byte header and the (possibly compressed, possibly chunked) payload:
//!
//! ```text
//! | len u32 BE | command u8 | flags u8 | sessid u32 LE |
//! | message_id u32 LE | chunk_index u16 LE | chunk_total u16 LE | payload |
//! ```
//!
//! The header is packed by hand in little-endian field order; length
//! prefixes stay big-endian on the socket.

use crate::message::WireCommand;
use crate::WireError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on a single frame; anything larger is a protocol violation.
pub const MAX_FRAME: usize = 10_000_000;

/// Maximum payload carried by one frame before the sender must chunk.
pub const MAX_PAYLOAD: usize = 64 * 1024;

/// Size of the fixed header following the length prefix.
pub const HEADER_LEN: usize = 14;

/// Per-frame flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    pub const COMPRESSED: u8 = 0x01;
    pub const CHUNKED: u8 = 0x02;

    pub fn compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    pub fn chunked(self) -> bool {
        self.0 & Self::CHUNKED != 0
    }

    pub fn set_compressed(&mut self) {
        self.0 |= Self::COMPRESSED;
    }

    pub fn set_chunked(&mut self) {
        self.0 |= Self::CHUNKED;
    }
}

/// A single frame as it travels on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: WireCommand,
    pub flags: FrameFlags,
    pub sessid: u32,
    /// Shared base key tying the chunks of one message together.
    pub message_id: u32,
    /// Zero-based position of this chunk; 0 for unchunked frames.
    pub chunk_index: u16,
    /// Total chunk count; 1 for unchunked frames.
    pub chunk_total: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Packs the header and payload (without the length prefix).
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buffer.push(self.command as u8);
        buffer.push(self.flags.0);
        buffer.extend_from_slice(&self.sessid.to_le_bytes());
        buffer.extend_from_slice(&self.message_id.to_le_bytes());
        buffer.extend_from_slice(&self.chunk_index.to_le_bytes());
        buffer.extend_from_slice(&self.chunk_total.to_le_bytes());
        buffer.extend_from_slice(&self.payload);
        buffer
    }

    /// Parses a frame body (everything after the length prefix).
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN {
            return Err(WireError::Malformed(format!(
                "frame body {} bytes, header needs {HEADER_LEN}",
                data.len()
            )));
        }
        let command = WireCommand::try_from(data[0])?;
        let flags = FrameFlags(data[1]);
        let sessid = u32::from_le_bytes([data[2], data[3], data[4], data[5]]);
        let message_id = u32::from_le_bytes([data[6], data[7], data[8], data[9]]);
        let chunk_index = u16::from_le_bytes([data[10], data[11]]);
        let chunk_total = u16::from_le_bytes([data[12], data[13]]);

        if chunk_total == 0 {
            return Err(WireError::Malformed("chunk_total of zero".to_string()));
        }
        if chunk_index >= chunk_total {
            return Err(WireError::Malformed(format!(
                "chunk index {chunk_index} out of range (total {chunk_total})"
            )));
        }

        Ok(Self {
            command,
            flags,
            sessid,
            message_id,
            chunk_index,
            chunk_total,
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let body = frame.encode();
    if body.len() > MAX_FRAME {
        return Err(WireError::Malformed(format!(
            "frame of {} bytes exceeds cap",
            body.len()
        )));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame; `Ok(None)` on clean EOF.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME {
        return Err(WireError::Malformed(format!("frame of {len} bytes exceeds cap")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Frame::decode(&body).map(Some)
}
