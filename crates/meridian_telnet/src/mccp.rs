//! One-way outgoing compression (MCCP2).
//!
//! Once the client accepts MCCP2 every server-to-client byte goes
//! through a single zlib stream for the life of the connection. Inbound
//! bytes are never compressed. Each push ends with a sync flush so the
//! client can decode the chunk without waiting for more output.

use crate::TelnetError;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

/// Stateful compressor for one connection's outgoing stream.
pub struct MccpStream {
    encoder: ZlibEncoder<Vec<u8>>,
}

impl MccpStream {
    pub fn new() -> Self {
        Self {
            encoder: ZlibEncoder::new(Vec::new(), Compression::default()),
        }
    }

    /// Compresses one chunk and returns the bytes ready for the socket.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<u8>, TelnetError> {
        self.encoder
            .write_all(data)
            .map_err(|e| TelnetError::Compression(e.to_string()))?;
        self.encoder
            .flush()
            .map_err(|e| TelnetError::Compression(e.to_string()))?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }
}

impl Default for MccpStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use std::io::Read;

    /// Inflates whatever the sync-flushed (unterminated) stream holds.
    fn inflate_available(data: &[u8]) -> Vec<u8> {
        let mut decoder = ZlibDecoder::new(data);
        let mut plain = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match decoder.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => plain.extend_from_slice(&buf[..n]),
            }
        }
        plain
    }

    #[test]
    fn test_pushes_decode_as_one_stream() {
        let mut stream = MccpStream::new();
        let mut wire = Vec::new();
        wire.extend(stream.push(b"You see a brass lantern.\r\n").unwrap());
        wire.extend(stream.push(b"Obvious exits: north, east.\r\n").unwrap());

        assert_eq!(
            inflate_available(&wire),
            b"You see a brass lantern.\r\nObvious exits: north, east.\r\n"
        );
    }

    #[test]
    fn test_each_push_is_immediately_decodable() {
        let mut stream = MccpStream::new();
        let first = stream.push(b"prompt> ").unwrap();
        assert!(!first.is_empty());
        assert_eq!(inflate_available(&first), b"prompt> ");
    }

    #[test]
    fn test_empty_push_is_harmless() {
        let mut stream = MccpStream::new();
        let mut wire = stream.push(&[]).unwrap();
        wire.extend(stream.push(b"x").unwrap());
        assert_eq!(inflate_available(&wire), b"x");
    }
}
