//! Zlib payload compression for the high-volume deliver-text commands.

use crate::WireError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compresses a payload with zlib at the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| WireError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| WireError::Compression(e.to_string()))
}

/// Decompresses a zlib payload.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| WireError::Compression(e.to_string()))?;
    Ok(out)
}
