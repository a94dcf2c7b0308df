//! Zlib stream compression, code 2.
//!
//! The scanlines are concatenated with no inter-scanline framing and fed
//! through deflate as one stream.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{PsdError, Result};

/// Deflate `bytes` as a single zlib stream.
pub(crate) fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inflate a zlib stream that must decode to exactly `expected_len` bytes.
pub(crate) fn decompress(bytes: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::with_capacity(expected_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|err| PsdError::CompressionError(format!("zlib stream: {}", err)))?;

    if out.len() != expected_len {
        return Err(PsdError::CompressionError(format!(
            "zlib stream decoded to {} bytes, expected {}",
            out.len(),
            expected_len
        )));
    }

    Ok(out)
}
