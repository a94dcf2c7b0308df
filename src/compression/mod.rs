//! The four channel codecs.
//!
//! All of them share one shape: `compress` turns a pixel array into the
//! bytes that follow the 2-byte compression code on disk, `decompress`
//! inverts that. For 16- and 32-bit pixels the data is byte-swapped to
//! big-endian before compression on write and after decompression on read.
//!
//! | code | codec |
//! |------|-------------------------------|
//! | 0    | Raw big-endian scanlines      |
//! | 1    | PackBits RLE per scanline     |
//! | 2    | Zlib over all scanlines       |
//! | 3    | Zlib over per-scanline deltas |

use crate::endian;
use crate::error::{PsdError, Result};
use crate::pixel::Pixel;
use crate::psd_channel::PsdChannelCompression;
use crate::sections::file_header_section::PsdVersion;

pub(crate) mod prediction;
pub(crate) mod rle;
pub(crate) mod zip;

/// Encode `pixels` with the given codec.
///
/// The version decides the width of the RLE scanline-count entries (16-bit
/// in a PSD, 32-bit in a PSB); the other codecs ignore it.
pub(crate) fn compress<T: Pixel>(
    pixels: &[T],
    compression: PsdChannelCompression,
    width: u32,
    height: u32,
    version: PsdVersion,
) -> Result<Vec<u8>> {
    if pixels.len() != width as usize * height as usize {
        return Err(PsdError::CompressionError(format!(
            "refusing to encode {} pixels as a {}x{} channel",
            pixels.len(),
            width,
            height
        )));
    }

    match compression {
        PsdChannelCompression::RawData => Ok(endian::to_be_bytes(pixels)),
        PsdChannelCompression::RleCompressed => rle::compress(pixels, width, height, version),
        PsdChannelCompression::ZipWithoutPrediction => zip::compress(&endian::to_be_bytes(pixels)),
        PsdChannelCompression::ZipWithPrediction => prediction::compress(pixels, width, height),
    }
}

/// Decode the payload of a channel back into `width * height` pixels.
pub(crate) fn decompress<T: Pixel>(
    bytes: &[u8],
    compression: PsdChannelCompression,
    width: u32,
    height: u32,
    version: PsdVersion,
) -> Result<Vec<T>> {
    let expected = width as usize * height as usize;

    let pixels = match compression {
        PsdChannelCompression::RawData => endian::from_be_bytes(bytes).ok_or_else(|| {
            PsdError::CompressionError(format!(
                "raw channel of {} bytes is not a whole number of {}-byte elements",
                bytes.len(),
                T::BYTES
            ))
        })?,
        PsdChannelCompression::RleCompressed => rle::decompress(bytes, width, height, version)?,
        PsdChannelCompression::ZipWithoutPrediction => {
            let raw = zip::decompress(bytes, expected * T::BYTES)?;
            endian::from_be_bytes(&raw).ok_or_else(|| {
                PsdError::CompressionError("zip stream is not a whole number of elements".into())
            })?
        }
        PsdChannelCompression::ZipWithPrediction => prediction::decompress(bytes, width, height)?,
    };

    if pixels.len() != expected {
        return Err(PsdError::CompressionError(format!(
            "codec produced {} pixels, expected {} for a {}x{} channel",
            pixels.len(),
            expected,
            width,
            height
        )));
    }

    Ok(pixels)
}
