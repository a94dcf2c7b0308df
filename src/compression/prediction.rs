//! Zlib with per-scanline delta prediction, code 3.
//!
//! 8- and 16-bit scanlines store each pixel as its difference from the
//! previous one (the first pixel is kept); the near-constant neighborhoods
//! of photographic data then deflate far better. 32-bit scanlines first
//! interleave the big-endian bytes of the row (`b0 b0 b0 … b1 b1 b1 …`) so
//! the slowly varying exponent bytes line up, then delta the byte stream.

use rayon::prelude::*;

use crate::compression::zip;
use crate::endian;
use crate::error::{PsdError, Result};
use crate::pixel::Pixel;

/// Delta-encode then deflate.
pub(crate) fn compress<T: Pixel>(pixels: &[T], width: u32, _height: u32) -> Result<Vec<u8>> {
    let width = width as usize;

    let predicted = if T::BYTES == 4 {
        let bytes = endian::to_be_bytes(pixels);
        let row_len = width * 4;
        let mut rows: Vec<Vec<u8>> = Vec::new();
        if row_len > 0 {
            rows = bytes
                .par_chunks(row_len)
                .map(|row| {
                    let mut interleaved = interleave_row(row, width);
                    delta_bytes(&mut interleaved);
                    interleaved
                })
                .collect();
        }
        rows.concat()
    } else {
        let mut working = pixels.to_vec();
        if width > 0 {
            working.par_chunks_mut(width).for_each(|row| {
                for i in (1..row.len()).rev() {
                    row[i] = row[i].wrapping_delta(row[i - 1]);
                }
            });
        }
        endian::to_be_bytes(&working)
    };

    zip::compress(&predicted)
}

/// Inflate then invert the per-scanline prediction.
pub(crate) fn decompress<T: Pixel>(bytes: &[u8], width: u32, height: u32) -> Result<Vec<T>> {
    let width = width as usize;
    let height = height as usize;
    let expected = width * height * T::BYTES;

    let raw = zip::decompress(bytes, expected)?;

    if T::BYTES == 4 {
        let row_len = width * 4;
        let mut rows: Vec<Vec<u8>> = Vec::new();
        if row_len > 0 {
            rows = raw
                .par_chunks(row_len)
                .map(|row| {
                    let mut row = row.to_vec();
                    undelta_bytes(&mut row);
                    deinterleave_row(&row, width)
                })
                .collect();
        }
        endian::from_be_bytes(&rows.concat()).ok_or_else(|| {
            PsdError::CompressionError("prediction output is not a whole element count".into())
        })
    } else {
        let mut pixels: Vec<T> = endian::from_be_bytes(&raw).ok_or_else(|| {
            PsdError::CompressionError("prediction output is not a whole element count".into())
        })?;
        if width > 0 {
            pixels.par_chunks_mut(width).for_each(|row| {
                for i in 1..row.len() {
                    row[i] = row[i].wrapping_undelta(row[i - 1]);
                }
            });
        }
        Ok(pixels)
    }
}

/// `b0 b1 b2 b3 b0 b1 b2 b3 …` -> `b0 b0 … b1 b1 … b2 b2 … b3 b3 …`
fn interleave_row(row: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; row.len()];
    for plane in 0..4 {
        for (i, byte) in out[plane * width..(plane + 1) * width].iter_mut().enumerate() {
            *byte = row[i * 4 + plane];
        }
    }
    out
}

fn deinterleave_row(row: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; row.len()];
    for plane in 0..4 {
        for i in 0..width {
            out[i * 4 + plane] = row[plane * width + i];
        }
    }
    out
}

fn delta_bytes(row: &mut [u8]) {
    for i in (1..row.len()).rev() {
        row[i] = row[i].wrapping_sub(row[i - 1]);
    }
}

fn undelta_bytes(row: &mut [u8]) {
    for i in 1..row.len() {
        row[i] = row[i].wrapping_add(row[i - 1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_groups_planes() {
        // Two 32-bit pixels: AABBCCDD and 11223344.
        let row = [0xAA, 0xBB, 0xCC, 0xDD, 0x11, 0x22, 0x33, 0x44];
        let interleaved = interleave_row(&row, 2);
        assert_eq!(
            interleaved,
            [0xAA, 0x11, 0xBB, 0x22, 0xCC, 0x33, 0xDD, 0x44]
        );
        assert_eq!(deinterleave_row(&interleaved, 2), row);
    }

    #[test]
    fn delta_keeps_first_byte() {
        let mut row = [10u8, 12, 11, 11];
        delta_bytes(&mut row);
        assert_eq!(row, [10, 2, 255, 0]);
        undelta_bytes(&mut row);
        assert_eq!(row, [10, 12, 11, 11]);
    }

    #[test]
    fn sixteen_bit_gradient_round_trip() {
        // A smooth ramp: the exact case prediction exists for.
        let pixels: Vec<u16> = (0..128u32 * 64).map(|i| (i / 4) as u16).collect();
        let compressed = compress(&pixels, 128, 64).unwrap();
        assert_eq!(
            decompress::<u16>(&compressed, 128, 64).unwrap(),
            pixels
        );

        // Prediction should beat a plain deflate of the same ramp here.
        let plain = zip::compress(&endian::to_be_bytes(&pixels)).unwrap();
        assert!(compressed.len() <= plain.len());
    }

    #[test]
    fn f32_round_trip_is_exact() {
        let pixels: Vec<f32> = (0..64u32 * 16)
            .map(|i| (i as f32 * 0.01).exp() - 2.0)
            .collect();
        let compressed = compress(&pixels, 64, 16).unwrap();
        assert_eq!(decompress::<f32>(&compressed, 64, 16).unwrap(), pixels);
    }

    #[test]
    fn u8_wrapping_cases_round_trip() {
        let pixels: Vec<u8> = vec![0, 255, 0, 255, 128, 1, 254, 3];
        let compressed = compress(&pixels, 4, 2).unwrap();
        assert_eq!(decompress::<u8>(&compressed, 4, 2).unwrap(), pixels);
    }
}
