//! PackBits RLE, the per-scanline codec behind compression code 1.
//!
//! Reference: Apple Technical Note TN1023. A header byte `h` means:
//! `0 <= h <= 127` copy the next `h + 1` bytes literally, `-127 <= h <= -1`
//! repeat the next byte `1 - h` times, `h = -128` do nothing.
//!
//! On disk a table of per-scanline compressed lengths precedes the data:
//! 16-bit entries in a PSD, 32-bit entries in a PSB.

use rayon::prelude::*;

use crate::endian;
use crate::error::{PsdError, Result};
use crate::pixel::Pixel;
use crate::sections::file_header_section::PsdVersion;

/// Compress a channel: scanline-count table first, then the packed rows.
pub(crate) fn compress<T: Pixel>(
    pixels: &[T],
    width: u32,
    height: u32,
    version: PsdVersion,
) -> Result<Vec<u8>> {
    let bytes = endian::to_be_bytes(pixels);
    let row_len = width as usize * T::BYTES;

    let rows: Vec<Vec<u8>> = if row_len == 0 {
        vec![Vec::new(); height as usize]
    } else {
        bytes.par_chunks(row_len).map(packbits_encode).collect()
    };

    let entry_width = scanline_count_width(version);
    let data_len: usize = rows.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(height as usize * entry_width + data_len);

    for row in &rows {
        match version {
            PsdVersion::One => {
                let len = u16::try_from(row.len()).map_err(|_| {
                    PsdError::CompressionError(format!(
                        "scanline packed to {} bytes, too long for a PSD count entry",
                        row.len()
                    ))
                })?;
                out.extend_from_slice(&len.to_be_bytes());
            }
            PsdVersion::Two => out.extend_from_slice(&(row.len() as u32).to_be_bytes()),
        }
    }
    for row in &rows {
        out.extend_from_slice(row);
    }

    Ok(out)
}

/// Decompress a channel that was packed with [`compress`].
pub(crate) fn decompress<T: Pixel>(
    bytes: &[u8],
    width: u32,
    height: u32,
    version: PsdVersion,
) -> Result<Vec<T>> {
    let entry_width = scanline_count_width(version);
    let table_len = height as usize * entry_width;
    if bytes.len() < table_len {
        return Err(PsdError::CompressionError(format!(
            "rle payload of {} bytes is shorter than its {} byte scanline table",
            bytes.len(),
            table_len
        )));
    }

    // Row offsets derive from the count table so each row can decode
    // independently.
    let mut row_spans = Vec::with_capacity(height as usize);
    let mut offset = table_len;
    for row in 0..height as usize {
        let len = match version {
            PsdVersion::One => {
                u16::from_be_bytes([bytes[row * 2], bytes[row * 2 + 1]]) as usize
            }
            PsdVersion::Two => u32::from_be_bytes([
                bytes[row * 4],
                bytes[row * 4 + 1],
                bytes[row * 4 + 2],
                bytes[row * 4 + 3],
            ]) as usize,
        };
        let end = offset.checked_add(len).filter(|end| *end <= bytes.len());
        let end = end.ok_or_else(|| {
            PsdError::CompressionError(format!(
                "scanline {} claims {} bytes past the end of the payload",
                row, len
            ))
        })?;
        row_spans.push((offset, end));
        offset = end;
    }

    let row_len = width as usize * T::BYTES;
    let rows: Vec<Vec<u8>> = row_spans
        .into_par_iter()
        .enumerate()
        .map(|(row, (start, end))| {
            let decoded = packbits_decode(&bytes[start..end]);
            if decoded.len() != row_len {
                return Err(PsdError::CompressionError(format!(
                    "scanline {} unpacked to {} bytes, expected {}",
                    row,
                    decoded.len(),
                    row_len
                )));
            }
            Ok(decoded)
        })
        .collect::<Result<_>>()?;

    let mut raw = Vec::with_capacity(row_len * height as usize);
    for row in rows {
        raw.extend_from_slice(&row);
    }

    endian::from_be_bytes(&raw)
        .ok_or_else(|| PsdError::CompressionError("rle output is not a whole element count".into()))
}

fn scanline_count_width(version: PsdVersion) -> usize {
    match version {
        PsdVersion::One => 2,
        PsdVersion::Two => 4,
    }
}

/// Pack one scanline. Literal runs longer than 128 bytes are split into
/// multiple chunks; runs of three or more identical bytes become repeats.
pub(crate) fn packbits_encode(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    let mut literal: Vec<u8> = Vec::new();
    let mut idx = 0;

    let flush_literal = |literal: &mut Vec<u8>, output: &mut Vec<u8>| {
        if !literal.is_empty() {
            output.push((literal.len() - 1) as u8);
            output.extend_from_slice(literal);
            literal.clear();
        }
    };

    while idx < input.len() {
        let mut run_len = 1;
        while idx + run_len < input.len() && input[idx + run_len] == input[idx] && run_len < 128 {
            run_len += 1;
        }

        if run_len >= 3 {
            flush_literal(&mut literal, &mut output);
            // header = -(run_len - 1), then the repeated byte
            output.push((1i16 - run_len as i16) as u8);
            output.push(input[idx]);
            idx += run_len;
        } else {
            literal.push(input[idx]);
            idx += 1;
            if literal.len() == 128 {
                flush_literal(&mut literal, &mut output);
            }
        }
    }
    flush_literal(&mut literal, &mut output);

    output
}

/// Unpack one scanline.
pub(crate) fn packbits_decode(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 2);
    let mut idx = 0;

    while idx < input.len() {
        let header = input[idx] as i8;
        idx += 1;

        if header >= 0 {
            let count = header as usize + 1;
            let end = (idx + count).min(input.len());
            output.extend_from_slice(&input[idx..end]);
            idx = end;
        } else if header != -128 {
            let count = (1 - header as i32) as usize;
            if idx < input.len() {
                let value = input[idx];
                idx += 1;
                output.extend(std::iter::repeat(value).take(count));
            }
        }
        // header == -128 is a no-op
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    // The sample from the PackBits documentation; Photoshop uses the exact
    // same scheme.
    #[test]
    fn packbits_reference_vector() {
        let data = [
            0xFEu8, 0xAA, 0x02, 0x80, 0x00, 0x2A, 0xFD, 0xAA, 0x03, 0x80, 0x00, 0x2A, 0x22, 0xF7,
            0xAA,
        ];
        let expected = [
            0xAAu8, 0xAA, 0xAA, 0x80, 0x00, 0x2A, 0xAA, 0xAA, 0xAA, 0xAA, 0x80, 0x00, 0x2A, 0x22,
            0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
        ];
        assert_eq!(packbits_decode(&data), expected);
    }

    #[test]
    fn encode_run() {
        // -4 (0xFC) means repeat 5 times, then the byte
        assert_eq!(packbits_encode(&[0xAA; 5]), vec![0xFC, 0xAA]);
    }

    #[test]
    fn encode_literal() {
        assert_eq!(packbits_encode(&[1, 2, 3, 4]), vec![3, 1, 2, 3, 4]);
    }

    #[test]
    fn encode_mixed() {
        let input = [1u8, 2, 3, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA];
        assert_eq!(packbits_encode(&input), vec![2, 1, 2, 3, 0xFC, 0xAA]);
    }

    #[test]
    fn long_literal_is_chunked() {
        let input: Vec<u8> = (0..200u16).map(|i| (i % 251) as u8).collect();
        let encoded = packbits_encode(&input);
        assert_eq!(packbits_decode(&encoded), input);
        // First chunk holds exactly 128 literals.
        assert_eq!(encoded[0], 127);
    }

    #[test]
    fn long_run_is_chunked() {
        let input = vec![7u8; 300];
        let encoded = packbits_encode(&input);
        assert_eq!(packbits_decode(&encoded), input);
    }

    #[test]
    fn empty_input() {
        assert!(packbits_encode(&[]).is_empty());
        assert!(packbits_decode(&[]).is_empty());
    }

    #[test]
    fn scanline_table_widths_differ_by_version() {
        let pixels = vec![0u8; 8 * 4];
        let psd = compress(&pixels, 8, 4, PsdVersion::One).unwrap();
        let psb = compress(&pixels, 8, 4, PsdVersion::Two).unwrap();
        // Same packed rows, but the PSB table is twice as wide.
        assert_eq!(psb.len() - psd.len(), 4 * 2);

        assert_eq!(
            decompress::<u8>(&psd, 8, 4, PsdVersion::One).unwrap(),
            pixels
        );
        assert_eq!(
            decompress::<u8>(&psb, 8, 4, PsdVersion::Two).unwrap(),
            pixels
        );
    }

    #[test]
    fn truncated_payload_is_a_compression_error() {
        let pixels = vec![3u8; 16 * 16];
        let mut encoded = compress(&pixels, 16, 16, PsdVersion::One).unwrap();
        encoded.truncate(encoded.len() - 1);
        assert!(decompress::<u8>(&encoded, 16, 16, PsdVersion::One).is_err());
    }

    #[test]
    fn sixteen_bit_rows_round_trip() {
        let pixels: Vec<u16> = (0..32u32 * 8).map(|i| (i * 1021 % 65536) as u16).collect();
        let encoded = compress(&pixels, 32, 8, PsdVersion::One).unwrap();
        assert_eq!(
            decompress::<u16>(&encoded, 32, 8, PsdVersion::One).unwrap(),
            pixels
        );
    }
}
