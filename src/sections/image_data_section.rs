//! The merged (flattened) image data section.
//!
//! # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
//!
//! The last section of a Photoshop file: a single compression code followed
//! by the composite image's channels, planar, with no framing between them.
//! With RLE the scanline-count table covers every channel
//! (`channels * height` entries) and precedes all of the packed rows.
//!
//! A negative layer count in the layer info marks the first channel past
//! the color data as the merged transparency.

use std::io::{Seek, Write};

use crate::compression::rle;
use crate::endian;
use crate::error::{PsdError, Result};
use crate::pixel::Pixel;
use crate::psd_channel::{
    ChannelElement, PsdChannel, PsdChannelCompression, PsdChannelKind,
};
use crate::sections::file_header_section::{FileHeaderSection, PsdDepth, PsdVersion};
use crate::sections::{PsdBuffer, PsdCursor};

/// The decoded merged image: one compressed store per channel.
///
/// 1-bit documents keep their payload undecoded; it is written back
/// verbatim.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImageDataSection {
    /// The codec used when writing the section.
    pub(crate) compression: PsdChannelCompression,
    /// One channel per header channel: the color channels of the mode
    /// first, then transparency, then any extras.
    pub(crate) channels: Vec<PsdChannel>,
    /// Undecoded payload for 1-bit documents.
    pub(crate) raw: Option<Vec<u8>>,
}

impl ImageDataSection {
    /// A section with no merged image at all (written by editors that skip
    /// "maximize compatibility").
    pub(crate) fn empty() -> ImageDataSection {
        ImageDataSection {
            compression: PsdChannelCompression::RawData,
            channels: Vec::new(),
            raw: None,
        }
    }

    /// Parse the section: `u16 compression code` then the payload running
    /// to the end of the file.
    pub(crate) fn from_bytes(bytes: &[u8], header: &FileHeaderSection) -> Result<ImageDataSection> {
        if bytes.is_empty() {
            return Ok(ImageDataSection::empty());
        }

        let mut cursor = PsdCursor::new(bytes);
        let compression = PsdChannelCompression::new(cursor.read_u16()?)?;
        let payload = cursor.read_remaining();

        if header.depth == PsdDepth::One {
            return Ok(ImageDataSection {
                compression,
                channels: Vec::new(),
                raw: Some(payload.to_vec()),
            });
        }

        let channels = match header.depth {
            PsdDepth::Eight => decode_channels::<u8>(payload, compression, header)?,
            PsdDepth::Sixteen => decode_channels::<u16>(payload, compression, header)?,
            PsdDepth::ThirtyTwo => decode_channels::<f32>(payload, compression, header)?,
            PsdDepth::One => unreachable!("handled above"),
        };

        Ok(ImageDataSection {
            compression,
            channels,
            raw: None,
        })
    }

    /// Write the section: compression code then the payload.
    pub(crate) fn write<W: Write + Seek>(
        &self,
        buffer: &mut PsdBuffer<W>,
        header: &FileHeaderSection,
    ) -> Result<()> {
        if self.channels.is_empty() && self.raw.is_none() {
            return Ok(());
        }

        buffer.write_u16(self.compression as u16)?;

        if let Some(raw) = &self.raw {
            return buffer.write(raw);
        }

        let payload = match header.depth {
            PsdDepth::Eight => encode_channels::<u8>(&self.channels, self.compression, header)?,
            PsdDepth::Sixteen => encode_channels::<u16>(&self.channels, self.compression, header)?,
            PsdDepth::ThirtyTwo => encode_channels::<f32>(&self.channels, self.compression, header)?,
            PsdDepth::One => unreachable!("1-bit documents carry raw payloads"),
        };
        buffer.write(payload)
    }

    /// The merged channel with the given kind.
    pub(crate) fn channel(&self, kind: PsdChannelKind) -> Option<&PsdChannel> {
        self.channels.iter().find(|channel| channel.kind() == kind)
    }
}

/// The kind assigned to merged channel `index` for the document's mode:
/// color channels first, then transparency, extras keep their index.
fn merged_channel_kind(index: usize, header: &FileHeaderSection) -> Result<PsdChannelKind> {
    let color_count = header.color_mode.color_channel_count().unwrap_or(usize::MAX);
    if index == color_count {
        Ok(PsdChannelKind::TransparencyMask)
    } else {
        PsdChannelKind::new(index as i16)
    }
}

fn decode_channels<T: Pixel + ChannelElement>(
    payload: &[u8],
    compression: PsdChannelCompression,
    header: &FileHeaderSection,
) -> Result<Vec<PsdChannel>> {
    let width = header.width.0;
    let height = header.height.0;
    let channel_count = header.channel_count.count() as usize;
    let plane_elems = width as usize * height as usize;

    let planes: Vec<Vec<T>> = match compression {
        PsdChannelCompression::RawData => {
            let expected = plane_elems * channel_count * T::BYTES;
            if payload.len() < expected {
                return Err(PsdError::CompressionError(format!(
                    "merged image holds {} bytes, expected {}",
                    payload.len(),
                    expected
                )));
            }
            payload[..expected]
                .chunks_exact(plane_elems * T::BYTES)
                .map(|plane| {
                    endian::from_be_bytes(plane).ok_or_else(|| {
                        PsdError::CompressionError("ragged merged image plane".into())
                    })
                })
                .collect::<Result<_>>()?
        }
        PsdChannelCompression::RleCompressed => {
            decode_rle_planes(payload, channel_count, width, height, header.version)?
        }
        other => {
            return Err(PsdError::Unsupported(format!(
                "merged image data does not support {:?}",
                other
            )))
        }
    };

    planes
        .iter()
        .enumerate()
        .map(|(index, plane)| {
            PsdChannel::new(
                merged_channel_kind(index, header)?,
                compression,
                plane,
                width,
                height,
            )
        })
        .collect()
}

/// RLE: one count table spanning all channels, then every channel's packed
/// rows. Each channel is handed to the per-channel decoder with a
/// synthesized table so the scanline logic lives in one place.
fn decode_rle_planes<T: Pixel>(
    payload: &[u8],
    channel_count: usize,
    width: u32,
    height: u32,
    version: PsdVersion,
) -> Result<Vec<Vec<T>>> {
    let entry_width = match version {
        PsdVersion::One => 2,
        PsdVersion::Two => 4,
    };
    let rows = height as usize;
    let table_len = channel_count * rows * entry_width;
    if payload.len() < table_len {
        return Err(PsdError::CompressionError(
            "merged image scanline table is truncated".into(),
        ));
    }

    let mut row_lens = Vec::with_capacity(channel_count * rows);
    for entry in 0..channel_count * rows {
        let at = entry * entry_width;
        let len = match version {
            PsdVersion::One => u16::from_be_bytes([payload[at], payload[at + 1]]) as usize,
            PsdVersion::Two => u32::from_be_bytes([
                payload[at],
                payload[at + 1],
                payload[at + 2],
                payload[at + 3],
            ]) as usize,
        };
        row_lens.push(len);
    }

    let mut offset = table_len;
    let mut planes = Vec::with_capacity(channel_count);
    for channel in 0..channel_count {
        let channel_rows = &row_lens[channel * rows..(channel + 1) * rows];
        let data_len: usize = channel_rows.iter().sum();
        let end = offset
            .checked_add(data_len)
            .filter(|end| *end <= payload.len())
            .ok_or_else(|| {
                PsdError::CompressionError(format!(
                    "merged channel {} overruns the image data section",
                    channel
                ))
            })?;

        let mut synthesized =
            Vec::with_capacity(rows * entry_width + data_len);
        for len in channel_rows {
            match version {
                PsdVersion::One => synthesized.extend_from_slice(&(*len as u16).to_be_bytes()),
                PsdVersion::Two => synthesized.extend_from_slice(&(*len as u32).to_be_bytes()),
            }
        }
        synthesized.extend_from_slice(&payload[offset..end]);
        offset = end;

        planes.push(rle::decompress(&synthesized, width, height, version)?);
    }

    Ok(planes)
}

fn encode_channels<T: Pixel + ChannelElement>(
    channels: &[PsdChannel],
    compression: PsdChannelCompression,
    header: &FileHeaderSection,
) -> Result<Vec<u8>> {
    match compression {
        PsdChannelCompression::RawData => {
            let mut payload = Vec::new();
            for channel in channels {
                let pixels: Vec<T> = channel.get_data()?;
                payload.extend_from_slice(&endian::to_be_bytes(&pixels));
            }
            Ok(payload)
        }
        PsdChannelCompression::RleCompressed => {
            // Encode each channel, then split the per-channel streams into
            // their tables and rows so the tables can lead the payload.
            let entry_width = match header.version {
                PsdVersion::One => 2usize,
                PsdVersion::Two => 4,
            };
            let table_len = header.height.0 as usize * entry_width;

            let mut tables = Vec::new();
            let mut rows = Vec::new();
            for channel in channels {
                let pixels: Vec<T> = channel.get_data()?;
                let encoded = rle::compress(
                    &pixels,
                    channel.width(),
                    channel.height(),
                    header.version,
                )?;
                tables.extend_from_slice(&encoded[..table_len]);
                rows.extend_from_slice(&encoded[table_len..]);
            }
            tables.extend_from_slice(&rows);
            Ok(tables)
        }
        other => Err(PsdError::Unsupported(format!(
            "merged image data does not support {:?}",
            other
        ))),
    }
}
