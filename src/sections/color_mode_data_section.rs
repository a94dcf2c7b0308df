//! The color mode data section.
//!
//! # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
//!
//! Only indexed color and duotone have color mode data: the 768-byte
//! palette for indexed files, the undocumented duotone specification for
//! duotone files. For all other modes the section is just the four-byte
//! length field, which is set to zero.

use std::io::{Seek, Write};

use crate::error::{PsdError, Result};
use crate::sections::file_header_section::ColorMode;
use crate::sections::{PsdBuffer, PsdCursor, PsdSerialize};

/// Length of an indexed-mode palette: 256 RGB entries, channel-planar.
const INDEXED_PALETTE_LEN: usize = 768;

/// The raw color mode data, carried for indexed and duotone documents.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct ColorModeDataSection {
    pub(crate) data: Vec<u8>,
}

impl ColorModeDataSection {
    /// Parse the section from its bytes (length marker included).
    pub(crate) fn from_bytes(bytes: &[u8], color_mode: ColorMode) -> Result<ColorModeDataSection> {
        let mut cursor = PsdCursor::new(bytes);
        let len = cursor.read_u32()? as u64;
        let data = cursor.read(len)?.to_vec();

        if color_mode == ColorMode::Indexed && data.len() != INDEXED_PALETTE_LEN {
            return Err(PsdError::StructuralError(format!(
                "indexed color mode data must be {} bytes, found {}",
                INDEXED_PALETTE_LEN,
                data.len()
            )));
        }

        Ok(ColorModeDataSection { data })
    }

    /// The palette of an indexed document as (r, g, b) rows.
    pub(crate) fn palette(&self) -> Option<Vec<[u8; 3]>> {
        if self.data.len() != INDEXED_PALETTE_LEN {
            return None;
        }
        // The palette is planar: all reds, all greens, all blues.
        Some(
            (0..256)
                .map(|i| [self.data[i], self.data[256 + i], self.data[512 + i]])
                .collect(),
        )
    }
}

impl PsdSerialize for ColorModeDataSection {
    fn write<W: Write + Seek>(&self, buffer: &mut PsdBuffer<W>) -> Result<()> {
        buffer.with_length_marker(4, |body| {
            let start = body.position()?;
            body.write(&self.data)?;
            body.pad_since(start, 2)
        })
    }
}
