//! The five major sections of a document and the cursor/buffer plumbing
//! they share.
//!
//! ┌──────────────────┐
//! │   File Header    │
//! ├──────────────────┤
//! │ Color Mode Data  │
//! ├──────────────────┤
//! │ Image Resources  │
//! ├──────────────────┤
//! │  Layer and Mask  │
//! ├──────────────────┤
//! │    Image Data    │
//! └──────────────────┘
//!
//! Every section after the fixed-size header leads with a length marker, so
//! reading walks marker to marker and writing runs in two passes: build each
//! section in memory to learn its size, then stream the markers and bodies
//! out in order.

use std::io::{Cursor, Seek, SeekFrom, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{PsdError, Result};
use crate::pascal_string::{self, CodePage};
use crate::sections::file_header_section::PsdVersion;

pub(crate) mod color_mode_data_section;
pub(crate) mod file_header_section;
pub(crate) mod image_data_section;
pub(crate) mod image_resources_section;
pub(crate) mod layer_and_mask_information_section;

/// The length of the entire file header section
pub(crate) const FILE_HEADER_SECTION_LEN: usize = 26;

/// References to the byte ranges of each major section, length markers
/// included.
pub(crate) struct MajorSections<'a> {
    pub(crate) file_header: &'a [u8],
    pub(crate) color_mode_data: &'a [u8],
    pub(crate) image_resources: &'a [u8],
    pub(crate) layer_and_mask: &'a [u8],
    pub(crate) image_data: &'a [u8],
}

impl<'a> MajorSections<'a> {
    /// Split the bytes of a whole document into its five major sections.
    ///
    /// The layer-and-mask length marker is 4 bytes in a PSD and 8 bytes in
    /// a PSB, so the header's version field is peeked at before walking the
    /// variable sections.
    pub(crate) fn from_bytes(bytes: &'a [u8]) -> Result<MajorSections<'a>> {
        if bytes.len() < FILE_HEADER_SECTION_LEN {
            return Err(PsdError::IoOverflow {
                offset: 0,
                requested: FILE_HEADER_SECTION_LEN as u64,
                available: bytes.len() as u64,
            });
        }

        let version = PsdVersion::new(u16::from_be_bytes([bytes[4], bytes[5]]))?;

        let file_header = &bytes[..FILE_HEADER_SECTION_LEN];
        let mut cursor = PsdCursor::new(bytes);
        cursor.set_position(FILE_HEADER_SECTION_LEN as u64);

        let color_mode_data = read_length_delimited(&mut cursor, 4)?;
        let image_resources = read_length_delimited(&mut cursor, 4)?;
        let layer_and_mask = read_length_delimited(&mut cursor, version.length_marker_width())?;
        let image_data = cursor.read_remaining();

        Ok(MajorSections {
            file_header,
            color_mode_data,
            image_resources,
            layer_and_mask,
            image_data,
        })
    }
}

/// Read one `{length marker, body}` pair, returning a slice that still
/// includes the marker so each section parser sees its complete wire form.
fn read_length_delimited<'a>(
    cursor: &mut PsdCursor<'a>,
    marker_width: usize,
) -> Result<&'a [u8]> {
    let start = cursor.position() as usize;
    let len = match marker_width {
        4 => cursor.read_u32()? as u64,
        8 => cursor.read_u64()?,
        _ => unreachable!("length markers are 4 or 8 bytes"),
    };
    cursor.read(len)?;
    Ok(&cursor.bytes[start..cursor.position() as usize])
}

/// A cursor over the bytes of a document.
///
/// Provides the fixed-width big-endian reads the format is built from;
/// every accessor fails with [`PsdError::IoOverflow`] instead of reading
/// past the end.
pub(crate) struct PsdCursor<'a> {
    bytes: &'a [u8],
    position: u64,
}

impl<'a> PsdCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> PsdCursor<'a> {
        PsdCursor { bytes, position: 0 }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }

    pub fn remaining(&self) -> u64 {
        self.bytes.len() as u64 - self.position
    }

    /// Advance past `count` bytes and return them.
    pub fn read(&mut self, count: u64) -> Result<&'a [u8]> {
        let start = self.position as usize;
        let end = start
            .checked_add(count as usize)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(PsdError::IoOverflow {
                offset: self.position,
                requested: count,
                available: self.remaining(),
            })?;
        self.position = end as u64;
        Ok(&self.bytes[start..end])
    }

    /// Everything from the cursor to the end of the input.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.position as usize..];
        self.position = self.bytes.len() as u64;
        rest
    }

    /// Look at the next four bytes without advancing.
    pub fn peek_4(&self) -> Result<[u8; 4]> {
        let start = self.position as usize;
        if start + 4 > self.bytes.len() {
            return Err(PsdError::IoOverflow {
                offset: self.position,
                requested: 4,
                available: self.remaining(),
            });
        }
        let mut out = [0; 4];
        out.copy_from_slice(&self.bytes[start..start + 4]);
        Ok(out)
    }

    pub fn read_4(&mut self) -> Result<[u8; 4]> {
        let bytes = self.read(4)?;
        let mut out = [0; 4];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read(1)?[0] as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.read(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.read(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.read(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Read a length marker that is 4 bytes wide in a PSD and 8 in a PSB.
    pub fn read_length_marker(&mut self, version: PsdVersion) -> Result<u64> {
        match version.length_marker_width() {
            4 => Ok(self.read_u32()? as u64),
            _ => self.read_u64(),
        }
    }

    /// Read a Unicode string: a 4-byte count of UTF-16 code units followed
    /// by that many big-endian units.
    pub fn read_unicode_string(&mut self) -> Result<String> {
        let unit_count = self.read_u32()? as u64;
        let bytes = self.read(unit_count * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        // Photoshop frequently writes a trailing NUL inside the counted
        // range; strip it so names compare cleanly.
        let trimmed = match units.last() {
            Some(0) => &units[..units.len() - 1],
            _ => &units[..],
        };
        Ok(String::from_utf16_lossy(trimmed))
    }

    /// Read a Pascal string padded to `pad` bytes and decode it from the
    /// legacy code page.
    pub fn read_pascal_string(&mut self, pad: u64, code_page: CodePage) -> Result<String> {
        let len = self.read_u8()? as u64;
        let text = pascal_string::decode(self.read(len)?, code_page);
        let padding = pascal_string::padded_len(len as usize, pad as usize) as u64 - (len + 1);
        self.read(padding)?;
        Ok(text)
    }
}

/// A seekable write buffer for the two-pass writer.
///
/// Sections serialize themselves into one of these; forward length fields
/// are written as placeholders and patched once the body size is known.
pub(crate) struct PsdBuffer<W: Write + Seek> {
    writer: W,
}

impl PsdBuffer<Cursor<Vec<u8>>> {
    /// An in-memory buffer, the usual target for section bodies.
    pub fn new() -> Self {
        PsdBuffer {
            writer: Cursor::new(Vec::new()),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_inner()
    }
}

impl<W: Write + Seek> PsdBuffer<W> {
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.writer.stream_position()?)
    }

    pub fn write(&mut self, bytes: impl AsRef<[u8]>) -> Result<()> {
        self.writer.write_all(bytes.as_ref())?;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.writer.write_u16::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.writer.write_i16::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.writer.write_i32::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<BigEndian>(value)?;
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.writer.write_u64::<BigEndian>(value.to_bits())?;
        Ok(())
    }

    /// Write a length marker that is 4 bytes wide in a PSD and 8 in a PSB.
    pub fn write_length_marker(&mut self, version: PsdVersion, value: u64) -> Result<()> {
        match version.length_marker_width() {
            4 => self.write_u32(u32::try_from(value).map_err(|_| {
                PsdError::StructuralError(format!(
                    "section of {} bytes does not fit a PSD length field",
                    value
                ))
            })?),
            _ => self.write_u64(value),
        }
    }

    /// Run `body`, preceding its output with a marker holding the number of
    /// bytes it wrote. `width` is 4 or 8.
    pub fn with_length_marker<F>(&mut self, width: usize, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let marker_at = self.position()?;
        match width {
            4 => self.write_u32(0)?,
            8 => self.write_u64(0)?,
            _ => unreachable!("length markers are 4 or 8 bytes"),
        }
        let body_start = self.position()?;
        body(self)?;
        let end = self.position()?;

        self.writer.seek(SeekFrom::Start(marker_at))?;
        let len = end - body_start;
        match width {
            4 => self.write_u32(u32::try_from(len).map_err(|_| {
                PsdError::StructuralError(format!(
                    "section of {} bytes does not fit a 32-bit length field",
                    len
                ))
            })?)?,
            _ => self.write_u64(len)?,
        }
        self.writer.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    /// Zero-pad so that the bytes written since `start` are a multiple of
    /// `alignment`.
    pub fn pad_since(&mut self, start: u64, alignment: u64) -> Result<()> {
        let written = self.position()? - start;
        let padding = (alignment - written % alignment) % alignment;
        for _ in 0..padding {
            self.write_u8(0)?;
        }
        Ok(())
    }

    /// Write a Unicode string: unit count then UTF-16BE units.
    pub fn write_unicode_string(&mut self, text: &str) -> Result<()> {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.write_u32(units.len() as u32)?;
        for unit in units {
            self.write_u16(unit)?;
        }
        Ok(())
    }

    /// Write a Pascal string padded to `pad` bytes.
    pub fn write_pascal_string(&mut self, text: &str, pad: usize, code_page: CodePage) -> Result<()> {
        self.write(pascal_string::encode(text, pad, code_page)?)
    }
}

/// Implemented by every structure that knows its own wire form.
pub(crate) trait PsdSerialize {
    fn write<W: Write + Seek>(&self, buffer: &mut PsdBuffer<W>) -> Result<()>;
}
