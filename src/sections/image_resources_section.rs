//! The image resources section.
//!
//! # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
//!
//! A series of resource blocks, each `'8BIM', u16 id, Pascal name (padded
//! to 2), u32 length, data (padded to 2)`. Unknown ids are preserved
//! verbatim; the resolution info (1005) and ICC profile (1039) blocks also
//! get typed accessors because the document model surfaces them.

use std::io::{Seek, Write};

use crate::error::{PsdError, Result};
use crate::pascal_string::CodePage;
use crate::sections::{PsdBuffer, PsdCursor, PsdSerialize};

const EXPECTED_RESOURCE_BLOCK_SIGNATURE: [u8; 4] = *b"8BIM";

/// ResolutionInfo structure
const RESOURCE_RESOLUTION_INFO: u16 = 1005;
/// ICC profile bytes
const RESOURCE_ICC_PROFILE: u16 = 1039;

/// One resource block, id plus raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResource {
    /// The resource id
    pub id: u16,
    /// The resource name, usually empty
    pub name: String,
    /// The payload, preserved verbatim
    pub data: Vec<u8>,
}

/// The ordered list of resource blocks.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct ImageResourcesSection {
    pub(crate) resources: Vec<ImageResource>,
}

impl ImageResourcesSection {
    /// Parse the section from its bytes (length marker included).
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<ImageResourcesSection> {
        let mut cursor = PsdCursor::new(bytes);
        let len = cursor.read_u32()? as u64;
        let mut cursor = PsdCursor::new(cursor.read(len)?);

        let mut resources = Vec::new();
        while cursor.remaining() >= 8 {
            resources.push(read_resource_block(&mut cursor)?);
        }

        Ok(ImageResourcesSection { resources })
    }

    /// The first resource with the given id.
    pub(crate) fn get(&self, id: u16) -> Option<&ImageResource> {
        self.resources.iter().find(|resource| resource.id == id)
    }

    /// Insert or replace the resource with the given id.
    pub(crate) fn set(&mut self, id: u16, data: Vec<u8>) {
        match self.resources.iter_mut().find(|resource| resource.id == id) {
            Some(resource) => resource.data = data,
            None => self.resources.push(ImageResource {
                id,
                name: String::new(),
                data,
            }),
        }
    }

    /// The document resolution, when a ResolutionInfo block is present.
    pub(crate) fn resolution_info(&self) -> Option<ResolutionInfo> {
        let resource = self.get(RESOURCE_RESOLUTION_INFO)?;
        ResolutionInfo::from_bytes(&resource.data).ok()
    }

    /// Store the document resolution.
    pub(crate) fn set_resolution_info(&mut self, info: ResolutionInfo) {
        self.set(RESOURCE_RESOLUTION_INFO, info.to_bytes());
    }

    /// The raw ICC profile bytes, when present.
    pub(crate) fn icc_profile(&self) -> Option<&[u8]> {
        self.get(RESOURCE_ICC_PROFILE)
            .map(|resource| resource.data.as_slice())
    }

    /// Store the raw ICC profile bytes.
    pub(crate) fn set_icc_profile(&mut self, profile: Vec<u8>) {
        self.set(RESOURCE_ICC_PROFILE, profile);
    }
}

impl PsdSerialize for ImageResourcesSection {
    fn write<W: Write + Seek>(&self, buffer: &mut PsdBuffer<W>) -> Result<()> {
        buffer.with_length_marker(4, |body| {
            for resource in &self.resources {
                body.write(EXPECTED_RESOURCE_BLOCK_SIGNATURE)?;
                body.write_u16(resource.id)?;
                body.write_pascal_string(&resource.name, 2, CodePage::Windows1252)?;
                body.write_u32(resource.data.len() as u32)?;

                let start = body.position()?;
                body.write(&resource.data)?;
                body.pad_since(start, 2)?;
            }
            Ok(())
        })
    }
}

fn read_resource_block(cursor: &mut PsdCursor<'_>) -> Result<ImageResource> {
    let signature = cursor.read_4()?;
    if signature != EXPECTED_RESOURCE_BLOCK_SIGNATURE {
        return Err(PsdError::InvalidSignature {
            location: "image resource block",
            found: signature,
        });
    }

    let id = cursor.read_u16()?;
    let name = cursor.read_pascal_string(2, CodePage::Windows1252)?;

    let data_len = cursor.read_u32()? as u64;
    let data = cursor.read(data_len)?.to_vec();
    // Payloads are padded to even length.
    if data_len % 2 == 1 && cursor.remaining() > 0 {
        cursor.read(1)?;
    }

    Ok(ImageResource { id, name, data })
}

/// The ResolutionInfo structure (resource 1005).
///
/// Resolutions are 16.16 fixed point; the unit fields are 1 for
/// pixels-per-inch and 2 for pixels-per-centimeter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionInfo {
    /// Horizontal resolution in pixels per inch
    pub horizontal: f64,
    /// Display unit of the horizontal resolution
    pub horizontal_unit: u16,
    /// Display unit of the document width
    pub width_unit: u16,
    /// Vertical resolution in pixels per inch
    pub vertical: f64,
    /// Display unit of the vertical resolution
    pub vertical_unit: u16,
    /// Display unit of the document height
    pub height_unit: u16,
}

impl ResolutionInfo {
    /// A square resolution in pixels per inch.
    pub fn with_dpi(dpi: u32) -> ResolutionInfo {
        ResolutionInfo {
            horizontal: dpi as f64,
            horizontal_unit: 1,
            width_unit: 1,
            vertical: dpi as f64,
            vertical_unit: 1,
            height_unit: 1,
        }
    }

    /// The rounded horizontal DPI.
    pub fn dpi(&self) -> u32 {
        self.horizontal.round() as u32
    }

    fn from_bytes(bytes: &[u8]) -> Result<ResolutionInfo> {
        let mut cursor = PsdCursor::new(bytes);
        Ok(ResolutionInfo {
            horizontal: cursor.read_u32()? as f64 / 65536.0,
            horizontal_unit: cursor.read_u16()?,
            width_unit: cursor.read_u16()?,
            vertical: cursor.read_u32()? as f64 / 65536.0,
            vertical_unit: cursor.read_u16()?,
            height_unit: cursor.read_u16()?,
        })
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&(((self.horizontal * 65536.0) as u32).to_be_bytes()));
        bytes.extend_from_slice(&self.horizontal_unit.to_be_bytes());
        bytes.extend_from_slice(&self.width_unit.to_be_bytes());
        bytes.extend_from_slice(&(((self.vertical * 65536.0) as u32).to_be_bytes()));
        bytes.extend_from_slice(&self.vertical_unit.to_be_bytes());
        bytes.extend_from_slice(&self.height_unit.to_be_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(section: &ImageResourcesSection) -> ImageResourcesSection {
        let mut buffer = PsdBuffer::new();
        section.write(&mut buffer).unwrap();
        ImageResourcesSection::from_bytes(&buffer.into_bytes()).unwrap()
    }

    #[test]
    fn unknown_resources_round_trip() {
        let section = ImageResourcesSection {
            resources: vec![
                ImageResource {
                    id: 4000,
                    name: String::new(),
                    data: vec![1, 2, 3],
                },
                ImageResource {
                    id: 4001,
                    name: "named".into(),
                    data: vec![4, 5, 6, 7],
                },
            ],
        };
        assert_eq!(round_trip(&section), section);
    }

    #[test]
    fn resolution_info_round_trips() {
        let mut section = ImageResourcesSection::default();
        section.set_resolution_info(ResolutionInfo::with_dpi(300));

        let parsed = round_trip(&section);
        let info = parsed.resolution_info().unwrap();
        assert_eq!(info.dpi(), 300);
        assert_eq!(info.horizontal_unit, 1);
    }

    #[test]
    fn icc_profile_round_trips() {
        let mut section = ImageResourcesSection::default();
        section.set_icc_profile(vec![0xAC, 0x5B, 0x12]);

        let parsed = round_trip(&section);
        assert_eq!(parsed.icc_profile().unwrap(), &[0xAC, 0x5B, 0x12]);
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut buffer = PsdBuffer::new();
        buffer.write_u32(8).unwrap();
        buffer.write(*b"8BIN").unwrap();
        buffer.write_u32(0).unwrap();
        assert!(matches!(
            ImageResourcesSection::from_bytes(&buffer.into_bytes()),
            Err(PsdError::InvalidSignature { .. })
        ));
    }
}
