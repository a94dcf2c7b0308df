use std::io::{Seek, Write};

use crate::error::{PsdError, Result};
use crate::sections::{PsdBuffer, PsdCursor, PsdSerialize};

/// Bytes representing the string "8BPS".
const EXPECTED_PSD_SIGNATURE: [u8; 4] = [56, 66, 80, 83];
/// Bytes representing the Reserved section of the header
const EXPECTED_RESERVED: [u8; 6] = [0; 6];

/// The FileHeaderSection comes from the first 26 bytes in the PSD file.
///
/// # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
///
/// The file header contains the basic properties of the image.
///
/// | Length | Description                                                                                                                                          |
/// |--------|------------------------------------------------------------------------------------------------------------------------------------------------------|
/// | 4      | Signature: always equal to '8BPS' . Do not try to read the file if the signature does not match this value.                                          |
/// | 2      | Version: always equal to 1. (**PSB** version is 2.)                                                                                                  |
/// | 6      | Reserved: must be zero.                                                                                                                              |
/// | 2      | The number of channels in the image, including any alpha channels. Supported range is 1 to 56.                                                       |
/// | 4      | The height of the image in pixels. Supported range is 1 to 30,000.<br> (**PSB** max of 300,000.)                                                     |
/// | 4      | The width of the image in pixels. Supported range is 1 to 30,000.<br> (**PSB** max of 300,000)                                                       |
/// | 2      | Depth: the number of bits per channel. Supported values are 1, 8, 16 and 32.                                                                         |
/// | 2      | The color mode of the file. Supported values are: Bitmap = 0; Grayscale = 1; Indexed = 2; RGB = 3; CMYK = 4; Multichannel = 7; Duotone = 8; Lab = 9. |
#[derive(Debug, Clone)]
pub struct FileHeaderSection {
    pub(crate) version: PsdVersion,
    pub(crate) channel_count: ChannelCount,
    pub(crate) width: PsdWidth,
    pub(crate) height: PsdHeight,
    pub(crate) depth: PsdDepth,
    pub(crate) color_mode: ColorMode,
}

impl FileHeaderSection {
    /// Create a FileHeaderSection from the first 26 bytes of a document.
    pub fn from_bytes(bytes: &[u8]) -> Result<FileHeaderSection> {
        if bytes.len() != 26 {
            return Err(PsdError::InvalidArgument(format!(
                "a file header section is comprised of 26 bytes, you provided {} bytes",
                bytes.len()
            )));
        }

        let mut cursor = PsdCursor::new(bytes);

        // First four bytes must be '8BPS'
        let signature = cursor.read_4()?;
        if signature != EXPECTED_PSD_SIGNATURE {
            return Err(PsdError::InvalidSignature {
                location: "file header",
                found: signature,
            });
        }

        let version = PsdVersion::new(cursor.read_u16()?)?;

        // The next 6 bytes are reserved and should always be 0
        let reserved = cursor.read(6)?;
        if reserved != EXPECTED_RESERVED {
            return Err(PsdError::StructuralError(
                "the reserved bytes of the file header must be zero".into(),
            ));
        }

        let channel_count = ChannelCount::new(cursor.read_u16()?)?;
        let height = PsdHeight::new(cursor.read_u32()?, version)?;
        let width = PsdWidth::new(cursor.read_u32()?, version)?;
        let depth = PsdDepth::new(cursor.read_u16()?)?;
        let color_mode = ColorMode::new(cursor.read_u16()?)?;

        Ok(FileHeaderSection {
            version,
            channel_count,
            width,
            height,
            depth,
            color_mode,
        })
    }
}

impl PsdSerialize for FileHeaderSection {
    fn write<W: Write + Seek>(&self, buffer: &mut PsdBuffer<W>) -> Result<()> {
        buffer.write(EXPECTED_PSD_SIGNATURE)?;
        buffer.write_u16(self.version as u16)?;
        buffer.write(EXPECTED_RESERVED)?;
        buffer.write_u16(self.channel_count.count() as u16)?;
        buffer.write_u32(self.height.0)?;
        buffer.write_u32(self.width.0)?;
        buffer.write_u16(self.depth as u16)?;
        buffer.write_u16(self.color_mode as u16)?;
        Ok(())
    }
}

/// # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
///
/// Version: always equal to 1. Do not try to read the file if the version does not match this value. (**PSB** version is 2.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PsdVersion {
    /// Regular PSD: 32-bit section lengths, dimensions up to 30,000
    One = 1,
    /// PSB: specified section lengths widen to 64 bits, dimensions up to 300,000
    Two = 2,
}

impl PsdVersion {
    /// Create a new PsdVersion
    pub fn new(version: u16) -> Result<PsdVersion> {
        match version {
            1 => Ok(PsdVersion::One),
            2 => Ok(PsdVersion::Two),
            _ => Err(PsdError::StructuralError(format!(
                "invalid version {}, must be 1 (PSD) or 2 (PSB)",
                version
            ))),
        }
    }

    /// Whether this is the big (PSB) variant of the format.
    pub fn is_psb(self) -> bool {
        self == PsdVersion::Two
    }

    /// Width in bytes of the promoted length markers for this version.
    pub(crate) fn length_marker_width(self) -> usize {
        match self {
            PsdVersion::One => 4,
            PsdVersion::Two => 8,
        }
    }

    /// The largest legal width or height for this version.
    pub fn max_dimension(self) -> u32 {
        match self {
            PsdVersion::One => 30_000,
            PsdVersion::Two => 300_000,
        }
    }
}

/// # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
///
/// The number of channels in the image, including any alpha channels. Supported range is 1 to 56.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCount(u8);

impl ChannelCount {
    /// Create a new ChannelCount
    pub fn new(channel_count: u16) -> Result<ChannelCount> {
        if !(1..=56).contains(&channel_count) {
            return Err(PsdError::InvalidArgument(format!(
                "invalid channel count: {}. Must be 1 <= channel count <= 56",
                channel_count
            )));
        }

        Ok(ChannelCount(channel_count as u8))
    }

    /// Return the channel count
    pub fn count(&self) -> u8 {
        self.0
    }
}

/// # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
///
/// The height of the image in pixels. Supported range is 1 to 30,000.
/// (**PSB** max of 300,000.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsdHeight(pub(crate) u32);

impl PsdHeight {
    /// Create a new PsdHeight
    pub fn new(height: u32, version: PsdVersion) -> Result<PsdHeight> {
        if height < 1 || height > version.max_dimension() {
            return Err(PsdError::InvalidArgument(format!(
                "invalid height: {}. Must be 1 <= height <= {}",
                height,
                version.max_dimension()
            )));
        }

        Ok(PsdHeight(height))
    }
}

/// # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
///
/// The width of the image in pixels. Supported range is 1 to 30,000.
/// (**PSB** max of 300,000)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsdWidth(pub(crate) u32);

impl PsdWidth {
    /// Create a new PsdWidth
    pub fn new(width: u32, version: PsdVersion) -> Result<PsdWidth> {
        if width < 1 || width > version.max_dimension() {
            return Err(PsdError::InvalidArgument(format!(
                "invalid width: {}. Must be 1 <= width <= {}",
                width,
                version.max_dimension()
            )));
        }

        Ok(PsdWidth(width))
    }
}

/// # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
///
/// Depth: the number of bits per channel. Supported values are 1, 8, 16 and 32.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum PsdDepth {
    One = 1,
    Eight = 8,
    Sixteen = 16,
    ThirtyTwo = 32,
}

impl PsdDepth {
    /// Create a new PsdDepth
    pub fn new(depth: u16) -> Result<PsdDepth> {
        match depth {
            1 => Ok(PsdDepth::One),
            8 => Ok(PsdDepth::Eight),
            16 => Ok(PsdDepth::Sixteen),
            32 => Ok(PsdDepth::ThirtyTwo),
            _ => Err(PsdError::InvalidArgument(format!(
                "depth {} is invalid. Must be 1, 8, 16 or 32",
                depth
            ))),
        }
    }

    /// Bytes per channel element. 1-bit documents pack eight pixels per
    /// byte and are only ever handled as raw merged image data.
    pub fn bytes_per_element(self) -> usize {
        match self {
            PsdDepth::One | PsdDepth::Eight => 1,
            PsdDepth::Sixteen => 2,
            PsdDepth::ThirtyTwo => 4,
        }
    }
}

/// # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
///
/// The color mode of the file. Supported values are: Bitmap = 0; Grayscale = 1; Indexed = 2; RGB = 3; CMYK = 4; Multichannel = 7; Duotone = 8; Lab = 9.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum ColorMode {
    Bitmap = 0,
    Grayscale = 1,
    Indexed = 2,
    Rgb = 3,
    Cmyk = 4,
    Multichannel = 7,
    Duotone = 8,
    Lab = 9,
}

impl ColorMode {
    /// Create a new ColorMode
    pub fn new(color_mode: u16) -> Result<ColorMode> {
        match color_mode {
            0 => Ok(ColorMode::Bitmap),
            1 => Ok(ColorMode::Grayscale),
            2 => Ok(ColorMode::Indexed),
            3 => Ok(ColorMode::Rgb),
            4 => Ok(ColorMode::Cmyk),
            7 => Ok(ColorMode::Multichannel),
            8 => Ok(ColorMode::Duotone),
            9 => Ok(ColorMode::Lab),
            _ => Err(PsdError::InvalidArgument(format!(
                "invalid color mode {}. Must be 0, 1, 2, 3, 4, 7, 8 or 9",
                color_mode
            ))),
        }
    }

    /// How many of a layer's non-negative channel indices address color
    /// data in this mode.
    ///
    /// Channel indexing is only defined for the modes the compositor can
    /// work with; the exotic modes keep their channels as opaque payloads.
    pub fn color_channel_count(self) -> Result<usize> {
        match self {
            ColorMode::Grayscale => Ok(1),
            ColorMode::Rgb => Ok(3),
            ColorMode::Cmyk => Ok(4),
            other => Err(PsdError::Unsupported(format!(
                "channel indexing is not defined for {:?} documents",
                other
            ))),
        }
    }
}
