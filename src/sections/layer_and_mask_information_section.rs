//! The layer and mask information section.
//!
//! # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
//!
//! The fourth section of a Photoshop file contains information about layers
//! and masks.
//!
//! | Length   | Description                                                                  |
//! |----------|------------------------------------------------------------------------------|
//! | 4        | Length of the layer and mask information section. (**PSB** length is 8 bytes.)|
//! | Variable | Layer info: layer count, layer records, channel image data.                  |
//! | Variable | Global layer mask info.                                                      |
//! | Variable | Series of tagged blocks containing various types of data.                    |
//!
//! In 16- and 32-bit documents the layer info is not stored inline: the
//! inline length is written as zero and the real layer info rides inside
//! the `Lr16`/`Lr32` tagged block at document scope.

use std::io::{Seek, Write};

use crate::blend_mode::BlendMode;
use crate::error::{PsdError, Result};
use crate::file::{check_cancelled, ProgressCallback};
use crate::geometry::{generate_coordinates, ChannelExtents};
use crate::layer::tree::{self, FlatLayer};
use crate::layer::{Layer, LayerMask, LayerProperties};
use crate::pascal_string::CodePage;
use crate::pixel::Pixel;
use crate::psd_channel::{
    ChannelElement, PsdChannel, PsdChannelCompression, PsdChannelKind,
};
use crate::sections::file_header_section::{FileHeaderSection, PsdDepth, PsdVersion};
use crate::sections::{PsdBuffer, PsdCursor};
use crate::tagged_block::{self, TaggedBlock, TaggedBlockData};
use crate::{compression, tagged_block::SIGNATURE_EIGHT_BIM};

/// Flag bit 0: transparency protected
const FLAG_TRANSPARENCY_PROTECTED: u8 = 1 << 0;
/// Flag bit 1: the layer is hidden
const FLAG_HIDDEN: u8 = 1 << 1;
/// Flag bit 3: bit 4 carries useful information
const FLAG_BIT4_USEFUL: u8 = 1 << 3;
/// Flag bit 4: pixel data irrelevant to the document's appearance
const FLAG_PIXEL_DATA_IRRELEVANT: u8 = 1 << 4;

/// Mask flag bit 0: position is relative to the layer
const MASK_FLAG_RELATIVE: u8 = 1 << 0;
/// Mask flag bit 1: the mask is disabled
const MASK_FLAG_DISABLED: u8 = 1 << 1;
/// Mask flag bit 4: mask parameters follow the flags
const MASK_FLAG_HAS_PARAMETERS: u8 = 1 << 4;

/// Mask parameter bit 0: a user density byte is present
const MASK_PARAM_DENSITY: u8 = 1 << 0;
/// Mask parameter bit 1: a user feather double is present
const MASK_PARAM_FEATHER: u8 = 1 << 1;

/// The parsed fourth section: the layer forest plus the document-scope
/// extras that ride along with it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LayerAndMaskInformationSection {
    /// The layer forest in document order, index 0 on top.
    pub(crate) layers: Vec<Layer>,
    /// Negative layer count: the first alpha channel of the merged image
    /// holds the merged transparency.
    pub(crate) merged_alpha: bool,
    /// Global layer mask info, preserved as read.
    pub(crate) global_mask_info: Option<Vec<u8>>,
    /// Document-scope tagged blocks (minus the `Lr16`/`Lr32` rehoist,
    /// which is regenerated on write).
    pub(crate) tagged_blocks: Vec<TaggedBlock>,
}

impl LayerAndMaskInformationSection {
    pub(crate) fn empty() -> LayerAndMaskInformationSection {
        LayerAndMaskInformationSection {
            layers: Vec::new(),
            merged_alpha: false,
            global_mask_info: None,
            tagged_blocks: Vec::new(),
        }
    }

    /// Parse the section from its bytes (length marker included).
    pub(crate) fn from_bytes(
        bytes: &[u8],
        header: &FileHeaderSection,
        progress: &mut dyn ProgressCallback,
    ) -> Result<LayerAndMaskInformationSection> {
        let version = header.version;
        let mut cursor = PsdCursor::new(bytes);
        let section_len = cursor.read_length_marker(version)?;
        if section_len == 0 {
            return Ok(LayerAndMaskInformationSection::empty());
        }

        // Layer info: zero length means the layers live in Lr16/Lr32.
        let layer_info_len = cursor.read_length_marker(version)?;
        let layer_info = cursor.read(layer_info_len)?;

        // Global layer mask info, preserved verbatim. Some writers omit
        // the field entirely and go straight into tagged blocks.
        let global_mask_info = if cursor.remaining() >= 4
            && cursor.peek_4()? != SIGNATURE_EIGHT_BIM
            && cursor.peek_4()? != *b"8B64"
        {
            let len = cursor.read_u32()? as u64;
            if len == 0 {
                None
            } else {
                Some(cursor.read(len)?.to_vec())
            }
        } else {
            None
        };

        // Document-scope tagged blocks.
        let mut blocks = tagged_block::read_tagged_blocks(
            cursor.read_remaining(),
            version,
            tagged_block_padding(version),
        )?;

        // 16/32-bit documents re-host the layer info inside Lr16/Lr32.
        let rehoisted = blocks.iter().position(|block| {
            matches!(&block.key, b"Lr16" | b"Lr32") && matches!(block.data, TaggedBlockData::Raw(_))
        });
        let layer_info = match rehoisted {
            Some(index) => match blocks.remove(index).data {
                TaggedBlockData::Raw(payload) => RehoistedOrInline::Rehoisted(payload),
                _ => unreachable!("position matched a raw block"),
            },
            None => RehoistedOrInline::Inline(layer_info),
        };

        let (flat, merged_alpha) = parse_layer_info(layer_info.bytes(), header, progress)?;
        let layers = tree::build(flat)?;

        Ok(LayerAndMaskInformationSection {
            layers,
            merged_alpha,
            global_mask_info,
            tagged_blocks: blocks,
        })
    }

    /// Write the section, length marker included.
    pub(crate) fn write<W: Write + Seek>(
        &self,
        buffer: &mut PsdBuffer<W>,
        header: &FileHeaderSection,
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        let version = header.version;

        // First pass: build the layer info body so its size is known
        // before any length field is streamed out.
        let mut layer_info = PsdBuffer::new();
        write_layer_info(&mut layer_info, &self.layers, self.merged_alpha, header, progress)?;
        let layer_info = layer_info.into_bytes();

        let rehoist_key = match header.depth {
            PsdDepth::Sixteen => Some(*b"Lr16"),
            PsdDepth::ThirtyTwo => Some(*b"Lr32"),
            _ => None,
        };

        buffer.with_length_marker(version.length_marker_width(), |body| {
            let start = body.position()?;

            match rehoist_key {
                None => {
                    body.write_length_marker(version, layer_info.len() as u64)?;
                    body.write(&layer_info)?;
                }
                Some(_) => {
                    // Inline layer info is empty; the payload rides in the
                    // rehoist block below.
                    body.write_length_marker(version, 0)?;
                }
            }

            match &self.global_mask_info {
                None => body.write_u32(0)?,
                Some(info) => {
                    body.write_u32(info.len() as u32)?;
                    body.write(info)?;
                }
            }

            let mut blocks = Vec::new();
            if let Some(key) = rehoist_key {
                blocks.push(TaggedBlock::new_raw(key, layer_info.clone()));
            }
            blocks.extend(self.tagged_blocks.iter().cloned());
            tagged_block::write_tagged_blocks(
                body,
                &blocks,
                version,
                tagged_block_padding(version),
            )?;

            body.pad_since(start, section_padding(version))
        })
    }
}

enum RehoistedOrInline<'a> {
    Rehoisted(Vec<u8>),
    Inline(&'a [u8]),
}

impl RehoistedOrInline<'_> {
    fn bytes(&self) -> &[u8] {
        match self {
            RehoistedOrInline::Rehoisted(bytes) => bytes,
            RehoistedOrInline::Inline(bytes) => bytes,
        }
    }
}

/// Alignment of the layer-and-mask section body.
fn section_padding(version: PsdVersion) -> u64 {
    match version {
        PsdVersion::One => 2,
        PsdVersion::Two => 4,
    }
}

/// Alignment of tagged block payloads in this section.
fn tagged_block_padding(version: PsdVersion) -> u64 {
    match version {
        PsdVersion::One => 2,
        PsdVersion::Two => 4,
    }
}

/// A layer record as read from the file, before the channel image data is
/// attached.
struct LayerRecord {
    properties: LayerProperties,
    extents: ChannelExtents,
    /// Per channel: the id and the length of its compressed data
    /// (compression code included).
    channel_info: Vec<(PsdChannelKind, u64)>,
}

/// Parse `{layer count, records, channel data}` and return flat layers in
/// document order (top first).
fn parse_layer_info(
    bytes: &[u8],
    header: &FileHeaderSection,
    progress: &mut dyn ProgressCallback,
) -> Result<(Vec<FlatLayer>, bool)> {
    if bytes.is_empty() {
        return Ok((Vec::new(), false));
    }

    let mut cursor = PsdCursor::new(bytes);

    // Negative: absolute value is the layer count and the first alpha
    // channel holds the merged transparency.
    let layer_count = cursor.read_i16()?;
    let merged_alpha = layer_count < 0;
    let layer_count = layer_count.unsigned_abs();

    let mut records = Vec::with_capacity(layer_count as usize);
    for _ in 0..layer_count {
        records.push(read_layer_record(&mut cursor, header)?);
    }

    // The channel image data follows the records, channel payloads
    // concatenated in declaration order with no framing between them.
    let mut flat = Vec::with_capacity(records.len());
    for record in records {
        check_cancelled(progress)?;

        let mut channels = Vec::with_capacity(record.channel_info.len());
        for (kind, declared_len) in &record.channel_info {
            let payload = cursor.read(*declared_len).map_err(|_| {
                PsdError::StructuralError(format!(
                    "channel {:?} of layer \"{}\" declares {} bytes but the channel data section ends early",
                    kind, record.properties.name, declared_len
                ))
            })?;
            channels.push(read_channel(
                payload,
                *kind,
                &record,
                header,
            )?);
        }

        let mut properties = record.properties;
        properties.coordinates =
            generate_coordinates(record.extents, header.width.0, header.height.0);
        flat.push(FlatLayer {
            properties,
            channels,
        });
    }

    // File order is bottom-to-top; the tree walks top-to-bottom.
    flat.reverse();
    Ok((flat, merged_alpha))
}

/// Decode one channel payload (`u16 compression code` + data) into a
/// compressed in-memory channel.
fn read_channel(
    payload: &[u8],
    kind: PsdChannelKind,
    record: &LayerRecord,
    header: &FileHeaderSection,
) -> Result<PsdChannel> {
    let mut cursor = PsdCursor::new(payload);
    let compression = PsdChannelCompression::new(cursor.read_u16()?)?;
    let data = cursor.read_remaining();

    // Masks have their own rectangle; everything else shares the layer's.
    let (width, height) = if kind.is_mask() {
        match &record.properties.mask {
            Some(mask) => (
                mask.extents.width().max(0) as u32,
                mask.extents.height().max(0) as u32,
            ),
            None => (0, 0),
        }
    } else {
        (
            record.extents.width().max(0) as u32,
            record.extents.height().max(0) as u32,
        )
    };

    match header.depth {
        PsdDepth::Eight => build_channel::<u8>(data, kind, compression, width, height, header),
        PsdDepth::Sixteen => build_channel::<u16>(data, kind, compression, width, height, header),
        PsdDepth::ThirtyTwo => build_channel::<f32>(data, kind, compression, width, height, header),
        PsdDepth::One => Err(PsdError::Unsupported(
            "1-bit documents do not carry per-layer channels".into(),
        )),
    }
}

fn build_channel<T: Pixel + ChannelElement>(
    data: &[u8],
    kind: PsdChannelKind,
    compression: PsdChannelCompression,
    width: u32,
    height: u32,
    header: &FileHeaderSection,
) -> Result<PsdChannel> {
    let pixels: Vec<T> = compression::decompress(data, compression, width, height, header.version)?;
    PsdChannel::new(kind, compression, &pixels, width, height)
}

/// Read one layer record.
///
/// | Length                 | Description                                                        |
/// |------------------------|--------------------------------------------------------------------|
/// | 4 * 4                  | Rectangle: top, left, bottom, right                                |
/// | 2                      | Number of channels                                                 |
/// | 6 or 10 per channel    | 2 byte id; 4 byte (**PSB** 8 byte) compressed length               |
/// | 4                      | Blend mode signature '8BIM'                                        |
/// | 4                      | Blend mode key                                                     |
/// | 1                      | Opacity                                                            |
/// | 1                      | Clipping: 0 = base, 1 = non-base                                   |
/// | 1                      | Flags                                                              |
/// | 1                      | Filler (zero)                                                      |
/// | 4                      | Length of the extra data: mask, blending ranges, name, tagged blocks |
fn read_layer_record(cursor: &mut PsdCursor<'_>, header: &FileHeaderSection) -> Result<LayerRecord> {
    let version = header.version;

    let top = cursor.read_i32()?;
    let left = cursor.read_i32()?;
    let bottom = cursor.read_i32()?;
    let right = cursor.read_i32()?;
    let extents = ChannelExtents::new(top, left, bottom, right);

    let channel_count = cursor.read_u16()?;
    let mut channel_info = Vec::with_capacity(channel_count as usize);
    for _ in 0..channel_count {
        let kind = PsdChannelKind::new(cursor.read_i16()?)?;
        let length = cursor.read_length_marker(version)?;
        channel_info.push((kind, length));
    }

    let signature = cursor.read_4()?;
    if signature != SIGNATURE_EIGHT_BIM {
        return Err(PsdError::InvalidSignature {
            location: "layer record blend mode",
            found: signature,
        });
    }

    let blend_mode = BlendMode::from_key(cursor.read_4()?)?;
    let opacity = cursor.read_u8()?;
    let clipping = cursor.read_u8()? != 0;
    let flags = cursor.read_u8()?;
    // Filler byte.
    cursor.read_u8()?;

    let extra_len = cursor.read_u32()? as u64;
    let extra = cursor.read(extra_len)?;
    let mut extra = PsdCursor::new(extra);

    let mask = read_mask(&mut extra)?;

    let blending_ranges_len = extra.read_u32()? as u64;
    let blending_ranges = extra.read(blending_ranges_len)?.to_vec();

    let legacy_name = extra.read_pascal_string(4, CodePage::Windows1252)?;

    let mut tagged_blocks = tagged_block::read_tagged_blocks(
        extra.read_remaining(),
        version,
        tagged_block_padding(version),
    )?;

    let mut properties = LayerProperties::new(legacy_name);
    properties.blend_mode = blend_mode;
    properties.opacity = opacity;
    properties.clipping = clipping;
    properties.visible = flags & FLAG_HIDDEN == 0;
    properties.transparency_protected = flags & FLAG_TRANSPARENCY_PROTECTED != 0;
    properties.pixel_data_irrelevant =
        flags & FLAG_BIT4_USEFUL != 0 && flags & FLAG_PIXEL_DATA_IRRELEVANT != 0;
    properties.mask = mask;
    properties.blending_ranges = blending_ranges;

    // Promote the typed blocks that map onto properties; the Unicode name
    // overrides the legacy Pascal one.
    tagged_blocks.retain(|block| match &block.data {
        TaggedBlockData::UnicodeName(name) => {
            properties.name = name.clone();
            false
        }
        TaggedBlockData::LayerId(id) => {
            properties.id = Some(*id);
            false
        }
        TaggedBlockData::ReferencePoint { x, y } => {
            properties.reference_point = Some((*x, *y));
            false
        }
        TaggedBlockData::Protection(protection) => {
            properties.protection = *protection;
            false
        }
        TaggedBlockData::SheetColor(color) => {
            properties.sheet_color = Some(*color);
            false
        }
        _ => true,
    });
    properties.tagged_blocks = tagged_blocks;

    Ok(LayerRecord {
        properties,
        extents,
        channel_info,
    })
}

/// Layer mask data: 0, 20 or more bytes depending on flags.
fn read_mask(cursor: &mut PsdCursor<'_>) -> Result<Option<LayerMask>> {
    let len = cursor.read_u32()? as u64;
    if len == 0 {
        return Ok(None);
    }
    let block = cursor.read(len)?;
    let mut cursor = PsdCursor::new(block);

    let top = cursor.read_i32()?;
    let left = cursor.read_i32()?;
    let bottom = cursor.read_i32()?;
    let right = cursor.read_i32()?;
    let default_color = cursor.read_u8()?;
    let flags = cursor.read_u8()?;

    let mut mask = LayerMask::new(ChannelExtents::new(top, left, bottom, right));
    mask.default_color = default_color;
    mask.relative_to_layer = flags & MASK_FLAG_RELATIVE != 0;
    mask.disabled = flags & MASK_FLAG_DISABLED != 0;

    if flags & MASK_FLAG_HAS_PARAMETERS != 0 {
        let parameters = cursor.read_u8()?;
        if parameters & MASK_PARAM_DENSITY != 0 {
            mask.density = Some(cursor.read_u8()?);
        }
        if parameters & MASK_PARAM_FEATHER != 0 {
            mask.feather = Some(cursor.read_f64()?);
        }
    }
    // The remainder (real-mask duplicates, padding) is implied by the
    // modeled state and regenerated on write.

    Ok(Some(mask))
}

fn write_mask<W: Write + Seek>(buffer: &mut PsdBuffer<W>, mask: &Option<LayerMask>) -> Result<()> {
    let mask = match mask {
        None => return buffer.write_u32(0),
        Some(mask) => mask,
    };

    buffer.with_length_marker(4, |body| {
        let start = body.position()?;

        body.write_i32(mask.extents.top)?;
        body.write_i32(mask.extents.left)?;
        body.write_i32(mask.extents.bottom)?;
        body.write_i32(mask.extents.right)?;
        body.write_u8(mask.default_color)?;

        let mut flags = 0u8;
        if mask.relative_to_layer {
            flags |= MASK_FLAG_RELATIVE;
        }
        if mask.disabled {
            flags |= MASK_FLAG_DISABLED;
        }
        let has_parameters = mask.density.is_some() || mask.feather.is_some();
        if has_parameters {
            flags |= MASK_FLAG_HAS_PARAMETERS;
        }
        body.write_u8(flags)?;

        if has_parameters {
            let mut parameters = 0u8;
            if mask.density.is_some() {
                parameters |= MASK_PARAM_DENSITY;
            }
            if mask.feather.is_some() {
                parameters |= MASK_PARAM_FEATHER;
            }
            body.write_u8(parameters)?;
            if let Some(density) = mask.density {
                body.write_u8(density)?;
            }
            if let Some(feather) = mask.feather {
                body.write_f64(feather)?;
            }
        }

        body.pad_since(start, 2)
    })
}

/// Write `{layer count, records, channel data}` from the layer forest.
fn write_layer_info<W: Write + Seek>(
    buffer: &mut PsdBuffer<W>,
    layers: &[Layer],
    merged_alpha: bool,
    header: &FileHeaderSection,
    progress: &mut dyn ProgressCallback,
) -> Result<()> {
    let start = buffer.position()?;

    let mut flat = tree::flatten(layers);
    if flat.is_empty() {
        return Ok(());
    }
    // Back to the file's bottom-to-top order.
    flat.reverse();

    let layer_count = i16::try_from(flat.len()).map_err(|_| {
        PsdError::InvalidArgument(format!("{} layers exceed the format's limit", flat.len()))
    })?;
    buffer.write_i16(if merged_alpha { -layer_count } else { layer_count })?;

    // Compress every channel up front: the record declares each channel's
    // exact compressed length before any channel data is written.
    let mut compressed: Vec<Vec<(PsdChannelKind, Vec<u8>)>> = Vec::with_capacity(flat.len());
    for layer in &flat {
        check_cancelled(progress)?;
        let mut channels = Vec::with_capacity(layer.channels.len());
        for channel in &layer.channels {
            channels.push((channel.kind(), compress_channel(channel, header)?));
        }
        compressed.push(channels);
    }

    for (layer, channels) in flat.iter().zip(&compressed) {
        write_layer_record(buffer, layer, channels, header)?;
    }

    for channels in &compressed {
        for (_, payload) in channels {
            buffer.write(payload)?;
        }
    }

    buffer.pad_since(start, section_padding(header.version))
}

/// Compress one channel's pixels with its write-time codec. The returned
/// bytes include the leading compression code.
fn compress_channel(channel: &PsdChannel, header: &FileHeaderSection) -> Result<Vec<u8>> {
    fn go<T: Pixel + ChannelElement>(
        channel: &PsdChannel,
        header: &FileHeaderSection,
    ) -> Result<Vec<u8>> {
        let pixels: Vec<T> = channel.get_data()?;
        let payload = compression::compress(
            &pixels,
            channel.compression(),
            channel.width(),
            channel.height(),
            header.version,
        )?;

        let mut buffer = PsdBuffer::new();
        buffer.write_u16(channel.compression() as u16)?;
        buffer.write(payload)?;
        Ok(buffer.into_bytes())
    }

    match header.depth {
        PsdDepth::Eight => go::<u8>(channel, header),
        PsdDepth::Sixteen => go::<u16>(channel, header),
        PsdDepth::ThirtyTwo => go::<f32>(channel, header),
        PsdDepth::One => Err(PsdError::Unsupported(
            "1-bit documents do not carry per-layer channels".into(),
        )),
    }
}

fn write_layer_record<W: Write + Seek>(
    buffer: &mut PsdBuffer<W>,
    layer: &FlatLayer,
    compressed: &[(PsdChannelKind, Vec<u8>)],
    header: &FileHeaderSection,
) -> Result<()> {
    let version = header.version;
    let properties = &layer.properties;
    let extents = properties.extents(header.width.0, header.height.0);

    buffer.write_i32(extents.top)?;
    buffer.write_i32(extents.left)?;
    buffer.write_i32(extents.bottom)?;
    buffer.write_i32(extents.right)?;

    buffer.write_u16(compressed.len() as u16)?;
    for (kind, payload) in compressed {
        buffer.write_i16(kind.id())?;
        match version {
            PsdVersion::One => buffer.write_u32(payload.len() as u32)?,
            PsdVersion::Two => buffer.write_u64(payload.len() as u64)?,
        }
    }

    buffer.write(SIGNATURE_EIGHT_BIM)?;
    buffer.write(properties.blend_mode.key())?;
    buffer.write_u8(properties.opacity)?;
    buffer.write_u8(properties.clipping as u8)?;

    let mut flags = FLAG_BIT4_USEFUL;
    if properties.transparency_protected {
        flags |= FLAG_TRANSPARENCY_PROTECTED;
    }
    if !properties.visible {
        flags |= FLAG_HIDDEN;
    }
    if properties.pixel_data_irrelevant {
        flags |= FLAG_PIXEL_DATA_IRRELEVANT;
    }
    buffer.write_u8(flags)?;
    buffer.write_u8(0)?;

    buffer.with_length_marker(4, |extra| {
        write_mask(extra, &properties.mask)?;

        extra.write_u32(properties.blending_ranges.len() as u32)?;
        extra.write(&properties.blending_ranges)?;

        extra.write_pascal_string(&properties.name, 4, CodePage::Windows1252)?;

        let mut blocks: Vec<TaggedBlock> = Vec::new();
        blocks.push(TaggedBlock::new(
            *b"luni",
            TaggedBlockData::UnicodeName(properties.name.clone()),
        ));
        if let Some(id) = properties.id {
            blocks.push(TaggedBlock::new(*b"lyid", TaggedBlockData::LayerId(id)));
        }
        if let Some((x, y)) = properties.reference_point {
            blocks.push(TaggedBlock::new(
                *b"fxrp",
                TaggedBlockData::ReferencePoint { x, y },
            ));
        }
        if properties.protection != Default::default() {
            blocks.push(TaggedBlock::new(
                *b"lspf",
                TaggedBlockData::Protection(properties.protection),
            ));
        }
        if let Some(color) = properties.sheet_color {
            blocks.push(TaggedBlock::new(
                *b"lclr",
                TaggedBlockData::SheetColor(color),
            ));
        }
        blocks.extend(properties.tagged_blocks.iter().cloned());

        tagged_block::write_tagged_blocks(extra, &blocks, version, tagged_block_padding(version))
    })
}
