//! Tagged blocks: the format's open extension registry.
//!
//! A block is `signature ('8BIM' | '8B64'), key (4 bytes), length, payload`.
//! A small closed set of keys parses into typed payloads; everything else is
//! preserved verbatim and written back bit-exact. A parse failure for a
//! *known* key downgrades to raw preservation with a warning instead of
//! failing the document.
//!
//! Length fields are 4 bytes wide except for a fixed list of keys that PSB
//! promotes to 8 bytes; the padding of the payload is keyed by the host
//! section (4 inside layer records, 2 elsewhere).

use std::io::{Seek, Write};
use std::sync::Arc;

use crate::blend_mode::BlendMode;
use crate::descriptor::Descriptor;
use crate::error::{PsdError, Result};
use crate::linked_layer::{LinkedLayerData, LinkedLayerType};
use crate::sections::file_header_section::PsdVersion;
use crate::sections::{PsdBuffer, PsdCursor, PsdSerialize};

/// One of the possible tagged block signatures
pub(crate) const SIGNATURE_EIGHT_BIM: [u8; 4] = *b"8BIM";
/// One of the possible tagged block signatures
pub(crate) const SIGNATURE_EIGHT_B64: [u8; 4] = *b"8B64";

/// The keys whose length field widens to 8 bytes in a PSB. Every other key
/// keeps a 4-byte length unconditionally.
const PSB_PROMOTED_KEYS: [&[u8; 4]; 14] = [
    b"LMsk", b"Lr16", b"Lr32", b"Layr", b"Mt16", b"Mt32", b"Mtrn", b"Alph", b"FMsk", b"FXid",
    b"FEid", b"PxSD", b"cinf", b"lnk2",
];

/// Whether `key`'s length field is 8 bytes wide in the given version.
pub(crate) fn is_length_u64(key: [u8; 4], version: PsdVersion) -> bool {
    version.is_psb() && PSB_PROMOTED_KEYS.iter().any(|candidate| **candidate == key)
}

/// A single tagged block: its key, which signature carried it, and either a
/// typed payload or the raw bytes of an unknown key.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedBlock {
    /// 4-byte ASCII key
    pub key: [u8; 4],
    /// `8BIM` or `8B64`
    pub signature: [u8; 4],
    /// Parsed payload, or raw bytes for unknown keys
    pub data: TaggedBlockData,
}

impl TaggedBlock {
    /// A block preserving raw bytes under `key`.
    pub fn new_raw(key: [u8; 4], bytes: Vec<u8>) -> TaggedBlock {
        TaggedBlock {
            key,
            signature: SIGNATURE_EIGHT_BIM,
            data: TaggedBlockData::Raw(bytes),
        }
    }

    /// A typed block under `key`.
    pub fn new(key: [u8; 4], data: TaggedBlockData) -> TaggedBlock {
        TaggedBlock {
            key,
            signature: SIGNATURE_EIGHT_BIM,
            data,
        }
    }
}

/// The typed payloads the library understands. Everything else stays
/// [`Raw`](TaggedBlockData::Raw).
#[derive(Debug, Clone, PartialEq)]
pub enum TaggedBlockData {
    /// An unknown key, preserved bit-exact
    Raw(Vec<u8>),
    /// 'luni': the Unicode layer name, overriding the legacy Pascal name
    UnicodeName(String),
    /// 'lyid': the layer id
    LayerId(u32),
    /// 'lsct'/'lsdk': group open/close markers in the flat layer list
    SectionDivider {
        /// Divider kind
        kind: SectionDividerKind,
        /// Blend mode of the group the divider closes
        blend_mode: Option<BlendMode>,
        /// Scene-group subtype carried by long dividers
        sub_type: Option<u32>,
    },
    /// 'fxrp': the reference point
    ReferencePoint {
        #[allow(missing_docs)]
        x: f64,
        #[allow(missing_docs)]
        y: f64,
    },
    /// 'lspf': protection flags
    Protection(ProtectionFlags),
    /// 'lclr': sheet color
    SheetColor(SheetColor),
    /// 'clbl': blend clipped elements
    BlendClippingElements(bool),
    /// 'infx': blend interior elements
    BlendInteriorElements(bool),
    /// 'knko': knockout setting
    KnockoutSetting(bool),
    /// 'lnkD'/'lnkE'/'lnk2'/'lnk3': the linked-layer store
    LinkedLayers(Vec<LinkedLayerData>),
    /// 'SoLd'/'PlLd': smart-object placement incl. the warp descriptor
    PlacedLayer(PlacedLayerData),
}

/// The kind of a section divider marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SectionDividerKind {
    /// Any other type of layer
    Any = 0,
    /// An open (expanded) group
    OpenFolder = 1,
    /// A closed (collapsed) group
    ClosedFolder = 2,
    /// Hidden marker closing the group above it in file order
    BoundingSection = 3,
}

impl SectionDividerKind {
    /// Create a kind from its wire value.
    pub fn new(kind: u32) -> Result<SectionDividerKind> {
        match kind {
            0 => Ok(SectionDividerKind::Any),
            1 => Ok(SectionDividerKind::OpenFolder),
            2 => Ok(SectionDividerKind::ClosedFolder),
            3 => Ok(SectionDividerKind::BoundingSection),
            _ => Err(PsdError::StructuralError(format!(
                "invalid section divider kind {}",
                kind
            ))),
        }
    }

    /// Whether this divider opens a group.
    pub fn opens_group(self) -> bool {
        matches!(
            self,
            SectionDividerKind::OpenFolder | SectionDividerKind::ClosedFolder
        )
    }
}

/// 'lspf' protection bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtectionFlags {
    /// Transparent pixels are locked
    pub transparency: bool,
    /// Painting is locked
    pub composite: bool,
    /// Moving is locked
    pub position: bool,
}

impl ProtectionFlags {
    fn from_bits(bits: u32) -> ProtectionFlags {
        ProtectionFlags {
            transparency: bits & 0x1 != 0,
            composite: bits & 0x2 != 0,
            position: bits & 0x4 != 0,
        }
    }

    fn bits(self) -> u32 {
        self.transparency as u32 | (self.composite as u32) << 1 | (self.position as u32) << 2
    }
}

/// 'lclr' sheet color, the label color shown in the layers panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SheetColor(
    /// 0 = none, 1..=7 the panel colors red through gray
    pub u16,
);

/// 'SoLd'/'PlLd' payload: a versioned descriptor carrying the placement
/// and warp of a smart object.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLayerData {
    /// Always `soLD`
    pub identifier: [u8; 4],
    /// Placed layer version, 4 for current documents
    pub version: u32,
    /// Descriptor version, 16
    pub descriptor_version: u32,
    /// The placement descriptor
    pub descriptor: Descriptor,
}

impl PlacedLayerData {
    /// Wrap a placement descriptor with current version tags.
    pub fn new(descriptor: Descriptor) -> PlacedLayerData {
        PlacedLayerData {
            identifier: *b"soLD",
            version: 4,
            descriptor_version: 16,
            descriptor,
        }
    }
}

/// Read tagged blocks until `bytes` is exhausted.
pub(crate) fn read_tagged_blocks(
    bytes: &[u8],
    version: PsdVersion,
    padding: u64,
) -> Result<Vec<TaggedBlock>> {
    let mut cursor = PsdCursor::new(bytes);
    let mut blocks = Vec::new();
    // A trailing fragment shorter than the smallest possible block is
    // section padding.
    while cursor.remaining() >= 12 {
        blocks.push(read_tagged_block(&mut cursor, version, padding)?);
    }
    Ok(blocks)
}

fn read_tagged_block(
    cursor: &mut PsdCursor<'_>,
    version: PsdVersion,
    padding: u64,
) -> Result<TaggedBlock> {
    let signature = cursor.read_4()?;
    if signature != SIGNATURE_EIGHT_BIM && signature != SIGNATURE_EIGHT_B64 {
        return Err(PsdError::InvalidSignature {
            location: "tagged block",
            found: signature,
        });
    }

    let key = cursor.read_4()?;
    let length = if is_length_u64(key, version) {
        cursor.read_u64()?
    } else {
        cursor.read_u32()? as u64
    };

    let payload = cursor.read(length)?;
    let pad = (padding - length % padding) % padding;
    cursor.read(pad.min(cursor.remaining()))?;

    let data = match parse_payload(key, payload) {
        Ok(Some(data)) => data,
        Ok(None) => TaggedBlockData::Raw(payload.to_vec()),
        Err(err) => {
            // A known key we failed to parse is preserved raw rather than
            // failing the document.
            tracing::warn!(
                key = %String::from_utf8_lossy(&key),
                error = %err,
                "preserving unparseable tagged block as raw bytes"
            );
            TaggedBlockData::Raw(payload.to_vec())
        }
    };

    Ok(TaggedBlock {
        key,
        signature,
        data,
    })
}

/// Parse the payload of a known key. `Ok(None)` means the key is not in
/// the typed set.
fn parse_payload(key: [u8; 4], payload: &[u8]) -> Result<Option<TaggedBlockData>> {
    let mut cursor = PsdCursor::new(payload);

    let data = match &key {
        b"luni" => TaggedBlockData::UnicodeName(cursor.read_unicode_string()?),
        b"lyid" => TaggedBlockData::LayerId(cursor.read_u32()?),
        b"lsct" | b"lsdk" => {
            let kind = SectionDividerKind::new(cursor.read_u32()?)?;
            let mut blend_mode = None;
            let mut sub_type = None;
            if payload.len() >= 12 {
                let signature = cursor.read_4()?;
                if signature != SIGNATURE_EIGHT_BIM {
                    return Err(PsdError::InvalidSignature {
                        location: "section divider blend mode",
                        found: signature,
                    });
                }
                blend_mode = Some(BlendMode::from_key(cursor.read_4()?)?);
            }
            if payload.len() >= 16 {
                sub_type = Some(cursor.read_u32()?);
            }
            TaggedBlockData::SectionDivider {
                kind,
                blend_mode,
                sub_type,
            }
        }
        b"fxrp" => TaggedBlockData::ReferencePoint {
            x: cursor.read_f64()?,
            y: cursor.read_f64()?,
        },
        b"lspf" => TaggedBlockData::Protection(ProtectionFlags::from_bits(cursor.read_u32()?)),
        b"lclr" => {
            let color = cursor.read_u16()?;
            TaggedBlockData::SheetColor(SheetColor(color))
        }
        b"clbl" => TaggedBlockData::BlendClippingElements(cursor.read_u8()? != 0),
        b"infx" => TaggedBlockData::BlendInteriorElements(cursor.read_u8()? != 0),
        b"knko" => TaggedBlockData::KnockoutSetting(cursor.read_u8()? != 0),
        b"lnkD" | b"lnkE" | b"lnk2" | b"lnk3" => {
            TaggedBlockData::LinkedLayers(read_linked_layers(&mut cursor)?)
        }
        b"SoLd" | b"PlLd" => {
            let identifier = cursor.read_4()?;
            let block_version = cursor.read_u32()?;
            let descriptor_version = cursor.read_u32()?;
            let descriptor = Descriptor::read(&mut cursor)?;
            TaggedBlockData::PlacedLayer(PlacedLayerData {
                identifier,
                version: block_version,
                descriptor_version,
                descriptor,
            })
        }
        _ => return Ok(None),
    };

    Ok(Some(data))
}

/// Write `blocks` in order with the host section's padding rule.
pub(crate) fn write_tagged_blocks<W: Write + Seek>(
    buffer: &mut PsdBuffer<W>,
    blocks: &[TaggedBlock],
    version: PsdVersion,
    padding: u64,
) -> Result<()> {
    for block in blocks {
        write_tagged_block(buffer, block, version, padding)?;
    }
    Ok(())
}

fn write_tagged_block<W: Write + Seek>(
    buffer: &mut PsdBuffer<W>,
    block: &TaggedBlock,
    version: PsdVersion,
    padding: u64,
) -> Result<()> {
    buffer.write(block.signature)?;
    buffer.write(block.key)?;

    let payload = payload_bytes(block)?;
    if is_length_u64(block.key, version) {
        buffer.write_u64(payload.len() as u64)?;
    } else {
        buffer.write_u32(payload.len() as u32)?;
    }

    let start = buffer.position()?;
    buffer.write(&payload)?;
    buffer.pad_since(start, padding)?;
    Ok(())
}

fn payload_bytes(block: &TaggedBlock) -> Result<Vec<u8>> {
    let mut buffer = PsdBuffer::new();

    match &block.data {
        TaggedBlockData::Raw(bytes) => buffer.write(bytes)?,
        TaggedBlockData::UnicodeName(name) => buffer.write_unicode_string(name)?,
        TaggedBlockData::LayerId(id) => buffer.write_u32(*id)?,
        TaggedBlockData::SectionDivider {
            kind,
            blend_mode,
            sub_type,
        } => {
            buffer.write_u32(*kind as u32)?;
            if let Some(mode) = blend_mode {
                buffer.write(SIGNATURE_EIGHT_BIM)?;
                buffer.write(mode.key())?;
                if let Some(sub_type) = sub_type {
                    buffer.write_u32(*sub_type)?;
                }
            }
        }
        TaggedBlockData::ReferencePoint { x, y } => {
            buffer.write_f64(*x)?;
            buffer.write_f64(*y)?;
        }
        TaggedBlockData::Protection(flags) => buffer.write_u32(flags.bits())?,
        TaggedBlockData::SheetColor(color) => {
            buffer.write_u16(color.0)?;
            buffer.write(&[0u8; 6])?;
        }
        TaggedBlockData::BlendClippingElements(value)
        | TaggedBlockData::BlendInteriorElements(value)
        | TaggedBlockData::KnockoutSetting(value) => {
            buffer.write_u8(*value as u8)?;
            buffer.write(&[0u8; 3])?;
        }
        TaggedBlockData::LinkedLayers(layers) => write_linked_layers(&mut buffer, layers)?,
        TaggedBlockData::PlacedLayer(placed) => {
            buffer.write(placed.identifier)?;
            buffer.write_u32(placed.version)?;
            buffer.write_u32(placed.descriptor_version)?;
            placed.descriptor.write(&mut buffer)?;
        }
    }

    Ok(buffer.into_bytes())
}

/// 'liFD': the source bytes travel inside the document.
const LINK_DATA: [u8; 4] = *b"liFD";
/// 'liFE': only the path travels with the document.
const LINK_EXTERNAL: [u8; 4] = *b"liFE";

/// Entries are concatenated until the payload ends: a length-led record of
/// `type, version, id, filename, file type, creator, data length, flags,
/// data`, padded to 4.
fn read_linked_layers(cursor: &mut PsdCursor<'_>) -> Result<Vec<LinkedLayerData>> {
    let mut layers = Vec::new();

    while cursor.remaining() >= 8 {
        let entry_len = cursor.read_u64()?;
        let entry_end = cursor.position() + entry_len;

        let link_tag = cursor.read_4()?;
        let link_type = match link_tag {
            LINK_DATA => LinkedLayerType::Data,
            LINK_EXTERNAL => LinkedLayerType::External,
            other => {
                return Err(PsdError::InvalidSignature {
                    location: "linked layer entry",
                    found: other,
                })
            }
        };
        let _version = cursor.read_u32()?;
        let hash = cursor.read_pascal_string(1, Default::default())?;
        let filename = cursor.read_unicode_string()?;
        let file_type = cursor.read_4()?;
        let creator = cursor.read_4()?;
        let data_len = cursor.read_u64()?;
        let child_document_id = match cursor.read_u8()? {
            0 => None,
            _ => Some(cursor.read_unicode_string()?),
        };

        let data = match link_type {
            LinkedLayerType::Data => Some(Arc::new(cursor.read(data_len)?.to_vec())),
            LinkedLayerType::External => None,
        };

        layers.push(LinkedLayerData {
            hash,
            filename,
            file_type,
            creator,
            data,
            link_type,
            child_document_id,
        });

        // Skip entry padding.
        let here = cursor.position();
        if entry_end > here {
            cursor.read(entry_end - here)?;
        }
    }

    Ok(layers)
}

fn write_linked_layers(
    buffer: &mut PsdBuffer<std::io::Cursor<Vec<u8>>>,
    layers: &[LinkedLayerData],
) -> Result<()> {
    for layer in layers {
        let mut entry = PsdBuffer::new();
        match layer.link_type {
            LinkedLayerType::Data => entry.write(LINK_DATA)?,
            LinkedLayerType::External => entry.write(LINK_EXTERNAL)?,
        }
        entry.write_u32(7)?;
        entry.write_pascal_string(&layer.hash, 1, Default::default())?;
        entry.write_unicode_string(&layer.filename)?;
        entry.write(layer.file_type)?;
        entry.write(layer.creator)?;

        let data = layer.data.as_deref();
        entry.write_u64(data.map_or(0, Vec::len) as u64)?;
        match &layer.child_document_id {
            None => entry.write_u8(0)?,
            Some(id) => {
                entry.write_u8(1)?;
                entry.write_unicode_string(id)?;
            }
        }
        if let Some(data) = data {
            entry.write(data)?;
        }

        let start = entry.position()?;
        let pad = (4 - start % 4) % 4;
        for _ in 0..pad {
            entry.write_u8(0)?;
        }

        let bytes = entry.into_bytes();
        buffer.write_u64(bytes.len() as u64)?;
        buffer.write(bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(blocks: &[TaggedBlock], version: PsdVersion, padding: u64) -> Vec<TaggedBlock> {
        let mut buffer = PsdBuffer::new();
        write_tagged_blocks(&mut buffer, blocks, version, padding).unwrap();
        read_tagged_blocks(&buffer.into_bytes(), version, padding).unwrap()
    }

    #[test]
    fn unknown_blocks_survive_bit_exact() {
        let block = TaggedBlock::new_raw(*b"xyzW", vec![1, 2, 3, 4, 5]);
        let parsed = round_trip(&[block.clone()], PsdVersion::One, 2);
        assert_eq!(parsed, vec![block]);
    }

    #[test]
    fn typed_blocks_round_trip() {
        let blocks = vec![
            TaggedBlock::new(*b"luni", TaggedBlockData::UnicodeName("Layer 1".into())),
            TaggedBlock::new(*b"lyid", TaggedBlockData::LayerId(42)),
            TaggedBlock::new(
                *b"lsct",
                TaggedBlockData::SectionDivider {
                    kind: SectionDividerKind::OpenFolder,
                    blend_mode: Some(BlendMode::Passthrough),
                    sub_type: None,
                },
            ),
            TaggedBlock::new(
                *b"fxrp",
                TaggedBlockData::ReferencePoint { x: 12.5, y: -3.0 },
            ),
            TaggedBlock::new(
                *b"lspf",
                TaggedBlockData::Protection(ProtectionFlags {
                    transparency: true,
                    composite: false,
                    position: true,
                }),
            ),
            TaggedBlock::new(*b"lclr", TaggedBlockData::SheetColor(SheetColor(3))),
            TaggedBlock::new(*b"knko", TaggedBlockData::KnockoutSetting(true)),
        ];

        for version in [PsdVersion::One, PsdVersion::Two] {
            for padding in [2u64, 4] {
                assert_eq!(round_trip(&blocks, version, padding), blocks);
            }
        }
    }

    #[test]
    fn psb_promotes_only_the_listed_keys() {
        assert!(is_length_u64(*b"Lr16", PsdVersion::Two));
        assert!(is_length_u64(*b"lnk2", PsdVersion::Two));
        assert!(is_length_u64(*b"LMsk", PsdVersion::Two));
        assert!(!is_length_u64(*b"luni", PsdVersion::Two));
        assert!(!is_length_u64(*b"lnkD", PsdVersion::Two));
        // Never promoted in a PSD.
        assert!(!is_length_u64(*b"Lr16", PsdVersion::One));
    }

    #[test]
    fn promoted_key_round_trips_in_psb() {
        let block = TaggedBlock::new_raw(*b"Lr16", vec![0xAB; 10]);
        let parsed = round_trip(&[block.clone()], PsdVersion::Two, 4);
        assert_eq!(parsed, vec![block]);
    }

    #[test]
    fn corrupt_known_key_downgrades_to_raw() {
        // 'lyid' with a two-byte payload cannot parse as a u32.
        let mut buffer = PsdBuffer::new();
        buffer.write(SIGNATURE_EIGHT_BIM).unwrap();
        buffer.write(*b"lyid").unwrap();
        buffer.write_u32(2).unwrap();
        buffer.write(&[0xAA, 0xBB]).unwrap();
        let bytes = buffer.into_bytes();

        let blocks = read_tagged_blocks(&bytes, PsdVersion::One, 2).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data, TaggedBlockData::Raw(vec![0xAA, 0xBB]));
    }

    #[test]
    fn linked_layers_round_trip() {
        let layers = vec![
            LinkedLayerData {
                hash: "aa11".into(),
                filename: "texture.png".into(),
                file_type: *b"png ",
                creator: *b"8BIM",
                data: Some(Arc::new(vec![7u8; 33])),
                link_type: LinkedLayerType::Data,
                child_document_id: None,
            },
            LinkedLayerData {
                hash: "bb22".into(),
                filename: "remote.jpg".into(),
                file_type: *b"JPEG",
                creator: *b"8BIM",
                data: None,
                link_type: LinkedLayerType::External,
                child_document_id: Some("child-1".into()),
            },
        ];
        let block = TaggedBlock::new(*b"lnkD", TaggedBlockData::LinkedLayers(layers.clone()));

        let parsed = round_trip(&[block], PsdVersion::One, 2);
        match &parsed[0].data {
            TaggedBlockData::LinkedLayers(parsed_layers) => assert_eq!(parsed_layers, &layers),
            other => panic!("expected linked layers, got {:?}", other),
        }
    }

    #[test]
    fn placed_layer_descriptor_round_trips() {
        use crate::descriptor::DescriptorField;

        let mut descriptor = Descriptor::new(b"null");
        descriptor.insert("Idnt", DescriptorField::String("hash".into()));
        descriptor.insert("wdth", DescriptorField::Double(640.0));
        let block = TaggedBlock::new(
            *b"SoLd",
            TaggedBlockData::PlacedLayer(PlacedLayerData::new(descriptor.clone())),
        );

        let parsed = round_trip(&[block], PsdVersion::One, 4);
        match &parsed[0].data {
            TaggedBlockData::PlacedLayer(placed) => {
                assert_eq!(placed.identifier, *b"soLD");
                assert_eq!(placed.version, 4);
                assert_eq!(placed.descriptor, descriptor);
            }
            other => panic!("expected placed layer, got {:?}", other),
        }
    }
}
