//! Flat list <-> layer forest conversion.
//!
//! The file stores layers flat with section-divider markers. Walking the
//! list in document order, a divider of kind OpenFolder/ClosedFolder opens
//! a group whose own metadata rides on the marker's record, and a
//! BoundingSection divider closes the innermost open group. The inverse
//! emits every group depth-first with a trailing BoundingSection.

use crate::blend_mode::BlendMode;
use crate::error::{PsdError, Result};
use crate::layer::{
    AdjustmentLayer, GroupLayer, ImageLayer, Layer, LayerProperties, SmartObjectLayer,
    ADJUSTMENT_KEYS,
};
use crate::psd_channel::PsdChannel;
use crate::tagged_block::{
    PlacedLayerData, SectionDividerKind, TaggedBlock, TaggedBlockData,
};

/// The name Photoshop gives the hidden records closing a group.
const GROUP_DIVIDER_NAME: &str = "</Layer group>";

/// One entry of the flat layer list: fully assembled properties plus the
/// channels read from (or destined for) the channel image data section.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FlatLayer {
    pub properties: LayerProperties,
    pub channels: Vec<PsdChannel>,
}

/// Build the layer forest from flat entries in document order (a group's
/// marker precedes its children).
pub(crate) fn build(flat: Vec<FlatLayer>) -> Result<Vec<Layer>> {
    let mut root: Vec<Layer> = Vec::new();
    let mut open_groups: Vec<GroupLayer> = Vec::new();

    fn attach(root: &mut Vec<Layer>, open_groups: &mut [GroupLayer], layer: Layer) {
        match open_groups.last_mut() {
            Some(group) => group.children.push(layer),
            None => root.push(layer),
        }
    }

    for mut entry in flat {
        match take_divider(&mut entry.properties) {
            Some((kind, blend_override, _)) if kind.opens_group() => {
                let mut group = GroupLayer::new(entry.properties);
                group.open = kind == SectionDividerKind::OpenFolder;
                group.channels = entry.channels;
                // Passthrough only survives in the divider; the record
                // itself carries 'norm'.
                if let Some(mode) = blend_override {
                    group.properties.blend_mode = mode;
                }
                open_groups.push(group);
            }
            Some((SectionDividerKind::BoundingSection, _, _)) => {
                // The hidden closing record itself is discarded.
                let group = open_groups.pop().ok_or_else(|| {
                    PsdError::StructuralError(
                        "section divider closes a group that was never opened".into(),
                    )
                })?;
                attach(&mut root, &mut open_groups, Layer::Group(group));
            }
            _ => {
                let layer = classify(entry)?;
                attach(&mut root, &mut open_groups, layer);
            }
        }
    }

    if let Some(group) = open_groups.pop() {
        return Err(PsdError::StructuralError(format!(
            "group \"{}\" is never closed by a bounding section divider",
            group.properties.name
        )));
    }

    Ok(root)
}

/// Turn a non-divider flat entry into its layer variant.
fn classify(mut entry: FlatLayer) -> Result<Layer> {
    if let Some(placed) = take_placed_data(&mut entry.properties) {
        let mut layer = SmartObjectLayer::new(entry.properties, "", 0, 0);
        layer.apply_placed_data(&placed)?;
        layer.channels = entry.channels;
        return Ok(Layer::SmartObject(layer));
    }

    if let Some(key) = adjustment_key(&entry.properties) {
        return Ok(Layer::Adjustment(AdjustmentLayer {
            properties: entry.properties,
            key,
        }));
    }

    let mut layer = ImageLayer::new(entry.properties);
    layer.channels = entry.channels;
    Ok(Layer::Image(layer))
}

/// Flatten the forest back into document order.
pub(crate) fn flatten(layers: &[Layer]) -> Vec<FlatLayer> {
    let mut flat = Vec::new();
    for layer in layers {
        flatten_into(layer, &mut flat);
    }
    flat
}

fn flatten_into(layer: &Layer, flat: &mut Vec<FlatLayer>) {
    match layer {
        Layer::Group(group) => {
            let mut properties = group.properties.clone();
            let kind = if group.open {
                SectionDividerKind::OpenFolder
            } else {
                SectionDividerKind::ClosedFolder
            };
            properties.tagged_blocks.push(TaggedBlock::new(
                *b"lsct",
                TaggedBlockData::SectionDivider {
                    kind,
                    blend_mode: Some(group.properties.blend_mode),
                    sub_type: None,
                },
            ));
            flat.push(FlatLayer {
                properties,
                channels: group.channels.clone(),
            });

            for child in &group.children {
                flatten_into(child, flat);
            }

            let mut closer = LayerProperties::new(GROUP_DIVIDER_NAME);
            closer.tagged_blocks.push(TaggedBlock::new(
                *b"lsct",
                TaggedBlockData::SectionDivider {
                    kind: SectionDividerKind::BoundingSection,
                    blend_mode: None,
                    sub_type: None,
                },
            ));
            flat.push(FlatLayer {
                properties: closer,
                channels: Vec::new(),
            });
        }
        Layer::Image(image) => flat.push(FlatLayer {
            properties: image.properties.clone(),
            channels: image.channels.clone(),
        }),
        Layer::SmartObject(smart) => {
            let mut properties = smart.properties.clone();
            properties.tagged_blocks.push(TaggedBlock::new(
                *b"SoLd",
                TaggedBlockData::PlacedLayer(smart.to_placed_data()),
            ));
            flat.push(FlatLayer {
                properties,
                channels: smart.channels.clone(),
            });
        }
        Layer::Adjustment(adjustment) => flat.push(FlatLayer {
            properties: adjustment.properties.clone(),
            channels: Vec::new(),
        }),
    }
}

/// Walk a '/'-separated path through the forest, first match wins.
pub(crate) fn find_layer<'a>(layers: &'a [Layer], path: &str) -> Option<&'a Layer> {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    let first = segments.next()?;

    let mut current = layers.iter().find(|layer| layer.name() == first)?;
    for segment in segments {
        current = current
            .children()?
            .iter()
            .find(|layer| layer.name() == segment)?;
    }
    Some(current)
}

fn take_divider(
    properties: &mut LayerProperties,
) -> Option<(SectionDividerKind, Option<BlendMode>, Option<u32>)> {
    let index = properties
        .tagged_blocks
        .iter()
        .position(|block| matches!(block.data, TaggedBlockData::SectionDivider { .. }))?;
    match properties.tagged_blocks.remove(index).data {
        TaggedBlockData::SectionDivider {
            kind,
            blend_mode,
            sub_type,
        } => Some((kind, blend_mode, sub_type)),
        _ => unreachable!("position matched a section divider"),
    }
}

fn take_placed_data(properties: &mut LayerProperties) -> Option<PlacedLayerData> {
    let index = properties
        .tagged_blocks
        .iter()
        .position(|block| matches!(block.data, TaggedBlockData::PlacedLayer(_)))?;
    match properties.tagged_blocks.remove(index).data {
        TaggedBlockData::PlacedLayer(placed) => Some(placed),
        _ => unreachable!("position matched a placed layer block"),
    }
}

fn adjustment_key(properties: &LayerProperties) -> Option<[u8; 4]> {
    properties
        .tagged_blocks
        .iter()
        .map(|block| block.key)
        .find(|key| ADJUSTMENT_KEYS.iter().any(|candidate| **candidate == *key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> Layer {
        Layer::Image(ImageLayer::new(LayerProperties::new(name)))
    }

    fn group(name: &str, children: Vec<Layer>) -> Layer {
        let mut group = GroupLayer::new(LayerProperties::new(name));
        group.children = children;
        Layer::Group(group)
    }

    #[test]
    fn build_inverts_flatten() {
        let tree = vec![
            image("top"),
            group(
                "outer",
                vec![
                    image("first"),
                    group("inner", vec![image("second")]),
                    image("third"),
                ],
            ),
            image("bottom"),
        ];

        let rebuilt = build(flatten(&tree)).unwrap();
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn empty_group_round_trips() {
        let tree = vec![group("empty", vec![])];
        assert_eq!(build(flatten(&tree)).unwrap(), tree);
    }

    #[test]
    fn passthrough_group_keeps_its_blend_mode() {
        let mut inner = GroupLayer::new(LayerProperties::new("pt"));
        inner.properties.blend_mode = BlendMode::Passthrough;
        let tree = vec![Layer::Group(inner)];

        let rebuilt = build(flatten(&tree)).unwrap();
        assert_eq!(
            rebuilt[0].properties().blend_mode,
            BlendMode::Passthrough
        );
    }

    #[test]
    fn unmatched_bounding_section_is_a_structural_error() {
        let mut closer = LayerProperties::new(GROUP_DIVIDER_NAME);
        closer.tagged_blocks.push(TaggedBlock::new(
            *b"lsct",
            TaggedBlockData::SectionDivider {
                kind: SectionDividerKind::BoundingSection,
                blend_mode: None,
                sub_type: None,
            },
        ));
        let flat = vec![FlatLayer {
            properties: closer,
            channels: Vec::new(),
        }];

        assert!(matches!(
            build(flat),
            Err(PsdError::StructuralError(_))
        ));
    }

    #[test]
    fn unclosed_group_is_a_structural_error() {
        let mut opener = LayerProperties::new("group");
        opener.tagged_blocks.push(TaggedBlock::new(
            *b"lsct",
            TaggedBlockData::SectionDivider {
                kind: SectionDividerKind::OpenFolder,
                blend_mode: None,
                sub_type: None,
            },
        ));
        let flat = vec![FlatLayer {
            properties: opener,
            channels: Vec::new(),
        }];

        assert!(matches!(build(flat), Err(PsdError::StructuralError(_))));
    }

    #[test]
    fn adjustment_records_become_adjustment_layers() {
        let mut properties = LayerProperties::new("levels");
        properties
            .tagged_blocks
            .push(TaggedBlock::new_raw(*b"levl", vec![0, 2]));
        let flat = vec![FlatLayer {
            properties,
            channels: Vec::new(),
        }];

        let layers = build(flat).unwrap();
        match &layers[0] {
            Layer::Adjustment(adjustment) => {
                assert_eq!(adjustment.key, *b"levl");
                // The payload stays preserved for round trip.
                assert_eq!(adjustment.properties.tagged_blocks.len(), 1);
            }
            other => panic!("expected an adjustment layer, got {:?}", other),
        }
    }

    #[test]
    fn find_layer_walks_paths() {
        let tree = vec![
            group(
                "outer",
                vec![group("inner", vec![image("leaf")]), image("leaf")],
            ),
            image("outer"),
        ];

        assert!(find_layer(&tree, "outer/inner/leaf").is_some());
        assert!(find_layer(&tree, "outer/leaf").is_some());
        assert!(find_layer(&tree, "outer/nope").is_none());
        assert!(find_layer(&tree, "nope").is_none());

        // First match wins for duplicate names.
        match find_layer(&tree, "outer").unwrap() {
            Layer::Group(_) => {}
            other => panic!("expected the group to match first, got {:?}", other),
        }
    }

    #[test]
    fn sibling_groups_round_trip() {
        let tree = vec![
            group("a", vec![image("1")]),
            group("b", vec![image("2")]),
        ];
        assert_eq!(build(flatten(&tree)).unwrap(), tree);
    }
}
