//! The hierarchical layer model.
//!
//! On disk layers are a flat list with divider markers; in memory they are
//! a rooted ordered forest of the four user-visible variants. The variants
//! are a tagged union behind a small shared surface (`properties`, `bbox`,
//! channels where applicable); the divider markers never survive the
//! flat-to-tree conversion.

use crate::blend_mode::BlendMode;
use crate::error::{PsdError, Result};
use crate::geometry::{generate_extents, ChannelCoordinates, ChannelExtents};
use crate::psd_channel::{PsdChannel, PsdChannelKind};
use crate::tagged_block::{ProtectionFlags, SheetColor, TaggedBlock};

pub(crate) mod smart_object;
pub(crate) mod tree;

pub use smart_object::{SmartObjectLayer, SmartObjectWarp};

/// Everything every layer variant carries.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerProperties {
    /// The layer name. Stored as the Unicode (`luni`) name and a legacy
    /// Pascal fallback on disk.
    pub name: String,
    /// How the layer blends into the canvas below.
    pub blend_mode: BlendMode,
    /// 0 = transparent ... 255 = opaque
    pub opacity: u8,
    /// Whether the layer is composited at all.
    pub visible: bool,
    /// Clipping: false = base, true = non-base
    pub clipping: bool,
    /// Flag bit 0: transparency protected.
    pub transparency_protected: bool,
    /// Flag bit 4: pixel data irrelevant to the document's appearance.
    pub pixel_data_irrelevant: bool,
    /// 'lspf' lock bits.
    pub protection: ProtectionFlags,
    /// 'lyid' layer id.
    pub id: Option<u32>,
    /// 'lclr' layers-panel label color.
    pub sheet_color: Option<SheetColor>,
    /// 'fxrp' reference point.
    pub reference_point: Option<(f64, f64)>,
    /// The bounding box as a float center plus dimensions; converted to
    /// integer extents at the file boundary.
    pub coordinates: ChannelCoordinates,
    /// The optional pixel mask.
    pub mask: Option<LayerMask>,
    /// The layer blending ranges, preserved as read.
    pub blending_ranges: Vec<u8>,
    /// Tagged blocks carried along but not interpreted (unknown keys and
    /// preserved adjustment payloads).
    pub tagged_blocks: Vec<TaggedBlock>,
}

impl LayerProperties {
    /// Properties with defaults: normal blend, fully opaque, visible.
    pub fn new(name: impl Into<String>) -> LayerProperties {
        LayerProperties {
            name: name.into(),
            blend_mode: BlendMode::Normal,
            opacity: 255,
            visible: true,
            clipping: false,
            transparency_protected: false,
            pixel_data_irrelevant: false,
            protection: ProtectionFlags::default(),
            id: None,
            sheet_color: None,
            reference_point: None,
            coordinates: ChannelCoordinates::default(),
            mask: None,
            blending_ranges: Vec::new(),
            tagged_blocks: Vec::new(),
        }
    }

    /// The layer rectangle in canvas coordinates.
    pub fn extents(&self, document_width: u32, document_height: u32) -> ChannelExtents {
        generate_extents(self.coordinates, document_width, document_height)
    }
}

/// A layer's pixel mask.
///
/// The mask has its own rectangle; `default_color` is the value assumed for
/// every pixel outside it.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMask {
    /// 0 or 255: the coverage outside the mask rectangle
    pub default_color: u8,
    /// Position is relative to the layer rather than the canvas
    pub relative_to_layer: bool,
    /// The mask is switched off
    pub disabled: bool,
    /// Opacity applied on top of the mask pixels, 0-255
    pub density: Option<u8>,
    /// Gaussian feather radius applied when sampling
    pub feather: Option<f64>,
    /// The mask rectangle in canvas coordinates
    pub extents: ChannelExtents,
}

impl LayerMask {
    /// A mask covering `extents` that hides everything outside it.
    pub fn new(extents: ChannelExtents) -> LayerMask {
        LayerMask {
            default_color: 0,
            relative_to_layer: false,
            disabled: false,
            density: None,
            feather: None,
            extents,
        }
    }
}

/// A layer in the tree: the tagged union the file's polymorphic records
/// map onto.
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    /// A raster layer with image channels
    Image(ImageLayer),
    /// A group with an ordered list of children
    Group(GroupLayer),
    /// A placed (smart object) layer
    SmartObject(SmartObjectLayer),
    /// An adjustment layer, preserved but not evaluated
    Adjustment(AdjustmentLayer),
}

impl Layer {
    /// The shared properties of any variant.
    pub fn properties(&self) -> &LayerProperties {
        match self {
            Layer::Image(layer) => &layer.properties,
            Layer::Group(layer) => &layer.properties,
            Layer::SmartObject(layer) => &layer.properties,
            Layer::Adjustment(layer) => &layer.properties,
        }
    }

    /// Mutable access to the shared properties.
    pub fn properties_mut(&mut self) -> &mut LayerProperties {
        match self {
            Layer::Image(layer) => &mut layer.properties,
            Layer::Group(layer) => &mut layer.properties,
            Layer::SmartObject(layer) => &mut layer.properties,
            Layer::Adjustment(layer) => &mut layer.properties,
        }
    }

    /// The layer name.
    pub fn name(&self) -> &str {
        &self.properties().name
    }

    /// The children of a group, `None` for every other variant.
    pub fn children(&self) -> Option<&[Layer]> {
        match self {
            Layer::Group(group) => Some(&group.children),
            _ => None,
        }
    }

    /// The image channels of a raster or smart-object layer.
    pub fn channels(&self) -> Option<&[PsdChannel]> {
        match self {
            Layer::Image(layer) => Some(&layer.channels),
            Layer::SmartObject(layer) => Some(layer.channels()),
            _ => None,
        }
    }

    pub(crate) fn channels_mut(&mut self) -> Option<&mut Vec<PsdChannel>> {
        match self {
            Layer::Image(layer) => Some(&mut layer.channels),
            Layer::SmartObject(layer) => Some(layer.channels_mut()),
            _ => None,
        }
    }
}

/// A raster layer owning its channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLayer {
    /// Shared layer properties
    pub properties: LayerProperties,
    pub(crate) channels: Vec<PsdChannel>,
}

impl ImageLayer {
    /// An empty raster layer.
    pub fn new(properties: LayerProperties) -> ImageLayer {
        ImageLayer {
            properties,
            channels: Vec::new(),
        }
    }

    /// The layer's channels in record order.
    pub fn channels(&self) -> &[PsdChannel] {
        &self.channels
    }

    /// The channel with the given kind.
    pub fn channel(&self, kind: PsdChannelKind) -> Option<&PsdChannel> {
        self.channels.iter().find(|channel| channel.kind() == kind)
    }

    /// Insert a channel, replacing any existing channel of the same kind.
    ///
    /// All non-mask channels of a layer must share their dimensions;
    /// inserting a color or alpha channel of a different size than the
    /// existing ones is refused.
    pub fn set_channel(&mut self, channel: PsdChannel) -> Result<()> {
        if !channel.kind().is_mask() {
            if let Some(existing) = self
                .channels
                .iter()
                .find(|existing| !existing.kind().is_mask())
            {
                if (existing.width(), existing.height()) != (channel.width(), channel.height()) {
                    return Err(PsdError::InvalidArgument(format!(
                        "channel {:?} is {}x{} but the layer's channels are {}x{}",
                        channel.kind(),
                        channel.width(),
                        channel.height(),
                        existing.width(),
                        existing.height()
                    )));
                }
            }
        }

        match self
            .channels
            .iter_mut()
            .find(|existing| existing.kind() == channel.kind())
        {
            Some(slot) => *slot = channel,
            None => self.channels.push(channel),
        }
        Ok(())
    }

    /// Remove and return the channel of the given kind.
    pub fn take_channel(&mut self, kind: PsdChannelKind) -> Option<PsdChannel> {
        let index = self
            .channels
            .iter()
            .position(|channel| channel.kind() == kind)?;
        Some(self.channels.remove(index))
    }
}

/// A group layer holding an ordered list of children, top to bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupLayer {
    /// Shared layer properties. `Passthrough` blend is legal here and only
    /// here.
    pub properties: LayerProperties,
    /// Children in document order, index 0 on top.
    pub children: Vec<Layer>,
    /// Whether the group is expanded in the layers panel.
    pub open: bool,
    /// The group's own channels: groups carry no image data, but their
    /// mask pixels ride on the group record.
    pub(crate) channels: Vec<PsdChannel>,
}

impl GroupLayer {
    /// An empty open group.
    pub fn new(properties: LayerProperties) -> GroupLayer {
        GroupLayer {
            properties,
            children: Vec::new(),
            open: true,
            channels: Vec::new(),
        }
    }

    /// The group's mask channel, when one is present.
    pub fn mask_channel(&self) -> Option<&PsdChannel> {
        self.channels
            .iter()
            .find(|channel| channel.kind().is_mask())
    }

    /// Attach the group's mask pixels.
    pub fn set_mask_channel(&mut self, channel: PsdChannel) -> Result<()> {
        if !channel.kind().is_mask() {
            return Err(PsdError::InvalidArgument(format!(
                "groups only carry mask channels, not {:?}",
                channel.kind()
            )));
        }
        match self
            .channels
            .iter_mut()
            .find(|existing| existing.kind() == channel.kind())
        {
            Some(slot) => *slot = channel,
            None => self.channels.push(channel),
        }
        Ok(())
    }
}

/// An adjustment layer. The adjustment parameters stay in the preserved
/// tagged block under `key`; the library never evaluates them.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentLayer {
    /// Shared layer properties
    pub properties: LayerProperties,
    /// The adjustment's tagged-block key ('brit', 'levl', 'curv', …)
    pub key: [u8; 4],
}

/// Tagged-block keys that mark a record as an adjustment layer.
pub(crate) const ADJUSTMENT_KEYS: [&[u8; 4]; 20] = [
    b"SoCo", b"GdFl", b"PtFl", b"brit", b"levl", b"curv", b"expA", b"vibA", b"hue ", b"hue2",
    b"blnc", b"blwh", b"phfl", b"mixr", b"clrL", b"nvrt", b"post", b"thrs", b"grdm", b"selc",
];
