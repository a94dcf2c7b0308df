//! Data structures and methods for reading, editing, compositing and
//! writing PSD and PSB files.
//!
//! You are encouraged to read the PSD specification before contributing to
//! this codebase. This will help you better understand the current approach
//! and discover ways to improve it.
//!
//! psd spec: https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/

#![deny(missing_docs)]

use std::collections::HashSet;
use std::path::Path;

use crate::file::check_cancelled;
use crate::sections::color_mode_data_section::ColorModeDataSection;
use crate::sections::file_header_section::{ChannelCount, FileHeaderSection, PsdHeight, PsdWidth};
use crate::sections::image_data_section::ImageDataSection;
use crate::sections::image_resources_section::ImageResourcesSection;
use crate::sections::layer_and_mask_information_section::LayerAndMaskInformationSection;
use crate::sections::{MajorSections, PsdBuffer, PsdSerialize, FILE_HEADER_SECTION_LEN};

mod blend_mode;
mod compression;
mod descriptor;
mod endian;
mod error;
mod file;
mod geometry;
mod layer;
mod linked_layer;
mod pascal_string;
mod pixel;
mod psd_channel;
mod render;
mod sections;
mod tagged_block;

pub use crate::blend_mode::BlendMode;
pub use crate::descriptor::{Descriptor, DescriptorField, UnitFloat};
pub use crate::error::{PsdError, Result};
pub use crate::file::File;
pub use crate::geometry::{
    generate_coordinates, generate_extents, BezierSurface, BoundingBox, ChannelCoordinates,
    ChannelExtents, Homography, Point2D, QuadMesh, Vertex,
};
pub use crate::layer::{
    AdjustmentLayer, GroupLayer, ImageLayer, Layer, LayerMask, LayerProperties, SmartObjectLayer,
    SmartObjectWarp,
};
pub use crate::linked_layer::{
    ImageCodec, LinkedLayerData, LinkedLayerStore, LinkedLayerType, SourceImage,
};
pub use crate::pascal_string::CodePage;
pub use crate::pixel::Pixel;
pub use crate::psd_channel::{
    ChannelData, ChannelElement, ChunkedBuffer, PsdChannel, PsdChannelCompression, PsdChannelKind,
};
pub use crate::render::{Canvas, CpuRenderer, FilterMode, Plane, Precision, Renderer};
pub use crate::sections::file_header_section::{ColorMode, PsdDepth, PsdVersion};
pub use crate::sections::image_resources_section::{ImageResource, ResolutionInfo};
pub use crate::tagged_block::{
    PlacedLayerData, ProtectionFlags, SectionDividerKind, SheetColor, TaggedBlock,
    TaggedBlockData,
};
pub use crate::file::{NoProgress, ProgressCallback};

/// Represents the contents of a PSD or PSB file.
///
/// The document's dimensions, bit depth and color mode are fixed at
/// construction; layers, resources and linked sources are editable.
#[derive(Debug)]
pub struct Psd {
    file_header_section: FileHeaderSection,
    color_mode_data_section: ColorModeDataSection,
    image_resources_section: ImageResourcesSection,
    layer_and_mask_information_section: LayerAndMaskInformationSection,
    image_data_section: ImageDataSection,
    linked_layer_store: LinkedLayerStore,
}

impl Psd {
    /// Create an empty document for authoring.
    ///
    /// The channel count is the color mode's channels plus one for
    /// transparency.
    pub fn new(
        version: PsdVersion,
        color_mode: ColorMode,
        depth: PsdDepth,
        width: u32,
        height: u32,
    ) -> Result<Psd> {
        let color_channels = color_mode.color_channel_count()?;
        let file_header_section = FileHeaderSection {
            version,
            channel_count: ChannelCount::new(color_channels as u16 + 1)?,
            width: PsdWidth::new(width, version)?,
            height: PsdHeight::new(height, version)?,
            depth,
            color_mode,
        };

        Ok(Psd {
            file_header_section,
            color_mode_data_section: ColorModeDataSection::default(),
            image_resources_section: ImageResourcesSection::default(),
            layer_and_mask_information_section: LayerAndMaskInformationSection::empty(),
            image_data_section: ImageDataSection::empty(),
            linked_layer_store: LinkedLayerStore::new(),
        })
    }

    /// Create a Psd from a byte slice.
    ///
    /// You'll typically get these bytes from a PSD file.
    ///
    /// ```ignore
    /// let psd_bytes = include_bytes!("./my-psd-file.psd");
    /// let psd = Psd::from_bytes(psd_bytes)?;
    /// ```
    pub fn from_bytes(bytes: &[u8]) -> Result<Psd> {
        Psd::from_bytes_with_progress(bytes, &mut NoProgress)
    }

    /// Like [`from_bytes`](Self::from_bytes), reporting progress at
    /// section boundaries and honoring cooperative cancellation.
    pub fn from_bytes_with_progress(
        bytes: &[u8],
        progress: &mut dyn ProgressCallback,
    ) -> Result<Psd> {
        let major_sections = MajorSections::from_bytes(bytes)?;

        let file_header_section = FileHeaderSection::from_bytes(major_sections.file_header)?;
        progress.report(0.1, "file header");
        check_cancelled(progress)?;

        Psd::from_sections(
            file_header_section,
            major_sections.color_mode_data,
            major_sections.image_resources,
            major_sections.layer_and_mask,
            major_sections.image_data,
            progress,
        )
    }

    /// Assemble a document from its already-located section bytes (length
    /// markers included, except for the image data which has none).
    fn from_sections(
        file_header_section: FileHeaderSection,
        color_mode_data: &[u8],
        image_resources: &[u8],
        layer_and_mask: &[u8],
        image_data: &[u8],
        progress: &mut dyn ProgressCallback,
    ) -> Result<Psd> {
        let color_mode_data_section = ColorModeDataSection::from_bytes(
            color_mode_data,
            file_header_section.color_mode,
        )?;
        progress.report(0.2, "color mode data");
        check_cancelled(progress)?;

        let image_resources_section = ImageResourcesSection::from_bytes(image_resources)?;
        progress.report(0.3, "image resources");
        check_cancelled(progress)?;

        let mut layer_and_mask_information_section = LayerAndMaskInformationSection::from_bytes(
            layer_and_mask,
            &file_header_section,
            progress,
        )?;
        progress.report(0.8, "layer and mask information");
        check_cancelled(progress)?;

        let image_data_section = ImageDataSection::from_bytes(image_data, &file_header_section)?;
        progress.report(1.0, "image data");

        // The linked-layer blocks at document scope feed the store; they
        // are regenerated from it on write.
        let linked_layer_store = LinkedLayerStore::new();
        layer_and_mask_information_section
            .tagged_blocks
            .retain(|block| match &block.data {
                TaggedBlockData::LinkedLayers(layers) => {
                    for layer in layers {
                        linked_layer_store.insert_entry(layer.clone());
                    }
                    false
                }
                _ => true,
            });

        Ok(Psd {
            file_header_section,
            color_mode_data_section,
            image_resources_section,
            layer_and_mask_information_section,
            image_data_section,
            linked_layer_store,
        })
    }

    /// Read a document from disk.
    pub fn read(path: impl AsRef<Path>) -> Result<Psd> {
        Psd::read_with_progress(path, &mut NoProgress)
    }

    /// Read a document from disk with progress reporting.
    ///
    /// The sequential cursor only walks the header and the section length
    /// markers; the section bodies are pulled through the memory-mapped
    /// [`File::read_at`] path, the two heavy ones from concurrent workers.
    pub fn read_with_progress(
        path: impl AsRef<Path>,
        progress: &mut dyn ProgressCallback,
    ) -> Result<Psd> {
        let file = File::open(path)?;

        let mut header_bytes = [0u8; FILE_HEADER_SECTION_LEN];
        file.read(&mut header_bytes)?;
        let file_header_section = FileHeaderSection::from_bytes(&header_bytes)?;
        progress.report(0.1, "file header");
        check_cancelled(progress)?;

        let color_mode_span = next_section_span(&file, 4)?;
        let image_resources_span = next_section_span(&file, 4)?;
        let layer_and_mask_span =
            next_section_span(&file, file_header_section.version.length_marker_width())?;
        let image_data_offset = file.offset();
        let image_data_span = (image_data_offset, file.size() - image_data_offset);

        let (layer_and_mask, image_data) = rayon::join(
            || read_span(&file, layer_and_mask_span),
            || read_span(&file, image_data_span),
        );
        let color_mode_data = read_span(&file, color_mode_span)?;
        let image_resources = read_span(&file, image_resources_span)?;

        Psd::from_sections(
            file_header_section,
            &color_mode_data,
            &image_resources,
            &layer_and_mask?,
            &image_data?,
            progress,
        )
    }

    /// Serialize the document.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.to_bytes_with_progress(&mut NoProgress)
    }

    /// Serialize the document with progress reporting.
    ///
    /// Writing is two-pass: sections are built in memory first so every
    /// forward length field is known before its body streams out.
    pub fn to_bytes_with_progress(&self, progress: &mut dyn ProgressCallback) -> Result<Vec<u8>> {
        let header = &self.file_header_section;
        let mut buffer = PsdBuffer::new();

        header.write(&mut buffer)?;
        progress.report(0.1, "file header");
        check_cancelled(progress)?;

        self.color_mode_data_section.write(&mut buffer)?;
        progress.report(0.2, "color mode data");
        check_cancelled(progress)?;

        self.image_resources_section.write(&mut buffer)?;
        progress.report(0.3, "image resources");
        check_cancelled(progress)?;

        // Unreferenced linked sources are collected before the store is
        // persisted.
        let live = self.live_source_hashes();
        self.linked_layer_store.garbage_collect(&live);

        let mut section = self.layer_and_mask_information_section.clone();
        let entries = self.linked_layer_store.entries();
        if !entries.is_empty() {
            let key = match header.version {
                PsdVersion::One => *b"lnkD",
                PsdVersion::Two => *b"lnk2",
            };
            section
                .tagged_blocks
                .push(TaggedBlock::new(key, TaggedBlockData::LinkedLayers(entries)));
        }
        section.write(&mut buffer, header, progress)?;
        progress.report(0.8, "layer and mask information");
        check_cancelled(progress)?;

        self.image_data_section.write(&mut buffer, header)?;
        progress.report(1.0, "image data");

        Ok(buffer.into_bytes())
    }

    /// Write the document to disk.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_with_progress(path, &mut NoProgress)
    }

    /// Write the document to disk with progress reporting.
    pub fn write_with_progress(
        &self,
        path: impl AsRef<Path>,
        progress: &mut dyn ProgressCallback,
    ) -> Result<()> {
        let bytes = self.to_bytes_with_progress(progress)?;
        let file = File::create(path)?;
        file.plan_size(bytes.len() as u64);
        file.write(&bytes)
    }

    fn live_source_hashes(&self) -> HashSet<String> {
        fn collect(layers: &[Layer], live: &mut HashSet<String>) {
            for layer in layers {
                match layer {
                    Layer::SmartObject(smart) => {
                        live.insert(smart.hash.clone());
                    }
                    Layer::Group(group) => collect(&group.children, live),
                    _ => {}
                }
            }
        }

        let mut live = HashSet::new();
        collect(&self.layer_and_mask_information_section.layers, &mut live);
        live
    }
}

/// Advance the sequential cursor over one `{length marker, body}` pair and
/// return the section's span (offset and total length, marker included).
fn next_section_span(file: &File, marker_width: usize) -> Result<(u64, u64)> {
    let start = file.offset();

    let mut marker = [0u8; 8];
    file.read(&mut marker[..marker_width])?;
    let body_len = match marker_width {
        4 => u32::from_be_bytes([marker[0], marker[1], marker[2], marker[3]]) as u64,
        _ => u64::from_be_bytes(marker),
    };

    let count = i64::try_from(body_len).map_err(|_| {
        PsdError::StructuralError(format!(
            "section of {} bytes exceeds the addressable file size",
            body_len
        ))
    })?;
    file.skip(count)?;

    Ok((start, marker_width as u64 + body_len))
}

/// Fetch a section body through the lock-free positional read path.
fn read_span(file: &File, (offset, len): (u64, u64)) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; len as usize];
    if !bytes.is_empty() {
        file.read_at(&mut bytes, offset)?;
    }
    Ok(bytes)
}

// Methods for working with the file section header
impl Psd {
    /// The width of the PSD file
    pub fn width(&self) -> u32 {
        self.file_header_section.width.0
    }

    /// The height of the PSD file
    pub fn height(&self) -> u32 {
        self.file_header_section.height.0
    }

    /// The number of bits per channel
    pub fn depth(&self) -> PsdDepth {
        self.file_header_section.depth
    }

    /// The color mode of the file
    pub fn color_mode(&self) -> ColorMode {
        self.file_header_section.color_mode
    }

    /// PSD or PSB
    pub fn version(&self) -> PsdVersion {
        self.file_header_section.version
    }

    /// The number of channels in the merged image, alpha included.
    pub fn channel_count(&self) -> u8 {
        self.file_header_section.channel_count.count()
    }

    /// Re-target the document at the other container version, validating
    /// that the dimensions fit. This is how a PSD becomes a PSB.
    pub fn set_version(&mut self, version: PsdVersion) -> Result<()> {
        let width = PsdWidth::new(self.width(), version)?;
        let height = PsdHeight::new(self.height(), version)?;
        self.file_header_section.version = version;
        self.file_header_section.width = width;
        self.file_header_section.height = height;
        Ok(())
    }
}

// Methods for working with image resources
impl Psd {
    /// The document resolution in dots per inch. 72 when no resolution
    /// resource is present.
    pub fn dpi(&self) -> u32 {
        self.image_resources_section
            .resolution_info()
            .map_or(72, |info| info.dpi())
    }

    /// Store the document resolution.
    pub fn set_dpi(&mut self, dpi: u32) {
        self.image_resources_section
            .set_resolution_info(ResolutionInfo::with_dpi(dpi));
    }

    /// The embedded ICC profile bytes, when present.
    pub fn icc_profile(&self) -> Option<&[u8]> {
        self.image_resources_section.icc_profile()
    }

    /// Embed an ICC profile. The bytes are carried, not interpreted.
    pub fn set_icc_profile(&mut self, profile: Vec<u8>) {
        self.image_resources_section.set_icc_profile(profile);
    }

    /// The ordered image resource blocks.
    pub fn image_resources(&self) -> &[ImageResource] {
        &self.image_resources_section.resources
    }

    /// The palette of an indexed document.
    pub fn palette(&self) -> Option<Vec<[u8; 3]>> {
        self.color_mode_data_section.palette()
    }
}

// Methods for working with layers
impl Psd {
    /// The layer forest in document order, index 0 on top.
    pub fn layers(&self) -> &[Layer] {
        &self.layer_and_mask_information_section.layers
    }

    /// Mutable access to the layer forest.
    pub fn layers_mut(&mut self) -> &mut Vec<Layer> {
        &mut self.layer_and_mask_information_section.layers
    }

    /// Walk a '/'-separated path through the forest. Names inside a group
    /// need not be unique; the first match wins.
    pub fn layer_by_path(&self, path: &str) -> Option<&Layer> {
        layer::tree::find_layer(self.layers(), path)
    }

    /// Push a layer on top of the root forest.
    pub fn add_layer(&mut self, layer: Layer) {
        self.layer_and_mask_information_section
            .layers
            .insert(0, layer);
    }

    /// Whether the merged image's first extra channel holds the merged
    /// transparency.
    pub fn has_merged_alpha(&self) -> bool {
        self.layer_and_mask_information_section.merged_alpha
    }

    /// The merged (flattened) image channels stored in the file, if the
    /// writer included them.
    pub fn merged_channels(&self) -> &[PsdChannel] {
        &self.image_data_section.channels
    }

    /// One merged channel by kind.
    pub fn merged_channel(&self, kind: PsdChannelKind) -> Option<&PsdChannel> {
        self.image_data_section.channel(kind)
    }

    /// Replace the merged image with the given channels.
    pub fn set_merged_channels(
        &mut self,
        channels: Vec<PsdChannel>,
        compression: PsdChannelCompression,
    ) {
        self.image_data_section = ImageDataSection {
            compression,
            channels,
            raw: None,
        };
    }

    /// The document's linked smart-object sources.
    pub fn linked_layers(&self) -> &LinkedLayerStore {
        &self.linked_layer_store
    }
}

// Methods for compositing the layer tree into pixels
impl Psd {
    /// Composite the visible layers onto a transparent black canvas at
    /// `f32` working precision.
    ///
    /// `T` must match the document depth (`u8`, `u16` or `f32`).
    pub fn composite<T: Pixel + ChannelElement>(&self) -> Result<Canvas<T>> {
        self.composite_with_precision::<T, f32>()
    }

    /// Composite with an explicit working precision (`f32` or `f64`).
    pub fn composite_with_precision<T, P>(&self) -> Result<Canvas<T>>
    where
        T: Pixel + ChannelElement,
        P: Precision,
    {
        if self.depth() == PsdDepth::One {
            return Err(PsdError::Unsupported(
                "1-bit documents cannot be composited".into(),
            ));
        }
        if T::DEPTH != self.depth() as u16 {
            return Err(PsdError::InvalidArgument(format!(
                "cannot composite a {}-bit document into {}-bit pixels",
                self.depth() as u16,
                T::DEPTH
            )));
        }

        let mut canvas = Canvas::<T>::new(self.color_mode(), self.width(), self.height())?;
        render::compositor::composite_tree::<T, P>(
            self.layers(),
            &mut canvas,
            (self.width(), self.height()),
        )?;
        Ok(canvas)
    }
}
