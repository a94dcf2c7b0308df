//! Shared builders for the integration tests: documents are constructed
//! programmatically, serialized and read back rather than loaded from
//! binary fixtures.
#![allow(dead_code)]

use psdoc::{
    generate_coordinates, ChannelExtents, ColorMode, ImageLayer, Layer, LayerProperties,
    PsdChannel, PsdChannelCompression, PsdChannelKind, Psd, PsdDepth, PsdVersion,
};

/// An empty 8-bit RGB PSD.
pub fn rgb_document(width: u32, height: u32) -> Psd {
    Psd::new(PsdVersion::One, ColorMode::Rgb, PsdDepth::Eight, width, height).unwrap()
}

/// A channel filled from the given pixels.
pub fn channel(
    kind: PsdChannelKind,
    pixels: &[u8],
    width: u32,
    height: u32,
    compression: PsdChannelCompression,
) -> PsdChannel {
    PsdChannel::new(kind, compression, pixels, width, height).unwrap()
}

/// An RGBA layer covering `extents`, with every channel filled from a
/// per-channel pixel vector.
pub fn layer_from_pixels(
    name: &str,
    extents: ChannelExtents,
    document: (u32, u32),
    planes: [&[u8]; 4],
    compression: PsdChannelCompression,
) -> Layer {
    let mut properties = LayerProperties::new(name);
    properties.coordinates = generate_coordinates(extents, document.0, document.1);

    let width = extents.width() as u32;
    let height = extents.height() as u32;

    let mut layer = ImageLayer::new(properties);
    let kinds = [
        PsdChannelKind::Color(0),
        PsdChannelKind::Color(1),
        PsdChannelKind::Color(2),
        PsdChannelKind::TransparencyMask,
    ];
    for (kind, pixels) in kinds.into_iter().zip(planes) {
        layer
            .set_channel(channel(kind, pixels, width, height, compression))
            .unwrap();
    }
    Layer::Image(layer)
}

/// A solid-color RGBA layer covering `extents`.
pub fn fill_layer(
    name: &str,
    extents: ChannelExtents,
    document: (u32, u32),
    rgb: [u8; 3],
    alpha: u8,
    compression: PsdChannelCompression,
) -> Layer {
    let len = (extents.width() * extents.height()) as usize;
    let planes = [
        vec![rgb[0]; len],
        vec![rgb[1]; len],
        vec![rgb[2]; len],
        vec![alpha; len],
    ];
    layer_from_pixels(
        name,
        extents,
        document,
        [&planes[0], &planes[1], &planes[2], &planes[3]],
        compression,
    )
}

/// Serialize and re-parse a document.
pub fn round_trip(psd: &Psd) -> Psd {
    let bytes = psd.to_bytes().unwrap();
    Psd::from_bytes(&bytes).unwrap()
}
