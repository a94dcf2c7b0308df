//! End-to-end codec coverage: every compression code survives a full
//! write-then-read of the document, at every depth the codec applies to.

mod common;

use common::{fill_layer, rgb_document, round_trip};
use psdoc::{
    generate_coordinates, ChannelExtents, ColorMode, ImageLayer, Layer, LayerProperties,
    PsdChannel, PsdChannelCompression, PsdChannelKind, Psd, PsdDepth, PsdVersion,
};

const CODECS: [PsdChannelCompression; 4] = [
    PsdChannelCompression::RawData,
    PsdChannelCompression::RleCompressed,
    PsdChannelCompression::ZipWithoutPrediction,
    PsdChannelCompression::ZipWithPrediction,
];

/// Exact pixel recovery through a full document round trip for each codec,
/// 8-bit.
#[test]
fn eight_bit_codecs_round_trip() {
    for codec in CODECS {
        let mut psd = rgb_document(32, 32);
        psd.add_layer(fill_layer(
            "pixels",
            ChannelExtents::new(0, 0, 32, 32),
            (32, 32),
            [255, 128, 0],
            255,
            codec,
        ));

        let parsed = round_trip(&psd);
        let layer = parsed.layer_by_path("pixels").unwrap();
        let channels = layer.channels().unwrap();

        for (kind, expected) in [
            (PsdChannelKind::Color(0), 255u8),
            (PsdChannelKind::Color(1), 128),
            (PsdChannelKind::Color(2), 0),
        ] {
            let channel = channels
                .iter()
                .find(|channel| channel.kind() == kind)
                .unwrap();
            assert_eq!(channel.compression(), codec);
            assert_eq!(
                channel.get_data::<u8>().unwrap(),
                vec![expected; 32 * 32],
                "codec {:?}",
                codec
            );
        }
    }
}

fn deep_document<T: psdoc::ChannelElement>(
    depth: PsdDepth,
    pixels: &[T],
    codec: PsdChannelCompression,
) -> Psd {
    let mut psd = Psd::new(PsdVersion::One, ColorMode::Rgb, depth, 16, 16).unwrap();

    let mut properties = LayerProperties::new("deep");
    properties.coordinates = generate_coordinates(ChannelExtents::new(0, 0, 16, 16), 16, 16);
    let mut layer = ImageLayer::new(properties);
    layer
        .set_channel(PsdChannel::new(PsdChannelKind::Color(0), codec, pixels, 16, 16).unwrap())
        .unwrap();
    psd.add_layer(Layer::Image(layer));
    psd
}

/// 16-bit channels survive every codec, including the delta prediction.
#[test]
fn sixteen_bit_codecs_round_trip() {
    let pixels: Vec<u16> = (0..256u32).map(|i| (i * 239) as u16).collect();
    for codec in CODECS {
        let psd = deep_document(PsdDepth::Sixteen, &pixels, codec);
        let parsed = round_trip(&psd);
        let layer = parsed.layer_by_path("deep").unwrap();
        let channel = &layer.channels().unwrap()[0];
        assert_eq!(channel.get_data::<u16>().unwrap(), pixels, "codec {:?}", codec);
    }
}

/// 32-bit float channels survive every codec exactly, including the
/// byte-interleaved prediction.
#[test]
fn thirty_two_bit_codecs_round_trip() {
    let pixels: Vec<f32> = (0..256u32)
        .map(|i| (i as f32 * 0.75).sin() * 3.0 - 0.5)
        .collect();
    for codec in CODECS {
        let psd = deep_document(PsdDepth::ThirtyTwo, &pixels, codec);
        let parsed = round_trip(&psd);
        let layer = parsed.layer_by_path("deep").unwrap();
        let channel = &layer.channels().unwrap()[0];
        assert_eq!(channel.get_data::<f32>().unwrap(), pixels, "codec {:?}", codec);
    }
}

/// The RLE path of a PSB uses 32-bit scanline counts end to end.
#[test]
fn psb_rle_round_trips() {
    let mut psd = Psd::new(PsdVersion::Two, ColorMode::Rgb, PsdDepth::Eight, 64, 64).unwrap();
    psd.add_layer(fill_layer(
        "big",
        ChannelExtents::new(0, 0, 64, 64),
        (64, 64),
        [1, 2, 3],
        200,
        PsdChannelCompression::RleCompressed,
    ));

    let parsed = round_trip(&psd);
    assert_eq!(parsed.version(), PsdVersion::Two);
    let layer = parsed.layer_by_path("big").unwrap();
    let alpha = layer
        .channels()
        .unwrap()
        .iter()
        .find(|channel| channel.kind() == PsdChannelKind::TransparencyMask)
        .unwrap();
    assert_eq!(alpha.get_data::<u8>().unwrap(), vec![200u8; 64 * 64]);
}

/// The merged image data section decodes through RLE exactly.
#[test]
fn rle_merged_image_round_trips() {
    let mut psd = rgb_document(64, 64);
    // The header declares four channels: RGB plus transparency.
    let mut channels = Vec::new();
    for (kind, value) in [
        (PsdChannelKind::Color(0), 255u8),
        (PsdChannelKind::Color(1), 128),
        (PsdChannelKind::Color(2), 0),
        (PsdChannelKind::TransparencyMask, 255),
    ] {
        let pixels = vec![value; 64 * 64];
        channels.push(
            PsdChannel::new(kind, PsdChannelCompression::RleCompressed, &pixels, 64, 64).unwrap(),
        );
    }
    psd.set_merged_channels(channels, PsdChannelCompression::RleCompressed);

    let parsed = round_trip(&psd);
    let red = parsed
        .merged_channel(PsdChannelKind::Color(0))
        .unwrap()
        .get_data::<u8>()
        .unwrap();
    let green = parsed
        .merged_channel(PsdChannelKind::Color(1))
        .unwrap()
        .get_data::<u8>()
        .unwrap();
    assert_eq!(red, vec![255u8; 64 * 64]);
    assert_eq!(green, vec![128u8; 64 * 64]);
}
