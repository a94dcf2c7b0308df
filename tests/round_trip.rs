//! Whole-document preservation guarantees.

mod common;

use common::{fill_layer, rgb_document, round_trip};
use psdoc::{
    ChannelExtents, Layer, ProtectionFlags, Psd, PsdChannelCompression, PsdVersion, SheetColor,
    TaggedBlockData,
};

fn sample_document() -> Psd {
    let mut psd = rgb_document(32, 32);

    let mut bottom = fill_layer(
        "Bottom",
        ChannelExtents::new(0, 0, 32, 32),
        (32, 32),
        [255, 128, 0],
        255,
        PsdChannelCompression::RleCompressed,
    );
    {
        let properties = bottom.properties_mut();
        properties.opacity = 200;
        properties.id = Some(7);
        properties.sheet_color = Some(SheetColor(3));
        properties.protection = ProtectionFlags {
            transparency: true,
            composite: false,
            position: true,
        };
        properties.reference_point = Some((4.5, -2.0));
    }

    let top = fill_layer(
        "Top \u{30ec}\u{30a4}\u{30e4}\u{30fc}",
        ChannelExtents::new(8, 8, 24, 24),
        (32, 32),
        [0, 0, 255],
        128,
        PsdChannelCompression::ZipWithoutPrediction,
    );

    psd.add_layer(bottom);
    psd.add_layer(top);
    psd.set_dpi(300);
    psd.set_icc_profile(vec![1, 2, 3, 4, 5]);
    psd
}

/// Reading a PSD, resaving as PSB and reading back leaves names, blend
/// modes, opacities, extents, channel counts and pixel data untouched.
#[test]
fn psd_to_psb_preserves_the_layer_tree() {
    let psd = sample_document();
    let bytes = psd.to_bytes().unwrap();

    let mut reread = Psd::from_bytes(&bytes).unwrap();
    reread.set_version(PsdVersion::Two).unwrap();
    let psb_bytes = reread.to_bytes().unwrap();

    let psb = Psd::from_bytes(&psb_bytes).unwrap();
    assert_eq!(psb.version(), PsdVersion::Two);
    assert_eq!(psb.layers().len(), psd.layers().len());

    for (original, converted) in psd.layers().iter().zip(psb.layers()) {
        let a = original.properties();
        let b = converted.properties();
        assert_eq!(a.name, b.name);
        assert_eq!(a.blend_mode, b.blend_mode);
        assert_eq!(a.opacity, b.opacity);
        assert_eq!(a.coordinates, b.coordinates);
        assert_eq!(a.id, b.id);
        assert_eq!(a.protection, b.protection);
        assert_eq!(a.reference_point, b.reference_point);

        let channels_a = original.channels().unwrap();
        let channels_b = converted.channels().unwrap();
        assert_eq!(channels_a.len(), channels_b.len());
        for (channel_a, channel_b) in channels_a.iter().zip(channels_b) {
            assert_eq!(channel_a.kind(), channel_b.kind());
            assert_eq!(
                channel_a.get_data::<u8>().unwrap(),
                channel_b.get_data::<u8>().unwrap()
            );
        }
    }

    assert_eq!(psb.dpi(), 300);
    assert_eq!(psb.icc_profile().unwrap(), &[1, 2, 3, 4, 5]);
}

/// Tagged blocks with unknown keys are preserved across parse/re-emit, on
/// both layers and the document scope.
#[test]
fn unknown_tagged_blocks_round_trip() {
    let mut psd = sample_document();
    let unknown_payload = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x42];
    if let Some(layer) = psd.layers_mut().first_mut() {
        layer
            .properties_mut()
            .tagged_blocks
            .push(psdoc::TaggedBlock::new_raw(*b"xyzQ", unknown_payload.clone()));
    }

    let parsed = round_trip(&psd);
    let parsed_again = round_trip(&parsed);

    for document in [&parsed, &parsed_again] {
        let layer = &document.layers()[0];
        let block = layer
            .properties()
            .tagged_blocks
            .iter()
            .find(|block| block.key == *b"xyzQ")
            .expect("unknown block preserved");
        match &block.data {
            TaggedBlockData::Raw(bytes) => assert_eq!(bytes, &unknown_payload),
            other => panic!("expected raw preservation, got {:?}", other),
        }
    }
}

/// An adjustment layer's payload is carried opaque and survives
/// re-serialization.
#[test]
fn adjustment_layers_are_preserved_not_evaluated() {
    let mut psd = rgb_document(8, 8);
    let mut properties = psdoc::LayerProperties::new("Levels 1");
    properties
        .tagged_blocks
        .push(psdoc::TaggedBlock::new_raw(*b"levl", vec![0, 2, 0, 0]));
    psd.add_layer(Layer::Adjustment(psdoc::AdjustmentLayer {
        properties,
        key: *b"levl",
    }));

    let parsed = round_trip(&psd);
    match &parsed.layers()[0] {
        Layer::Adjustment(adjustment) => {
            assert_eq!(adjustment.key, *b"levl");
            let payload = adjustment
                .properties
                .tagged_blocks
                .iter()
                .find(|block| block.key == *b"levl")
                .unwrap();
            assert!(matches!(&payload.data, TaggedBlockData::Raw(bytes) if bytes == &[0, 2, 0, 0]));
        }
        other => panic!("expected an adjustment layer, got {:?}", other),
    }

    // Compositing ignores it rather than failing.
    assert!(parsed.composite::<u8>().is_ok());
}

/// Documents survive the disk path, not just the byte path. The reader
/// walks the length markers sequentially and pulls the section bodies
/// through the memory-mapped positional reads.
#[test]
fn write_and_read_from_disk() {
    let psd = sample_document();

    let mut path = std::env::temp_dir();
    path.push(format!("psdoc-roundtrip-{}.psd", std::process::id()));

    psd.write(&path).unwrap();
    let reread = Psd::read(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(reread.width(), 32);
    assert_eq!(reread.layers().len(), 2);
    assert_eq!(reread.layers()[0].name(), "Top \u{30ec}\u{30a4}\u{30e4}\u{30fc}");
}

/// The disk reader handles the PSB's 8-byte layer-and-mask length marker.
#[test]
fn write_and_read_psb_from_disk() {
    let mut psb = sample_document();
    psb.set_version(PsdVersion::Two).unwrap();

    let mut path = std::env::temp_dir();
    path.push(format!("psdoc-roundtrip-{}.psb", std::process::id()));

    psb.write(&path).unwrap();
    let reread = Psd::read(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(reread.version(), PsdVersion::Two);
    assert_eq!(reread.layers().len(), 2);
    let bottom = reread.layer_by_path("Bottom").unwrap();
    assert_eq!(bottom.properties().opacity, 200);
}

/// Cancellation from the progress callback aborts between sections.
#[test]
fn cancelled_read_returns_cancelled() {
    struct CancelImmediately;

    impl psdoc::ProgressCallback for CancelImmediately {
        fn cancelled(&self) -> bool {
            true
        }
    }

    let bytes = sample_document().to_bytes().unwrap();
    let result = Psd::from_bytes_with_progress(&bytes, &mut CancelImmediately);
    assert!(matches!(result, Err(psdoc::PsdError::Cancelled)));
}
