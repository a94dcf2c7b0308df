//! Smart objects end to end: the linked store, warp persistence, and
//! resampling through the renderer.

mod common;

use common::{channel, rgb_document, round_trip};
use psdoc::{
    generate_coordinates, ChannelExtents, FilterMode, Layer, LayerProperties, LinkedLayerType,
    Plane, Point2D, PsdChannelCompression, PsdChannelKind, Renderer, SmartObjectLayer,
    SmartObjectWarp,
};

fn placed_layer(psd: &mut psdoc::Psd, name: &str, source_bytes: Vec<u8>) -> String {
    let hash = psd
        .linked_layers()
        .insert_data("brick.png", *b"png ", source_bytes);

    let mut properties = LayerProperties::new(name);
    properties.coordinates =
        generate_coordinates(ChannelExtents::new(0, 0, 16, 16), psd.width(), psd.height());

    let mut layer = SmartObjectLayer::new(properties, hash.clone(), 16, 16);
    let pixels = vec![200u8; 256];
    layer.set_channel(channel(
        PsdChannelKind::Color(0),
        &pixels,
        16,
        16,
        PsdChannelCompression::RleCompressed,
    ));
    psd.add_layer(Layer::SmartObject(layer));
    hash
}

/// The layer holds only the hash; the bytes live in the store and both
/// survive the file round trip.
#[test]
fn linked_source_round_trips() {
    let mut psd = rgb_document(16, 16);
    let hash = placed_layer(&mut psd, "Placed", vec![9u8; 128]);

    let parsed = round_trip(&psd);
    match &parsed.layers()[0] {
        Layer::SmartObject(smart) => {
            assert_eq!(smart.hash, hash);
            assert_eq!(smart.original_width, 16);
            assert_eq!(smart.original_height, 16);
        }
        other => panic!("expected a smart object, got {:?}", other),
    }

    let entry = parsed.linked_layers().get(&hash).expect("store entry");
    assert_eq!(entry.filename, "brick.png");
    assert_eq!(entry.link_type, LinkedLayerType::Data);
    assert_eq!(entry.data.as_deref().map(Vec::len), Some(128));
}

/// Two smart objects placing the same bytes share one store entry.
#[test]
fn identical_sources_share_an_entry() {
    let mut psd = rgb_document(16, 16);
    let first = placed_layer(&mut psd, "A", vec![7u8; 64]);
    let second = placed_layer(&mut psd, "B", vec![7u8; 64]);

    assert_eq!(first, second);
    assert_eq!(psd.linked_layers().len(), 1);

    let parsed = round_trip(&psd);
    assert_eq!(parsed.linked_layers().len(), 1);
}

/// An entry no smart object references anymore is dropped at write time.
#[test]
fn orphaned_sources_are_collected_on_write() {
    let mut psd = rgb_document(16, 16);
    placed_layer(&mut psd, "keep", vec![1u8; 32]);
    psd.linked_layers()
        .insert_data("orphan.png", *b"png ", vec![2u8; 32]);
    assert_eq!(psd.linked_layers().len(), 2);

    let parsed = round_trip(&psd);
    assert_eq!(parsed.linked_layers().len(), 1);
}

/// A bent warp grid survives descriptor persistence inside the document.
#[test]
fn warp_round_trips_through_the_descriptor_block() {
    let mut psd = rgb_document(16, 16);
    placed_layer(&mut psd, "warped", vec![5u8; 16]);

    if let Some(Layer::SmartObject(smart)) = psd.layers_mut().first_mut() {
        let mut points = smart.warp.points().to_vec();
        points[5] = points[5] + Point2D::new(2.0, -1.5);
        smart.warp.set_points(points).unwrap();
        smart.warp.set_non_affine_quad([
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.125),
            Point2D::new(0.0, 1.0),
            Point2D::new(1.0, 1.0),
        ]);
    }

    let parsed = round_trip(&psd);
    match &parsed.layers()[0] {
        Layer::SmartObject(smart) => {
            assert!(!smart.warp.no_op());
            let expected =
                SmartObjectWarp::identity(16.0, 16.0).points()[5] + Point2D::new(2.0, -1.5);
            assert!(smart.warp.points()[5].distance(expected) < 1e-9);
            assert!((smart.warp.non_affine_quad()[1].y - 0.125).abs() < 1e-9);
        }
        other => panic!("expected a smart object, got {:?}", other),
    }
}

/// A no-op warp is recognized as such after a round trip.
#[test]
fn no_op_warp_is_detected() {
    let mut psd = rgb_document(16, 16);
    placed_layer(&mut psd, "flat", vec![5u8; 16]);

    let parsed = round_trip(&psd);
    match &parsed.layers()[0] {
        Layer::SmartObject(smart) => assert!(smart.warp.no_op()),
        other => panic!("expected a smart object, got {:?}", other),
    }
}

/// Rendering a source through an identity warp mesh reproduces the source;
/// a translated mesh moves it.
#[test]
fn renderer_resamples_through_the_mesh() {
    // A horizontal step: left half dark, right half bright.
    let mut pixels = vec![0u8; 32 * 32];
    for row in pixels.chunks_mut(32) {
        row[16..].fill(240);
    }
    let src = Plane::from_pixels(pixels, 32, 32);

    let warp = SmartObjectWarp::identity(32.0, 32.0);
    let mesh = warp.bake_mesh(9, 9).unwrap();

    let mut dst = Plane::<u8>::new(32, 32);
    let renderer = Renderer::default();
    renderer
        .render_quad_mesh(&mut dst, &src, &mesh, FilterMode::Nearest)
        .unwrap();

    assert_eq!(dst.pixels[5 * 32 + 4], 0);
    assert_eq!(dst.pixels[5 * 32 + 28], 240);

    // Shift the mesh right by 8 pixels: the step moves with it.
    let mut shifted_mesh = mesh.clone();
    shifted_mesh.translate(Point2D::new(8.0, 0.0)).unwrap();
    let mut shifted = Plane::<u8>::new(32, 32);
    renderer
        .render_quad_mesh(&mut shifted, &src, &shifted_mesh, FilterMode::Nearest)
        .unwrap();
    assert_eq!(shifted.pixels[5 * 32 + 26], 240);
    assert_eq!(shifted.pixels[5 * 32 + 12], 0);
}
