//! The compositing engine.
//!
//! Walks the layer forest bottom to top, decompresses each visible layer's
//! channels, folds alpha, mask and opacity into a per-pixel coverage
//! buffer, applies the blend kernel over the intersection of the layer and
//! canvas rectangles, and finally updates the canvas alpha with
//! Porter-Duff "over". Parallelism exists only inside a single layer's
//! work: rows run on rayon, and the compositor joins before moving to the
//! next layer.
//!
//! Groups in non-passthrough modes composite into a private canvas the
//! size of their content's bounding box, which is then blended onto the
//! parent as if it were a single layer. Passthrough groups inline their
//! children into the parent context.

use rayon::prelude::*;

use crate::blend_mode::BlendMode;
use crate::error::{PsdError, Result};
use crate::geometry::ChannelExtents;
use crate::layer::{GroupLayer, Layer, LayerProperties};
use crate::pixel::Pixel;
use crate::psd_channel::{ChannelElement, PsdChannel, PsdChannelKind};
use crate::render::blend::{kernel_for, over_alpha, BlendKernel, Precision};
use crate::sections::file_header_section::ColorMode;

/// The compositing target: one plane per color channel of the working
/// color mode, plus coverage.
///
/// A canvas has no mask and unit opacity; those belong to the layers
/// composited onto it.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas<T: Pixel> {
    color_mode: ColorMode,
    width: u32,
    height: u32,
    /// Document coordinates of pixel (0, 0); non-zero for group
    /// intermediates.
    origin: (i32, i32),
    color: Vec<Vec<T>>,
    alpha: Vec<T>,
}

impl<T: Pixel> Canvas<T> {
    /// A transparent black canvas for the given mode. Only the modes with
    /// defined channel indexing (grayscale, RGB, CMYK) can be composited.
    pub fn new(color_mode: ColorMode, width: u32, height: u32) -> Result<Canvas<T>> {
        Self::with_origin(color_mode, width, height, (0, 0))
    }

    fn with_origin(
        color_mode: ColorMode,
        width: u32,
        height: u32,
        origin: (i32, i32),
    ) -> Result<Canvas<T>> {
        let planes = color_mode.color_channel_count()?;
        let len = width as usize * height as usize;
        Ok(Canvas {
            color_mode,
            width,
            height,
            origin,
            color: vec![vec![T::ZERO; len]; planes],
            alpha: vec![T::ZERO; len],
        })
    }

    /// Canvas width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Canvas height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The color mode the canvas composites in.
    pub fn color_mode(&self) -> ColorMode {
        self.color_mode
    }

    /// A color plane in scanline order.
    pub fn channel(&self, index: usize) -> Option<&[T]> {
        self.color.get(index).map(Vec::as_slice)
    }

    /// Number of color planes.
    pub fn channel_count(&self) -> usize {
        self.color.len()
    }

    /// The coverage plane in scanline order.
    pub fn alpha(&self) -> &[T] {
        &self.alpha
    }

    /// Interleave the planes plus alpha: `[c0, c1, …, a, c0, …]`.
    pub fn interleave(&self) -> Vec<T> {
        let planes = self.color.len();
        let mut out = vec![T::ZERO; self.alpha.len() * (planes + 1)];
        for (i, slot) in out.chunks_exact_mut(planes + 1).enumerate() {
            for (p, plane) in self.color.iter().enumerate() {
                slot[p] = plane[i];
            }
            slot[planes] = self.alpha[i];
        }
        out
    }

    fn rect(&self) -> ChannelExtents {
        ChannelExtents::new(
            self.origin.1,
            self.origin.0,
            self.origin.1 + self.height as i32,
            self.origin.0 + self.width as i32,
        )
    }
}

/// A prepared source to blend onto a canvas: decompressed planes in its
/// own rectangle, plus optional coverage and mask planes.
struct BlendSource<T: Pixel> {
    rect: ChannelExtents,
    /// One entry per canvas plane; a missing plane skips that channel.
    planes: Vec<Option<Vec<T>>>,
    alpha: Option<Vec<T>>,
    mask: Option<MaskSource<T>>,
    opacity: u8,
    blend_mode: BlendMode,
}

struct MaskSource<T: Pixel> {
    rect: ChannelExtents,
    pixels: Vec<T>,
    /// Coverage outside the mask rectangle, already in `[0, 1]`.
    default: f64,
    /// Extra attenuation from the mask density.
    density: f64,
}

/// Composite the forest (top-to-bottom order, as stored) onto `canvas`.
pub(crate) fn composite_tree<T, P>(
    layers: &[Layer],
    canvas: &mut Canvas<T>,
    document: (u32, u32),
) -> Result<()>
where
    T: Pixel + ChannelElement,
    P: Precision,
{
    for layer in layers.iter().rev() {
        if !layer.properties().visible {
            continue;
        }

        match layer {
            Layer::Group(group) => composite_group::<T, P>(group, canvas, document)?,
            Layer::Adjustment(_) => {
                // Adjustment payloads are preserved, never evaluated.
                continue;
            }
            Layer::Image(_) | Layer::SmartObject(_) => {
                let channels = layer.channels().unwrap_or(&[]);
                let Some(source) =
                    pixel_layer_source::<T>(layer.properties(), channels, canvas, document)?
                else {
                    continue;
                };
                blend_source::<T, P>(canvas, &source)?;
            }
        }
    }
    Ok(())
}

fn composite_group<T, P>(
    group: &GroupLayer,
    canvas: &mut Canvas<T>,
    document: (u32, u32),
) -> Result<()>
where
    T: Pixel + ChannelElement,
    P: Precision,
{
    if group.properties.blend_mode == BlendMode::Passthrough {
        return composite_tree::<T, P>(&group.children, canvas, document);
    }

    // The intermediate canvas only needs to cover the group's content
    // where it meets the parent canvas.
    let Some(content) = content_rect(&group.children, document) else {
        return Ok(());
    };
    let Some(rect) = intersect(content, canvas.rect()) else {
        return Ok(());
    };

    let mut intermediate = Canvas::<T>::with_origin(
        canvas.color_mode,
        rect.width() as u32,
        rect.height() as u32,
        (rect.left, rect.top),
    )?;
    composite_tree::<T, P>(&group.children, &mut intermediate, document)?;

    // Blend the intermediate as if it were a single layer carrying the
    // group's mask, opacity and blend mode.
    let mask = mask_source_with_pixels::<T>(&group.properties, group.mask_channel())?;
    let source = BlendSource {
        rect,
        planes: intermediate.color.into_iter().map(Some).collect(),
        alpha: Some(intermediate.alpha),
        mask,
        opacity: group.properties.opacity,
        blend_mode: group.properties.blend_mode,
    };
    blend_source::<T, P>(canvas, &source)
}

/// The union of the visible content rectangles under `layers`.
fn content_rect(layers: &[Layer], document: (u32, u32)) -> Option<ChannelExtents> {
    let mut rect: Option<ChannelExtents> = None;
    for layer in layers {
        if !layer.properties().visible {
            continue;
        }
        let candidate = match layer {
            Layer::Group(group) => content_rect(&group.children, document),
            _ => {
                let extents = layer.properties().extents(document.0, document.1);
                (extents.width() > 0 && extents.height() > 0).then_some(extents)
            }
        };
        rect = match (rect, candidate) {
            (None, candidate) => candidate,
            (rect, None) => rect,
            (Some(a), Some(b)) => Some(ChannelExtents::new(
                a.top.min(b.top),
                a.left.min(b.left),
                a.bottom.max(b.bottom),
                a.right.max(b.right),
            )),
        };
    }
    rect
}

fn intersect(a: ChannelExtents, b: ChannelExtents) -> Option<ChannelExtents> {
    let rect = ChannelExtents::new(
        a.top.max(b.top),
        a.left.max(b.left),
        a.bottom.min(b.bottom),
        a.right.min(b.right),
    );
    (rect.width() > 0 && rect.height() > 0).then_some(rect)
}

/// Decompress the channels a pixel layer contributes to `canvas`.
/// `None` when the layer misses the canvas entirely.
fn pixel_layer_source<T: Pixel + ChannelElement>(
    properties: &LayerProperties,
    channels: &[PsdChannel],
    canvas: &Canvas<T>,
    document: (u32, u32),
) -> Result<Option<BlendSource<T>>> {
    let rect = properties.extents(document.0, document.1);
    if intersect(rect, canvas.rect()).is_none() {
        return Ok(None);
    }

    let area = rect.width() as usize * rect.height() as usize;
    let find = |kind: PsdChannelKind| channels.iter().find(|channel| channel.kind() == kind);
    let fetch = |kind: PsdChannelKind| -> Result<Option<Vec<T>>> {
        let Some(channel) = find(kind) else {
            return Ok(None);
        };
        let pixels = channel.get_data::<T>()?;
        if pixels.len() != area {
            return Err(PsdError::InvalidArgument(format!(
                "channel {:?} of layer \"{}\" holds {} pixels but the layer rectangle covers {}",
                kind,
                properties.name,
                pixels.len(),
                area
            )));
        }
        Ok(Some(pixels))
    };

    let mut planes = Vec::with_capacity(canvas.channel_count());
    for index in 0..canvas.channel_count() {
        planes.push(fetch(PsdChannelKind::Color(index as u8))?);
    }

    let alpha = fetch(PsdChannelKind::TransparencyMask)?;

    let mask = mask_source_with_pixels(properties, find(PsdChannelKind::UserSuppliedLayerMask))?;

    Ok(Some(BlendSource {
        rect,
        planes,
        alpha,
        mask,
        opacity: properties.opacity,
        blend_mode: properties.blend_mode,
    }))
}

fn mask_source_with_pixels<T: Pixel + ChannelElement>(
    properties: &LayerProperties,
    channel: Option<&PsdChannel>,
) -> Result<Option<MaskSource<T>>> {
    let Some(mask) = &properties.mask else {
        return Ok(None);
    };
    if mask.disabled {
        return Ok(None);
    }

    let pixels = match channel {
        Some(channel) => channel.get_data::<T>()?,
        None => Vec::new(),
    };
    let rect = if pixels.is_empty() {
        // No pixels: the default color covers everything.
        ChannelExtents::new(0, 0, 0, 0)
    } else {
        let area = mask.extents.width().max(0) as usize * mask.extents.height().max(0) as usize;
        if pixels.len() != area {
            return Err(PsdError::InvalidArgument(format!(
                "mask channel holds {} pixels but the mask rectangle covers {}",
                pixels.len(),
                area
            )));
        }
        mask.extents
    };

    Ok(Some(MaskSource {
        rect,
        pixels,
        default: if mask.default_color == 0 { 0.0 } else { 1.0 },
        density: mask.density.map_or(1.0, |density| density as f64 / 255.0),
    }))
}

/// Blend a prepared source onto the canvas: coverage first, then the color
/// kernels over parallel rows, then the canvas alpha.
fn blend_source<T, P>(canvas: &mut Canvas<T>, source: &BlendSource<T>) -> Result<()>
where
    T: Pixel + ChannelElement,
    P: Precision,
{
    let Some(rect) = intersect(source.rect, canvas.rect()) else {
        return Ok(());
    };
    let kernel = kernel_for::<P>(source.blend_mode)?;

    let width = canvas.width as usize;
    let (origin_x, origin_y) = canvas.origin;
    let source_width = source.rect.width() as usize;
    let opacity = source.opacity as f64 / 255.0;

    // Effective coverage, the size of the canvas: alpha x mask x opacity.
    let mut coverage = vec![P::ZERO; canvas.alpha.len()];
    coverage
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(canvas_y, row)| {
            let doc_y = canvas_y as i32 + origin_y;
            if doc_y < rect.top || doc_y >= rect.bottom {
                return;
            }
            for (canvas_x, value) in row.iter_mut().enumerate() {
                let doc_x = canvas_x as i32 + origin_x;
                if doc_x < rect.left || doc_x >= rect.right {
                    continue;
                }

                let source_idx = (doc_y - source.rect.top) as usize * source_width
                    + (doc_x - source.rect.left) as usize;

                let mut alpha = match &source.alpha {
                    Some(alpha) => alpha[source_idx].to_unit_f64(),
                    None => 1.0,
                };

                if let Some(mask) = &source.mask {
                    let inside = doc_x >= mask.rect.left
                        && doc_x < mask.rect.right
                        && doc_y >= mask.rect.top
                        && doc_y < mask.rect.bottom;
                    let mask_value = if inside {
                        let mask_idx = (doc_y - mask.rect.top) as usize
                            * mask.rect.width() as usize
                            + (doc_x - mask.rect.left) as usize;
                        mask.pixels[mask_idx].to_unit_f64()
                    } else {
                        mask.default
                    };
                    alpha *= mask_value * mask.density;
                }

                *value = P::from_f64(alpha * opacity);
            }
        });

    match kernel {
        BlendKernel::Separable(kernel) => {
            for (plane_idx, canvas_plane) in canvas.color.iter_mut().enumerate() {
                let Some(source_plane) = &source.planes[plane_idx] else {
                    continue;
                };
                canvas_plane
                    .par_chunks_mut(width)
                    .enumerate()
                    .for_each(|(canvas_y, row)| {
                        let doc_y = canvas_y as i32 + origin_y;
                        if doc_y < rect.top || doc_y >= rect.bottom {
                            return;
                        }
                        for (canvas_x, pixel) in row.iter_mut().enumerate() {
                            let doc_x = canvas_x as i32 + origin_x;
                            if doc_x < rect.left || doc_x >= rect.right {
                                continue;
                            }
                            let source_idx = (doc_y - source.rect.top) as usize * source_width
                                + (doc_x - source.rect.left) as usize;
                            let coverage_idx = canvas_y * width + canvas_x;

                            let c = P::from_f64(pixel.to_unit_f64());
                            let l = P::from_f64(source_plane[source_idx].to_unit_f64());
                            let a = coverage[coverage_idx];

                            let blended = kernel(c, l);
                            let out = blended * a + c * (P::ONE - a);
                            *pixel = T::from_unit_f64(out.clamp01().to_f64());
                        }
                    });
            }
        }
        BlendKernel::NonSeparable(kernel) => {
            if canvas.color_mode != ColorMode::Rgb {
                return Err(PsdError::Unsupported(format!(
                    "{:?} requires an RGB working color space",
                    source.blend_mode
                )));
            }
            // The HSL family couples the three channels, so the planes are
            // processed together row by row.
            let (red, rest) = canvas.color.split_at_mut(1);
            let (green, blue) = rest.split_at_mut(1);

            red[0]
                .par_chunks_mut(width)
                .zip(green[0].par_chunks_mut(width))
                .zip(blue[0].par_chunks_mut(width))
                .enumerate()
                .for_each(|(canvas_y, ((red_row, green_row), blue_row))| {
                    let doc_y = canvas_y as i32 + origin_y;
                    if doc_y < rect.top || doc_y >= rect.bottom {
                        return;
                    }
                    for canvas_x in 0..width {
                        let doc_x = canvas_x as i32 + origin_x;
                        if doc_x < rect.left || doc_x >= rect.right {
                            continue;
                        }
                        let source_idx = (doc_y - source.rect.top) as usize * source_width
                            + (doc_x - source.rect.left) as usize;
                        let coverage_idx = canvas_y * width + canvas_x;

                        let c = [
                            P::from_f64(red_row[canvas_x].to_unit_f64()),
                            P::from_f64(green_row[canvas_x].to_unit_f64()),
                            P::from_f64(blue_row[canvas_x].to_unit_f64()),
                        ];
                        let l = [
                            sample_plane::<T, P>(&source.planes[0], source_idx),
                            sample_plane::<T, P>(&source.planes[1], source_idx),
                            sample_plane::<T, P>(&source.planes[2], source_idx),
                        ];
                        let a = coverage[coverage_idx];

                        let blended = kernel(c, l);
                        let targets = [
                            (&mut red_row[canvas_x], blended[0], c[0]),
                            (&mut green_row[canvas_x], blended[1], c[1]),
                            (&mut blue_row[canvas_x], blended[2], c[2]),
                        ];
                        for (pixel, blended, canvas_value) in targets {
                            let out = blended * a + canvas_value * (P::ONE - a);
                            *pixel = T::from_unit_f64(out.clamp01().to_f64());
                        }
                    }
                });
        }
    }

    // The canvas alpha only moves once every color channel of this source
    // is blended.
    canvas
        .alpha
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(canvas_y, row)| {
            let doc_y = canvas_y as i32 + origin_y;
            if doc_y < rect.top || doc_y >= rect.bottom {
                return;
            }
            for (canvas_x, pixel) in row.iter_mut().enumerate() {
                let doc_x = canvas_x as i32 + origin_x;
                if doc_x < rect.left || doc_x >= rect.right {
                    continue;
                }
                let coverage_idx = canvas_y * width + canvas_x;
                let a_canvas = P::from_f64(pixel.to_unit_f64());
                let out = over_alpha(a_canvas, coverage[coverage_idx]);
                *pixel = T::from_unit_f64(out.clamp01().to_f64());
            }
        });

    Ok(())
}

fn sample_plane<T: Pixel, P: Precision>(plane: &Option<Vec<T>>, index: usize) -> P {
    match plane {
        Some(plane) => P::from_f64(plane[index].to_unit_f64()),
        None => P::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::generate_coordinates;
    use crate::layer::{ImageLayer, LayerMask, LayerProperties};
    use crate::psd_channel::PsdChannelCompression;

    const DOC: (u32, u32) = (8, 8);

    fn layer_with_fill(
        name: &str,
        extents: ChannelExtents,
        rgb: [u8; 3],
        alpha: u8,
    ) -> ImageLayer {
        let mut properties = LayerProperties::new(name);
        properties.coordinates = generate_coordinates(extents, DOC.0, DOC.1);

        let mut layer = ImageLayer::new(properties);
        let len = (extents.width() * extents.height()) as usize;
        for (index, value) in rgb.into_iter().enumerate() {
            let pixels = vec![value; len];
            layer
                .set_channel(
                    PsdChannel::new(
                        PsdChannelKind::Color(index as u8),
                        PsdChannelCompression::RawData,
                        &pixels,
                        extents.width() as u32,
                        extents.height() as u32,
                    )
                    .unwrap(),
                )
                .unwrap();
        }
        let alpha_pixels = vec![alpha; len];
        layer
            .set_channel(
                PsdChannel::new(
                    PsdChannelKind::TransparencyMask,
                    PsdChannelCompression::RawData,
                    &alpha_pixels,
                    extents.width() as u32,
                    extents.height() as u32,
                )
                .unwrap(),
            )
            .unwrap();
        layer
    }

    fn full_rect() -> ChannelExtents {
        ChannelExtents::new(0, 0, DOC.1 as i32, DOC.0 as i32)
    }

    #[test]
    fn opaque_normal_layer_over_black_is_the_layer() {
        let layer = layer_with_fill("red", full_rect(), [200, 10, 60], 255);
        let layers = vec![Layer::Image(layer)];

        let mut canvas = Canvas::<u8>::new(ColorMode::Rgb, DOC.0, DOC.1).unwrap();
        composite_tree::<u8, f32>(&layers, &mut canvas, DOC).unwrap();

        assert!(canvas.channel(0).unwrap().iter().all(|p| *p == 200));
        assert!(canvas.channel(1).unwrap().iter().all(|p| *p == 10));
        assert!(canvas.channel(2).unwrap().iter().all(|p| *p == 60));
        assert!(canvas.alpha().iter().all(|p| *p == 255));
    }

    #[test]
    fn hidden_layers_are_skipped() {
        let mut layer = layer_with_fill("hidden", full_rect(), [255, 255, 255], 255);
        layer.properties.visible = false;
        let layers = vec![Layer::Image(layer)];

        let mut canvas = Canvas::<u8>::new(ColorMode::Rgb, DOC.0, DOC.1).unwrap();
        composite_tree::<u8, f32>(&layers, &mut canvas, DOC).unwrap();
        assert!(canvas.alpha().iter().all(|p| *p == 0));
    }

    #[test]
    fn layers_blend_bottom_to_top() {
        // Stored top-to-bottom: the white half-opacity layer sits above
        // the black opaque one.
        let mut top = layer_with_fill("top", full_rect(), [255, 255, 255], 255);
        top.properties.opacity = 128;
        let bottom = layer_with_fill("bottom", full_rect(), [0, 0, 0], 255);
        let layers = vec![Layer::Image(top), Layer::Image(bottom)];

        let mut canvas = Canvas::<u8>::new(ColorMode::Rgb, DOC.0, DOC.1).unwrap();
        composite_tree::<u8, f32>(&layers, &mut canvas, DOC).unwrap();

        let mid = canvas.channel(0).unwrap()[0];
        assert!((126..=130).contains(&mid), "expected ~50% gray, got {}", mid);
    }

    #[test]
    fn offset_layer_touches_only_its_rect() {
        let layer = layer_with_fill("patch", ChannelExtents::new(2, 2, 6, 6), [255, 0, 0], 255);
        let layers = vec![Layer::Image(layer)];

        let mut canvas = Canvas::<u8>::new(ColorMode::Rgb, DOC.0, DOC.1).unwrap();
        composite_tree::<u8, f32>(&layers, &mut canvas, DOC).unwrap();

        let red = canvas.channel(0).unwrap();
        let alpha = canvas.alpha();
        for y in 0..8usize {
            for x in 0..8usize {
                let inside = (2..6).contains(&x) && (2..6).contains(&y);
                assert_eq!(red[y * 8 + x] == 255, inside);
                assert_eq!(alpha[y * 8 + x] == 255, inside);
            }
        }
    }

    #[test]
    fn mask_with_black_default_hides_outside_its_rect() {
        let mut layer = layer_with_fill("masked", full_rect(), [255, 255, 255], 255);
        layer.properties.mask = Some(LayerMask::new(ChannelExtents::new(0, 0, 4, 8)));
        // Mask pixels fully opaque inside the top half.
        let mask_pixels = vec![255u8; 8 * 4];
        layer
            .set_channel(
                PsdChannel::new(
                    PsdChannelKind::UserSuppliedLayerMask,
                    PsdChannelCompression::RawData,
                    &mask_pixels,
                    8,
                    4,
                )
                .unwrap(),
            )
            .unwrap();
        let layers = vec![Layer::Image(layer)];

        let mut canvas = Canvas::<u8>::new(ColorMode::Rgb, DOC.0, DOC.1).unwrap();
        composite_tree::<u8, f32>(&layers, &mut canvas, DOC).unwrap();

        let alpha = canvas.alpha();
        for y in 0..8usize {
            for x in 0..8usize {
                assert_eq!(alpha[y * 8 + x] == 255, y < 4, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn multiply_darkens() {
        let mut top = layer_with_fill("top", full_rect(), [128, 128, 128], 255);
        top.properties.blend_mode = BlendMode::Multiply;
        let bottom = layer_with_fill("bottom", full_rect(), [128, 128, 128], 255);
        let layers = vec![Layer::Image(top), Layer::Image(bottom)];

        let mut canvas = Canvas::<u8>::new(ColorMode::Rgb, DOC.0, DOC.1).unwrap();
        composite_tree::<u8, f32>(&layers, &mut canvas, DOC).unwrap();

        // 0.502 * 0.502 = 0.252
        let out = canvas.channel(0).unwrap()[0];
        assert!((63..=65).contains(&out), "got {}", out);
    }

    #[test]
    fn group_opacity_applies_to_the_whole_subtree() {
        let child = layer_with_fill("child", full_rect(), [255, 255, 255], 255);
        let mut group = GroupLayer::new(LayerProperties::new("group"));
        group.properties.opacity = 128;
        group.children.push(Layer::Image(child));
        let layers = vec![Layer::Group(group)];

        let mut canvas = Canvas::<u8>::new(ColorMode::Rgb, DOC.0, DOC.1).unwrap();
        composite_tree::<u8, f32>(&layers, &mut canvas, DOC).unwrap();

        let alpha = canvas.alpha()[0];
        assert!((126..=130).contains(&alpha), "got {}", alpha);
    }

    #[test]
    fn passthrough_group_inlines_children() {
        let child = layer_with_fill("child", full_rect(), [9, 9, 9], 255);
        let mut group = GroupLayer::new(LayerProperties::new("pt"));
        group.properties.blend_mode = BlendMode::Passthrough;
        group.children.push(Layer::Image(child));
        let layers = vec![Layer::Group(group)];

        let mut canvas = Canvas::<u8>::new(ColorMode::Rgb, DOC.0, DOC.1).unwrap();
        composite_tree::<u8, f32>(&layers, &mut canvas, DOC).unwrap();
        assert!(canvas.channel(0).unwrap().iter().all(|p| *p == 9));
    }

    #[test]
    fn hsl_blend_requires_rgb() {
        let mut layer = layer_with_fill("hue", full_rect(), [10, 20, 30], 255);
        layer.properties.blend_mode = BlendMode::Hue;
        // Grayscale canvas with a single channel.
        let mut canvas = Canvas::<u8>::new(ColorMode::Grayscale, DOC.0, DOC.1).unwrap();
        let layers = vec![Layer::Image(layer)];

        assert!(matches!(
            composite_tree::<u8, f32>(&layers, &mut canvas, DOC),
            Err(PsdError::Unsupported(_))
        ));
    }

    #[test]
    fn f32_canvas_composites_exactly() {
        let mut properties = LayerProperties::new("float");
        properties.coordinates = generate_coordinates(full_rect(), DOC.0, DOC.1);
        let mut layer = ImageLayer::new(properties);
        let len = (DOC.0 * DOC.1) as usize;
        for index in 0..3u8 {
            let pixels = vec![0.25f32 * (index as f32 + 1.0); len];
            layer
                .set_channel(
                    PsdChannel::new(
                        PsdChannelKind::Color(index),
                        PsdChannelCompression::ZipWithPrediction,
                        &pixels,
                        DOC.0,
                        DOC.1,
                    )
                    .unwrap(),
                )
                .unwrap();
        }

        let mut canvas = Canvas::<f32>::new(ColorMode::Rgb, DOC.0, DOC.1).unwrap();
        composite_tree::<f32, f64>(&[Layer::Image(layer)], &mut canvas, DOC).unwrap();
        assert!(canvas.channel(1).unwrap().iter().all(|p| *p == 0.5));
    }
}
