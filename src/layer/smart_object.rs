//! Smart-object layers and their warp.
//!
//! A smart object renders a linked source file into its extent through
//! three layered transforms, applied in source-space order: the Bezier
//! surface, the affine quad and the non-affine (perspective) quad. The
//! layer itself stores only the content hash of its source; the bytes live
//! in the document's linked-layer store.

use crate::descriptor::{Descriptor, DescriptorField};
use crate::error::{PsdError, Result};
use crate::geometry::transform::unit_quad;
use crate::geometry::{BezierSurface, Homography, Point2D, QuadMesh};
use crate::layer::LayerProperties;
use crate::psd_channel::PsdChannel;
use crate::tagged_block::PlacedLayerData;

/// The warp of a smart object: a Bezier control grid plus two transform
/// quads in normalized source coordinates (the unit quad is the identity
/// for both).
#[derive(Debug, Clone, PartialEq)]
pub struct SmartObjectWarp {
    /// Control points in scanline order, in source pixel coordinates.
    points: Vec<Point2D>,
    u_dims: usize,
    v_dims: usize,
    /// The affine step as a parallelogram quad (tl, tr, bl, br).
    affine: [Point2D; 4],
    /// The perspective step as a free quad (tl, tr, bl, br).
    non_affine: [Point2D; 4],
    /// Dimensions of the source asset the warp resamples.
    source_width: f64,
    source_height: f64,
}

impl SmartObjectWarp {
    /// The identity warp over a `source_width x source_height` asset: a
    /// uniform 4x4 lattice and identity transforms.
    pub fn identity(source_width: f64, source_height: f64) -> SmartObjectWarp {
        SmartObjectWarp {
            points: BezierSurface::identity_grid(4, 4, source_width, source_height),
            u_dims: 4,
            v_dims: 4,
            affine: unit_quad(),
            non_affine: unit_quad(),
            source_width,
            source_height,
        }
    }

    /// A warp from explicit control points in scanline order. Grid
    /// dimensions must be `4 + 3k` on both axes.
    pub fn new(
        points: Vec<Point2D>,
        u_dims: usize,
        v_dims: usize,
        source_width: f64,
        source_height: f64,
    ) -> Result<SmartObjectWarp> {
        // Surface construction validates the dimensions and point count.
        BezierSurface::new(&points, u_dims, v_dims)?;
        Ok(SmartObjectWarp {
            points,
            u_dims,
            v_dims,
            affine: unit_quad(),
            non_affine: unit_quad(),
            source_width,
            source_height,
        })
    }

    /// The control points in scanline order.
    pub fn points(&self) -> &[Point2D] {
        &self.points
    }

    /// Replace the control points, keeping the grid dimensions.
    pub fn set_points(&mut self, points: Vec<Point2D>) -> Result<()> {
        BezierSurface::new(&points, self.u_dims, self.v_dims)?;
        self.points = points;
        Ok(())
    }

    /// Grid divisions across u.
    pub fn u_dims(&self) -> usize {
        self.u_dims
    }

    /// Grid divisions across v.
    pub fn v_dims(&self) -> usize {
        self.v_dims
    }

    /// Source asset dimensions.
    pub fn source_dimensions(&self) -> (f64, f64) {
        (self.source_width, self.source_height)
    }

    /// The affine quad (tl, tr, bl, br) in normalized source coordinates.
    pub fn affine_quad(&self) -> [Point2D; 4] {
        self.affine
    }

    /// Set the affine quad. The bottom-right corner is implied by the
    /// other three (a parallelogram); a quad that disagrees with its
    /// implied corner is refused, that deformation belongs in the
    /// non-affine quad.
    pub fn set_affine_quad(&mut self, quad: [Point2D; 4]) -> Result<()> {
        let implied = quad[1] + quad[2] - quad[0];
        if implied.distance(quad[3]) > 1e-6 {
            return Err(PsdError::InvalidArgument(
                "affine quad must be a parallelogram; use the non-affine quad for perspective"
                    .into(),
            ));
        }
        self.affine = quad;
        Ok(())
    }

    /// The non-affine quad (tl, tr, bl, br) in normalized source
    /// coordinates.
    pub fn non_affine_quad(&self) -> [Point2D; 4] {
        self.non_affine
    }

    /// Set the non-affine quad.
    pub fn set_non_affine_quad(&mut self, quad: [Point2D; 4]) {
        self.non_affine = quad;
    }

    /// Restore the Bezier grid to the identity surface (linear in u and
    /// v). The affine and non-affine transforms are preserved.
    pub fn reset_warp(&mut self) {
        self.points = BezierSurface::identity_grid(
            self.u_dims,
            self.v_dims,
            self.source_width,
            self.source_height,
        );
    }

    /// Restore both transform quads to the identity unit quad. The Bezier
    /// grid is preserved.
    pub fn reset_transform(&mut self) {
        self.affine = unit_quad();
        self.non_affine = unit_quad();
    }

    /// Whether evaluating this warp would be the identity: control points
    /// on the uniform lattice and both transforms the unit quad.
    pub fn no_op(&self) -> bool {
        if self.affine != unit_quad() || self.non_affine != unit_quad() {
            return false;
        }
        let identity = BezierSurface::identity_grid(
            self.u_dims,
            self.v_dims,
            self.source_width,
            self.source_height,
        );
        self.points
            .iter()
            .zip(&identity)
            .all(|(point, expected)| point.distance(*expected) < 1e-6)
    }

    /// The Bezier surface over the current control grid.
    pub fn surface(&self) -> Result<BezierSurface> {
        BezierSurface::new(&self.points, self.u_dims, self.v_dims)
    }

    /// The combined affine-then-perspective transform in source pixel
    /// coordinates.
    fn transform(&self) -> Result<Homography> {
        let normalize = Homography::from_matrix([
            1.0 / self.source_width.max(f64::MIN_POSITIVE),
            0.0,
            0.0,
            0.0,
            1.0 / self.source_height.max(f64::MIN_POSITIVE),
            0.0,
            0.0,
            0.0,
            1.0,
        ]);
        let denormalize = Homography::from_matrix([
            self.source_width,
            0.0,
            0.0,
            0.0,
            self.source_height,
            0.0,
            0.0,
            0.0,
            1.0,
        ]);

        let affine = Homography::from_quad_to_quad(unit_quad(), self.affine)?;
        let non_affine = Homography::from_quad_to_quad(self.affine, self.non_affine)?;

        // normalize, affine, perspective, back to pixels.
        Ok(denormalize.then(&non_affine.then(&affine.then(&normalize))))
    }

    /// Sample the surface on a `divisions_x x divisions_y` lattice, push
    /// the samples through the transforms and bake the result into a
    /// queryable mesh.
    pub fn bake_mesh(&self, divisions_x: usize, divisions_y: usize) -> Result<QuadMesh> {
        if divisions_x < 2 || divisions_y < 2 {
            return Err(PsdError::InvalidArgument(
                "a warp mesh needs at least 2 divisions per axis".into(),
            ));
        }

        let surface = self.surface()?;
        let transform = self.transform()?;

        let mut points = Vec::with_capacity(divisions_x * divisions_y);
        for y in 0..divisions_y {
            let v = y as f64 / (divisions_y - 1) as f64;
            for x in 0..divisions_x {
                let u = x as f64 / (divisions_x - 1) as f64;
                points.push(transform.apply(surface.evaluate(u, v)));
            }
        }

        QuadMesh::new(points, divisions_x, divisions_y)
    }

    /// Persist the warp as the descriptor stored in `SoLd`/`PlLd`.
    pub fn to_descriptor(&self) -> Descriptor {
        let mut descriptor = Descriptor::new(b"warp");
        descriptor.insert("uDms", DescriptorField::Integer(self.u_dims as i32));
        descriptor.insert("vDms", DescriptorField::Integer(self.v_dims as i32));

        descriptor.insert("mPts", point_list(&self.points));
        descriptor.insert("nonA", point_list(&self.non_affine));

        // The affine step is stored as its 3x3 matrix; the quad is
        // reconstructed from the matrix's image of the unit corners.
        let affine_matrix = [
            self.affine[1].x - self.affine[0].x,
            self.affine[2].x - self.affine[0].x,
            self.affine[0].x,
            self.affine[1].y - self.affine[0].y,
            self.affine[2].y - self.affine[0].y,
            self.affine[0].y,
            0.0,
            0.0,
            1.0,
        ];
        descriptor.insert(
            "Trnf",
            DescriptorField::List(affine_matrix.iter().map(|v| DescriptorField::Double(*v)).collect()),
        );

        descriptor.insert("srcW", DescriptorField::Double(self.source_width));
        descriptor.insert("srcH", DescriptorField::Double(self.source_height));
        descriptor
    }

    /// Rebuild a warp from its persisted descriptor.
    pub fn from_descriptor(descriptor: &Descriptor) -> Result<SmartObjectWarp> {
        let u_dims = match descriptor.get("uDms") {
            Some(DescriptorField::Integer(value)) => *value as usize,
            _ => return Err(missing("uDms")),
        };
        let v_dims = match descriptor.get("vDms") {
            Some(DescriptorField::Integer(value)) => *value as usize,
            _ => return Err(missing("vDms")),
        };

        let points = read_point_list(descriptor.get("mPts").ok_or_else(|| missing("mPts"))?)?;
        let non_affine_points =
            read_point_list(descriptor.get("nonA").ok_or_else(|| missing("nonA"))?)?;
        let non_affine: [Point2D; 4] = non_affine_points
            .try_into()
            .map_err(|_| PsdError::StructuralError("non-affine quad needs 4 points".into()))?;

        let matrix = match descriptor.get("Trnf") {
            Some(DescriptorField::List(items)) if items.len() == 9 => {
                let mut matrix = [0.0; 9];
                for (slot, item) in matrix.iter_mut().zip(items) {
                    *slot = match item {
                        DescriptorField::Double(value) => *value,
                        _ => return Err(missing("Trnf")),
                    };
                }
                matrix
            }
            _ => return Err(missing("Trnf")),
        };
        let transform = Homography::from_matrix(matrix);
        let affine = [
            transform.apply(Point2D::new(0.0, 0.0)),
            transform.apply(Point2D::new(1.0, 0.0)),
            transform.apply(Point2D::new(0.0, 1.0)),
            transform.apply(Point2D::new(1.0, 1.0)),
        ];

        let source_width = descriptor.get_f64("srcW").ok_or_else(|| missing("srcW"))?;
        let source_height = descriptor.get_f64("srcH").ok_or_else(|| missing("srcH"))?;

        let mut warp = SmartObjectWarp::new(points, u_dims, v_dims, source_width, source_height)?;
        warp.affine = affine;
        warp.non_affine = non_affine;
        Ok(warp)
    }
}

fn missing(key: &str) -> PsdError {
    PsdError::StructuralError(format!("warp descriptor is missing field '{}'", key))
}

fn point_list(points: &[Point2D]) -> DescriptorField {
    DescriptorField::List(
        points
            .iter()
            .map(|point| {
                let mut entry = Descriptor::new(b"Pnt ");
                entry.insert("Hrzn", DescriptorField::Double(point.x));
                entry.insert("Vrtc", DescriptorField::Double(point.y));
                DescriptorField::Descriptor(entry)
            })
            .collect(),
    )
}

fn read_point_list(field: &DescriptorField) -> Result<Vec<Point2D>> {
    let items = match field {
        DescriptorField::List(items) => items,
        _ => return Err(PsdError::StructuralError("expected a point list".into())),
    };
    items
        .iter()
        .map(|item| match item {
            DescriptorField::Descriptor(entry) => {
                let x = entry
                    .get_f64("Hrzn")
                    .ok_or_else(|| missing("Hrzn"))?;
                let y = entry
                    .get_f64("Vrtc")
                    .ok_or_else(|| missing("Vrtc"))?;
                Ok(Point2D::new(x, y))
            }
            _ => Err(PsdError::StructuralError(
                "point list entries must be descriptors".into(),
            )),
        })
        .collect()
}

/// A placed layer: rendered channels for compositing, the source hash into
/// the linked-layer store, and the warp that produced the render.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartObjectLayer {
    /// Shared layer properties
    pub properties: LayerProperties,
    /// The rendered (post-warp) channels, composited like a raster layer
    pub(crate) channels: Vec<PsdChannel>,
    /// Content hash into the document's linked-layer store
    pub hash: String,
    /// Width of the source asset
    pub original_width: u32,
    /// Height of the source asset
    pub original_height: u32,
    /// The warp applied to the source
    pub warp: SmartObjectWarp,
}

impl SmartObjectLayer {
    /// A smart object referencing a stored source by hash, with an
    /// identity warp.
    pub fn new(
        properties: LayerProperties,
        hash: impl Into<String>,
        original_width: u32,
        original_height: u32,
    ) -> SmartObjectLayer {
        SmartObjectLayer {
            properties,
            channels: Vec::new(),
            hash: hash.into(),
            original_width,
            original_height,
            warp: SmartObjectWarp::identity(original_width as f64, original_height as f64),
        }
    }

    /// The rendered channels.
    pub fn channels(&self) -> &[PsdChannel] {
        &self.channels
    }

    /// Insert a rendered channel, replacing any existing channel of the
    /// same kind.
    pub fn set_channel(&mut self, channel: PsdChannel) {
        match self
            .channels
            .iter_mut()
            .find(|existing| existing.kind() == channel.kind())
        {
            Some(slot) => *slot = channel,
            None => self.channels.push(channel),
        }
    }

    pub(crate) fn channels_mut(&mut self) -> &mut Vec<PsdChannel> {
        &mut self.channels
    }

    /// Persist the placement (hash, source dimensions, warp) as the
    /// `SoLd` payload.
    pub(crate) fn to_placed_data(&self) -> PlacedLayerData {
        let mut descriptor = self.warp.to_descriptor();
        descriptor.insert("Idnt", DescriptorField::String(self.hash.clone()));
        descriptor.insert(
            "orgW",
            DescriptorField::Integer(self.original_width as i32),
        );
        descriptor.insert(
            "orgH",
            DescriptorField::Integer(self.original_height as i32),
        );
        PlacedLayerData::new(descriptor)
    }

    /// Rebuild placement state from a parsed `SoLd`/`PlLd` payload.
    pub(crate) fn apply_placed_data(&mut self, placed: &PlacedLayerData) -> Result<()> {
        self.warp = SmartObjectWarp::from_descriptor(&placed.descriptor)?;
        if let Some(DescriptorField::String(hash)) = placed.descriptor.get("Idnt") {
            self.hash = hash.clone();
        }
        if let Some(DescriptorField::Integer(width)) = placed.descriptor.get("orgW") {
            self.original_width = *width as u32;
        }
        if let Some(DescriptorField::Integer(height)) = placed.descriptor.get("orgH") {
            self.original_height = *height as u32;
        }
        Ok(())
    }
}
