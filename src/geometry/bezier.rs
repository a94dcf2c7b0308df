//! Tensor-product Bezier surfaces.
//!
//! A warp grid of `(4 + 3j) x (4 + 3k)` control points decomposes into
//! adjacent cubic patches of 4x4 points that share their edge rows and
//! columns. Evaluation picks the patch under `(u, v)`, rescales into the
//! patch-local parameters and runs De Casteljau twice.

use crate::error::{PsdError, Result};
use crate::geometry::mesh::QuadMesh;
use crate::geometry::{validate_patch_dimension, Point2D};

/// A surface of shared-edge cubic Bezier patches over a `u x v` control
/// grid.
#[derive(Debug, Clone, PartialEq)]
pub struct BezierSurface {
    patches: Vec<[Point2D; 16]>,
    grid_width: usize,
    grid_height: usize,
    num_patches_x: usize,
    num_patches_y: usize,
}

impl BezierSurface {
    /// Build a surface from control points in scanline order:
    ///
    /// ```text
    /// 1 2 3 4 5
    /// 6 7 8 9 10 ...
    /// ```
    ///
    /// `grid_width` and `grid_height` must both be of the form `4 + 3k`.
    pub fn new(
        control_points: &[Point2D],
        grid_width: usize,
        grid_height: usize,
    ) -> Result<BezierSurface> {
        if control_points.len() != grid_width * grid_height {
            return Err(PsdError::InvalidArgument(format!(
                "{} control points do not fill a {}x{} grid",
                control_points.len(),
                grid_width,
                grid_height
            )));
        }
        validate_patch_dimension(grid_width, "u")?;
        validate_patch_dimension(grid_height, "v")?;

        let num_patches_x = 1 + (grid_width - 4) / 3;
        let num_patches_y = 1 + (grid_height - 4) / 3;

        // Slice the grid into overlapping 4x4 windows, step 3, so adjacent
        // patches share an edge.
        let mut patches = Vec::with_capacity(num_patches_x * num_patches_y);
        for py in 0..num_patches_y {
            for px in 0..num_patches_x {
                let mut patch = [Point2D::default(); 16];
                for y in 0..4 {
                    for x in 0..4 {
                        let index = (py * 3 + y) * grid_width + (px * 3 + x);
                        patch[y * 4 + x] = control_points[index];
                    }
                }
                patches.push(patch);
            }
        }

        Ok(BezierSurface {
            patches,
            grid_width,
            grid_height,
            num_patches_x,
            num_patches_y,
        })
    }

    /// Evaluate the surface at `(u, v)` in `[0, 1]^2`.
    pub fn evaluate(&self, u: f64, v: f64) -> Point2D {
        let patch_size_u = 1.0 / self.num_patches_x as f64;
        let patch_size_v = 1.0 / self.num_patches_y as f64;

        // u or v of exactly 1.0 falls into the last patch.
        let patch_x = ((u / patch_size_u).floor() as usize).min(self.num_patches_x - 1);
        let patch_y = ((v / patch_size_v).floor() as usize).min(self.num_patches_y - 1);

        let local_u = ((u - patch_x as f64 * patch_size_u) / patch_size_u).clamp(0.0, 1.0);
        let local_v = ((v - patch_y as f64 * patch_size_v) / patch_size_v).clamp(0.0, 1.0);

        let patch = &self.patches[patch_y * self.num_patches_x + patch_x];
        evaluate_bezier_patch(patch, local_u, local_v)
    }

    /// Sample the surface on a `divisions_x x divisions_y` lattice and bake
    /// the result into a quad mesh, pushing every sample through
    /// `non_affine_transform` (the unit quad leaves samples untouched).
    pub fn mesh(
        &self,
        divisions_x: usize,
        divisions_y: usize,
        non_affine_transform: [Point2D; 4],
    ) -> Result<QuadMesh> {
        let mut points = Vec::with_capacity(divisions_x * divisions_y);
        for y in 0..divisions_y {
            let v = y as f64 / (divisions_y - 1) as f64;
            for x in 0..divisions_x {
                let u = x as f64 / (divisions_x - 1) as f64;
                points.push(self.evaluate(u, v));
            }
        }
        QuadMesh::new_transformed(points, non_affine_transform, divisions_x, divisions_y)
    }

    /// The 4x4 cubic patches in scanline order.
    pub fn patches(&self) -> &[[Point2D; 16]] {
        &self.patches
    }

    /// Number of control points across the u axis.
    pub fn grid_width(&self) -> usize {
        self.grid_width
    }

    /// Number of control points across the v axis.
    pub fn grid_height(&self) -> usize {
        self.grid_height
    }

    /// The uniform control grid spanning `width x height`: the surface that
    /// maps `(u, v)` linearly onto the rectangle.
    pub fn identity_grid(
        grid_width: usize,
        grid_height: usize,
        width: f64,
        height: f64,
    ) -> Vec<Point2D> {
        let mut points = Vec::with_capacity(grid_width * grid_height);
        for y in 0..grid_height {
            let py = height * y as f64 / (grid_height - 1) as f64;
            for x in 0..grid_width {
                let px = width * x as f64 / (grid_width - 1) as f64;
                points.push(Point2D::new(px, py));
            }
        }
        points
    }
}

/// Evaluate a 4x4 patch with De Casteljau: four cubic curves across `u`,
/// then one cubic across `v` through their results.
fn evaluate_bezier_patch(patch: &[Point2D; 16], u: f64, v: f64) -> Point2D {
    let curves = [
        evaluate_bezier_curve([patch[0], patch[1], patch[2], patch[3]], u),
        evaluate_bezier_curve([patch[4], patch[5], patch[6], patch[7]], u),
        evaluate_bezier_curve([patch[8], patch[9], patch[10], patch[11]], u),
        evaluate_bezier_curve([patch[12], patch[13], patch[14], patch[15]], u),
    ];
    evaluate_bezier_curve(curves, v)
}

/// Evaluate a cubic Bezier curve at parameter t using De Casteljau's algorithm.
fn evaluate_bezier_curve(points: [Point2D; 4], t: f64) -> Point2D {
    let a = Point2D::lerp(points[0], points[1], t);
    let b = Point2D::lerp(points[1], points[2], t);
    let c = Point2D::lerp(points[2], points[3], t);

    let d = Point2D::lerp(a, b, t);
    let e = Point2D::lerp(b, c, t);

    Point2D::lerp(d, e, t)
}
