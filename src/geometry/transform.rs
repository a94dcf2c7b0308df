//! Projective transforms between quads.
//!
//! A warp's affine and non-affine steps are both stored as four-point quads;
//! the mapping between two quads is the homography solving the eight point
//! correspondences. The solve is a direct Gaussian elimination of the 8x8
//! system, small enough that no linear-algebra dependency is warranted.

use crate::error::{PsdError, Result};
use crate::geometry::Point2D;

/// A 3x3 projective transform in row-major order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    m: [f64; 9],
}

impl Homography {
    /// The identity transform.
    pub fn identity() -> Homography {
        Homography {
            m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Wrap an affine 3x3 matrix (last row `0 0 1`) given in row-major
    /// order.
    pub fn from_matrix(m: [f64; 9]) -> Homography {
        Homography { m }
    }

    /// Row-major matrix entries.
    pub fn matrix(&self) -> [f64; 9] {
        self.m
    }

    /// The homography mapping each `source[i]` onto `destination[i]`.
    ///
    /// Quads are in the order top-left, top-right, bottom-left,
    /// bottom-right. Fails when the correspondences are degenerate
    /// (collinear points, repeated corners).
    pub fn from_quad_to_quad(
        source: [Point2D; 4],
        destination: [Point2D; 4],
    ) -> Result<Homography> {
        // Build the standard 8x8 direct linear system for h00..h21 with
        // h22 fixed to 1.
        let mut system = [[0.0f64; 9]; 8];
        for i in 0..4 {
            let (sx, sy) = (source[i].x, source[i].y);
            let (dx, dy) = (destination[i].x, destination[i].y);

            system[i * 2] = [sx, sy, 1.0, 0.0, 0.0, 0.0, -sx * dx, -sy * dx, dx];
            system[i * 2 + 1] = [0.0, 0.0, 0.0, sx, sy, 1.0, -sx * dy, -sy * dy, dy];
        }

        let solution = solve_8x8(&mut system)?;

        Ok(Homography {
            m: [
                solution[0],
                solution[1],
                solution[2],
                solution[3],
                solution[4],
                solution[5],
                solution[6],
                solution[7],
                1.0,
            ],
        })
    }

    /// Apply the transform to a point.
    pub fn apply(&self, point: Point2D) -> Point2D {
        let m = &self.m;
        let w = m[6] * point.x + m[7] * point.y + m[8];
        // A degenerate w projects to infinity; keep the point finite and
        // let the mesh query reject it.
        let w = if w.abs() < 1e-12 { 1e-12 } else { w };
        Point2D::new(
            (m[0] * point.x + m[1] * point.y + m[2]) / w,
            (m[3] * point.x + m[4] * point.y + m[5]) / w,
        )
    }

    /// Compose: the transform applying `other` first and `self` second.
    pub fn then(&self, other: &Homography) -> Homography {
        let first = &other.m;
        let second = &self.m;
        let mut m = [0.0; 9];
        for row in 0..3 {
            for col in 0..3 {
                m[row * 3 + col] = (0..3)
                    .map(|k| second[row * 3 + k] * first[k * 3 + col])
                    .sum();
            }
        }
        Homography { m }
    }
}

/// Gaussian elimination with partial pivoting over an augmented 8x9 system.
fn solve_8x8(system: &mut [[f64; 9]; 8]) -> Result<[f64; 8]> {
    for col in 0..8 {
        let pivot_row = (col..8)
            .max_by(|a, b| {
                system[*a][col]
                    .abs()
                    .partial_cmp(&system[*b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);

        if system[pivot_row][col].abs() < 1e-12 {
            return Err(PsdError::InvalidArgument(
                "degenerate quad correspondence, no projective transform exists".into(),
            ));
        }
        system.swap(col, pivot_row);

        let pivot = system[col][col];
        for row in 0..8 {
            if row == col {
                continue;
            }
            let factor = system[row][col] / pivot;
            for k in col..9 {
                system[row][k] -= factor * system[col][k];
            }
        }
    }

    let mut solution = [0.0; 8];
    for (i, value) in solution.iter_mut().enumerate() {
        *value = system[i][8] / system[i][i];
    }
    Ok(solution)
}

/// The unit quad in top-left, top-right, bottom-left, bottom-right order.
pub(crate) fn unit_quad() -> [Point2D; 4] {
    [
        Point2D::new(0.0, 0.0),
        Point2D::new(1.0, 0.0),
        Point2D::new(0.0, 1.0),
        Point2D::new(1.0, 1.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2D, b: Point2D) {
        assert!(
            a.distance(b) < 1e-9,
            "expected {:?} to be close to {:?}",
            a,
            b
        );
    }

    #[test]
    fn identity_maps_unit_quad_onto_itself() {
        let h = Homography::from_quad_to_quad(unit_quad(), unit_quad()).unwrap();
        for corner in unit_quad() {
            assert_close(h.apply(corner), corner);
        }
        assert_close(
            h.apply(Point2D::new(0.25, 0.75)),
            Point2D::new(0.25, 0.75),
        );
    }

    #[test]
    fn affine_case_scales_and_translates() {
        let destination = [
            Point2D::new(10.0, 20.0),
            Point2D::new(30.0, 20.0),
            Point2D::new(10.0, 60.0),
            Point2D::new(30.0, 60.0),
        ];
        let h = Homography::from_quad_to_quad(unit_quad(), destination).unwrap();
        assert_close(h.apply(Point2D::new(0.5, 0.5)), Point2D::new(20.0, 40.0));
    }

    #[test]
    fn perspective_case_maps_all_corners() {
        let destination = [
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.1),
            Point2D::new(0.1, 1.0),
            Point2D::new(0.9, 0.9),
        ];
        let h = Homography::from_quad_to_quad(unit_quad(), destination).unwrap();
        for (src, dst) in unit_quad().into_iter().zip(destination) {
            assert_close(h.apply(src), dst);
        }
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        let collapsed = [
            Point2D::new(0.0, 0.0),
            Point2D::new(0.0, 0.0),
            Point2D::new(0.0, 1.0),
            Point2D::new(0.0, 1.0),
        ];
        assert!(Homography::from_quad_to_quad(unit_quad(), collapsed).is_err());
    }

    #[test]
    fn composition_applies_in_order() {
        let scale = Homography::from_matrix([2.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 1.0]);
        let translate = Homography::from_matrix([1.0, 0.0, 5.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0]);

        // scale first, then translate
        let composed = translate.then(&scale);
        assert_close(
            composed.apply(Point2D::new(1.0, 1.0)),
            Point2D::new(7.0, 1.0),
        );
    }
}
