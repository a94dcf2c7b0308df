//! The rendering surface the compositor and warp engine depend on.
//!
//! A renderer resamples a source channel through a baked warp mesh into a
//! destination channel. The interface is the pluggable seam: the CPU
//! backend lives here, a GPU backend would slot in as another variant
//! without touching the engines above it.

use rayon::prelude::*;

use crate::error::Result;
use crate::geometry::{Point2D, QuadMesh};
use crate::pixel::Pixel;

pub(crate) mod blend;
pub(crate) mod compositor;

pub use blend::Precision;
pub use compositor::Canvas;

/// How the source image is sampled at fractional UVs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterMode {
    /// Nearest neighbor
    Nearest,
    /// 4-tap bilinear
    #[default]
    Bilinear,
    /// 16-tap Catmull-Rom bicubic
    Bicubic,
}

/// One channel's pixels with their dimensions, the unit renderers work in.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane<T: Pixel> {
    /// Scanline-ordered pixels, `width * height` of them
    pub pixels: Vec<T>,
    #[allow(missing_docs)]
    pub width: u32,
    #[allow(missing_docs)]
    pub height: u32,
}

impl<T: Pixel> Plane<T> {
    /// An all-zero plane.
    pub fn new(width: u32, height: u32) -> Plane<T> {
        Plane {
            pixels: vec![T::ZERO; width as usize * height as usize],
            width,
            height,
        }
    }

    /// Wrap existing pixels.
    pub fn from_pixels(pixels: Vec<T>, width: u32, height: u32) -> Plane<T> {
        debug_assert_eq!(pixels.len(), width as usize * height as usize);
        Plane {
            pixels,
            width,
            height,
        }
    }

    fn get_clamped(&self, x: i64, y: i64) -> f64 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.pixels[y * self.width as usize + x].to_unit_f64()
    }
}

/// The pluggable rendering backend.
///
/// Only the CPU variant ships with the engine; the enum is the seam a GPU
/// implementation would extend.
#[derive(Debug)]
pub enum Renderer {
    /// Rayon-parallel scanline renderer
    Cpu(CpuRenderer),
}

impl Default for Renderer {
    fn default() -> Renderer {
        Renderer::Cpu(CpuRenderer)
    }
}

impl Renderer {
    /// Prepare the backend. The CPU backend has nothing to set up.
    pub fn init(&mut self) -> Result<()> {
        match self {
            Renderer::Cpu(_) => Ok(()),
        }
    }

    /// Resample `src` into `dst` through `mesh`.
    ///
    /// For every destination pixel the mesh answers which source UV it
    /// maps to; pixels outside the mesh keep their current value.
    pub fn render_quad_mesh<T: Pixel>(
        &self,
        dst: &mut Plane<T>,
        src: &Plane<T>,
        mesh: &QuadMesh,
        filter: FilterMode,
    ) -> Result<()> {
        match self {
            Renderer::Cpu(cpu) => cpu.render_quad_mesh(dst, src, mesh, filter),
        }
    }
}

/// The scanline-parallel CPU backend.
#[derive(Debug, Default)]
pub struct CpuRenderer;

impl CpuRenderer {
    fn render_quad_mesh<T: Pixel>(
        &self,
        dst: &mut Plane<T>,
        src: &Plane<T>,
        mesh: &QuadMesh,
        filter: FilterMode,
    ) -> Result<()> {
        let width = dst.width as usize;
        dst.pixels
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row.iter_mut().enumerate() {
                    // Sample at the pixel center.
                    let position = Point2D::new(x as f64 + 0.5, y as f64 + 0.5);
                    if let Some(uv) = mesh.uv_coordinate(position) {
                        let sx = uv.x * (src.width.max(1) - 1) as f64;
                        let sy = uv.y * (src.height.max(1) - 1) as f64;
                        *pixel = T::from_unit_f64(sample(src, sx, sy, filter));
                    }
                }
            });
        Ok(())
    }
}

fn sample<T: Pixel>(src: &Plane<T>, x: f64, y: f64, filter: FilterMode) -> f64 {
    match filter {
        FilterMode::Nearest => src.get_clamped(x.round() as i64, y.round() as i64),
        FilterMode::Bilinear => {
            let x0 = x.floor();
            let y0 = y.floor();
            let fx = x - x0;
            let fy = y - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);

            let top = src.get_clamped(x0, y0) * (1.0 - fx) + src.get_clamped(x0 + 1, y0) * fx;
            let bottom =
                src.get_clamped(x0, y0 + 1) * (1.0 - fx) + src.get_clamped(x0 + 1, y0 + 1) * fx;
            top * (1.0 - fy) + bottom * fy
        }
        FilterMode::Bicubic => {
            let x0 = x.floor() as i64;
            let y0 = y.floor() as i64;
            let fx = x - x.floor();
            let fy = y - y.floor();

            let mut rows = [0.0f64; 4];
            for (i, row) in rows.iter_mut().enumerate() {
                let sy = y0 + i as i64 - 1;
                *row = catmull_rom(
                    src.get_clamped(x0 - 1, sy),
                    src.get_clamped(x0, sy),
                    src.get_clamped(x0 + 1, sy),
                    src.get_clamped(x0 + 2, sy),
                    fx,
                );
            }
            catmull_rom(rows[0], rows[1], rows[2], rows[3], fy).clamp(0.0, 1.0)
        }
    }
}

fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let a = -0.5 * p0 + 1.5 * p1 - 1.5 * p2 + 0.5 * p3;
    let b = p0 - 2.5 * p1 + 2.0 * p2 - 0.5 * p3;
    let c = -0.5 * p0 + 0.5 * p2;
    a * t * t * t + b * t * t + c * t + p1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::SmartObjectWarp;

    fn gradient_plane(width: u32, height: u32) -> Plane<u8> {
        let pixels = (0..width * height)
            .map(|i| ((i % width) * 255 / (width - 1).max(1)) as u8)
            .collect();
        Plane::from_pixels(pixels, width, height)
    }

    #[test]
    fn identity_warp_reproduces_the_source() {
        let src = gradient_plane(32, 32);
        let mesh = SmartObjectWarp::identity(32.0, 32.0).bake_mesh(9, 9).unwrap();

        let mut dst = Plane::<u8>::new(32, 32);
        let renderer = Renderer::default();
        renderer
            .render_quad_mesh(&mut dst, &src, &mesh, FilterMode::Bilinear)
            .unwrap();

        // Interior pixels resample to within a rounding step of the
        // source gradient.
        for y in 1..31usize {
            for x in 1..31usize {
                let expected = src.pixels[y * 32 + x] as i32;
                let actual = dst.pixels[y * 32 + x] as i32;
                assert!(
                    (expected - actual).abs() <= 5,
                    "pixel ({}, {}): {} vs {}",
                    x,
                    y,
                    actual,
                    expected
                );
            }
        }
    }

    #[test]
    fn pixels_outside_the_mesh_are_untouched() {
        let src = gradient_plane(16, 16);
        // The mesh only covers the left half of the destination.
        let mesh = SmartObjectWarp::identity(8.0, 16.0).bake_mesh(5, 5).unwrap();

        let mut dst = Plane::from_pixels(vec![7u8; 16 * 16], 16, 16);
        let renderer = Renderer::default();
        renderer
            .render_quad_mesh(&mut dst, &src, &mesh, FilterMode::Nearest)
            .unwrap();

        for y in 0..16usize {
            assert_eq!(dst.pixels[y * 16 + 15], 7, "row {} right edge", y);
        }
    }

    #[test]
    fn filters_agree_on_integer_sample_points() {
        let src = gradient_plane(16, 1);
        for filter in [FilterMode::Nearest, FilterMode::Bilinear, FilterMode::Bicubic] {
            let value = sample(&src, 8.0, 0.0, filter);
            let expected = src.pixels[8].to_unit_f64();
            assert!(
                (value - expected).abs() < 1e-9,
                "{:?}: {} vs {}",
                filter,
                value,
                expected
            );
        }
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let src = Plane::from_pixels(vec![0u8, 255], 2, 1);
        let value = sample(&src, 0.5, 0.0, FilterMode::Bilinear);
        assert!((value - 0.5).abs() < 0.01);
    }
}
