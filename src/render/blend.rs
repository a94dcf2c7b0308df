//! The blend kernels.
//!
//! Every kernel is defined at the compositor's working precision over
//! `[0, 1]`; integer channels are scaled into the unit interval before the
//! kernel runs and rounded back afterwards. The HSL family operates on the
//! full color triple rather than per-channel and therefore requires an RGB
//! working space.
//!
//! Formulas follow the W3C compositing specification, which matches
//! Photoshop for these modes: <https://www.w3.org/TR/compositing-1/>

use std::ops::{Add, Div, Mul, Sub};

use crate::blend_mode::BlendMode;
use crate::error::{PsdError, Result};

/// The compositor's working float type: `f32` or `f64`.
pub trait Precision:
    Copy
    + Send
    + Sync
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    #[allow(missing_docs)]
    const ZERO: Self;
    #[allow(missing_docs)]
    const ONE: Self;
    #[allow(missing_docs)]
    const HALF: Self;

    #[allow(missing_docs)]
    fn from_f64(value: f64) -> Self;
    #[allow(missing_docs)]
    fn to_f64(self) -> f64;
    #[allow(missing_docs)]
    fn min(self, other: Self) -> Self;
    #[allow(missing_docs)]
    fn max(self, other: Self) -> Self;
    #[allow(missing_docs)]
    fn abs(self) -> Self;
    #[allow(missing_docs)]
    fn sqrt(self) -> Self;

    /// Clamp into the unit interval.
    fn clamp01(self) -> Self {
        self.max(Self::ZERO).min(Self::ONE)
    }
}

impl Precision for f32 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const HALF: Self = 0.5;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn min(self, other: Self) -> Self {
        f32::min(self, other)
    }

    fn max(self, other: Self) -> Self {
        f32::max(self, other)
    }

    fn abs(self) -> Self {
        f32::abs(self)
    }

    fn sqrt(self) -> Self {
        f32::sqrt(self)
    }
}

impl Precision for f64 {
    const ZERO: Self = 0.0;
    const ONE: Self = 1.0;
    const HALF: Self = 0.5;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn min(self, other: Self) -> Self {
        f64::min(self, other)
    }

    fn max(self, other: Self) -> Self {
        f64::max(self, other)
    }

    fn abs(self) -> Self {
        f64::abs(self)
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
}

/// A blend mode's kernel: per-channel, or over the whole RGB triple for
/// the non-separable family.
pub(crate) enum BlendKernel<P: Precision> {
    /// Applied independently per color channel
    Separable(fn(P, P) -> P),
    /// Applied to the full `[r, g, b]` triple; requires an RGB canvas
    NonSeparable(fn([P; 3], [P; 3]) -> [P; 3]),
}

/// The kernel for `mode`.
///
/// `Passthrough` never reaches a kernel (the compositor inlines those
/// groups) and `Dissolve` is not implemented.
pub(crate) fn kernel_for<P: Precision>(mode: BlendMode) -> Result<BlendKernel<P>> {
    let kernel = match mode {
        BlendMode::Passthrough => {
            return Err(PsdError::InvalidArgument(
                "passthrough is only meaningful on groups".into(),
            ))
        }
        BlendMode::Dissolve => {
            return Err(PsdError::Unsupported(
                "the dissolve blend mode is not implemented".into(),
            ))
        }
        BlendMode::Normal => BlendKernel::Separable(normal),
        BlendMode::Darken => BlendKernel::Separable(darken),
        BlendMode::Multiply => BlendKernel::Separable(multiply),
        BlendMode::ColorBurn => BlendKernel::Separable(color_burn),
        BlendMode::LinearBurn => BlendKernel::Separable(linear_burn),
        BlendMode::Lighten => BlendKernel::Separable(lighten),
        BlendMode::Screen => BlendKernel::Separable(screen),
        BlendMode::ColorDodge => BlendKernel::Separable(color_dodge),
        BlendMode::LinearDodge => BlendKernel::Separable(linear_dodge),
        BlendMode::Overlay => BlendKernel::Separable(overlay),
        BlendMode::SoftLight => BlendKernel::Separable(soft_light),
        BlendMode::HardLight => BlendKernel::Separable(hard_light),
        BlendMode::VividLight => BlendKernel::Separable(vivid_light),
        BlendMode::LinearLight => BlendKernel::Separable(linear_light),
        BlendMode::PinLight => BlendKernel::Separable(pin_light),
        BlendMode::HardMix => BlendKernel::Separable(hard_mix),
        BlendMode::Difference => BlendKernel::Separable(difference),
        BlendMode::Exclusion => BlendKernel::Separable(exclusion),
        BlendMode::Subtract => BlendKernel::Separable(subtract),
        BlendMode::Divide => BlendKernel::Separable(divide),
        BlendMode::DarkerColor => BlendKernel::NonSeparable(darker_color),
        BlendMode::LighterColor => BlendKernel::NonSeparable(lighter_color),
        BlendMode::Hue => BlendKernel::NonSeparable(hue),
        BlendMode::Saturation => BlendKernel::NonSeparable(saturation),
        BlendMode::Color => BlendKernel::NonSeparable(color),
        BlendMode::Luminosity => BlendKernel::NonSeparable(luminosity),
    };
    Ok(kernel)
}

/// Porter-Duff "over" for coverage: `a_out = a_l + a_c * (1 - a_l)`.
pub(crate) fn over_alpha<P: Precision>(canvas: P, layer: P) -> P {
    layer + canvas * (P::ONE - layer)
}

/// `B(Cb, Cs) = Cs`
fn normal<P: Precision>(_canvas: P, layer: P) -> P {
    layer
}

/// `B(Cb, Cs) = Cb x Cs`
fn multiply<P: Precision>(canvas: P, layer: P) -> P {
    canvas * layer
}

/// `B(Cb, Cs) = Cb + Cs - Cb x Cs`
fn screen<P: Precision>(canvas: P, layer: P) -> P {
    canvas + layer - canvas * layer
}

/// `B(Cb, Cs) = min(Cb, Cs)`
fn darken<P: Precision>(canvas: P, layer: P) -> P {
    canvas.min(layer)
}

/// `B(Cb, Cs) = max(Cb, Cs)`
fn lighten<P: Precision>(canvas: P, layer: P) -> P {
    canvas.max(layer)
}

/// Brightens the canvas to reflect the layer. Painting with black produces
/// no change.
fn color_dodge<P: Precision>(canvas: P, layer: P) -> P {
    if layer >= P::ONE {
        P::ONE
    } else if canvas <= P::ZERO {
        P::ZERO
    } else {
        (canvas / (P::ONE - layer)).clamp01()
    }
}

/// Darkens the canvas to reflect the layer. Painting with white produces
/// no change.
fn color_burn<P: Precision>(canvas: P, layer: P) -> P {
    if canvas >= P::ONE {
        P::ONE
    } else if layer <= P::ZERO {
        P::ZERO
    } else {
        P::ONE - ((P::ONE - canvas) / layer).clamp01()
    }
}

/// Also known as "add".
fn linear_dodge<P: Precision>(canvas: P, layer: P) -> P {
    (canvas + layer).clamp01()
}

fn linear_burn<P: Precision>(canvas: P, layer: P) -> P {
    (canvas + layer - P::ONE).clamp01()
}

/// Multiply below 50%, screen above.
fn hard_light<P: Precision>(canvas: P, layer: P) -> P {
    if layer <= P::HALF {
        multiply(canvas, layer + layer)
    } else {
        screen(canvas, layer + layer - P::ONE)
    }
}

/// Hard light with the roles of canvas and layer swapped.
fn overlay<P: Precision>(canvas: P, layer: P) -> P {
    hard_light(layer, canvas)
}

/// ```text
/// if(Cs <= 0.5)  B(Cb, Cs) = Cb - (1 - 2 x Cs) x Cb x (1 - Cb)
/// else           B(Cb, Cs) = Cb + (2 x Cs - 1) x (D(Cb) - Cb)
/// with D(Cb) = ((16 * Cb - 12) x Cb + 4) x Cb   if Cb <= 0.25
///      D(Cb) = sqrt(Cb)                         otherwise
/// ```
fn soft_light<P: Precision>(canvas: P, layer: P) -> P {
    let two = P::ONE + P::ONE;
    if layer <= P::HALF {
        canvas - (P::ONE - two * layer) * canvas * (P::ONE - canvas)
    } else {
        let d = if canvas <= P::from_f64(0.25) {
            ((P::from_f64(16.0) * canvas - P::from_f64(12.0)) * canvas + P::from_f64(4.0)) * canvas
        } else {
            canvas.sqrt()
        };
        canvas + (two * layer - P::ONE) * (d - canvas)
    }
}

/// Burn below 50%, dodge above.
fn vivid_light<P: Precision>(canvas: P, layer: P) -> P {
    if layer <= P::HALF {
        color_burn(canvas, layer + layer)
    } else {
        color_dodge(canvas, layer + layer - P::ONE)
    }
}

/// Linear burn below 50%, linear dodge above; collapses to a single clamp.
fn linear_light<P: Precision>(canvas: P, layer: P) -> P {
    (canvas + layer + layer - P::ONE).clamp01()
}

/// Darken below 50%, lighten above.
fn pin_light<P: Precision>(canvas: P, layer: P) -> P {
    if layer <= P::HALF {
        darken(canvas, layer + layer)
    } else {
        lighten(canvas, layer + layer - P::ONE)
    }
}

/// Snaps every channel to 0 or 1.
fn hard_mix<P: Precision>(canvas: P, layer: P) -> P {
    if canvas + layer < P::ONE {
        P::ZERO
    } else {
        P::ONE
    }
}

/// `B(Cb, Cs) = |Cb - Cs|`
fn difference<P: Precision>(canvas: P, layer: P) -> P {
    (canvas - layer).abs()
}

/// `B(Cb, Cs) = Cb + Cs - 2 x Cb x Cs`
fn exclusion<P: Precision>(canvas: P, layer: P) -> P {
    canvas + layer - (canvas * layer + canvas * layer)
}

/// `B(Cb, Cs) = max(0, Cb - Cs)`
fn subtract<P: Precision>(canvas: P, layer: P) -> P {
    (canvas - layer).max(P::ZERO)
}

/// `B(Cb, Cs) = Cb / Cs`, clipped.
fn divide<P: Precision>(canvas: P, layer: P) -> P {
    if layer <= P::ZERO {
        P::ONE
    } else {
        (canvas / layer).clamp01()
    }
}

// The non-separable family, defined through the W3C luminosity/saturation
// helpers.

fn lum<P: Precision>(color: [P; 3]) -> P {
    P::from_f64(0.3) * color[0] + P::from_f64(0.59) * color[1] + P::from_f64(0.11) * color[2]
}

fn clip_color<P: Precision>(color: [P; 3]) -> [P; 3] {
    let l = lum(color);
    let n = color[0].min(color[1]).min(color[2]);
    let x = color[0].max(color[1]).max(color[2]);

    let mut out = color;
    if n < P::ZERO {
        for channel in &mut out {
            *channel = l + (*channel - l) * l / (l - n);
        }
    }
    if x > P::ONE {
        for channel in &mut out {
            *channel = l + (*channel - l) * (P::ONE - l) / (x - l);
        }
    }
    out
}

fn set_lum<P: Precision>(color: [P; 3], l: P) -> [P; 3] {
    let d = l - lum(color);
    clip_color([color[0] + d, color[1] + d, color[2] + d])
}

fn sat<P: Precision>(color: [P; 3]) -> P {
    color[0].max(color[1]).max(color[2]) - color[0].min(color[1]).min(color[2])
}

fn set_sat<P: Precision>(color: [P; 3], s: P) -> [P; 3] {
    // Order the channel indices by value: min, mid, max.
    let mut indices = [0usize, 1, 2];
    indices.sort_by(|a, b| color[*a].partial_cmp(&color[*b]).unwrap_or(std::cmp::Ordering::Equal));
    let [min_i, mid_i, max_i] = indices;

    let mut out = [P::ZERO; 3];
    if color[max_i] > color[min_i] {
        out[mid_i] = (color[mid_i] - color[min_i]) * s / (color[max_i] - color[min_i]);
        out[max_i] = s;
    }
    out
}

fn hue<P: Precision>(canvas: [P; 3], layer: [P; 3]) -> [P; 3] {
    set_lum(set_sat(layer, sat(canvas)), lum(canvas))
}

fn saturation<P: Precision>(canvas: [P; 3], layer: [P; 3]) -> [P; 3] {
    set_lum(set_sat(canvas, sat(layer)), lum(canvas))
}

fn color<P: Precision>(canvas: [P; 3], layer: [P; 3]) -> [P; 3] {
    set_lum(layer, lum(canvas))
}

fn luminosity<P: Precision>(canvas: [P; 3], layer: [P; 3]) -> [P; 3] {
    set_lum(canvas, lum(layer))
}

fn darker_color<P: Precision>(canvas: [P; 3], layer: [P; 3]) -> [P; 3] {
    if lum(layer) < lum(canvas) {
        layer
    } else {
        canvas
    }
}

fn lighter_color<P: Precision>(canvas: [P; 3], layer: [P; 3]) -> [P; 3] {
    if lum(layer) > lum(canvas) {
        layer
    } else {
        canvas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable(mode: BlendMode) -> fn(f64, f64) -> f64 {
        match kernel_for::<f64>(mode).unwrap() {
            BlendKernel::Separable(kernel) => kernel,
            BlendKernel::NonSeparable(_) => panic!("expected a separable kernel"),
        }
    }

    #[test]
    fn normal_returns_the_layer() {
        let kernel = separable(BlendMode::Normal);
        assert_eq!(kernel(0.3, 0.8), 0.8);
    }

    #[test]
    fn multiply_and_screen_are_dual() {
        let multiply = separable(BlendMode::Multiply);
        let screen = separable(BlendMode::Screen);
        for (c, l) in [(0.0, 0.0), (0.25, 0.75), (1.0, 0.5), (0.6, 0.6)] {
            // screen(c, l) = 1 - (1-c)(1-l)
            let expected = 1.0 - (1.0 - c) * (1.0 - l);
            assert!((screen(c, l) - expected).abs() < 1e-12);
            assert!((multiply(c, l) - c * l).abs() < 1e-12);
        }
    }

    #[test]
    fn dodge_and_burn_edge_cases() {
        let dodge = separable(BlendMode::ColorDodge);
        assert_eq!(dodge(0.5, 1.0), 1.0);
        assert_eq!(dodge(0.0, 0.5), 0.0);
        assert_eq!(dodge(0.25, 0.5), 0.5);

        let burn = separable(BlendMode::ColorBurn);
        assert_eq!(burn(1.0, 0.5), 1.0);
        assert_eq!(burn(0.5, 0.0), 0.0);
        assert_eq!(burn(0.75, 0.5), 0.5);
    }

    #[test]
    fn overlay_is_hard_light_swapped() {
        let overlay = separable(BlendMode::Overlay);
        let hard_light = separable(BlendMode::HardLight);
        for (c, l) in [(0.2, 0.7), (0.7, 0.2), (0.5, 0.5), (0.0, 1.0)] {
            assert_eq!(overlay(c, l), hard_light(l, c));
        }
    }

    #[test]
    fn clamping_kernels_stay_in_unit_range() {
        for mode in [
            BlendMode::LinearDodge,
            BlendMode::LinearBurn,
            BlendMode::LinearLight,
            BlendMode::VividLight,
            BlendMode::Subtract,
            BlendMode::Divide,
            BlendMode::HardMix,
        ] {
            let kernel = separable(mode);
            for c in [0.0, 0.25, 0.5, 0.75, 1.0] {
                for l in [0.0, 0.25, 0.5, 0.75, 1.0] {
                    let out = kernel(c, l);
                    assert!((0.0..=1.0).contains(&out), "{:?}({}, {}) = {}", mode, c, l, out);
                }
            }
        }
    }

    #[test]
    fn over_alpha_is_associative() {
        let alphas = [0.0f64, 0.25, 0.5, 0.75, 1.0];
        for a in alphas {
            for b in alphas {
                for c in alphas {
                    let left = over_alpha(over_alpha(a, b), c);
                    let right = over_alpha(a, over_alpha(b, c));
                    assert!((left - right).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn luminosity_moves_lum_only() {
        let canvas = [0.2, 0.4, 0.6];
        let layer = [0.9, 0.9, 0.9];
        let out = luminosity(canvas, layer);
        assert!((lum(out) - lum(layer)).abs() < 1e-9);
    }

    #[test]
    fn hue_preserves_canvas_luminosity() {
        let canvas = [0.3, 0.5, 0.7];
        let layer = [0.8, 0.1, 0.2];
        let out = hue(canvas, layer);
        assert!((lum(out) - lum(canvas)).abs() < 1e-9);
    }

    #[test]
    fn darker_color_picks_whole_triples() {
        let dark = [0.1, 0.1, 0.1];
        let light = [0.9, 0.9, 0.9];
        assert_eq!(darker_color(light, dark), dark);
        assert_eq!(darker_color(dark, light), dark);
        assert_eq!(lighter_color(dark, light), light);
    }

    #[test]
    fn dissolve_is_unsupported() {
        assert!(matches!(
            kernel_for::<f32>(BlendMode::Dissolve),
            Err(PsdError::Unsupported(_))
        ));
    }
}
