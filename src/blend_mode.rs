//! The 28 blend modes and their 4-byte keys.

use crate::error::{PsdError, Result};

/// How a layer combines with the canvas below it.
///
/// # [Adobe Docs](https://www.adobe.com/devnet-apps/photoshop/fileformatashtml/)
///
/// Blend mode key:
/// 'pass' = pass through, 'norm' = normal, 'diss' = dissolve, 'dark' = darken,
/// 'mul ' = multiply, 'idiv' = color burn, 'lbrn' = linear burn, 'dkCl' = darker color,
/// 'lite' = lighten, 'scrn' = screen, 'div ' = color dodge, 'lddg' = linear dodge,
/// 'lgCl' = lighter color, 'over' = overlay, 'sLit' = soft light, 'hLit' = hard light,
/// 'vLit' = vivid light, 'lLit' = linear light, 'pLit' = pin light, 'hMix' = hard mix,
/// 'diff' = difference, 'smud' = exclusion, 'fsub' = subtract, 'fdiv' = divide,
/// 'hue ' = hue, 'sat ' = saturation, 'colr' = color, 'lum ' = luminosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[allow(missing_docs)]
pub enum BlendMode {
    /// Only legal on groups: the group's children composite directly into
    /// the parent context.
    Passthrough,
    #[default]
    Normal,
    Dissolve,
    Darken,
    Multiply,
    ColorBurn,
    LinearBurn,
    DarkerColor,
    Lighten,
    Screen,
    ColorDodge,
    LinearDodge,
    LighterColor,
    Overlay,
    SoftLight,
    HardLight,
    VividLight,
    LinearLight,
    PinLight,
    HardMix,
    Difference,
    Exclusion,
    Subtract,
    Divide,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

// Modes are listed like in the Photoshop UI.
const BLEND_MODE_KEYS: [(BlendMode, &[u8; 4]); 28] = [
    (BlendMode::Passthrough, b"pass"),
    // --------------------------------------
    (BlendMode::Normal, b"norm"),
    (BlendMode::Dissolve, b"diss"),
    // --------------------------------------
    (BlendMode::Darken, b"dark"),
    (BlendMode::Multiply, b"mul "),
    (BlendMode::ColorBurn, b"idiv"),
    (BlendMode::LinearBurn, b"lbrn"),
    (BlendMode::DarkerColor, b"dkCl"),
    // --------------------------------------
    (BlendMode::Lighten, b"lite"),
    (BlendMode::Screen, b"scrn"),
    (BlendMode::ColorDodge, b"div "),
    (BlendMode::LinearDodge, b"lddg"),
    (BlendMode::LighterColor, b"lgCl"),
    // --------------------------------------
    (BlendMode::Overlay, b"over"),
    (BlendMode::SoftLight, b"sLit"),
    (BlendMode::HardLight, b"hLit"),
    (BlendMode::VividLight, b"vLit"),
    (BlendMode::LinearLight, b"lLit"),
    (BlendMode::PinLight, b"pLit"),
    (BlendMode::HardMix, b"hMix"),
    // --------------------------------------
    (BlendMode::Difference, b"diff"),
    (BlendMode::Exclusion, b"smud"),
    (BlendMode::Subtract, b"fsub"),
    (BlendMode::Divide, b"fdiv"),
    // --------------------------------------
    (BlendMode::Hue, b"hue "),
    (BlendMode::Saturation, b"sat "),
    (BlendMode::Color, b"colr"),
    (BlendMode::Luminosity, b"lum "),
];

impl BlendMode {
    /// The mode for a 4-byte key from a layer record or `lsct` block.
    pub fn from_key(key: [u8; 4]) -> Result<BlendMode> {
        BLEND_MODE_KEYS
            .iter()
            .find(|(_, candidate)| **candidate == key)
            .map(|(mode, _)| *mode)
            .ok_or(PsdError::Unsupported(format!(
                "unknown blend mode key '{}'",
                String::from_utf8_lossy(&key)
            )))
    }

    /// The 4-byte key written into layer records.
    pub fn key(self) -> [u8; 4] {
        *BLEND_MODE_KEYS
            .iter()
            .find(|(mode, _)| *mode == self)
            .map(|(_, key)| *key)
            .expect("every blend mode has a key")
    }
}
