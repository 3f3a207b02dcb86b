//! Per-cell quantization: ordered dithering, variable dots and glyph ramps.
//!
//! A [`Quantizer`] turns one resampled RGBA cell into a [`Cell`]. Both output
//! modes share the luminance and gradient math from [`crate::color`]; they
//! differ only in the visibility test and in the [`Symbol`] they resolve.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::color::{gradient_color, luminance, Rgb};
use crate::config::{EngineConfig, ModeConfig};

const BAYER_4X4: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

const BAYER_8X8: [[u8; 8]; 8] = [
    [0, 32, 8, 40, 2, 34, 10, 42],
    [48, 16, 56, 24, 50, 18, 58, 26],
    [12, 44, 4, 36, 14, 46, 6, 38],
    [60, 28, 52, 20, 62, 30, 54, 22],
    [3, 35, 11, 43, 1, 33, 9, 41],
    [51, 19, 59, 27, 49, 17, 57, 25],
    [15, 47, 7, 39, 13, 45, 5, 37],
    [63, 31, 55, 23, 61, 29, 53, 21],
];

const DOT_MIN_RADIUS_FACTOR: f32 = 0.12;
const DOT_MAX_RADIUS_FACTOR: f32 = 0.5;
const DOT_SKIP_RADIUS: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DitherAlgorithm {
    #[default]
    #[serde(rename = "bayer4x4")]
    Bayer4x4,
    #[serde(rename = "bayer8x8")]
    Bayer8x8,
    #[serde(rename = "variable_dot", alias = "variableDot")]
    VariableDot,
}

impl DitherAlgorithm {
    pub fn label(self) -> &'static str {
        match self {
            Self::Bayer4x4 => "bayer4x4",
            Self::Bayer8x8 => "bayer8x8",
            Self::VariableDot => "variable_dot",
        }
    }

    /// Ordered-dither threshold for the cell, normalized to `[0, 1)`.
    /// Variable dots have no matrix and return `None`.
    pub fn threshold(self, x: u32, y: u32) -> Option<f32> {
        match self {
            Self::Bayer4x4 => {
                let value = BAYER_4X4[(y % 4) as usize][(x % 4) as usize];
                Some(f32::from(value) / 16.0)
            }
            Self::Bayer8x8 => {
                let value = BAYER_8X8[(y % 8) as usize][(x % 8) as usize];
                Some(f32::from(value) / 64.0)
            }
            Self::VariableDot => None,
        }
    }

    pub fn should_draw(self, adjusted: f32, x: u32, y: u32, min_brightness: f32) -> bool {
        match self.threshold(x, y) {
            Some(threshold) => adjusted > threshold,
            None => adjusted > min_brightness,
        }
    }
}

impl fmt::Display for DitherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn adjusted_brightness(brightness: f32, invert: bool) -> f32 {
    if invert {
        1.0 - brightness
    } else {
        brightness
    }
}

/// Dot radius for a variable-dot cell, or `None` when the dot is too small to draw.
pub fn dot_radius(cell_size: f32, adjusted: f32) -> Option<f32> {
    let radius = (cell_size * DOT_MIN_RADIUS_FACTOR)
        .max(cell_size * DOT_MAX_RADIUS_FACTOR * (1.0 - adjusted));
    (radius > DOT_SKIP_RADIUS).then_some(radius)
}

/// Ordered list of glyphs, index 0 drawn for the brightest cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphRamp {
    glyphs: Vec<char>,
}

impl GlyphRamp {
    pub const DEFAULT: &'static str = " .:-=+*#%@";

    pub fn new(ramp: &str) -> Result<Self> {
        let glyphs = ramp.chars().collect::<Vec<_>>();
        if glyphs.is_empty() {
            bail!("glyph ramp must contain at least one character");
        }
        if let Some(control) = glyphs.iter().find(|ch| ch.is_control()) {
            bail!("glyph ramp contains control character {:?}", control);
        }
        Ok(Self { glyphs })
    }

    /// `round((1 - brightness) * (len - 1))`, mirrored when `invert` is set.
    pub fn index_for(&self, brightness: f32, invert: bool) -> usize {
        let max_index = self.glyphs.len().saturating_sub(1);
        let raw = ((1.0 - brightness.clamp(0.0, 1.0)) * max_index as f32).round() as usize;
        let index = raw.min(max_index);
        if invert {
            max_index - index
        } else {
            index
        }
    }

    pub fn glyph_for(&self, brightness: f32, invert: bool) -> char {
        self.glyphs[self.index_for(brightness, invert)]
    }

    pub fn is_blank(glyph: char) -> bool {
        glyph.is_whitespace()
    }
}

/// What a visible cell draws.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Symbol {
    Block { size: f32 },
    Dot { radius: f32, cell_size: f32 },
    Glyph { glyph: char },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellDraw {
    pub symbol: Symbol,
    pub color: Rgb,
    /// Brightness fed to the gradient (after invert handling).
    pub tone: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cell {
    pub brightness: f32,
    pub opaque: bool,
    pub draw: Option<CellDraw>,
}

impl Cell {
    pub fn visible(&self) -> bool {
        self.draw.is_some()
    }
}

#[derive(Debug, Clone)]
enum QuantizeMode {
    Bitmap {
        algorithm: DitherAlgorithm,
        cell_size: f32,
    },
    Glyph {
        ramp: GlyphRamp,
        background_cutoff: f32,
    },
}

#[derive(Debug, Clone)]
pub struct Quantizer {
    mode: QuantizeMode,
    stops: Vec<Rgb>,
    invert: bool,
    min_brightness: f32,
}

impl Quantizer {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mode = match &config.mode {
            ModeConfig::Bitmap(bitmap) => QuantizeMode::Bitmap {
                algorithm: bitmap.dither,
                cell_size: bitmap.cell_size as f32,
            },
            ModeConfig::Glyph(glyph) => QuantizeMode::Glyph {
                ramp: GlyphRamp::new(&glyph.ramp)?,
                background_cutoff: glyph.background_cutoff,
            },
        };

        Ok(Self {
            mode,
            stops: config.colors.clone(),
            invert: config.invert,
            min_brightness: config.min_brightness,
        })
    }

    pub fn quantize(&self, rgba: [u8; 4], x: u32, y: u32) -> Cell {
        let brightness = luminance(rgba[0], rgba[1], rgba[2]);
        let opaque = rgba[3] != 0;

        match &self.mode {
            QuantizeMode::Bitmap {
                algorithm,
                cell_size,
            } => self.quantize_bitmap(brightness, opaque, *algorithm, *cell_size, x, y),
            QuantizeMode::Glyph {
                ramp,
                background_cutoff,
            } => self.quantize_glyph(brightness, opaque, ramp, *background_cutoff),
        }
    }

    fn quantize_bitmap(
        &self,
        brightness: f32,
        opaque: bool,
        algorithm: DitherAlgorithm,
        cell_size: f32,
        x: u32,
        y: u32,
    ) -> Cell {
        let hidden = Cell {
            brightness,
            opaque,
            draw: None,
        };
        if !opaque || brightness < self.min_brightness {
            return hidden;
        }

        let adjusted = adjusted_brightness(brightness, self.invert);
        if !algorithm.should_draw(adjusted, x, y, self.min_brightness) {
            return hidden;
        }

        let symbol = match algorithm {
            DitherAlgorithm::VariableDot => match dot_radius(cell_size, adjusted) {
                Some(radius) => Symbol::Dot { radius, cell_size },
                None => return hidden,
            },
            DitherAlgorithm::Bayer4x4 | DitherAlgorithm::Bayer8x8 => {
                Symbol::Block { size: cell_size }
            }
        };

        Cell {
            brightness,
            opaque,
            draw: Some(CellDraw {
                symbol,
                color: gradient_color(adjusted, &self.stops),
                tone: adjusted,
            }),
        }
    }

    fn quantize_glyph(
        &self,
        brightness: f32,
        opaque: bool,
        ramp: &GlyphRamp,
        background_cutoff: f32,
    ) -> Cell {
        // Transparent pixels read as full brightness and never draw.
        if !opaque {
            return Cell {
                brightness: 1.0,
                opaque,
                draw: None,
            };
        }

        let hidden = Cell {
            brightness,
            opaque,
            draw: None,
        };
        if brightness > background_cutoff {
            return hidden;
        }

        let glyph = ramp.glyph_for(brightness, self.invert);
        if GlyphRamp::is_blank(glyph) {
            return hidden;
        }

        let tone = if self.invert {
            brightness
        } else {
            1.0 - brightness
        };

        Cell {
            brightness,
            opaque,
            draw: Some(CellDraw {
                symbol: Symbol::Glyph { glyph },
                color: gradient_color(tone, &self.stops),
                tone,
            }),
        }
    }
}
