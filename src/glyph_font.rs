use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Result};
use fontdue::{Font, FontSettings};
use serde_json::json;
use sha2::{Digest, Sha256};
use tiny_skia::{ColorU8, IntSize, Pixmap};

use crate::color::Rgb;
use crate::config::{GlyphConfig, GLYPH_LINE_HEIGHT_FACTOR};
use crate::error_codes::{CodedError, FONT_LOAD_FAILED};

/// Coverage mask for one rasterized glyph, positioned inside its cell box.
#[derive(Debug, Clone)]
pub struct GlyphBitmap {
    pub width: usize,
    pub height: usize,
    /// Offset of the mask's left edge from the cell's left edge.
    pub left: f32,
    /// Offset of the mask's top edge from the cell's top edge.
    pub top: f32,
    pub coverage: Vec<u8>,
}

impl GlyphBitmap {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// A straight-color pixmap whose alpha is the coverage mask.
    pub fn tinted(&self, color: Rgb) -> Option<Pixmap> {
        if self.is_empty() {
            return None;
        }
        let size = IntSize::from_wh(self.width as u32, self.height as u32)?;
        let mut data = Vec::with_capacity(self.coverage.len() * 4);
        for &mask in &self.coverage {
            let texel = ColorU8::from_rgba(color.r, color.g, color.b, mask).premultiply();
            data.extend_from_slice(&[texel.red(), texel.green(), texel.blue(), texel.alpha()]);
        }
        Pixmap::from_vec(data, size)
    }
}

/// Rasterizes ramp glyphs from a monospace font, caching each one.
pub struct GlyphPainter {
    font: Font,
    font_size: f32,
    ascent: f32,
    cache: HashMap<char, GlyphBitmap>,
}

impl GlyphPainter {
    pub fn from_bytes(bytes: Vec<u8>, font_size: f32, label: &str) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(|error| {
            anyhow!(CodedError::config(
                FONT_LOAD_FAILED,
                format!("failed to parse font {label}: {error}")
            ))
        })?;
        let ascent = font
            .horizontal_line_metrics(font_size)
            .map_or(font_size * 0.8, |metrics| metrics.ascent);
        Ok(Self {
            font,
            font_size,
            ascent,
            cache: HashMap::new(),
        })
    }

    /// Reads a font file, checking its sha256 first when one is pinned.
    pub fn from_path(path: &Path, font_size: f32, expected_sha256: Option<&str>) -> Result<Self> {
        let bytes = fs::read(path).map_err(|error| {
            anyhow!(CodedError::config(
                FONT_LOAD_FAILED,
                format!("failed to read font file '{}': {error}", path.display())
            ))
        })?;
        if let Some(expected) = expected_sha256 {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(anyhow!(CodedError::config(
                    FONT_LOAD_FAILED,
                    format!(
                        "{} expected sha256={} actual sha256={}",
                        path.display(),
                        expected,
                        actual
                    )
                )
                .with_details(json!({ "expected": expected, "actual": actual }))));
            }
        }
        Self::from_bytes(bytes, font_size, &path.display().to_string())
    }

    /// Builds the painter a glyph config asks for, if it names a font.
    pub fn for_config(glyph: &GlyphConfig) -> Result<Option<Self>> {
        let Some(path) = &glyph.font_path else {
            return Ok(None);
        };
        let painter = Self::from_path(path, glyph.font_size, glyph.font_sha256.as_deref())?;
        painter.ensure_supported(&glyph.ramp)?;
        Ok(Some(painter))
    }

    pub fn line_height(&self) -> f32 {
        (self.font_size * GLYPH_LINE_HEIGHT_FACTOR).max(1.0)
    }

    pub fn ensure_supported(&self, ramp: &str) -> Result<()> {
        for ch in ramp.chars().filter(|ch| !ch.is_whitespace()) {
            if self.font.lookup_glyph_index(ch) == 0 {
                return Err(anyhow!(CodedError::config(
                    FONT_LOAD_FAILED,
                    format!(
                        "font has no glyph for U+{:04X} ({}) in ramp",
                        ch as u32,
                        ch.escape_default()
                    )
                )));
            }
        }
        Ok(())
    }

    /// Coverage for `glyph`, with the baseline placed so the line box is
    /// vertically centered in a cell of `cell_height`.
    pub fn glyph(&mut self, glyph: char, cell_height: f32) -> GlyphBitmap {
        let mut bitmap = self
            .cache
            .entry(glyph)
            .or_insert_with(|| {
                let (metrics, coverage) = self.font.rasterize(glyph, self.font_size);
                GlyphBitmap {
                    width: metrics.width,
                    height: metrics.height,
                    left: metrics.xmin as f32,
                    top: self.ascent - (metrics.ymin as f32 + metrics.height as f32),
                    coverage,
                }
            })
            .clone();
        bitmap.top += (cell_height - self.line_height()) / 2.0;
        bitmap
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{sha256_hex, GlyphBitmap, GlyphPainter};
    use crate::color::Rgb;
    use crate::config::GlyphConfig;
    use crate::error_codes::{find_coded_error, FONT_LOAD_FAILED};

    #[test]
    fn sha256_hex_matches_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn garbage_bytes_are_a_font_load_error() {
        let error = GlyphPainter::from_bytes(vec![0, 1, 2, 3], 10.0, "garbage")
            .err()
            .expect("garbage font must fail");
        assert_eq!(
            find_coded_error(&error).expect("coded").code,
            FONT_LOAD_FAILED
        );
    }

    #[test]
    fn pinned_hash_mismatch_is_rejected_before_parsing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("font.ttf");
        fs::write(&path, b"abc").expect("write");
        let error = GlyphPainter::from_path(&path, 10.0, Some(&"0".repeat(64)))
            .err()
            .expect("hash mismatch");
        assert!(format!("{error:#}").contains("expected sha256="));
    }

    #[test]
    fn configs_without_a_font_need_no_painter() {
        let painter = GlyphPainter::for_config(&GlyphConfig::default()).expect("no font");
        assert!(painter.is_none());
    }

    #[test]
    fn tinted_bitmap_carries_coverage_as_alpha() {
        let bitmap = GlyphBitmap {
            width: 2,
            height: 1,
            left: 0.0,
            top: 0.0,
            coverage: vec![0, 255],
        };
        let pixmap = bitmap.tinted(Rgb::new(200, 100, 50)).expect("pixmap");
        let pixels = pixmap.pixels();
        assert_eq!(pixels[0].alpha(), 0);
        assert_eq!(pixels[1].alpha(), 255);
        assert_eq!(pixels[1].red(), 200);
        assert!(GlyphBitmap {
            width: 0,
            height: 0,
            left: 0.0,
            top: 0.0,
            coverage: Vec::new(),
        }
        .tinted(Rgb::WHITE)
        .is_none());
    }
}
