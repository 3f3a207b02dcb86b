use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;

use crate::color::Rgb;
use crate::dither::{DitherAlgorithm, GlyphRamp};
use crate::error_codes::{CodedError, CONFIG_INVALID};

pub const DEFAULT_CELL_SIZE: u32 = 6;
pub const DEFAULT_MIN_BRIGHTNESS: f32 = 0.04;
pub const DEFAULT_PHASE_DURATION_MS: f64 = 2500.0;
pub const DEFAULT_GLYPH_RESOLUTION: f32 = 0.15;
pub const DEFAULT_GLYPH_FONT_SIZE: f32 = 10.0;
pub const DEFAULT_BACKGROUND_CUTOFF: f32 = 0.95;
pub const GLYPH_LINE_HEIGHT_FACTOR: f32 = 1.2;

const DEFAULT_BITMAP_COLORS: [&str; 5] = ["#074434", "#ABC685", "#E8FF99", "#F7F9CE", "#FFF6E7"];
const DEFAULT_GLYPH_COLORS: [&str; 3] = ["#0d5164", "#c0c2ca", "#ffffff"];
const DEFAULT_BACKGROUND: Rgb = Rgb::new(0x0a, 0x0a, 0x0a);

/// Immutable settings for one engine instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub mode: ModeConfig,
    pub colors: Vec<Rgb>,
    pub background: Rgb,
    pub invert: bool,
    pub min_brightness: f32,
    pub phase_duration_ms: f64,
    pub motion: MotionStyle,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeConfig {
    Bitmap(BitmapConfig),
    Glyph(GlyphConfig),
}

impl ModeConfig {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Bitmap(_) => "bitmap",
            Self::Glyph(_) => "glyph",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitmapConfig {
    #[serde(default = "default_cell_size")]
    pub cell_size: u32,
    #[serde(default)]
    pub dither: DitherAlgorithm,
}

impl Default for BitmapConfig {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            dither: DitherAlgorithm::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlyphConfig {
    #[serde(default = "default_ramp")]
    pub ramp: String,
    /// Grid cells per output pixel along each axis.
    #[serde(default = "default_glyph_resolution")]
    pub resolution: f32,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    /// Opaque cells brighter than this are treated as background.
    #[serde(default = "default_background_cutoff")]
    pub background_cutoff: f32,
    #[serde(default)]
    pub font_path: Option<PathBuf>,
    #[serde(default)]
    pub font_sha256: Option<String>,
}

impl Default for GlyphConfig {
    fn default() -> Self {
        Self {
            ramp: default_ramp(),
            resolution: DEFAULT_GLYPH_RESOLUTION,
            font_size: DEFAULT_GLYPH_FONT_SIZE,
            background_cutoff: DEFAULT_BACKGROUND_CUTOFF,
            font_path: None,
            font_sha256: None,
        }
    }
}

/// How particles travel during fade phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionStyle {
    /// Straight-line travel, identity transform.
    #[default]
    Linear,
    /// Adds a per-particle spin and scale that settle as the particle lands.
    Tumble,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDocument {
    mode: ModeConfig,
    #[serde(default)]
    colors: Option<Vec<Rgb>>,
    #[serde(default)]
    background: Option<Rgb>,
    #[serde(default)]
    invert: bool,
    #[serde(default = "default_min_brightness")]
    min_brightness: f32,
    #[serde(default = "default_phase_duration_ms")]
    phase_duration_ms: f64,
    #[serde(default)]
    motion: MotionStyle,
}

impl From<ConfigDocument> for EngineConfig {
    fn from(document: ConfigDocument) -> Self {
        let colors = document
            .colors
            .unwrap_or_else(|| default_colors_for(&document.mode));
        Self {
            mode: document.mode,
            colors,
            background: document.background.unwrap_or(DEFAULT_BACKGROUND),
            invert: document.invert,
            min_brightness: document.min_brightness,
            phase_duration_ms: document.phase_duration_ms,
            motion: document.motion,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mode = ModeConfig::Bitmap(BitmapConfig::default());
        Self {
            colors: default_colors_for(&mode),
            mode,
            background: DEFAULT_BACKGROUND,
            invert: false,
            min_brightness: DEFAULT_MIN_BRIGHTNESS,
            phase_duration_ms: DEFAULT_PHASE_DURATION_MS,
            motion: MotionStyle::Linear,
        }
    }
}

impl EngineConfig {
    pub fn glyph_default() -> Self {
        let mode = ModeConfig::Glyph(GlyphConfig::default());
        Self {
            colors: default_colors_for(&mode),
            mode,
            ..Self::default()
        }
    }

    /// Parses and validates a YAML document. Relative font paths are kept as written.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let document: ConfigDocument = serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(CodedError::config(
                CONFIG_INVALID,
                format!("failed to parse config yaml at {location}: {error}")
            ))
        })?;
        let config = Self::from(document);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.colors.is_empty() {
            return Err(invalid("colors", "at least one gradient color is required"));
        }
        if !self.min_brightness.is_finite() || !(0.0..=1.0).contains(&self.min_brightness) {
            return Err(invalid(
                "min_brightness",
                format!("must be within [0, 1], got {}", self.min_brightness),
            ));
        }
        if !self.phase_duration_ms.is_finite() || self.phase_duration_ms <= 0.0 {
            return Err(invalid(
                "phase_duration_ms",
                format!("must be > 0, got {}", self.phase_duration_ms),
            ));
        }

        match &self.mode {
            ModeConfig::Bitmap(bitmap) => {
                if bitmap.cell_size == 0 {
                    return Err(invalid("mode.cell_size", "must be > 0"));
                }
            }
            ModeConfig::Glyph(glyph) => {
                GlyphRamp::new(&glyph.ramp)
                    .map_err(|error| invalid("mode.ramp", error.to_string()))?;
                if !glyph.resolution.is_finite()
                    || glyph.resolution <= 0.0
                    || glyph.resolution > 1.0
                {
                    return Err(invalid(
                        "mode.resolution",
                        format!("must be within (0, 1], got {}", glyph.resolution),
                    ));
                }
                if !glyph.font_size.is_finite() || glyph.font_size <= 0.0 {
                    return Err(invalid(
                        "mode.font_size",
                        format!("must be > 0, got {}", glyph.font_size),
                    ));
                }
                if !glyph.background_cutoff.is_finite()
                    || !(0.0..=1.0).contains(&glyph.background_cutoff)
                {
                    return Err(invalid(
                        "mode.background_cutoff",
                        format!("must be within [0, 1], got {}", glyph.background_cutoff),
                    ));
                }
                if let Some(hash) = &glyph.font_sha256 {
                    if hash.len() != 64 || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
                        return Err(invalid(
                            "mode.font_sha256",
                            "must be a 64 digit hex sha256",
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    pub fn glyph(&self) -> Option<&GlyphConfig> {
        match &self.mode {
            ModeConfig::Glyph(glyph) => Some(glyph),
            ModeConfig::Bitmap(_) => None,
        }
    }
}

pub fn load_and_validate_config(path: &Path) -> Result<EngineConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut config = EngineConfig::from_yaml_str(&contents)
        .with_context(|| format!("invalid config {}", path.display()))?;

    let config_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    if let ModeConfig::Glyph(glyph) = &mut config.mode {
        if let Some(font_path) = &glyph.font_path {
            let resolved = if font_path.is_absolute() {
                font_path.clone()
            } else {
                config_dir.join(font_path)
            };
            if !resolved.is_file() {
                return Err(invalid(
                    "mode.font_path",
                    format!("font file does not exist: {}", resolved.display()),
                ));
            }
            glyph.font_path = Some(resolved);
        }
    }

    Ok(config)
}

fn invalid(field: &str, message: impl Into<String>) -> anyhow::Error {
    let message = message.into();
    anyhow!(
        CodedError::config(CONFIG_INVALID, format!("{field}: {message}"))
            .with_details(json!({ "field": field }))
    )
}

fn default_colors_for(mode: &ModeConfig) -> Vec<Rgb> {
    let hex: &[&str] = match mode {
        ModeConfig::Bitmap(_) => &DEFAULT_BITMAP_COLORS,
        ModeConfig::Glyph(_) => &DEFAULT_GLYPH_COLORS,
    };
    hex.iter()
        .filter_map(|value| Rgb::from_hex(value).ok())
        .collect()
}

fn default_cell_size() -> u32 {
    DEFAULT_CELL_SIZE
}

fn default_ramp() -> String {
    GlyphRamp::DEFAULT.to_owned()
}

fn default_glyph_resolution() -> f32 {
    DEFAULT_GLYPH_RESOLUTION
}

fn default_font_size() -> f32 {
    DEFAULT_GLYPH_FONT_SIZE
}

fn default_background_cutoff() -> f32 {
    DEFAULT_BACKGROUND_CUTOFF
}

fn default_min_brightness() -> f32 {
    DEFAULT_MIN_BRIGHTNESS
}

fn default_phase_duration_ms() -> f64 {
    DEFAULT_PHASE_DURATION_MS
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{load_and_validate_config, EngineConfig, ModeConfig, MotionStyle};
    use crate::color::Rgb;
    use crate::dither::DitherAlgorithm;
    use crate::error_codes::{find_coded_error, CONFIG_INVALID};

    #[test]
    fn bitmap_document_fills_defaults() {
        let config = EngineConfig::from_yaml_str("mode: { kind: bitmap }").expect("config");
        let ModeConfig::Bitmap(bitmap) = &config.mode else {
            panic!("expected bitmap mode");
        };
        assert_eq!(bitmap.cell_size, 6);
        assert_eq!(bitmap.dither, DitherAlgorithm::Bayer4x4);
        assert_eq!(config.colors.len(), 5);
        assert_eq!(config.background, Rgb::new(10, 10, 10));
        assert_eq!(config.phase_duration_ms, 2500.0);
        assert_eq!(config.motion, MotionStyle::Linear);
    }

    #[test]
    fn glyph_document_uses_glyph_palette() {
        let config = EngineConfig::from_yaml_str(
            r#"
mode:
  kind: glyph
  ramp: " .oO@"
  resolution: 0.2
motion: tumble
"#,
        )
        .expect("config");
        let glyph = config.glyph().expect("glyph mode");
        assert_eq!(glyph.ramp, " .oO@");
        assert_eq!(glyph.resolution, 0.2);
        assert_eq!(config.colors[0], Rgb::new(0x0d, 0x51, 0x64));
        assert_eq!(config.motion, MotionStyle::Tumble);
        assert_eq!(glyph.font_size, 10.0);
    }

    #[test]
    fn unsupported_dither_is_rejected_at_parse_time() {
        let error = EngineConfig::from_yaml_str("mode: { kind: bitmap, dither: atkinson }")
            .expect_err("unknown dither must fail");
        let coded = find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, CONFIG_INVALID);
    }

    #[test]
    fn empty_color_list_is_rejected() {
        let error = EngineConfig::from_yaml_str("mode: { kind: bitmap }\ncolors: []")
            .expect_err("empty colors must fail");
        assert!(error.to_string().contains("colors"));
    }

    #[test]
    fn invalid_hex_and_unknown_fields_are_rejected() {
        assert!(EngineConfig::from_yaml_str("mode: { kind: bitmap }\ncolors: ['#zzz']").is_err());
        assert!(EngineConfig::from_yaml_str("mode: { kind: bitmap }\nspeed: 2").is_err());
        assert!(EngineConfig::from_yaml_str("mode: { kind: bitmap, cell_size: 0 }").is_err());
        assert!(EngineConfig::from_yaml_str("mode: { kind: glyph, ramp: '' }").is_err());
        assert!(EngineConfig::from_yaml_str("mode: { kind: glyph, resolution: 0 }").is_err());
        assert!(EngineConfig::from_yaml_str("mode: { kind: bitmap }\nphase_duration_ms: 0").is_err());
    }

    #[test]
    fn relative_font_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("mono.ttf"), b"not really a font").expect("font");
        let config_path = dir.path().join("glyph.yaml");
        fs::write(
            &config_path,
            "mode:\n  kind: glyph\n  font_path: mono.ttf\n",
        )
        .expect("config");

        let config = load_and_validate_config(&config_path).expect("load");
        let font_path = config
            .glyph()
            .and_then(|glyph| glyph.font_path.clone())
            .expect("font path");
        assert_eq!(font_path, dir.path().join("mono.ttf"));
    }

    #[test]
    fn missing_font_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("glyph.yaml");
        fs::write(&config_path, "mode:\n  kind: glyph\n  font_path: gone.ttf\n").expect("config");
        let error = load_and_validate_config(&config_path).expect_err("missing font");
        assert!(find_coded_error(&error).is_some());
    }
}
