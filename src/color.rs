//! Brightness and gradient math shared by every output mode.
//!
//! Everything here is pure: luminance from 8-bit RGB, an N-stop linear
//! gradient lookup and alpha tagging for draw colors.

use std::fmt;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const LUMA_R_WEIGHT: f32 = 0.30;
const LUMA_G_WEIGHT: f32 = 0.59;
const LUMA_B_WEIGHT: f32 = 0.11;

/// An opaque 8-bit color. Serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb`, `rrggbb`, `#rgb` or `rgb`.
    pub fn from_hex(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
            bail!("invalid hex color '{value}'");
        }

        match digits.len() {
            6 => {
                let channel = |range: std::ops::Range<usize>| {
                    u8::from_str_radix(&digits[range], 16)
                        .with_context(|| format!("invalid hex color '{value}'"))
                };
                Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
            }
            3 => {
                let channel = |index: usize| {
                    u8::from_str_radix(&digits[index..index + 1], 16)
                        .map(|nibble| nibble * 17)
                        .with_context(|| format!("invalid hex color '{value}'"))
                };
                Ok(Self::new(channel(0)?, channel(1)?, channel(2)?))
            }
            _ => bail!("hex color '{value}' must have 3 or 6 digits"),
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Rgb {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_hex()
    }
}

/// A draw color with straight alpha in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rgba {
    #[serde(rename = "color")]
    pub rgb: Rgb,
    pub alpha: f32,
}

impl Rgba {
    pub fn opaque(rgb: Rgb) -> Self {
        Self { rgb, alpha: 1.0 }
    }

    pub fn is_opaque(&self) -> bool {
        self.alpha >= 1.0
    }

}

/// Weighted luminance, `(0.30 R + 0.59 G + 0.11 B) / 255`.
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    (LUMA_R_WEIGHT * f32::from(r) + LUMA_G_WEIGHT * f32::from(g) + LUMA_B_WEIGHT * f32::from(b))
        / 255.0
}

/// Maps `brightness` onto the ordered `stops`.
///
/// Brightness is clamped to `[0, 1]` and scaled into `[0, N-1]`; the two
/// bracketing stops are interpolated per channel and rounded. A single stop
/// is returned unchanged. Callers validate that `stops` is non-empty; an empty
/// slice yields black.
pub fn gradient_color(brightness: f32, stops: &[Rgb]) -> Rgb {
    match stops {
        [] => Rgb::BLACK,
        [only] => *only,
        _ => {
            let last = stops.len() - 1;
            let scaled = brightness.clamp(0.0, 1.0) * last as f32;
            let lower = (scaled.floor() as usize).min(last);
            let upper = (lower + 1).min(last);
            let t = scaled - lower as f32;
            lerp_rgb(stops[lower], stops[upper], t)
        }
    }
}

fn lerp_rgb(from: Rgb, to: Rgb, t: f32) -> Rgb {
    Rgb::new(
        lerp_channel(from.r, to.r, t),
        lerp_channel(from.g, to.g, t),
        lerp_channel(from.b, to.b, t),
    )
}

fn lerp_channel(from: u8, to: u8, t: f32) -> u8 {
    let from = f32::from(from);
    let to = f32::from(to);
    (from + (to - from) * t).round().clamp(0.0, 255.0) as u8
}

/// Tags `color` with `alpha`; `alpha >= 1` keeps the color opaque.
pub fn with_alpha(color: Rgb, alpha: f32) -> Rgba {
    if alpha >= 1.0 {
        return Rgba::opaque(color);
    }
    Rgba {
        rgb: color,
        alpha: alpha.max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::{gradient_color, luminance, with_alpha, Rgb};

    fn stops() -> Vec<Rgb> {
        ["#074434", "#ABC685", "#E8FF99", "#F7F9CE", "#FFF6E7"]
            .iter()
            .map(|hex| Rgb::from_hex(hex).expect("valid hex"))
            .collect()
    }

    #[test]
    fn luminance_of_white_is_one() {
        assert!((luminance(255, 255, 255) - 1.0).abs() < 1e-6);
        assert_eq!(luminance(0, 0, 0), 0.0);
    }

    #[test]
    fn luminance_uses_fixed_weights() {
        assert!((luminance(255, 0, 0) - 0.30).abs() < 1e-6);
        assert!((luminance(0, 255, 0) - 0.59).abs() < 1e-6);
        assert!((luminance(0, 0, 255) - 0.11).abs() < 1e-6);
    }

    #[test]
    fn hex_parsing_accepts_short_and_long_forms() {
        assert_eq!(Rgb::from_hex("#0a0a0a").expect("hex"), Rgb::new(10, 10, 10));
        assert_eq!(Rgb::from_hex("FFF").expect("hex"), Rgb::WHITE);
        assert_eq!(Rgb::from_hex(" #abc ").expect("hex"), Rgb::new(0xaa, 0xbb, 0xcc));
        assert!(Rgb::from_hex("#12345").is_err());
        assert!(Rgb::from_hex("#gg0000").is_err());
        assert!(Rgb::from_hex("").is_err());
    }

    #[test]
    fn gradient_endpoints_hit_first_and_last_stop() {
        let stops = stops();
        assert_eq!(gradient_color(0.0, &stops), stops[0]);
        assert_eq!(gradient_color(1.0, &stops), stops[4]);
        assert_eq!(gradient_color(0.25, &stops), stops[1]);
    }

    #[test]
    fn gradient_interpolates_between_bracketing_stops() {
        let stops = [Rgb::new(0, 0, 0), Rgb::new(200, 100, 50)];
        assert_eq!(gradient_color(0.5, &stops), Rgb::new(100, 50, 25));
    }

    #[test]
    fn single_stop_is_returned_unconditionally() {
        let stops = [Rgb::new(1, 2, 3)];
        for brightness in [0.0, 0.3, 1.0, 7.0] {
            assert_eq!(gradient_color(brightness, &stops), stops[0]);
        }
    }

    #[test]
    fn gradient_is_continuous_at_fine_sampling() {
        let stops = stops();
        let samples = 4096;
        let mut previous = gradient_color(0.0, &stops);
        for step in 1..=samples {
            let current = gradient_color(step as f32 / samples as f32, &stops);
            for (a, b) in [
                (previous.r, current.r),
                (previous.g, current.g),
                (previous.b, current.b),
            ] {
                assert!(
                    (i32::from(a) - i32::from(b)).abs() <= 1,
                    "jump at step {step}: {previous} -> {current}"
                );
            }
            previous = current;
        }
    }

    #[test]
    fn with_alpha_keeps_opaque_colors_unchanged() {
        let color = Rgb::new(9, 8, 7);
        assert!(with_alpha(color, 1.0).is_opaque());
        assert!(with_alpha(color, 3.0).is_opaque());
        let faded = with_alpha(color, 0.25);
        assert_eq!(faded.alpha, 0.25);
        assert!(!faded.is_opaque());
        assert_eq!(with_alpha(color, -1.0).alpha, 0.0);
    }

    #[test]
    fn rgb_serializes_as_hex_string() {
        let json = serde_json::to_string(&Rgb::new(255, 0, 16)).expect("serialize");
        assert_eq!(json, "\"#ff0010\"");
        let parsed: Rgb = serde_json::from_str("\"#ff0010\"").expect("deserialize");
        assert_eq!(parsed, Rgb::new(255, 0, 16));
    }
}
