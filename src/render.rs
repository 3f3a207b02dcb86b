//! Offline rendering of a full fade-in / show / fade-out cycle on a manual
//! clock, with per-frame and sequence hashes for regression checks.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::animation::Phase;
use crate::config::{EngineConfig, ModeConfig};
use crate::dither::Symbol;
use crate::engine::{Clock, FrameStats, ManualClock, SymbolEngine};
use crate::error_codes::{CodedError, CONFIG_INVALID};
use crate::glyph_font::GlyphPainter;
use crate::sampler::{FrameSource, GridSize, ImageSource};
use crate::surface::{
    DrawCommand, DrawRecordSurface, FrameInfo, PixmapSurface, SymbolSurface, TextSurface,
};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0001_0000_01b3;
pub const DEFAULT_FPS: f64 = 30.0;
pub const DEFAULT_SHOW_MS: f64 = 1_000.0;
const SIDECAR_FILE: &str = "sequence.json";
const RECORDS_FILE: &str = "records.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Png,
    Records,
    Text,
}

impl OutputFormat {
    pub fn label(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Records => "records",
            Self::Text => "text",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "png" => Ok(Self::Png),
            "records" | "jsonl" => Ok(Self::Records),
            "text" | "txt" => Ok(Self::Text),
            other => Err(anyhow!(
                "unknown output format '{other}' (expected png, records or text)"
            )),
        }
    }
}

pub struct RenderArgs<'a> {
    pub config: &'a EngineConfig,
    pub input: &'a Path,
    pub output_dir: &'a Path,
    /// Output size; defaults to the input image size.
    pub size: Option<(u32, u32)>,
    pub fps: f64,
    pub show_ms: f64,
    pub format: OutputFormat,
    pub expected_hash: Option<u64>,
    pub sidecar: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameSummary {
    pub index: u32,
    pub time_ms: f64,
    #[serde(flatten)]
    pub stats: FrameStats,
    #[serde(serialize_with = "serialize_hash")]
    pub hash: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderSummary {
    pub mode: &'static str,
    pub format: &'static str,
    pub width: u32,
    pub height: u32,
    pub grid: GridSize,
    pub frames: Vec<FrameSummary>,
    #[serde(serialize_with = "serialize_hash")]
    pub sequence_hash: u64,
}

/// Renders fade-in until complete, `show_ms` of show, then fade-out until
/// complete, writing one output per frame.
pub fn render_sequence(args: &RenderArgs<'_>) -> Result<RenderSummary> {
    if !args.fps.is_finite() || args.fps <= 0.0 {
        bail!("fps must be > 0, got {}", args.fps);
    }
    if !args.show_ms.is_finite() || args.show_ms < 0.0 {
        bail!("show duration must be >= 0, got {}", args.show_ms);
    }

    let mut source = ImageSource::open(args.input)?;
    let (width, height) = args
        .size
        .unwrap_or((source.image().width(), source.image().height()));

    let clock = ManualClock::new(0.0);
    let mut engine = SymbolEngine::with_clock(args.config.clone(), clock.clone())?;
    engine.set_size(width, height)?;
    let grid = engine
        .grid_size()
        .ok_or_else(|| anyhow!("engine has no grid after sizing"))?;

    fs::create_dir_all(args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;
    let mut sink = OutputSink::new(args.format, args.config, args.output_dir, width, height)?;

    let frame_ms = 1_000.0 / args.fps;
    let mut frames = Vec::new();
    let mut render = |engine: &mut SymbolEngine, sink: &mut OutputSink| -> Result<()> {
        let index = frames.len() as u32;
        let mut hashing = HashingSurface::new(sink.surface());
        let stats = engine
            .tick(&mut source, &mut hashing)
            .with_context(|| format!("frame {index} failed"))?;
        let hash = hashing.finish();
        sink.write_frame(index)?;
        frames.push(FrameSummary {
            index,
            time_ms: clock.now_ms(),
            stats,
            hash,
        });
        clock.advance(frame_ms);
        Ok(())
    };

    engine.start_animation(Phase::FadeIn);
    loop {
        render(&mut engine, &mut sink)?;
        if engine.is_animation_complete() {
            break;
        }
    }

    engine.start_animation(Phase::Show);
    let show_frames = (args.show_ms / frame_ms).round() as u32;
    for _ in 0..show_frames {
        render(&mut engine, &mut sink)?;
    }

    engine.start_animation(Phase::FadeOut);
    loop {
        render(&mut engine, &mut sink)?;
        if engine.is_animation_complete() {
            break;
        }
    }
    sink.finish()?;

    let sequence_hash = sequence_hash(frames.iter().map(|frame| frame.hash));
    let summary = RenderSummary {
        mode: args.config.mode.label(),
        format: args.format.label(),
        width,
        height,
        grid,
        frames,
        sequence_hash,
    };
    log::debug!(
        "rendered {} frames at {}x{} ({}): {}",
        summary.frames.len(),
        width,
        height,
        summary.format,
        format_hash(sequence_hash)
    );

    if args.sidecar {
        let sidecar_path = args.output_dir.join(SIDECAR_FILE);
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(&sidecar_path, json)
            .with_context(|| format!("failed to write {}", sidecar_path.display()))?;
    }

    if let Some(expected) = args.expected_hash {
        if expected != sequence_hash {
            bail!(
                "sequence hash mismatch: expected {}, got {}",
                format_hash(expected),
                format_hash(sequence_hash)
            );
        }
    }

    Ok(summary)
}

/// Renders one static frame of `source` and returns the text grid.
pub fn render_text_frame(
    config: &EngineConfig,
    source: &mut dyn FrameSource,
    width: u32,
    height: u32,
) -> Result<String> {
    let mut engine = SymbolEngine::with_clock(config.clone(), ManualClock::default())?;
    engine.set_size(width, height)?;
    let mut surface = TextSurface::new();
    engine.tick(source, &mut surface)?;
    surface
        .frame()
        .map(|frame| frame.to_text())
        .ok_or_else(|| anyhow!("text surface produced no frame"))
}

enum OutputSink {
    Png {
        surface: PixmapSurface,
        dir: PathBuf,
    },
    Records {
        surface: DrawRecordSurface,
        writer: BufWriter<File>,
    },
    Text {
        surface: TextSurface,
        dir: PathBuf,
    },
}

impl OutputSink {
    fn new(
        format: OutputFormat,
        config: &EngineConfig,
        dir: &Path,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        match format {
            OutputFormat::Png => {
                let mut surface = PixmapSurface::new(width, height)?;
                if let ModeConfig::Glyph(glyph) = &config.mode {
                    let painter = GlyphPainter::for_config(glyph)?.ok_or_else(|| {
                        anyhow!(CodedError::config(
                            CONFIG_INVALID,
                            "mode.font_path: png output in glyph mode needs a font"
                        )
                        .with_details(json!({ "field": "mode.font_path" })))
                    })?;
                    surface = surface.with_glyphs(painter);
                }
                Ok(Self::Png {
                    surface,
                    dir: dir.to_path_buf(),
                })
            }
            OutputFormat::Records => {
                let path = dir.join(RECORDS_FILE);
                let file = File::create(&path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                Ok(Self::Records {
                    surface: DrawRecordSurface::new(),
                    writer: BufWriter::new(file),
                })
            }
            OutputFormat::Text => Ok(Self::Text {
                surface: TextSurface::new(),
                dir: dir.to_path_buf(),
            }),
        }
    }

    fn surface(&mut self) -> &mut dyn SymbolSurface {
        match self {
            Self::Png { surface, .. } => surface,
            Self::Records { surface, .. } => surface,
            Self::Text { surface, .. } => surface,
        }
    }

    fn write_frame(&mut self, index: u32) -> Result<()> {
        match self {
            Self::Png { surface, dir } => surface.save_png(&dir.join(frame_file(index, "png"))),
            Self::Records { surface, writer } => {
                for record in surface.take_frames() {
                    serde_json::to_writer(&mut *writer, &record)?;
                    writer.write_all(b"\n")?;
                }
                Ok(())
            }
            Self::Text { surface, dir } => {
                let text = surface
                    .frame()
                    .map(|frame| frame.to_text())
                    .unwrap_or_default();
                let path = dir.join(frame_file(index, "txt"));
                fs::write(&path, text)
                    .with_context(|| format!("failed to write {}", path.display()))
            }
        }
    }

    fn finish(self) -> Result<()> {
        if let Self::Records { mut writer, .. } = self {
            writer.flush()?;
        }
        Ok(())
    }
}

fn frame_file(index: u32, extension: &str) -> String {
    format!("frame_{index:05}.{extension}")
}

/// Passes draws through while hashing them in a fixed byte layout.
pub struct HashingSurface<'a> {
    inner: &'a mut dyn SymbolSurface,
    hash: u64,
}

impl<'a> HashingSurface<'a> {
    pub fn new(inner: &'a mut dyn SymbolSurface) -> Self {
        Self {
            inner,
            hash: FNV_OFFSET_BASIS,
        }
    }

    pub fn finish(&self) -> u64 {
        self.hash
    }

    fn mix(&mut self, bytes: &[u8]) {
        self.hash = fnv1a64_extend(self.hash, bytes);
    }
}

impl SymbolSurface for HashingSurface<'_> {
    fn begin_frame(&mut self, frame: &FrameInfo) -> Result<()> {
        self.hash = FNV_OFFSET_BASIS;
        self.mix(&frame.width.to_le_bytes());
        self.mix(&frame.height.to_le_bytes());
        self.mix(&[frame.background.r, frame.background.g, frame.background.b]);
        self.inner.begin_frame(frame)
    }

    fn draw(&mut self, command: &DrawCommand) -> Result<()> {
        for value in [command.x, command.y, command.cell_width, command.cell_height] {
            self.mix(&value.to_bits().to_le_bytes());
        }
        match command.symbol {
            Symbol::Block { size } => {
                self.mix(&[0]);
                self.mix(&size.to_bits().to_le_bytes());
            }
            Symbol::Dot { radius, cell_size } => {
                self.mix(&[1]);
                self.mix(&radius.to_bits().to_le_bytes());
                self.mix(&cell_size.to_bits().to_le_bytes());
            }
            Symbol::Glyph { glyph } => {
                self.mix(&[2]);
                self.mix(&u32::from(glyph).to_le_bytes());
            }
        }
        let color = command.color;
        self.mix(&[color.rgb.r, color.rgb.g, color.rgb.b]);
        self.mix(&color.alpha.to_bits().to_le_bytes());
        self.mix(&command.transform.rotation_deg.to_bits().to_le_bytes());
        self.mix(&command.transform.scale.to_bits().to_le_bytes());
        self.inner.draw(command)
    }

    fn end_frame(&mut self) -> Result<()> {
        self.inner.end_frame()
    }
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    fnv1a64_extend(FNV_OFFSET_BASIS, bytes)
}

fn fnv1a64_extend(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub fn sequence_hash(frame_hashes: impl IntoIterator<Item = u64>) -> u64 {
    let mut bytes = Vec::new();
    for hash in frame_hashes {
        bytes.extend_from_slice(&hash.to_le_bytes());
    }
    fnv1a64(&bytes)
}

pub fn format_hash(hash: u64) -> String {
    format!("0x{hash:016x}")
}

pub fn parse_hash(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hash '{raw}'"))
}

fn serialize_hash<S>(hash: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_hash(*hash))
}

#[cfg(test)]
mod tests {
    use super::{fnv1a64, format_hash, parse_hash, sequence_hash, HashingSurface, OutputFormat};
    use crate::color::{Rgb, Rgba};
    use crate::dither::Symbol;
    use crate::particles::Tumble;
    use crate::sampler::GridSize;
    use crate::surface::{DrawCommand, DrawRecordSurface, FrameInfo, SymbolSurface};

    fn frame_hash(x: f32) -> u64 {
        let mut inner = DrawRecordSurface::new();
        let mut surface = HashingSurface::new(&mut inner);
        surface
            .begin_frame(&FrameInfo {
                width: 8,
                height: 8,
                grid: GridSize {
                    columns: 2,
                    rows: 2,
                },
                background: Rgb::BLACK,
            })
            .expect("begin");
        surface
            .draw(&DrawCommand {
                x,
                y: 0.0,
                cell_width: 4.0,
                cell_height: 4.0,
                symbol: Symbol::Glyph { glyph: '#' },
                color: Rgba::opaque(Rgb::WHITE),
                transform: Tumble::IDENTITY,
            })
            .expect("draw");
        let hash = surface.finish();
        assert_eq!(inner.frames()[0].draws.len(), 1);
        hash
    }

    #[test]
    fn fnv_matches_reference_vectors() {
        assert_eq!(fnv1a64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn draw_hash_is_stable_and_position_sensitive() {
        assert_eq!(frame_hash(0.0), frame_hash(0.0));
        assert_ne!(frame_hash(0.0), frame_hash(4.0));
    }

    #[test]
    fn sequence_hash_depends_on_order() {
        assert_ne!(sequence_hash([1, 2]), sequence_hash([2, 1]));
    }

    #[test]
    fn hashes_round_trip_through_text() {
        let hash = 0x0123_4567_89ab_cdef;
        assert_eq!(format_hash(hash), "0x0123456789abcdef");
        assert_eq!(parse_hash(&format_hash(hash)).expect("parse"), hash);
        assert_eq!(parse_hash("ff").expect("parse"), 255);
        assert!(parse_hash("0xzz").is_err());
    }

    #[test]
    fn output_formats_parse() {
        assert_eq!("png".parse::<OutputFormat>().expect("format"), OutputFormat::Png);
        assert_eq!("jsonl".parse::<OutputFormat>().expect("format"), OutputFormat::Records);
        assert!("gif".parse::<OutputFormat>().is_err());
    }
}
