use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use glyphscatter::config::{load_and_validate_config, EngineConfig, ModeConfig};
use glyphscatter::error_codes::envelope_for;
use glyphscatter::render::{
    format_hash, parse_hash, render_sequence, render_text_frame, OutputFormat, RenderArgs,
    DEFAULT_FPS, DEFAULT_SHOW_MS,
};
use glyphscatter::sampler::ImageSource;

const BUILD_REV: &str = env!("GLYPHSCATTER_BUILD_REV");

#[derive(Debug, Parser)]
#[command(name = "glyphscatter")]
#[command(about = "Dithered block and glyph renderer with scatter/gather transitions")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GLYPHSCATTER_BUILD_REV"), ")"))]
struct Cli {
    /// Print failures as a JSON error envelope on stdout.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a config file.
    Check { config: PathBuf },
    /// Render a fade-in, show and fade-out cycle of a still image.
    Render {
        config: PathBuf,
        #[arg(short = 'i', long = "input")]
        input: PathBuf,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        /// Output size as WIDTHxHEIGHT; defaults to the input size.
        #[arg(long)]
        size: Option<String>,
        #[arg(long, default_value_t = DEFAULT_FPS)]
        fps: f64,
        #[arg(long = "show-ms", default_value_t = DEFAULT_SHOW_MS)]
        show_ms: f64,
        #[arg(long, default_value = "png", value_parser = parse_format)]
        format: OutputFormat,
        /// Fail unless the sequence hash matches.
        #[arg(long = "expect-hash")]
        expect_hash: Option<String>,
        /// Also write sequence.json with per-frame hashes.
        #[arg(long)]
        sidecar: bool,
    },
    /// Print the static text grid for one image.
    Preview {
        config: PathBuf,
        #[arg(short = 'i', long = "input")]
        input: PathBuf,
        #[arg(long)]
        size: Option<String>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_micros()
        .init();

    let cli = Cli::parse();
    let json = cli.json;
    log::debug!("glyphscatter {BUILD_REV}");

    let result = match cli.command {
        Commands::Check { config } => run_check(&config, json),
        Commands::Render {
            config,
            input,
            output,
            size,
            fps,
            show_ms,
            format,
            expect_hash,
            sidecar,
        } => run_render(
            &config,
            &input,
            &output,
            size.as_deref(),
            fps,
            show_ms,
            format,
            expect_hash.as_deref(),
            sidecar,
            json,
        ),
        Commands::Preview {
            config,
            input,
            size,
        } => run_preview(&config, &input, size.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            if json {
                match serde_json::to_string_pretty(&envelope_for(&error)) {
                    Ok(body) => println!("{body}"),
                    Err(_) => eprintln!("error: {error:#}"),
                }
            } else {
                eprintln!("error: {error:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run_check(config_path: &Path, json: bool) -> Result<()> {
    let config = load_and_validate_config(config_path)?;
    if json {
        let summary = serde_json::json!({
            "ok": true,
            "config": config_path.display().to_string(),
            "mode": config.mode.label(),
            "colors": config.colors.len(),
            "phase_duration_ms": config.phase_duration_ms,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("OK: {} ({})", config_path.display(), describe_mode(&config));
    println!(
        "Colors: {} stops, background {}, invert {}",
        config.colors.len(),
        config.background,
        config.invert
    );
    println!("Phase duration: {} ms", config.phase_duration_ms);
    Ok(())
}

fn run_render(
    config_path: &Path,
    input: &Path,
    output: &Path,
    size: Option<&str>,
    fps: f64,
    show_ms: f64,
    format: OutputFormat,
    expect_hash: Option<&str>,
    sidecar: bool,
    json: bool,
) -> Result<()> {
    let config = load_and_validate_config(config_path)?;
    let size = size.map(parse_size).transpose()?;
    let expected_hash = expect_hash.map(parse_hash).transpose()?;

    if !json {
        println!(
            "[glyphscatter] Rendering {} -> {} ({}, {})",
            input.display(),
            output.display(),
            describe_mode(&config),
            format.label()
        );
    }

    let summary = render_sequence(&RenderArgs {
        config: &config,
        input,
        output_dir: output,
        size,
        fps,
        show_ms,
        format,
        expected_hash,
        sidecar,
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "[glyphscatter] Grid {}x{}, {} frames",
        summary.grid.columns,
        summary.grid.rows,
        summary.frames.len()
    );
    if expected_hash.is_some() {
        println!(
            "[glyphscatter] Regression check passed: {}",
            format_hash(summary.sequence_hash)
        );
    } else {
        println!(
            "[glyphscatter] Sequence hash: {}",
            format_hash(summary.sequence_hash)
        );
    }
    Ok(())
}

fn run_preview(config_path: &Path, input: &Path, size: Option<&str>) -> Result<()> {
    let config = load_and_validate_config(config_path)?;
    let mut source = ImageSource::open(input)?;
    let (width, height) = match size {
        Some(raw) => parse_size(raw)?,
        None => (source.image().width(), source.image().height()),
    };
    let text = render_text_frame(&config, &mut source, width, height)
        .with_context(|| format!("failed to preview {}", input.display()))?;
    print!("{text}");
    Ok(())
}

fn describe_mode(config: &EngineConfig) -> String {
    match &config.mode {
        ModeConfig::Bitmap(bitmap) => {
            format!("bitmap, {}px cells, {}", bitmap.cell_size, bitmap.dither)
        }
        ModeConfig::Glyph(glyph) => format!(
            "glyph, ramp {:?}, resolution {}",
            glyph.ramp, glyph.resolution
        ),
    }
}

fn parse_format(raw: &str) -> Result<OutputFormat> {
    raw.parse()
}

fn parse_size(raw: &str) -> Result<(u32, u32)> {
    let value = raw.trim();
    let (width_raw, height_raw) = value
        .split_once('x')
        .or_else(|| value.split_once('X'))
        .ok_or_else(|| anyhow!("invalid --size '{}': expected WIDTHxHEIGHT", raw))?;
    let width = width_raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid --size '{}': width must be an integer", raw))?;
    let height = height_raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid --size '{}': height must be an integer", raw))?;
    if width == 0 || height == 0 {
        bail!("invalid --size '{}': width and height must be > 0", raw);
    }
    Ok((width, height))
}
