use std::cell::Cell as SharedCell;
use std::rc::Rc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;

use crate::animation::{AnimationController, Phase};
use crate::color::{with_alpha, Rgba};
use crate::config::{EngineConfig, ModeConfig};
use crate::dither::{Cell, Quantizer};
use crate::error_codes::{
    CodedError, FRAMEBUFFER_INVALID, FRAME_SAMPLE_FAILED, NOT_SIZED,
};
use crate::particles::{build_layout, CellPlacement, Particle, Tumble};
use crate::sampler::{sample_grid, FrameSource, GridSize};
use crate::surface::{DrawCommand, FrameInfo, SymbolSurface};

/// Monotonic time in milliseconds.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1_000.0
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Rc<SharedCell<f64>>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_ms: Rc::new(SharedCell::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: f64) {
        self.now_ms.set(now_ms);
    }

    pub fn advance(&self, delta_ms: f64) {
        self.now_ms.set(self.now_ms.get() + delta_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now_ms.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct OutputSize {
    width: u32,
    height: u32,
    grid: GridSize,
}

/// What one tick drew.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameStats {
    pub phase: Phase,
    pub progress: f32,
    /// True when particles were drawn instead of the static grid.
    pub animated: bool,
    pub draws: usize,
    pub visible_cells: usize,
}

/// Turns sampled frames into dithered blocks, dots or glyphs and runs the
/// scatter/gather animation on top.
pub struct SymbolEngine {
    config: EngineConfig,
    quantizer: Quantizer,
    clock: Box<dyn Clock>,
    animation: AnimationController,
    size: Option<OutputSize>,
    cells: Vec<Cell>,
}

impl SymbolEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock::default())
    }

    pub fn with_clock(config: EngineConfig, clock: impl Clock + 'static) -> Result<Self> {
        config.validate()?;
        let quantizer = Quantizer::new(&config)?;
        let animation = AnimationController::new(config.phase_duration_ms, config.motion);
        log::debug!(
            "engine created: mode={} stops={} invert={}",
            config.mode.label(),
            config.colors.len(),
            config.invert
        );
        Ok(Self {
            config,
            quantizer,
            clock: Box::new(clock),
            animation,
            size: None,
            cells: Vec::new(),
        })
    }

    /// Resizes the output. Any particle layout is discarded.
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<()> {
        let grid = GridSize::for_output(&self.config, width, height)?;
        self.size = Some(OutputSize {
            width,
            height,
            grid,
        });
        self.cells.clear();
        self.cells.reserve(grid.cell_count());
        self.animation.invalidate_layout();
        log::debug!(
            "output resized to {width}x{height}, grid {}x{}",
            grid.columns,
            grid.rows
        );
        Ok(())
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        self.size.map(|size| (size.width, size.height))
    }

    pub fn grid_size(&self) -> Option<GridSize> {
        self.size.map(|size| size.grid)
    }

    pub fn start_animation(&mut self, phase: Phase) {
        let now = self.clock.now_ms();
        self.start_animation_at(phase, now);
    }

    pub fn start_animation_at(&mut self, phase: Phase, now_ms: f64) {
        self.animation.start(phase, now_ms);
    }

    pub fn animation_phase(&self) -> Phase {
        self.animation.phase()
    }

    pub fn animation_progress(&self) -> f32 {
        self.animation.progress()
    }

    pub fn is_animation_complete(&self) -> bool {
        self.animation.is_complete()
    }

    /// Forces `phase` without restarting the clock or touching the layout.
    pub fn set_animation_phase(&mut self, phase: Phase) {
        self.animation.set_phase(phase);
    }

    pub fn particles(&self) -> Option<&[Particle]> {
        self.animation.particles()
    }

    pub fn particle_count(&self) -> usize {
        self.particles().map_or(0, <[Particle]>::len)
    }

    /// Renders one frame, reading the clock once.
    pub fn tick(
        &mut self,
        source: &mut dyn FrameSource,
        surface: &mut dyn SymbolSurface,
    ) -> Result<FrameStats> {
        let now = self.clock.now_ms();
        self.render_at(now, source, surface)
    }

    pub fn render_at(
        &mut self,
        now_ms: f64,
        source: &mut dyn FrameSource,
        surface: &mut dyn SymbolSurface,
    ) -> Result<FrameStats> {
        let size = self.size.ok_or_else(|| {
            anyhow!(CodedError::tick(
                NOT_SIZED,
                "set_size must be called before rendering"
            ))
        })?;

        let frame = source
            .sample_framebuffer(size.width, size.height)
            .map_err(|error| {
                error.context(CodedError::tick(
                    FRAME_SAMPLE_FAILED,
                    format!(
                        "frame source failed at {}x{}",
                        size.width, size.height
                    ),
                ))
            })?;
        if frame.width() != size.width || frame.height() != size.height {
            return Err(anyhow!(CodedError::tick(
                FRAMEBUFFER_INVALID,
                format!(
                    "frame source returned {}x{}, expected {}x{}",
                    frame.width(),
                    frame.height(),
                    size.width,
                    size.height
                )
            )
            .with_details(json!({
                "expected": [size.width, size.height],
                "actual": [frame.width(), frame.height()],
            }))));
        }

        self.animation.advance(now_ms);

        let sampled = sample_grid(&frame, size.grid)?;
        self.cells.clear();
        for row in 0..size.grid.rows {
            for column in 0..size.grid.columns {
                self.cells
                    .push(self.quantizer.quantize(sampled.cell(column, row), column, row));
            }
        }
        let visible_cells = self.cells.iter().filter(|cell| cell.visible()).count();

        let placement = self.placement(size);
        if self.animation.needs_layout() {
            let particles = build_layout(
                &self.cells,
                size.grid,
                placement,
                size.width,
                size.height,
            );
            self.animation.install_layout(particles);
        }

        surface.begin_frame(&FrameInfo {
            width: size.width,
            height: size.height,
            grid: size.grid,
            background: self.config.background,
        })?;

        let (cell_width, cell_height) = self.cell_box(size);
        let mut draws = 0;
        let animated = match self.animation.frame() {
            Some(particles) => {
                for resolved in particles {
                    if resolved.opacity <= 0.0 {
                        continue;
                    }
                    surface.draw(&DrawCommand {
                        x: resolved.x,
                        y: resolved.y,
                        cell_width,
                        cell_height,
                        symbol: resolved.particle.symbol,
                        color: with_alpha(resolved.particle.color, resolved.opacity),
                        transform: resolved.transform,
                    })?;
                    draws += 1;
                }
                true
            }
            None => {
                let mut index = 0;
                for row in 0..size.grid.rows {
                    for column in 0..size.grid.columns {
                        let cell = self.cells[index];
                        index += 1;
                        let Some(draw) = cell.draw else {
                            continue;
                        };
                        let (x, y) = placement.origin(column, row);
                        surface.draw(&DrawCommand {
                            x,
                            y,
                            cell_width,
                            cell_height,
                            symbol: draw.symbol,
                            color: Rgba::opaque(draw.color),
                            transform: Tumble::IDENTITY,
                        })?;
                        draws += 1;
                    }
                }
                false
            }
        };
        surface.end_frame()?;

        let stats = FrameStats {
            phase: self.animation.phase(),
            progress: self.animation.progress(),
            animated,
            draws,
            visible_cells,
        };
        log::trace!(
            "tick at {now_ms:.1}ms: phase={} progress={:.3} draws={} animated={}",
            stats.phase,
            stats.progress,
            stats.draws,
            stats.animated
        );
        Ok(stats)
    }

    fn placement(&self, size: OutputSize) -> CellPlacement {
        match &self.config.mode {
            ModeConfig::Bitmap(bitmap) => CellPlacement::Block {
                cell_size: bitmap.cell_size as f32,
            },
            ModeConfig::Glyph(_) => CellPlacement::Proportional {
                grid: size.grid,
                output_width: size.width,
                output_height: size.height,
            },
        }
    }

    fn cell_box(&self, size: OutputSize) -> (f32, f32) {
        match &self.config.mode {
            ModeConfig::Bitmap(bitmap) => (bitmap.cell_size as f32, bitmap.cell_size as f32),
            ModeConfig::Glyph(_) => (
                size.width as f32 / size.grid.columns as f32,
                size.height as f32 / size.grid.rows as f32,
            ),
        }
    }
}
