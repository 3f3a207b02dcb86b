//! Deterministic scatter layouts for the fade phases.
//!
//! A layout is built from one quantized grid snapshot. Every cell consumes a
//! sequence index whether it draws or not, so which cells are skipped never
//! shifts the pseudo-random stream of the cells that remain.

use serde::Serialize;

use crate::color::Rgb;
use crate::dither::{Cell, Symbol};
use crate::sampler::GridSize;

const SEED_STEP: f64 = 0.1;
const HASH_X: f64 = 12.9898;
const HASH_Y: f64 = 78.233;
const HASH_SCALE: f64 = 43758.5453;

const SCATTER_MIN_DISTANCE: f64 = 300.0;
const SCATTER_DISTANCE_RANGE: f64 = 500.0;
pub const MAX_DELAY: f32 = 0.4;

const TUMBLE_ROTATION_OFFSET: f64 = 200.0;
const TUMBLE_SCALE_OFFSET: f64 = 300.0;
const TUMBLE_MAX_DEGREES: f32 = 720.0;
const TUMBLE_MAX_SCALE: f32 = 2.0;

/// Fractional part of the trigonometric hash of `seed`, in `[0, 1)`.
pub fn hash_unit(seed: f64) -> f64 {
    let value = (seed * HASH_X + seed * HASH_Y).sin() * HASH_SCALE;
    value - value.floor()
}

/// The scatter scalar for sequence index `index`.
pub fn seeded_unit(index: u32) -> f64 {
    hash_unit(f64::from(index) * SEED_STEP)
}

/// Where particle `index` waits before fading in, relative to the output center.
pub fn scatter_origin(index: u32, output_width: u32, output_height: u32) -> (f32, f32) {
    let normalized = seeded_unit(index);
    let theta = normalized * std::f64::consts::TAU;
    let distance = SCATTER_MIN_DISTANCE + normalized * SCATTER_DISTANCE_RANGE;
    let center_x = f64::from(output_width) / 2.0;
    let center_y = f64::from(output_height) / 2.0;
    (
        (center_x + theta.cos() * distance) as f32,
        (center_y + theta.sin() * distance) as f32,
    )
}

/// Start delay in `[0, 0.4]`; cells near the center move first.
pub fn particle_delay(final_x: f32, final_y: f32, output_width: u32, output_height: u32) -> f32 {
    let width = f64::from(output_width);
    let height = f64::from(output_height);
    let dx = f64::from(final_x) - width / 2.0;
    let dy = f64::from(final_y) - height / 2.0;
    let max_distance = ((width * width + height * height).sqrt() / 2.0).max(1.0);
    let delay = (dx * dx + dy * dy).sqrt() / max_distance * f64::from(MAX_DELAY);
    (delay as f32).clamp(0.0, MAX_DELAY)
}

/// Spin and scale a tumbling particle starts from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tumble {
    pub rotation_deg: f32,
    pub scale: f32,
}

impl Tumble {
    pub const IDENTITY: Tumble = Tumble {
        rotation_deg: 0.0,
        scale: 1.0,
    };

    pub fn for_index(index: u32) -> Self {
        let seed = f64::from(index) * SEED_STEP;
        let rotation = hash_unit(seed + TUMBLE_ROTATION_OFFSET) as f32 - 0.5;
        let scale = hash_unit(seed + TUMBLE_SCALE_OFFSET) as f32;
        Self {
            rotation_deg: rotation * TUMBLE_MAX_DEGREES,
            scale: scale * TUMBLE_MAX_SCALE,
        }
    }

    /// Blend toward identity as `settled` goes from 0 to 1.
    pub fn settle(self, settled: f32) -> Self {
        Self {
            rotation_deg: self.rotation_deg * (1.0 - settled),
            scale: self.scale + (1.0 - self.scale) * settled,
        }
    }
}

/// Maps a grid cell to its top-left corner in output pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellPlacement {
    /// Fixed-size square cells.
    Block { cell_size: f32 },
    /// Cells spread proportionally across the output.
    Proportional {
        grid: GridSize,
        output_width: u32,
        output_height: u32,
    },
}

impl CellPlacement {
    pub fn origin(&self, column: u32, row: u32) -> (f32, f32) {
        match *self {
            Self::Block { cell_size } => (column as f32 * cell_size, row as f32 * cell_size),
            Self::Proportional {
                grid,
                output_width,
                output_height,
            } => (
                column as f32 / grid.columns as f32 * output_width as f32,
                row as f32 / grid.rows as f32 * output_height as f32,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Particle {
    pub index: u32,
    pub start_x: f32,
    pub start_y: f32,
    pub final_x: f32,
    pub final_y: f32,
    pub delay: f32,
    pub color: Rgb,
    pub symbol: Symbol,
    pub tone: f32,
    pub tumble: Tumble,
}

/// Builds one particle per visible cell, scanning rows top to bottom.
pub fn build_layout(
    cells: &[Cell],
    grid: GridSize,
    placement: CellPlacement,
    output_width: u32,
    output_height: u32,
) -> Vec<Particle> {
    let mut particles = Vec::new();
    let mut index = 0_u32;

    for row in 0..grid.rows {
        for column in 0..grid.columns {
            let cell_index = index;
            index += 1;

            let Some(draw) = cells
                .get(cell_index as usize)
                .and_then(|cell| cell.draw)
            else {
                continue;
            };

            let (final_x, final_y) = placement.origin(column, row);
            let (start_x, start_y) = scatter_origin(cell_index, output_width, output_height);
            particles.push(Particle {
                index: cell_index,
                start_x,
                start_y,
                final_x,
                final_y,
                delay: particle_delay(final_x, final_y, output_width, output_height),
                color: draw.color,
                symbol: draw.symbol,
                tone: draw.tone,
                tumble: Tumble::for_index(cell_index),
            });
        }
    }

    log::debug!(
        "built particle layout: {} of {} cells visible at {}x{}",
        particles.len(),
        grid.cell_count(),
        output_width,
        output_height
    );
    particles
}

#[cfg(test)]
mod tests {
    use super::{
        build_layout, hash_unit, particle_delay, scatter_origin, seeded_unit, CellPlacement,
        Tumble, MAX_DELAY,
    };
    use crate::color::Rgb;
    use crate::dither::{Cell, CellDraw, Symbol};
    use crate::sampler::GridSize;

    fn visible_cell() -> Cell {
        Cell {
            brightness: 0.9,
            opaque: true,
            draw: Some(CellDraw {
                symbol: Symbol::Block { size: 6.0 },
                color: Rgb::WHITE,
                tone: 0.9,
            }),
        }
    }

    fn hidden_cell() -> Cell {
        Cell {
            brightness: 0.0,
            opaque: false,
            draw: None,
        }
    }

    #[test]
    fn seeded_unit_is_reproducible_and_in_range() {
        for index in 0..2048 {
            let first = seeded_unit(index);
            let second = seeded_unit(index);
            assert_eq!(first.to_bits(), second.to_bits());
            assert!((0.0..1.0).contains(&first), "index {index} gave {first}");
        }
    }

    #[test]
    fn index_zero_hashes_to_zero() {
        assert_eq!(seeded_unit(0), 0.0);
        assert_eq!(hash_unit(0.0), 0.0);
    }

    #[test]
    fn scatter_origin_is_bit_identical_across_calls() {
        for index in [0, 1, 17, 999, 65_535] {
            let (ax, ay) = scatter_origin(index, 640, 480);
            let (bx, by) = scatter_origin(index, 640, 480);
            assert_eq!(ax.to_bits(), bx.to_bits());
            assert_eq!(ay.to_bits(), by.to_bits());
        }
    }

    #[test]
    fn scatter_origin_stays_within_its_radial_band() {
        for index in 0..512 {
            let (x, y) = scatter_origin(index, 200, 100);
            let distance = ((f64::from(x) - 100.0).powi(2) + (f64::from(y) - 50.0).powi(2)).sqrt();
            assert!((299.9..=800.1).contains(&distance), "index {index}: {distance}");
        }
    }

    #[test]
    fn delay_grows_away_from_center() {
        assert_eq!(particle_delay(50.0, 50.0, 100, 100), 0.0);
        let corner = particle_delay(0.0, 0.0, 100, 100);
        assert!((corner - MAX_DELAY).abs() < 1e-5);
        assert!(particle_delay(25.0, 25.0, 100, 100) < corner);
    }

    #[test]
    fn degenerate_output_keeps_delay_finite() {
        let delay = particle_delay(0.0, 0.0, 0, 0);
        assert!(delay.is_finite());
        assert_eq!(delay, 0.0);
    }

    #[test]
    fn layout_skips_hidden_cells_but_keeps_their_index() {
        let cells = vec![hidden_cell(), visible_cell(), hidden_cell(), visible_cell()];
        let grid = GridSize {
            columns: 2,
            rows: 2,
        };
        let particles = build_layout(
            &cells,
            grid,
            CellPlacement::Block { cell_size: 6.0 },
            12,
            12,
        );
        assert_eq!(particles.len(), 2);
        assert_eq!(particles[0].index, 1);
        assert_eq!((particles[0].final_x, particles[0].final_y), (6.0, 0.0));
        assert_eq!(particles[1].index, 3);
        assert_eq!((particles[1].final_x, particles[1].final_y), (6.0, 6.0));
        assert_eq!(
            (particles[1].start_x, particles[1].start_y),
            scatter_origin(3, 12, 12)
        );
    }

    #[test]
    fn proportional_placement_spreads_cells_over_output() {
        let placement = CellPlacement::Proportional {
            grid: GridSize {
                columns: 15,
                rows: 6,
            },
            output_width: 100,
            output_height: 40,
        };
        let (x, y) = placement.origin(3, 3);
        assert!((x - 20.0).abs() < 1e-4);
        assert!((y - 20.0).abs() < 1e-4);
    }

    #[test]
    fn tumble_settles_to_identity() {
        let tumble = Tumble::for_index(42);
        assert!(tumble.rotation_deg.abs() <= 360.0);
        assert!((0.0..=2.0).contains(&tumble.scale));
        let landed = tumble.settle(1.0);
        assert!(landed.rotation_deg.abs() < 1e-6);
        assert!((landed.scale - 1.0).abs() < 1e-6);
        let launched = tumble.settle(0.0);
        assert!((launched.rotation_deg - tumble.rotation_deg).abs() < 1e-6);
        assert!((launched.scale - tumble.scale).abs() < 1e-6);
    }
}
