//! Framebuffer capture and grid resampling.
//!
//! The engine asks a [`FrameSource`] for a straight-alpha RGBA snapshot at the
//! output size, then shrinks it to one pixel per grid cell with a single
//! nearest-neighbour draw.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::ImageReader;
use serde::Serialize;
use serde_json::json;
use tiny_skia::{
    BlendMode, ColorU8, FilterQuality, IntSize, Pixmap, PixmapPaint, Transform,
};

use crate::config::{EngineConfig, ModeConfig};
use crate::error_codes::{CodedError, FRAMEBUFFER_INVALID, OUTPUT_SIZE_INVALID};

/// Straight (non-premultiplied) RGBA pixels, row-major, 4 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!(CodedError::tick(
                FRAMEBUFFER_INVALID,
                format!("framebuffer must be non-empty, got {width}x{height}")
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|count| count.checked_mul(4))
            .ok_or_else(|| {
                anyhow!(CodedError::tick(
                    FRAMEBUFFER_INVALID,
                    format!("framebuffer {width}x{height} overflows")
                ))
            })?;
        if pixels.len() != expected {
            return Err(anyhow!(CodedError::tick(
                FRAMEBUFFER_INVALID,
                format!(
                    "framebuffer {width}x{height} needs {expected} bytes, got {}",
                    pixels.len()
                )
            )
            .with_details(json!({ "expected": expected, "actual": pixels.len() }))));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let count = (width as usize) * (height as usize);
        Self::new(width, height, rgba.repeat(count))
    }

    /// Decodes an image file into a framebuffer at its native size.
    pub fn open(path: &Path) -> Result<Self> {
        let image = ImageReader::open(path)
            .with_context(|| format!("failed opening {}", path.display()))?
            .decode()
            .with_context(|| format!("failed decoding {}", path.display()))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }

    fn to_pixmap(&self) -> Result<Pixmap> {
        let mut data = Vec::with_capacity(self.pixels.len());
        for rgba in self.pixels.chunks_exact(4) {
            let premultiplied = ColorU8::from_rgba(rgba[0], rgba[1], rgba[2], rgba[3]).premultiply();
            data.extend_from_slice(&[
                premultiplied.red(),
                premultiplied.green(),
                premultiplied.blue(),
                premultiplied.alpha(),
            ]);
        }
        let size = IntSize::from_wh(self.width, self.height)
            .ok_or_else(|| anyhow!("invalid pixmap size {}x{}", self.width, self.height))?;
        Pixmap::from_vec(data, size)
            .ok_or_else(|| anyhow!("failed to wrap {}x{} framebuffer", self.width, self.height))
    }

    pub(crate) fn from_pixmap(pixmap: &Pixmap) -> Result<Self> {
        let mut pixels = Vec::with_capacity(pixmap.data().len());
        for pixel in pixmap.pixels() {
            let straight = pixel.demultiply();
            pixels.extend_from_slice(&[
                straight.red(),
                straight.green(),
                straight.blue(),
                straight.alpha(),
            ]);
        }
        Self::new(pixmap.width(), pixmap.height(), pixels)
    }
}

/// Produces the current visual content at a requested size.
pub trait FrameSource {
    fn sample_framebuffer(&mut self, width: u32, height: u32) -> Result<Framebuffer>;
}

impl<F> FrameSource for F
where
    F: FnMut(u32, u32) -> Result<Framebuffer>,
{
    fn sample_framebuffer(&mut self, width: u32, height: u32) -> Result<Framebuffer> {
        self(width, height)
    }
}

/// A still image stretched to whatever size the engine asks for.
#[derive(Debug, Clone)]
pub struct ImageSource {
    image: Framebuffer,
}

impl ImageSource {
    pub fn new(image: Framebuffer) -> Self {
        Self { image }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Framebuffer::open(path)?))
    }

    pub fn image(&self) -> &Framebuffer {
        &self.image
    }
}

impl FrameSource for ImageSource {
    fn sample_framebuffer(&mut self, width: u32, height: u32) -> Result<Framebuffer> {
        if width == self.image.width() && height == self.image.height() {
            return Ok(self.image.clone());
        }
        resample(&self.image, width, height)
    }
}

/// Cell counts along each axis. Always at least 1x1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GridSize {
    pub columns: u32,
    pub rows: u32,
}

impl GridSize {
    pub fn for_output(config: &EngineConfig, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!(CodedError::config(
                OUTPUT_SIZE_INVALID,
                format!("output size must be positive, got {width}x{height}")
            )));
        }

        let (columns, rows) = match &config.mode {
            ModeConfig::Bitmap(bitmap) => {
                let cell = bitmap.cell_size.max(1);
                (width / cell, height / cell)
            }
            ModeConfig::Glyph(glyph) => (
                (width as f32 * glyph.resolution).floor() as u32,
                (height as f32 * glyph.resolution).floor() as u32,
            ),
        };

        Ok(Self {
            columns: columns.max(1),
            rows: rows.max(1),
        })
    }

    pub fn cell_count(self) -> usize {
        self.columns as usize * self.rows as usize
    }
}

/// One RGBA sample per grid cell.
#[derive(Debug, Clone)]
pub struct SampledGrid {
    cells: Framebuffer,
}

impl SampledGrid {
    pub fn cell(&self, column: u32, row: u32) -> [u8; 4] {
        self.cells.pixel(column, row)
    }
}

/// Shrinks `frame` to one pixel per cell.
pub fn sample_grid(frame: &Framebuffer, size: GridSize) -> Result<SampledGrid> {
    let cells = resample(frame, size.columns, size.rows)?;
    Ok(SampledGrid { cells })
}

/// Nearest-neighbour scale of `frame` to `width` x `height`.
pub fn resample(frame: &Framebuffer, width: u32, height: u32) -> Result<Framebuffer> {
    let source = frame.to_pixmap()?;
    let mut target = Pixmap::new(width, height)
        .ok_or_else(|| anyhow!("failed to allocate sample pixmap {width}x{height}"))?;

    let paint = PixmapPaint {
        opacity: 1.0,
        blend_mode: BlendMode::Source,
        quality: FilterQuality::Nearest,
    };
    let transform = Transform::from_scale(
        width as f32 / frame.width() as f32,
        height as f32 / frame.height() as f32,
    );
    target.draw_pixmap(0, 0, source.as_ref(), &paint, transform, None);

    Framebuffer::from_pixmap(&target)
}
