//! Output strategies. The engine resolves every visible cell or particle to a
//! [`DrawCommand`] and hands it to a [`SymbolSurface`]; surfaces decide how a
//! symbol becomes pixels, records or text.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use serde::Serialize;
use tiny_skia::{
    Color, FillRule, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Rect, Transform,
};

use crate::color::{Rgb, Rgba};
use crate::dither::Symbol;
use crate::error_codes::{CodedError, FONT_LOAD_FAILED};
use crate::glyph_font::GlyphPainter;
use crate::particles::Tumble;
use crate::sampler::{Framebuffer, GridSize};

/// Per-frame facts a surface needs before the first draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub grid: GridSize,
    pub background: Rgb,
}

/// One symbol at a position in output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrawCommand {
    /// Top-left corner of the cell box.
    pub x: f32,
    pub y: f32,
    pub cell_width: f32,
    pub cell_height: f32,
    pub symbol: Symbol,
    /// Gradient color with the frame's opacity folded into alpha.
    #[serde(flatten)]
    pub color: Rgba,
    pub transform: Tumble,
}

impl DrawCommand {
    pub fn center(&self) -> (f32, f32) {
        (
            self.x + self.cell_width / 2.0,
            self.y + self.cell_height / 2.0,
        )
    }

    /// Rotation and scale about the cell center.
    pub fn cell_transform(&self) -> Transform {
        if self.transform == Tumble::IDENTITY {
            return Transform::identity();
        }
        let (cx, cy) = self.center();
        Transform::from_translate(cx, cy)
            .pre_rotate(self.transform.rotation_deg)
            .pre_scale(self.transform.scale, self.transform.scale)
            .pre_translate(-cx, -cy)
    }
}

pub trait SymbolSurface {
    /// Clears to `frame.background` and prepares for `frame.width` x `frame.height`.
    fn begin_frame(&mut self, frame: &FrameInfo) -> Result<()>;

    fn draw(&mut self, command: &DrawCommand) -> Result<()>;

    fn end_frame(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Rasterizes symbols into a tiny-skia pixmap.
pub struct PixmapSurface {
    pixmap: Pixmap,
    glyphs: Option<GlyphPainter>,
}

impl PixmapSurface {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let pixmap = Pixmap::new(width.max(1), height.max(1))
            .ok_or_else(|| anyhow!("failed to allocate output pixmap {width}x{height}"))?;
        Ok(Self {
            pixmap,
            glyphs: None,
        })
    }

    pub fn with_glyphs(mut self, painter: GlyphPainter) -> Self {
        self.glyphs = Some(painter);
        self
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn to_framebuffer(&self) -> Result<Framebuffer> {
        Framebuffer::from_pixmap(&self.pixmap)
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        let frame = self.to_framebuffer()?;
        let image = RgbaImage::from_raw(frame.width(), frame.height(), frame.into_pixels())
            .ok_or_else(|| anyhow!("output buffer does not match its dimensions"))?;
        image
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    fn paint(color: Rgba) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color_rgba8(
            color.rgb.r,
            color.rgb.g,
            color.rgb.b,
            (color.alpha.clamp(0.0, 1.0) * 255.0).round() as u8,
        );
        paint
    }

    fn draw_block(&mut self, command: &DrawCommand, size: f32) {
        let Some(rect) = Rect::from_xywh(command.x, command.y, size, size) else {
            return;
        };
        let mut paint = Self::paint(command.color);
        paint.anti_alias = command.transform != Tumble::IDENTITY;
        self.pixmap
            .fill_rect(rect, &paint, command.cell_transform(), None);
    }

    fn draw_dot(&mut self, command: &DrawCommand, radius: f32, cell_size: f32) {
        let cx = command.x + cell_size / 2.0;
        let cy = command.y + cell_size / 2.0;
        let Some(path) = PathBuilder::from_circle(cx, cy, radius) else {
            return;
        };
        let paint = Self::paint(command.color);
        self.pixmap.fill_path(
            &path,
            &paint,
            FillRule::Winding,
            command.cell_transform(),
            None,
        );
    }

    fn draw_glyph(&mut self, command: &DrawCommand, glyph: char) -> Result<()> {
        let painter = self.glyphs.as_mut().ok_or_else(|| {
            anyhow!(CodedError::config(
                FONT_LOAD_FAILED,
                "glyph symbols need a font; set mode.font_path"
            ))
        })?;
        let bitmap = painter.glyph(glyph, command.cell_height);
        let Some(texture) = bitmap.tinted(command.color.rgb) else {
            return Ok(());
        };

        let paint = PixmapPaint {
            opacity: command.color.alpha.clamp(0.0, 1.0),
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        let offset_x = command.cell_width / 2.0 - bitmap.left;
        let offset_y = command.cell_height / 2.0 - bitmap.top;
        let (cx, cy) = command.center();
        let transform = Transform::from_translate(cx, cy)
            .pre_rotate(command.transform.rotation_deg)
            .pre_scale(command.transform.scale, command.transform.scale)
            .pre_translate(-offset_x, -offset_y);
        self.pixmap
            .draw_pixmap(0, 0, texture.as_ref(), &paint, transform, None);
        Ok(())
    }
}

impl SymbolSurface for PixmapSurface {
    fn begin_frame(&mut self, frame: &FrameInfo) -> Result<()> {
        if self.pixmap.width() != frame.width || self.pixmap.height() != frame.height {
            self.pixmap = Pixmap::new(frame.width, frame.height).ok_or_else(|| {
                anyhow!(
                    "failed to allocate output pixmap {}x{}",
                    frame.width,
                    frame.height
                )
            })?;
        }
        let bg = frame.background;
        self.pixmap.fill(Color::from_rgba8(bg.r, bg.g, bg.b, 255));
        Ok(())
    }

    fn draw(&mut self, command: &DrawCommand) -> Result<()> {
        match command.symbol {
            Symbol::Block { size } => self.draw_block(command, size),
            Symbol::Dot { radius, cell_size } => self.draw_dot(command, radius, cell_size),
            Symbol::Glyph { glyph } => self.draw_glyph(command, glyph)?,
        }
        Ok(())
    }
}

/// Everything drawn in one frame, in draw order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    #[serde(flatten)]
    pub info: FrameInfo,
    pub draws: Vec<DrawCommand>,
}

/// Keeps every draw as data. Used for regression hashing and JSON export.
#[derive(Debug, Clone, Default)]
pub struct DrawRecordSurface {
    frames: Vec<FrameRecord>,
}

impl DrawRecordSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[FrameRecord] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&FrameRecord> {
        self.frames.last()
    }

    pub fn take_frames(&mut self) -> Vec<FrameRecord> {
        std::mem::take(&mut self.frames)
    }
}

impl SymbolSurface for DrawRecordSurface {
    fn begin_frame(&mut self, frame: &FrameInfo) -> Result<()> {
        self.frames.push(FrameRecord {
            info: *frame,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, command: &DrawCommand) -> Result<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| anyhow!("draw before begin_frame"))?;
        frame.draws.push(*command);
        Ok(())
    }
}

const TEXT_BLOCK: char = '#';
const TEXT_DOT: char = 'o';

/// A fixed-size grid of characters, one per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextFrame {
    columns: usize,
    rows: usize,
    lines: Vec<Vec<char>>,
}

impl TextFrame {
    pub fn blank(columns: usize, rows: usize) -> Self {
        Self {
            columns,
            rows,
            lines: vec![vec![' '; columns]; rows],
        }
    }

    pub fn get(&self, column: usize, row: usize) -> Option<char> {
        self.lines.get(row).and_then(|line| line.get(column)).copied()
    }

    pub fn set(&mut self, column: usize, row: usize, ch: char) {
        if let Some(slot) = self.lines.get_mut(row).and_then(|line| line.get_mut(column)) {
            *slot = ch;
        }
    }

    pub fn visible_count(&self) -> usize {
        self.lines
            .iter()
            .flatten()
            .filter(|ch| !ch.is_whitespace())
            .count()
    }

    pub fn to_text(&self) -> String {
        let mut value = String::with_capacity((self.columns + 1) * self.rows);
        for line in &self.lines {
            value.extend(line.iter());
            value.push('\n');
        }
        value
    }
}

/// Snaps draws to the nearest grid cell and keeps the last frame as text.
/// Draws that are mostly transparent or land off the grid are dropped.
#[derive(Debug, Clone, Default)]
pub struct TextSurface {
    frame: Option<TextFrame>,
}

impl TextSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> Option<&TextFrame> {
        self.frame.as_ref()
    }
}

impl SymbolSurface for TextSurface {
    fn begin_frame(&mut self, frame: &FrameInfo) -> Result<()> {
        self.frame = Some(TextFrame::blank(
            frame.grid.columns as usize,
            frame.grid.rows as usize,
        ));
        Ok(())
    }

    fn draw(&mut self, command: &DrawCommand) -> Result<()> {
        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| anyhow!("draw before begin_frame"))?;
        if command.color.alpha < 0.5 {
            return Ok(());
        }
        let column = (command.x / command.cell_width.max(f32::EPSILON)).round();
        let row = (command.y / command.cell_height.max(f32::EPSILON)).round();
        if column < 0.0 || row < 0.0 {
            return Ok(());
        }
        let ch = match command.symbol {
            Symbol::Block { .. } => TEXT_BLOCK,
            Symbol::Dot { .. } => TEXT_DOT,
            Symbol::Glyph { glyph } => glyph,
        };
        frame.set(column as usize, row as usize, ch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DrawCommand, DrawRecordSurface, FrameInfo, PixmapSurface, SymbolSurface, TextSurface,
    };
    use crate::color::{with_alpha, Rgb, Rgba};
    use crate::dither::Symbol;
    use crate::error_codes::{find_coded_error, FONT_LOAD_FAILED};
    use crate::particles::Tumble;
    use crate::sampler::GridSize;

    fn frame_info(width: u32, height: u32, columns: u32, rows: u32) -> FrameInfo {
        FrameInfo {
            width,
            height,
            grid: GridSize { columns, rows },
            background: Rgb::new(10, 10, 10),
        }
    }

    fn block(x: f32, y: f32, color: Rgba) -> DrawCommand {
        DrawCommand {
            x,
            y,
            cell_width: 4.0,
            cell_height: 4.0,
            symbol: Symbol::Block { size: 4.0 },
            color,
            transform: Tumble::IDENTITY,
        }
    }

    #[test]
    fn pixmap_surface_clears_and_fills_blocks() {
        let mut surface = PixmapSurface::new(8, 8).expect("surface");
        surface.begin_frame(&frame_info(8, 8, 2, 2)).expect("begin");
        surface
            .draw(&block(4.0, 0.0, Rgba::opaque(Rgb::WHITE)))
            .expect("draw");
        let frame = surface.to_framebuffer().expect("framebuffer");
        assert_eq!(frame.pixel(0, 0), [10, 10, 10, 255]);
        assert_eq!(frame.pixel(5, 1), [255, 255, 255, 255]);
        assert_eq!(frame.pixel(5, 5), [10, 10, 10, 255]);
    }

    #[test]
    fn pixmap_surface_blends_translucent_draws() {
        let mut surface = PixmapSurface::new(4, 4).expect("surface");
        let mut info = frame_info(4, 4, 1, 1);
        info.background = Rgb::BLACK;
        surface.begin_frame(&info).expect("begin");
        surface
            .draw(&block(0.0, 0.0, with_alpha(Rgb::WHITE, 0.5)))
            .expect("draw");
        let [r, _, _, a] = surface.to_framebuffer().expect("framebuffer").pixel(1, 1);
        assert!((126..=129).contains(&r), "got {r}");
        assert_eq!(a, 255);
    }

    #[test]
    fn pixmap_surface_draws_dots_centered_in_cells() {
        let mut surface = PixmapSurface::new(12, 12).expect("surface");
        surface.begin_frame(&frame_info(12, 12, 1, 1)).expect("begin");
        let dot = DrawCommand {
            symbol: Symbol::Dot {
                radius: 3.0,
                cell_size: 12.0,
            },
            cell_width: 12.0,
            cell_height: 12.0,
            ..block(0.0, 0.0, Rgba::opaque(Rgb::WHITE))
        };
        surface.draw(&dot).expect("draw");
        let frame = surface.to_framebuffer().expect("framebuffer");
        assert_eq!(frame.pixel(6, 6), [255, 255, 255, 255]);
        assert_eq!(frame.pixel(0, 0), [10, 10, 10, 255]);
    }

    #[test]
    fn pixmap_surface_reallocates_on_resize() {
        let mut surface = PixmapSurface::new(4, 4).expect("surface");
        surface.begin_frame(&frame_info(6, 3, 1, 1)).expect("begin");
        assert_eq!(
            (surface.pixmap().width(), surface.pixmap().height()),
            (6, 3)
        );
    }

    #[test]
    fn glyphs_without_a_font_fail_with_a_code() {
        let mut surface = PixmapSurface::new(4, 4).expect("surface");
        surface.begin_frame(&frame_info(4, 4, 1, 1)).expect("begin");
        let command = DrawCommand {
            symbol: Symbol::Glyph { glyph: '@' },
            ..block(0.0, 0.0, Rgba::opaque(Rgb::WHITE))
        };
        let error = surface.draw(&command).expect_err("no font");
        assert_eq!(
            find_coded_error(&error).expect("coded").code,
            FONT_LOAD_FAILED
        );
    }

    #[test]
    fn record_surface_keeps_frames_in_order() {
        let mut surface = DrawRecordSurface::new();
        assert!(surface
            .draw(&block(0.0, 0.0, Rgba::opaque(Rgb::WHITE)))
            .is_err());
        surface.begin_frame(&frame_info(8, 8, 2, 2)).expect("begin");
        surface
            .draw(&block(0.0, 0.0, Rgba::opaque(Rgb::WHITE)))
            .expect("draw");
        surface.begin_frame(&frame_info(8, 8, 2, 2)).expect("begin");
        assert_eq!(surface.frames().len(), 2);
        assert_eq!(surface.frames()[0].draws.len(), 1);
        assert!(surface.last_frame().expect("last").draws.is_empty());
    }

    #[test]
    fn record_serializes_flat_color() {
        let value = serde_json::to_value(block(1.0, 2.0, with_alpha(Rgb::WHITE, 0.25)))
            .expect("serialize");
        assert_eq!(value["color"], "#ffffff");
        assert_eq!(value["alpha"], 0.25);
        assert_eq!(value["symbol"]["kind"], "block");
    }

    #[test]
    fn text_surface_snaps_to_cells_and_skips_faint_draws() {
        let mut surface = TextSurface::new();
        surface.begin_frame(&frame_info(8, 8, 2, 2)).expect("begin");
        surface
            .draw(&block(4.0, 4.0, Rgba::opaque(Rgb::WHITE)))
            .expect("draw");
        surface
            .draw(&block(0.0, 0.0, with_alpha(Rgb::WHITE, 0.1)))
            .expect("draw");
        surface
            .draw(&block(-40.0, 0.0, Rgba::opaque(Rgb::WHITE)))
            .expect("draw");
        let frame = surface.frame().expect("frame");
        assert_eq!(frame.to_text(), "  \n #\n");
        assert_eq!(frame.visible_count(), 1);
    }
}
