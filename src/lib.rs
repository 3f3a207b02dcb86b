pub mod animation;
pub mod color;
pub mod config;
pub mod dither;
pub mod engine;
pub mod error_codes;
pub mod glyph_font;
pub mod particles;
pub mod render;
pub mod sampler;
pub mod surface;

pub use animation::Phase;
pub use config::{load_and_validate_config, EngineConfig};
pub use engine::{Clock, FrameStats, ManualClock, SymbolEngine, SystemClock};
pub use sampler::{FrameSource, Framebuffer, GridSize, ImageSource};
pub use surface::{DrawCommand, DrawRecordSurface, PixmapSurface, SymbolSurface, TextSurface};
