//! Pixel-space primitives: positions, rectangles, RGBA buffers and
//! positioned images.

mod image;
mod rect;
mod surface;

pub use image::PixelImage;
pub use rect::{PixelPos, PixelRect};
pub use surface::{Rgba, RgbaSurface};
