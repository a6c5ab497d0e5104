//! An RGBA buffer anchored at a pixel rectangle.

use super::rect::{PixelPos, PixelRect};
use super::surface::{Rgba, RgbaSurface};
use crate::error::CanvasError;

/// A positioned RGBA image.
///
/// The pixel at `rect.min` is the top-left entry of the buffer; lookups use
/// canvas-space coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelImage {
  rect: PixelRect,
  pixels: RgbaSurface,
}

impl PixelImage {
  /// Creates a transparent image covering the given rectangle.
  pub fn new(rect: PixelRect) -> Self {
    let rect = rect.canon();
    Self {
      pixels: RgbaSurface::new(rect.width() as u32, rect.height() as u32),
      rect,
    }
  }

  /// Creates an image filled with the given color.
  pub fn filled(rect: PixelRect, color: Rgba) -> Self {
    let rect = rect.canon();
    Self {
      pixels: RgbaSurface::filled(rect.width() as u32, rect.height() as u32, color),
      rect,
    }
  }

  /// Builds an image from interleaved RGBA bytes of length `4 * w * h`.
  pub fn from_rgba_bytes(rect: PixelRect, bytes: &[u8]) -> Result<Self, CanvasError> {
    let rect = rect.canon();
    let expected = rect.width() as usize * rect.height() as usize * 4;
    if bytes.len() != expected {
      return Err(CanvasError::Codec(format!(
        "image byte length {} does not match {}x{} RGBA",
        bytes.len(),
        rect.width(),
        rect.height()
      )));
    }

    let mut image = Self::new(rect);
    let width = rect.width() as u32;
    for (i, px) in bytes.chunks_exact(4).enumerate() {
      let x = (i as u32) % width;
      let y = (i as u32) / width;
      image.pixels.set(x, y, Rgba::new(px[0], px[1], px[2], px[3]));
    }
    Ok(image)
  }

  /// The rectangle this image covers.
  #[inline]
  pub fn rect(&self) -> PixelRect {
    self.rect
  }

  /// The backing surface.
  #[inline]
  pub fn surface(&self) -> &RgbaSurface {
    &self.pixels
  }

  /// Interleaved RGBA bytes in row-major order.
  #[inline]
  pub fn rgba_bytes(&self) -> &[u8] {
    self.pixels.as_bytes()
  }

  /// Returns the color at a canvas-space position, or `None` if outside.
  pub fn pixel(&self, pos: PixelPos) -> Option<Rgba> {
    if !self.rect.contains(pos) {
      return None;
    }
    let x = (pos.x as i64 - self.rect.min.x as i64) as u32;
    let y = (pos.y as i64 - self.rect.min.y as i64) as u32;
    self.pixels.get(x, y)
  }

  /// Sets the color at a canvas-space position. Returns `false` if outside.
  pub fn set_pixel(&mut self, pos: PixelPos, color: Rgba) -> bool {
    if !self.rect.contains(pos) {
      return false;
    }
    let x = (pos.x as i64 - self.rect.min.x as i64) as u32;
    let y = (pos.y as i64 - self.rect.min.y as i64) as u32;
    self.pixels.set(x, y, color)
  }

  /// Copies `src ∩ self.rect` from another image into this one.
  pub fn blit(&mut self, src: &PixelImage) {
    let Some(overlap) = self.rect.intersection(&src.rect) else {
      return;
    };
    for y in overlap.min.y..overlap.max.y {
      for x in overlap.min.x..overlap.max.x {
        let pos = PixelPos::new(x, y);
        if let Some(color) = src.pixel(pos) {
          self.set_pixel(pos, color);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pixel_lookup_uses_canvas_coordinates() {
    let mut img = PixelImage::new(PixelRect::new(-10, -10, 10, 10));
    assert!(img.set_pixel(PixelPos::new(-10, -10), Rgba::opaque(9, 9, 9)));
    assert_eq!(img.pixel(PixelPos::new(-10, -10)), Some(Rgba::opaque(9, 9, 9)));
    assert_eq!(img.pixel(PixelPos::new(10, 0)), None);
  }

  #[test]
  fn blit_copies_only_the_overlap() {
    let src = PixelImage::filled(PixelRect::new(0, 0, 4, 4), Rgba::opaque(1, 1, 1));
    let mut dst = PixelImage::new(PixelRect::new(2, 2, 6, 6));
    dst.blit(&src);
    assert_eq!(dst.pixel(PixelPos::new(2, 2)), Some(Rgba::opaque(1, 1, 1)));
    assert_eq!(dst.pixel(PixelPos::new(3, 3)), Some(Rgba::opaque(1, 1, 1)));
    assert_eq!(dst.pixel(PixelPos::new(4, 4)), Some(Rgba::TRANSPARENT));
  }

  #[test]
  fn rgba_bytes_round_trip() {
    let rect = PixelRect::new(0, 0, 2, 1);
    let img = PixelImage::from_rgba_bytes(rect, &[1, 2, 3, 255, 4, 5, 6, 255]).unwrap();
    assert_eq!(img.pixel(PixelPos::new(0, 0)), Some(Rgba::new(1, 2, 3, 255)));
    assert_eq!(img.pixel(PixelPos::new(1, 0)), Some(Rgba::new(4, 5, 6, 255)));
    assert_eq!(img.rgba_bytes(), &[1, 2, 3, 255, 4, 5, 6, 255]);
  }

  #[test]
  fn byte_length_mismatch_is_rejected() {
    let rect = PixelRect::new(0, 0, 2, 1);
    assert!(PixelImage::from_rgba_bytes(rect, &[0; 7]).is_err());
  }
}
