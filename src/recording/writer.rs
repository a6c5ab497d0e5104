//! Disk writer: records canvas events into a gzip `.pixrec` file.
//!
//! The writer is a [`CanvasListener`]; subscribe it to a canvas (without
//! virtual chunks) and every pixel, image and validity event is framed and
//! appended to the recording.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

use super::format::{self, Frame, FrameBody, RecordingHeader};
use crate::coords::ChunkSize;
use crate::error::CanvasError;
use crate::listener::{CanvasListener, VcId};
use crate::primitives::{PixelImage, PixelPos, PixelRect, Rgba};

/// Replaces runs of characters outside `[A-Za-z0-9.-]` with one underscore.
fn sanitize_name(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  let mut in_run = false;
  for c in name.chars() {
    if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
      out.push(c);
      in_run = false;
    } else if !in_run {
      out.push('_');
      in_run = true;
    }
  }
  out
}

/// Records canvas events to disk.
pub struct CanvasDiskWriter {
  path: PathBuf,
  encoder: Mutex<Option<GzEncoder<File>>>,
  /// Last canvas time observed via `handle_set_time`, as nanoseconds since
  /// the epoch. Zero until the first one arrives; live captures stamp
  /// frames with the wall clock instead.
  time_nanos: AtomicI64,
}

impl CanvasDiskWriter {
  /// Creates a recording file under
  /// `<root>/Recordings/<sanitized-name>/<timestamp>.pixrec` and writes the
  /// header.
  ///
  /// `start` is the canvas time at the start of the session; seeks in the
  /// replayed recording are relative to it, so frame times must not go
  /// below it. For live captures pass the current wall clock.
  pub fn create(
    root: &Path,
    name: &str,
    chunk_size: ChunkSize,
    palette: &[[u8; 3]],
    start: SystemTime,
  ) -> Result<Self, CanvasError> {
    let dir = root.join("Recordings").join(sanitize_name(name));
    fs::create_dir_all(&dir)?;

    // RFC3339-like, with ':' stripped so names sort lexicographically.
    let stamp = chrono::Local::now().format("%Y-%m-%dT%H%M%S%z");
    let path = dir.join(format!("{stamp}.pixrec"));

    let file = File::create(&path)?;
    let mut encoder = GzEncoder::new(file, Compression::best());

    let header = RecordingHeader {
      time: start,
      chunk_size,
      palette: palette.to_vec(),
    };
    header.write_to(&mut encoder)?;

    Ok(Self {
      path,
      encoder: Mutex::new(Some(encoder)),
      time_nanos: AtomicI64::new(0),
    })
  }

  /// The path of the recording file.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Flushes and closes the recording. Events arriving afterwards are
  /// rejected; unsubscribe the writer first.
  pub fn finish(&self) -> Result<(), CanvasError> {
    match self.encoder.lock().take() {
      Some(encoder) => {
        encoder.finish()?;
        Ok(())
      }
      None => Ok(()),
    }
  }

  fn frame_time(&self) -> SystemTime {
    match self.time_nanos.load(Ordering::Acquire) {
      0 => SystemTime::now(),
      nanos => format::time_from_nanos(nanos),
    }
  }

  fn write(&self, body: FrameBody) -> Result<(), CanvasError> {
    let mut guard = self.encoder.lock();
    let Some(encoder) = guard.as_mut() else {
      return Err(CanvasError::Closed);
    };
    format::write_frame(
      encoder,
      &Frame {
        time: self.frame_time(),
        body,
      },
    )
  }
}

impl Drop for CanvasDiskWriter {
  fn drop(&mut self) {
    let _ = self.finish();
  }
}

impl CanvasListener for CanvasDiskWriter {
  fn handle_invalidate_all(&self) -> Result<(), CanvasError> {
    self.write(FrameBody::InvalidateAll)
  }

  fn handle_invalidate_rect(&self, rect: PixelRect, _vc_ids: &[VcId]) -> Result<(), CanvasError> {
    self.write(FrameBody::InvalidateRect { rect })
  }

  fn handle_revalidate_rect(&self, rect: PixelRect, _vc_ids: &[VcId]) -> Result<(), CanvasError> {
    self.write(FrameBody::RevalidateRect { rect })
  }

  fn handle_set_image(
    &self,
    image: &PixelImage,
    _valid: bool,
    _vc_ids: &[VcId],
  ) -> Result<(), CanvasError> {
    self.write(FrameBody::SetImage {
      image: image.clone(),
    })
  }

  fn handle_set_pixel(
    &self,
    pos: PixelPos,
    color: Rgba,
    _vc_id: Option<VcId>,
  ) -> Result<(), CanvasError> {
    self.write(FrameBody::SetPixel { pos, color })
  }

  fn handle_set_time(&self, time: SystemTime) -> Result<(), CanvasError> {
    self
      .time_nanos
      .store(format::nanos_since_epoch(time), Ordering::Release);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sanitize_collapses_invalid_runs() {
    assert_eq!(sanitize_name("pixel game #1!"), "pixel_game_1_");
    assert_eq!(sanitize_name("plain-name.v2"), "plain-name.v2");
    assert_eq!(sanitize_name("a//b"), "a_b");
  }
}
