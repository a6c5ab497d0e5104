//! Chunk - one fixed-size tile of the canvas with its own validity and
//! download state.
//!
//! A chunk moves through a small state machine:
//! invalid -> downloading -> valid -> (invalidate) -> invalid. While a
//! download is in flight, pixel writes are applied to the buffer *and*
//! queued, so the bulk image can be replayed over when it arrives. Invalid
//! idle chunks are eventually evicted by the download scheduler.

use std::time::Instant;

use parking_lot::Mutex;

use crate::config::SchedulerTuning;
use crate::error::CanvasError;
use crate::primitives::{PixelImage, PixelPos, PixelRect, Rgba};

/// What the download scheduler should do with a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChunkQueryState {
  /// Leave the chunk alone.
  Keep,
  /// Request a download from the connection.
  Download,
  /// Remove the chunk from the canvas.
  Delete,
}

struct ChunkState {
  image: PixelImage,
  valid: bool,
  downloading: bool,
  /// Validity at the moment the current download was armed. A chunk never
  /// stays valid while downloading; this records whether the incoming
  /// image may turn out to be a no-op revalidation.
  was_valid: bool,
  replay_queue: Vec<(PixelPos, Rgba)>,
  /// When the scheduler last requested this chunk; None until it has been.
  last_query: Option<Instant>,
  last_use: Instant,
}

/// A single tile of the canvas.
///
/// The pixel rectangle is immutable; everything else lives behind the
/// chunk's own lock, independent of the canvas map lock.
pub(crate) struct Chunk {
  rect: PixelRect,
  state: Mutex<ChunkState>,
}

impl Chunk {
  /// Creates an invalid, transparent chunk covering `rect`.
  pub fn new(rect: PixelRect) -> Self {
    let now = Instant::now();
    Self {
      rect,
      state: Mutex::new(ChunkState {
        image: PixelImage::new(rect),
        valid: false,
        downloading: false,
        was_valid: false,
        replay_queue: Vec::new(),
        last_query: None,
        last_use: now,
      }),
    }
  }

  /// The pixel rectangle this chunk covers.
  #[inline]
  pub fn rect(&self) -> PixelRect {
    self.rect
  }

  /// Writes one pixel. While a download is in flight the write is also
  /// queued for replay over the incoming bulk image.
  pub fn set_pixel(&self, pos: PixelPos, color: Rgba) -> Result<(), CanvasError> {
    if !self.rect.contains(pos) {
      return Err(CanvasError::OutOfBounds(pos, self.rect));
    }

    let mut state = self.state.lock();
    state.image.set_pixel(pos, color);
    if state.downloading {
      state.replay_queue.push((pos, color));
    }
    Ok(())
  }

  /// Applies a bulk image that fully contains this chunk.
  ///
  /// Returns the chunk's resulting image when its pixels changed, or `None`
  /// when the data already matched (revalidate only). In strict mode a chunk
  /// that is neither downloading nor already matching fails with
  /// [`CanvasError::NoDownloadInProgress`].
  pub fn set_image(&self, src: &PixelImage, strict: bool) -> Result<Option<PixelImage>, CanvasError> {
    if !src.rect().contains_rect(&self.rect) {
      return Err(CanvasError::OutOfBounds(self.rect.min, src.rect()));
    }

    let mut state = self.state.lock();

    if !state.downloading {
      if state.valid && region_matches(&state.image, src, self.rect) {
        return Ok(None);
      }
      if strict {
        return Err(CanvasError::NoDownloadInProgress);
      }
    }

    // Keep the previous pixels around when the chunk was in sync as the
    // download was armed: if the bulk copy plus the replayed queue
    // reproduces them, nothing changed and the chunk is merely
    // revalidated.
    let in_sync = if state.downloading { state.was_valid } else { state.valid };
    let before = in_sync.then(|| state.image.clone());

    copy_region(&mut state.image, src, self.rect);
    let queued = std::mem::take(&mut state.replay_queue);
    for (pos, color) in queued {
      state.image.set_pixel(pos, color);
    }
    state.downloading = false;
    state.was_valid = false;
    state.valid = true;

    if let Some(before) = before {
      if state.image == before {
        return Ok(None);
      }
    }
    Ok(Some(state.image.clone()))
  }

  /// Marks the chunk as out of sync. The buffer keeps its last-known pixels
  /// for display; a pending replay queue is discarded.
  pub fn invalidate(&self) {
    let mut state = self.state.lock();
    state.valid = false;
    state.downloading = false;
    state.was_valid = false;
    state.replay_queue.clear();
  }

  /// Marks the current buffer as authoritative without changing pixels.
  ///
  /// With a download armed the mark is deferred to the matching
  /// [`Chunk::set_image`], so a chunk is never valid while downloading.
  pub fn revalidate(&self) {
    let mut state = self.state.lock();
    if state.downloading {
      state.was_valid = true;
    } else {
      state.valid = true;
    }
  }

  /// Flags the chunk as downloading. Returns true on the transition, false
  /// if a download was already in flight.
  ///
  /// Re-arming a valid chunk invalidates it; whether the incoming image
  /// actually changed anything is resolved by [`Chunk::set_image`], which
  /// revalidates without a fresh image when the pixels come out unchanged.
  pub fn signal_download(&self) -> bool {
    let mut state = self.state.lock();
    if state.downloading {
      return false;
    }
    state.downloading = true;
    state.was_valid = state.valid;
    state.valid = false;
    state.last_query = Some(Instant::now());
    true
  }

  /// Returns the current color of one pixel.
  pub fn pixel(&self, pos: PixelPos) -> Result<Rgba, CanvasError> {
    if !self.rect.contains(pos) {
      return Err(CanvasError::OutOfBounds(pos, self.rect));
    }
    let state = self.state.lock();
    Ok(state.image.pixel(pos).unwrap_or(Rgba::TRANSPARENT))
  }

  /// Returns a snapshot of the chunk image and its validity.
  pub fn image_copy(&self, only_if_valid: bool) -> Result<(PixelImage, bool), CanvasError> {
    let state = self.state.lock();
    if only_if_valid && !state.valid {
      return Err(CanvasError::InvalidSnapshot);
    }
    Ok((state.image.clone(), state.valid))
  }

  /// Returns true if the buffer matches the upstream game.
  pub fn is_valid(&self) -> bool {
    self.state.lock().valid
  }

  /// Returns true if a download is in flight.
  #[cfg(test)]
  pub fn is_downloading(&self) -> bool {
    self.state.lock().downloading
  }

  /// Decides what the scheduler should do with this chunk.
  pub fn query_state(&self, reset_timer: bool, tuning: &SchedulerTuning) -> ChunkQueryState {
    let now = Instant::now();
    let mut state = self.state.lock();

    if reset_timer {
      state.last_use = now;
    }

    if state.downloading {
      let expired = state
        .last_query
        .map_or(true, |at| now.duration_since(at) > tuning.download_abandon);
      if !expired {
        return ChunkQueryState::Keep;
      }
      // A download that never completed is abandoned so the chunk can be
      // requested again or evicted.
      state.downloading = false;
      state.was_valid = false;
      state.replay_queue.clear();
    }

    if state.valid {
      return ChunkQueryState::Keep;
    }

    if now.duration_since(state.last_use) > tuning.idle_evict {
      return ChunkQueryState::Delete;
    }

    if let Some(last_query) = state.last_query {
      if now.duration_since(last_query) < tuning.download_retry {
        return ChunkQueryState::Keep;
      }
    }

    state.last_query = Some(now);
    ChunkQueryState::Download
  }
}

/// Copies `rect` from `src` into `dst`. Both images must cover `rect`.
fn copy_region(dst: &mut PixelImage, src: &PixelImage, rect: PixelRect) {
  for y in rect.min.y..rect.max.y {
    for x in rect.min.x..rect.max.x {
      let pos = PixelPos::new(x, y);
      if let Some(color) = src.pixel(pos) {
        dst.set_pixel(pos, color);
      }
    }
  }
}

/// Returns true if `a` and `src` hold identical pixels over `rect`.
fn region_matches(a: &PixelImage, src: &PixelImage, rect: PixelRect) -> bool {
  for y in rect.min.y..rect.max.y {
    for x in rect.min.x..rect.max.x {
      let pos = PixelPos::new(x, y);
      if a.pixel(pos) != src.pixel(pos) {
        return false;
      }
    }
  }
  true
}
