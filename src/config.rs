//! Canvas configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coords::ChunkSize;
use crate::primitives::{PixelPos, PixelRect};

/// Configuration for a [`Canvas`](crate::Canvas).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasConfig {
  /// Pixel dimensions of one chunk.
  pub chunk_size: ChunkSize,
  /// Pixel offset of the chunk grid. Positive values shift the grid toward
  /// the top-left.
  pub origin: PixelPos,
  /// The valid area of the canvas.
  pub bounds: PixelRect,
  /// Scheduler and eviction tuning.
  pub tuning: SchedulerTuning,
}

impl Default for CanvasConfig {
  fn default() -> Self {
    Self {
      chunk_size: ChunkSize::new(256, 256),
      origin: PixelPos::new(0, 0),
      bounds: PixelRect::FULL,
      tuning: SchedulerTuning::default(),
    }
  }
}

impl CanvasConfig {
  /// Convenience constructor for the common case.
  pub fn new(chunk_size: ChunkSize, origin: PixelPos, bounds: PixelRect) -> Self {
    Self {
      chunk_size,
      origin,
      bounds,
      tuning: SchedulerTuning::default(),
    }
  }
}

/// Timing and capacity knobs for the download scheduler and the broadcast
/// loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerTuning {
  /// Period of the scheduler sweep over all chunks.
  pub sweep_period: Duration,
  /// Period of the broadcast loop re-announcing listener rects.
  pub reannounce_period: Duration,
  /// Invalid chunks untouched for this long are evicted.
  pub idle_evict: Duration,
  /// Minimum delay between repeated download requests for one chunk.
  pub download_retry: Duration,
  /// Downloads that never completed are abandoned after this long.
  pub download_abandon: Duration,
  /// Capacity of the outbound chunk-request channel.
  pub request_capacity: usize,
  /// Capacity of the scheduler hint channel.
  pub hint_capacity: usize,
}

impl Default for SchedulerTuning {
  fn default() -> Self {
    Self {
      sweep_period: Duration::from_secs(10),
      reannounce_period: Duration::from_secs(60),
      idle_evict: Duration::from_secs(180),
      download_retry: Duration::from_secs(5),
      download_abandon: Duration::from_secs(60),
      request_capacity: 500,
      hint_capacity: 64,
    }
  }
}
