//! Error type shared across the canvas, codec and replayer.

use thiserror::Error;

use crate::coords::ChunkCoord;
use crate::primitives::{PixelPos, PixelRect};

/// Errors surfaced by canvas operations and the recording layer.
#[derive(Debug, Error)]
pub enum CanvasError {
  /// Any mutation attempted after [`Canvas::close`](crate::Canvas::close).
  #[error("canvas is closed")]
  Closed,

  /// Chunk lookup without create-if-missing on an absent coordinate.
  #[error("chunk at {0:?} does not exist")]
  ChunkNotFound(ChunkCoord),

  /// A pixel position outside the addressed region.
  #[error("position {0:?} is outside {1:?}")]
  OutOfBounds(PixelPos, PixelRect),

  /// A valid-only image copy was requested from an invalid chunk.
  #[error("chunk image is not valid")]
  InvalidSnapshot,

  /// Strict image update on a chunk that was never flagged as downloading.
  #[error("no download in progress")]
  NoDownloadInProgress,

  /// A recording header was rejected.
  #[error("recording format: {0}")]
  Format(String),

  /// A recording was written by a newer format version.
  #[error("unsupported recording version {0}")]
  VersionMismatch(u16),

  /// A recording frame could not be encoded or decoded.
  #[error("recording codec: {0}")]
  Codec(String),

  /// Underlying disk or compression failure.
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl PartialEq for CanvasError {
  fn eq(&self, other: &Self) -> bool {
    match (self, other) {
      (Self::Closed, Self::Closed) => true,
      (Self::ChunkNotFound(a), Self::ChunkNotFound(b)) => a == b,
      (Self::OutOfBounds(a0, a1), Self::OutOfBounds(b0, b1)) => a0 == b0 && a1 == b1,
      (Self::InvalidSnapshot, Self::InvalidSnapshot) => true,
      (Self::NoDownloadInProgress, Self::NoDownloadInProgress) => true,
      (Self::Format(a), Self::Format(b)) => a == b,
      (Self::VersionMismatch(a), Self::VersionMismatch(b)) => a == b,
      (Self::Codec(a), Self::Codec(b)) => a == b,
      (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
      _ => false,
    }
  }
}
