//! The listener capability consumed by the canvas broadcast loop.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::error::CanvasError;
use crate::primitives::{PixelImage, PixelPos, PixelRect, Rgba};

/// Listener-local id of a virtual chunk (tile).
///
/// Ids are assigned per listener, starting at 1, and are never reused:
/// removing and re-adding a tile yields a fresh id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VcId(pub u32);

/// A consumer of canvas events.
///
/// Callbacks are invoked synchronously from the broadcast loop. They must
/// return promptly and must not call back into blocking canvas operations
/// such as [`Canvas::register_rects`](crate::Canvas::register_rects), which
/// would deadlock the loop. Errors are logged and suppressed; they never
/// abort broadcasting to other listeners.
///
/// The `vc_ids` slices carry the listener's virtual-chunk ids intersecting
/// the event, and are empty for listeners without virtual chunks.
#[allow(unused_variables)]
pub trait CanvasListener: Send + Sync {
  /// Tiles entering and leaving the listener's viewport projection.
  fn handle_chunks_change(
    &self,
    create: &HashMap<PixelRect, VcId>,
    remove: &HashMap<PixelRect, VcId>,
  ) -> Result<(), CanvasError> {
    Ok(())
  }

  /// The whole canvas went out of sync (typically connection loss).
  fn handle_invalidate_all(&self) -> Result<(), CanvasError> {
    Ok(())
  }

  /// A region went out of sync.
  fn handle_invalidate_rect(&self, rect: PixelRect, vc_ids: &[VcId]) -> Result<(), CanvasError> {
    Ok(())
  }

  /// Bulk image data arrived. `valid` is false for last-known (stale) data.
  fn handle_set_image(
    &self,
    image: &PixelImage,
    valid: bool,
    vc_ids: &[VcId],
  ) -> Result<(), CanvasError> {
    Ok(())
  }

  /// A single pixel changed.
  fn handle_set_pixel(
    &self,
    pos: PixelPos,
    color: Rgba,
    vc_id: Option<VcId>,
  ) -> Result<(), CanvasError> {
    Ok(())
  }

  /// A download started for a region.
  fn handle_signal_download(&self, rect: PixelRect, vc_ids: &[VcId]) -> Result<(), CanvasError> {
    Ok(())
  }

  /// A region is in sync again without new pixel data.
  fn handle_revalidate_rect(&self, rect: PixelRect, vc_ids: &[VcId]) -> Result<(), CanvasError> {
    Ok(())
  }

  /// The canvas time advanced (wall clock for live canvases, replay time
  /// for recordings).
  fn handle_set_time(&self, time: SystemTime) -> Result<(), CanvasError> {
    Ok(())
  }
}
