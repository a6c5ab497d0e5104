//! Events flowing from canvas mutators to the broadcast loop.

use std::sync::Arc;
use std::time::SystemTime;

use crate::listener::CanvasListener;
use crate::primitives::{PixelImage, PixelPos, PixelRect, Rgba};

/// One event on the canvas event channel.
///
/// Mutation events are enqueued strictly after the chunk state change they
/// describe, so a listener reading canvas state from a callback observes a
/// state at least as recent as the event.
pub(crate) enum CanvasEvent {
  SetPixel {
    pos: PixelPos,
    color: Rgba,
  },
  SetImage {
    image: Arc<PixelImage>,
  },
  InvalidateRect {
    rect: PixelRect,
  },
  InvalidateAll,
  RevalidateRect {
    rect: PixelRect,
  },
  SignalDownload {
    rect: PixelRect,
  },
  SetTime {
    time: SystemTime,
  },
  Subscribe {
    listener: Arc<dyn CanvasListener>,
    use_virtual_chunks: bool,
  },
  Unsubscribe {
    listener: Arc<dyn CanvasListener>,
  },
  ListenerRects {
    listener: Arc<dyn CanvasListener>,
    rects: Vec<PixelRect>,
  },
}
