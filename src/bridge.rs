//! Message layer for UI hosts.
//!
//! UI hosts consume canvas updates as discriminated, JSON-shaped messages
//! with a `Type` field. [`BridgeListener`] adapts the listener callbacks
//! into [`HostMessage`] values on a channel; [`ViewportCoalescer`] carries
//! viewport changes the other way without ever blocking the host or the
//! broadcast loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;
use crate::error::CanvasError;
use crate::listener::{CanvasListener, VcId};
use crate::primitives::{PixelImage, PixelPos, PixelRect, Rgba};

/// A rectangle as seen by the UI host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RectMessage {
  pub x: i32,
  pub y: i32,
  pub width: u32,
  pub height: u32,
}

impl From<PixelRect> for RectMessage {
  fn from(rect: PixelRect) -> Self {
    Self {
      x: rect.min.x,
      y: rect.min.y,
      width: rect.width() as u32,
      height: rect.height() as u32,
    }
  }
}

/// One update message for the UI host, discriminated by its `Type` field.
///
/// `SetImage` carries the raw RGBA byte array of length `4 * w * h`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum HostMessage {
  InvalidateAll,
  #[serde(rename_all = "PascalCase")]
  InvalidateRect { x: i32, y: i32, width: u32, height: u32 },
  #[serde(rename_all = "PascalCase")]
  SetImage {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    array: Vec<u8>,
  },
  #[serde(rename_all = "PascalCase")]
  SetPixel { x: i32, y: i32, r: u8, g: u8, b: u8, a: u8 },
  #[serde(rename_all = "PascalCase")]
  SignalDownload { x: i32, y: i32, width: u32, height: u32 },
  #[serde(rename_all = "PascalCase")]
  ChunksChange {
    create: Vec<RectMessage>,
    remove: Vec<RectMessage>,
  },
}

fn rect_fields(rect: PixelRect) -> (i32, i32, u32, u32) {
  (
    rect.min.x,
    rect.min.y,
    rect.width() as u32,
    rect.height() as u32,
  )
}

/// Sorted rectangle list from a tile map, so message payloads are stable.
fn rect_list(tiles: &HashMap<PixelRect, VcId>) -> Vec<RectMessage> {
  let mut rects: Vec<PixelRect> = tiles.keys().copied().collect();
  rects.sort_by_key(|rect| (rect.min.y, rect.min.x));
  rects.into_iter().map(RectMessage::from).collect()
}

/// A listener that forwards canvas events as [`HostMessage`]s.
///
/// The channel is unbounded so a slow host never stalls the broadcast
/// loop. Revalidation and time updates have no host discriminator and are
/// dropped.
pub struct BridgeListener {
  tx: Sender<HostMessage>,
}

impl BridgeListener {
  /// Creates a bridge listener and the receiving end for the host.
  pub fn channel() -> (Arc<Self>, Receiver<HostMessage>) {
    let (tx, rx) = unbounded();
    (Arc::new(Self { tx }), rx)
  }

  fn send(&self, message: HostMessage) {
    // A host that hung up just stops consuming; nothing to report.
    let _ = self.tx.send(message);
  }
}

impl CanvasListener for BridgeListener {
  fn handle_chunks_change(
    &self,
    create: &HashMap<PixelRect, VcId>,
    remove: &HashMap<PixelRect, VcId>,
  ) -> Result<(), CanvasError> {
    self.send(HostMessage::ChunksChange {
      create: rect_list(create),
      remove: rect_list(remove),
    });
    Ok(())
  }

  fn handle_invalidate_all(&self) -> Result<(), CanvasError> {
    self.send(HostMessage::InvalidateAll);
    Ok(())
  }

  fn handle_invalidate_rect(&self, rect: PixelRect, _vc_ids: &[VcId]) -> Result<(), CanvasError> {
    let (x, y, width, height) = rect_fields(rect);
    self.send(HostMessage::InvalidateRect { x, y, width, height });
    Ok(())
  }

  fn handle_set_image(
    &self,
    image: &PixelImage,
    _valid: bool,
    _vc_ids: &[VcId],
  ) -> Result<(), CanvasError> {
    let (x, y, width, height) = rect_fields(image.rect());
    self.send(HostMessage::SetImage {
      x,
      y,
      width,
      height,
      array: image.rgba_bytes().to_vec(),
    });
    Ok(())
  }

  fn handle_set_pixel(
    &self,
    pos: PixelPos,
    color: Rgba,
    _vc_id: Option<VcId>,
  ) -> Result<(), CanvasError> {
    self.send(HostMessage::SetPixel {
      x: pos.x,
      y: pos.y,
      r: color.r,
      g: color.g,
      b: color.b,
      a: color.a,
    });
    Ok(())
  }

  fn handle_signal_download(&self, rect: PixelRect, _vc_ids: &[VcId]) -> Result<(), CanvasError> {
    let (x, y, width, height) = rect_fields(rect);
    self.send(HostMessage::SignalDownload { x, y, width, height });
    Ok(())
  }
}

/// Forwards viewport changes from a host to [`Canvas::register_rects`].
///
/// `register_rects` must not be called from a listener callback and can
/// block on the broadcast loop, so hosts submit viewports here instead: a
/// capacity-one channel plus a forwarder thread. When the forwarder is
/// busy, a newer viewport replaces the one still waiting.
pub struct ViewportCoalescer {
  tx: Sender<Vec<PixelRect>>,
  rx: Receiver<Vec<PixelRect>>,
}

impl ViewportCoalescer {
  /// Spawns the forwarder for one subscribed listener.
  pub fn new(canvas: Arc<Canvas>, listener: Arc<dyn CanvasListener>) -> Self {
    let (tx, rx) = bounded(1);

    let worker_rx: Receiver<Vec<PixelRect>> = rx.clone();
    thread::spawn(move || {
      while let Ok(rects) = worker_rx.recv() {
        if canvas.register_rects(Arc::clone(&listener), rects).is_err() {
          break;
        }
      }
    });

    Self { tx, rx }
  }

  /// Submits a new viewport, replacing a pending one if necessary.
  pub fn submit(&self, rects: Vec<PixelRect>) {
    match self.tx.try_send(rects) {
      Ok(()) => {}
      Err(TrySendError::Full(rects)) => {
        // Drop the stale pending viewport and queue the newest.
        let _ = self.rx.try_recv();
        let _ = self.tx.send(rects);
      }
      Err(TrySendError::Disconnected(_)) => {}
    }
  }
}
