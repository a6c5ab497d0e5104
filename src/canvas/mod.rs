//! Canvas - the chunked pixel surface between a game connection and its
//! listeners.
//!
//! A canvas owns a map of chunk coordinate to [`Chunk`], an event channel
//! drained by its broadcast loop, and an outbound chunk-request channel
//! drained by the game connection. Mutators update chunk state first and
//! enqueue the matching event second, so listeners never observe an event
//! ahead of the state it describes.

mod broadcast;
mod event;
mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;

use crate::chunk::Chunk;
use crate::config::{CanvasConfig, SchedulerTuning};
use crate::coords::{ChunkCoord, ChunkGrid, ChunkRect};
use crate::error::CanvasError;
use crate::listener::CanvasListener;
use crate::primitives::{PixelImage, PixelPos, PixelRect, Rgba};

use event::CanvasEvent;

/// A download request for a single chunk, identified by its pixel
/// rectangle. The game connection drains these and answers with
/// [`Canvas::signal_download`] followed by [`Canvas::set_image`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRequest {
  pub rect: PixelRect,
}

/// Close gate: checked by every mutator, holds the event sender so closing
/// disconnects the broadcast loop once in-flight events drain.
struct Gate {
  closed: bool,
  event_tx: Option<Sender<CanvasEvent>>,
}

/// The shared canvas.
pub struct Canvas {
  grid: ChunkGrid,
  bounds: PixelRect,
  tuning: SchedulerTuning,
  chunks: RwLock<HashMap<ChunkCoord, Arc<Chunk>>>,
  time: RwLock<SystemTime>,
  gate: RwLock<Gate>,
}

impl Canvas {
  /// Creates a canvas and spawns its broadcast loop and download scheduler.
  ///
  /// The returned receiver carries chunk-download requests for the game
  /// connection.
  pub fn new(config: CanvasConfig) -> (Arc<Self>, Receiver<ChunkRequest>) {
    let (event_tx, event_rx) = bounded(0);
    let (request_tx, request_rx) = bounded(config.tuning.request_capacity);
    let (hint_tx, hint_rx) = bounded(config.tuning.hint_capacity);

    let canvas = Arc::new(Self {
      grid: ChunkGrid::new(config.chunk_size, config.origin),
      bounds: config.bounds,
      tuning: config.tuning,
      chunks: RwLock::new(HashMap::new()),
      time: RwLock::new(SystemTime::now()),
      gate: RwLock::new(Gate {
        closed: false,
        event_tx: Some(event_tx),
      }),
    });

    let broadcaster = Arc::clone(&canvas);
    thread::spawn(move || broadcast::broadcast_loop(broadcaster, event_rx, hint_tx));

    let scheduler = Arc::clone(&canvas);
    thread::spawn(move || scheduler::scheduler_loop(scheduler, hint_rx, request_tx));

    (canvas, request_rx)
  }

  /// The chunk grid of this canvas.
  #[inline]
  pub fn grid(&self) -> ChunkGrid {
    self.grid
  }

  /// The valid pixel area of this canvas.
  #[inline]
  pub fn bounds(&self) -> PixelRect {
    self.bounds
  }

  #[inline]
  pub(crate) fn tuning(&self) -> &SchedulerTuning {
    &self.tuning
  }

  /// Subscribes a listener to canvas events.
  ///
  /// With `use_virtual_chunks` the canvas manages a projection of the
  /// canvas for the listener: it announces tiles entering and leaving the
  /// listener's viewport via `handle_chunks_change` and filters events down
  /// to the announced tiles. Without it, every event is delivered and the
  /// images of all known chunks are sent once on subscription.
  pub fn subscribe_listener(
    &self,
    listener: Arc<dyn CanvasListener>,
    use_virtual_chunks: bool,
  ) -> Result<(), CanvasError> {
    let tx = self.event_sender()?;
    let _ = tx.send(CanvasEvent::Subscribe {
      listener,
      use_virtual_chunks,
    });
    Ok(())
  }

  /// Unsubscribes a listener. No callbacks are invoked after the broadcast
  /// loop handles the event.
  pub fn unsubscribe_listener(&self, listener: Arc<dyn CanvasListener>) -> Result<(), CanvasError> {
    let tx = self.event_sender()?;
    let _ = tx.send(CanvasEvent::Unsubscribe { listener });
    Ok(())
  }

  /// Replaces the set of rectangles the listener needs to be kept up to
  /// date with. Silently ignored for unsubscribed listeners.
  ///
  /// Must not be called from a listener callback: the callback runs on the
  /// broadcast loop, which also has to accept this event, so the call would
  /// deadlock.
  pub fn register_rects(
    &self,
    listener: Arc<dyn CanvasListener>,
    rects: Vec<PixelRect>,
  ) -> Result<(), CanvasError> {
    let tx = self.event_sender()?;
    let _ = tx.send(CanvasEvent::ListenerRects { listener, rects });
    Ok(())
  }

  /// Writes one pixel to an existing chunk.
  pub fn set_pixel(&self, pos: PixelPos, color: Rgba) -> Result<(), CanvasError> {
    let tx = self.event_sender()?;

    if !self.bounds.contains(pos) {
      return Err(CanvasError::OutOfBounds(pos, self.bounds));
    }

    let chunk = self.chunk_at(self.grid.chunk_coord(pos), false)?;
    chunk.set_pixel(pos, color)?;

    let _ = tx.send(CanvasEvent::SetPixel { pos, color });
    Ok(())
  }

  /// Returns the current color of a pixel in an existing chunk.
  pub fn pixel(&self, pos: PixelPos) -> Result<Rgba, CanvasError> {
    self.check_open()?;
    let chunk = self.chunk_at(self.grid.chunk_coord(pos), false)?;
    chunk.pixel(pos)
  }

  /// Updates the canvas with a bulk image.
  ///
  /// Only chunks fully contained in the image bounds are touched. Chunks
  /// without a download in flight are skipped unless their data already
  /// matches, in which case they are revalidated. This validates the
  /// touched chunks, clears their download flag and replays any pixel
  /// events queued while downloading.
  pub fn set_image(
    &self,
    image: &PixelImage,
    create_if_missing: bool,
    ignore_missing: bool,
  ) -> Result<(), CanvasError> {
    let tx = self.event_sender()?;

    let chunk_rect = self.grid.inner_chunk_rect(image.rect());
    let chunks = self.chunks_in(chunk_rect, create_if_missing, ignore_missing)?;

    for chunk in chunks {
      match chunk.set_image(image, true) {
        Ok(Some(result)) => {
          let _ = tx.send(CanvasEvent::SetImage {
            image: Arc::new(result),
          });
        }
        Ok(None) => {
          let _ = tx.send(CanvasEvent::RevalidateRect { rect: chunk.rect() });
        }
        // Chunks that can't accept the data right now are left alone.
        Err(_) => continue,
      }
    }

    Ok(())
  }

  /// Copies a rectangle of the canvas into a new image.
  ///
  /// The aggregate may straddle an update when chunks change concurrently,
  /// but each chunk's contribution is consistent. Missing chunks stay
  /// transparent when `ignore_missing` is set; with `only_if_valid` the
  /// call fails on any invalid chunk.
  pub fn image_copy(
    &self,
    rect: PixelRect,
    only_if_valid: bool,
    ignore_missing: bool,
  ) -> Result<PixelImage, CanvasError> {
    self.check_open()?;

    let rect = rect.canon();
    let chunk_rect = self.grid.outer_chunk_rect(rect);
    let chunks = self.chunks_in(chunk_rect, false, ignore_missing)?;

    let mut image = PixelImage::new(rect);
    for chunk in chunks {
      match chunk.image_copy(only_if_valid) {
        Ok((chunk_image, _valid)) => image.blit(&chunk_image),
        Err(err) if only_if_valid => return Err(err),
        Err(_) => {}
      }
    }

    Ok(image)
  }

  /// Invalidates all existing chunks intersecting the rectangle.
  ///
  /// Used to signal that specific chunks went out of sync with the game.
  pub fn invalidate_rect(&self, rect: PixelRect) -> Result<(), CanvasError> {
    let tx = self.event_sender()?;

    let chunk_rect = self.grid.outer_chunk_rect(rect);
    let chunks = self.chunks_in(chunk_rect, false, true)?;
    for chunk in &chunks {
      chunk.invalidate();
    }

    let _ = tx.send(CanvasEvent::InvalidateRect { rect });
    Ok(())
  }

  /// Invalidates every chunk. Used to signal connection loss.
  pub fn invalidate_all(&self) -> Result<(), CanvasError> {
    let tx = self.event_sender()?;

    for chunk in self.all_chunks() {
      chunk.invalidate();
    }

    let _ = tx.send(CanvasEvent::InvalidateAll);
    Ok(())
  }

  /// Marks chunks intersecting the rectangle as in sync again.
  ///
  /// Not needed after [`Canvas::set_image`], which validates by itself.
  pub fn revalidate_rect(&self, rect: PixelRect) -> Result<(), CanvasError> {
    let tx = self.event_sender()?;

    let chunk_rect = self.grid.outer_chunk_rect(rect);
    let chunks = self.chunks_in(chunk_rect, false, true)?;
    for chunk in &chunks {
      chunk.revalidate();
    }

    let _ = tx.send(CanvasEvent::RevalidateRect { rect });
    Ok(())
  }

  /// Signals that the given region is being downloaded, creating chunks as
  /// needed. Returns the rectangles of the chunks that entered the
  /// downloading state.
  ///
  /// Chunks in the downloading state queue incoming pixel events and replay
  /// them once the download finishes, so they stay in sync with the game
  /// even when downloading takes a while. This must be called even for
  /// connections that deliver data serially, because it also keeps the
  /// scheduler from re-requesting an invalid chunk over and over.
  pub fn signal_download(&self, rect: PixelRect) -> Result<Vec<PixelRect>, CanvasError> {
    let tx = self.event_sender()?;

    let Some(clipped) = rect.canon().intersection(&self.bounds) else {
      let _ = tx.send(CanvasEvent::SignalDownload { rect });
      return Ok(Vec::new());
    };

    let chunk_rect = self.grid.outer_chunk_rect(clipped);
    let chunks = self.chunks_in(chunk_rect, true, true)?;

    let mut downloading = Vec::new();
    for chunk in &chunks {
      if chunk.signal_download() {
        downloading.push(chunk.rect());
      }
    }

    let _ = tx.send(CanvasEvent::SignalDownload { rect });
    Ok(downloading)
  }

  /// Returns true if every chunk intersecting the rectangle exists and is
  /// valid.
  pub fn is_valid(&self, rect: PixelRect) -> Result<bool, CanvasError> {
    self.check_open()?;

    let chunk_rect = self.grid.outer_chunk_rect(rect);
    match self.chunks_in(chunk_rect, false, false) {
      Ok(chunks) => Ok(chunks.iter().all(|chunk| chunk.is_valid())),
      Err(_) => Ok(false),
    }
  }

  /// Sets the current canvas time.
  pub fn set_time(&self, time: SystemTime) -> Result<(), CanvasError> {
    let tx = self.event_sender()?;
    *self.time.write() = time;
    let _ = tx.send(CanvasEvent::SetTime { time });
    Ok(())
  }

  /// Returns the current canvas time.
  pub fn time(&self) -> Result<SystemTime, CanvasError> {
    self.check_open()?;
    Ok(*self.time.read())
  }

  /// Closes the canvas. Every further mutation fails with
  /// [`CanvasError::Closed`]; in-flight events still drain, then the
  /// broadcast loop and the download scheduler exit.
  pub fn close(&self) {
    let mut gate = self.gate.write();
    gate.closed = true;
    gate.event_tx = None;
  }

  /// Fails once the canvas is closed.
  fn check_open(&self) -> Result<(), CanvasError> {
    if self.gate.read().closed {
      return Err(CanvasError::Closed);
    }
    Ok(())
  }

  /// Clones the event sender, failing once the canvas is closed.
  fn event_sender(&self) -> Result<Sender<CanvasEvent>, CanvasError> {
    let gate = self.gate.read();
    if gate.closed {
      return Err(CanvasError::Closed);
    }
    gate.event_tx.clone().ok_or(CanvasError::Closed)
  }

  /// Looks up a chunk, optionally creating it as invalid.
  pub(crate) fn chunk_at(
    &self,
    coord: ChunkCoord,
    create_if_missing: bool,
  ) -> Result<Arc<Chunk>, CanvasError> {
    if let Some(chunk) = self.chunks.read().get(&coord) {
      return Ok(Arc::clone(chunk));
    }

    if !create_if_missing {
      return Err(CanvasError::ChunkNotFound(coord));
    }

    let mut chunks = self.chunks.write();
    let chunk = chunks
      .entry(coord)
      .or_insert_with(|| Arc::new(Chunk::new(self.grid.chunk_pixel_rect(coord))));
    Ok(Arc::clone(chunk))
  }

  /// Looks up an existing chunk.
  pub(crate) fn chunk(&self, coord: ChunkCoord) -> Option<Arc<Chunk>> {
    self.chunks.read().get(&coord).map(Arc::clone)
  }

  /// Collects the chunks of a chunk rectangle.
  ///
  /// Missing chunks abort with [`CanvasError::ChunkNotFound`] unless they
  /// are created or ignored.
  pub(crate) fn chunks_in(
    &self,
    rect: ChunkRect,
    create_if_missing: bool,
    ignore_missing: bool,
  ) -> Result<Vec<Arc<Chunk>>, CanvasError> {
    let mut chunks = Vec::new();
    for coord in rect.coords() {
      match self.chunk_at(coord, create_if_missing) {
        Ok(chunk) => chunks.push(chunk),
        Err(err) => {
          if !ignore_missing {
            return Err(err);
          }
        }
      }
    }
    Ok(chunks)
  }

  /// Snapshots all chunks currently in the map.
  pub(crate) fn all_chunks(&self) -> Vec<Arc<Chunk>> {
    self.chunks.read().values().map(Arc::clone).collect()
  }

  /// Removes a chunk from the map.
  pub(crate) fn remove_chunk(&self, coord: ChunkCoord) {
    self.chunks.write().remove(&coord);
  }
}
