//! The broadcast loop: sole owner of the listener map.
//!
//! One thread per canvas drains the event channel and fans events out to
//! the subscribed listeners. For listeners with virtual chunks it also
//! maintains the tile projection: the set of chunk-aligned rectangles
//! covering the listener's viewport, each with a stable listener-local id.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{select, tick, Receiver, Sender};
use tracing::{trace, warn};

use super::event::CanvasEvent;
use super::Canvas;
use crate::coords::ChunkGrid;
use crate::error::CanvasError;
use crate::listener::{CanvasListener, VcId};
use crate::primitives::{PixelPos, PixelRect};

/// Per-listener state, created on subscribe and dropped on unsubscribe.
struct ListenerState {
  listener: Arc<dyn CanvasListener>,
  /// Rectangles the listener wants to be kept up to date with.
  rects: Vec<PixelRect>,
  use_virtual_chunks: bool,
  /// Tiles the listener currently knows of, keyed by their pixel rect.
  virtual_chunks: HashMap<PixelRect, VcId>,
  next_vc_id: u32,
}

impl ListenerState {
  fn new(listener: Arc<dyn CanvasListener>, use_virtual_chunks: bool) -> Self {
    Self {
      listener,
      rects: Vec::new(),
      use_virtual_chunks,
      virtual_chunks: HashMap::new(),
      next_vc_id: 1,
    }
  }

  /// Ids of the known tiles intersecting a rectangle.
  fn tile_ids(&self, grid: &ChunkGrid, rect: PixelRect) -> Vec<VcId> {
    let mut ids = Vec::new();
    for coord in grid.outer_chunk_rect(rect).coords() {
      let tile = grid.chunk_pixel_rect(coord);
      if let Some(id) = self.virtual_chunks.get(&tile) {
        ids.push(*id);
      }
    }
    ids
  }

  /// Id of the known tile containing a pixel, if any.
  fn tile_id_at(&self, grid: &ChunkGrid, pos: PixelPos) -> Option<VcId> {
    let tile = grid.chunk_pixel_rect(grid.chunk_coord(pos));
    self.virtual_chunks.get(&tile).copied()
  }

  /// The tiles covering the given viewport, keeping ids of tiles already
  /// known and allocating fresh ids for the rest.
  fn needed_tiles(&mut self, grid: &ChunkGrid, rects: &[PixelRect]) -> HashMap<PixelRect, VcId> {
    let mut needed = HashMap::new();
    for rect in rects {
      for coord in grid.outer_chunk_rect(*rect).coords() {
        let tile = grid.chunk_pixel_rect(coord);
        if needed.contains_key(&tile) {
          continue;
        }
        let id = match self.virtual_chunks.get(&tile) {
          Some(id) => *id,
          None => {
            let id = VcId(self.next_vc_id);
            self.next_vc_id += 1;
            id
          }
        };
        needed.insert(tile, id);
      }
    }
    needed
  }
}

/// Logs and swallows a listener callback failure.
fn log_callback(result: Result<(), CanvasError>) {
  if let Err(err) = result {
    warn!("listener callback failed: {err}");
  }
}

/// Key for the listener map: identity of the listener's `Arc`.
fn listener_key(listener: &Arc<dyn CanvasListener>) -> usize {
  Arc::as_ptr(listener) as *const () as usize
}

/// Forwards a viewport rectangle to the download scheduler without ever
/// blocking the loop. The periodic re-announce repairs dropped hints.
fn hint_scheduler(hint_tx: &Sender<PixelRect>, rect: PixelRect) {
  if hint_tx.try_send(rect).is_err() {
    trace!(?rect, "scheduler hint dropped");
  }
}

pub(super) fn broadcast_loop(
  canvas: Arc<Canvas>,
  event_rx: Receiver<CanvasEvent>,
  hint_tx: Sender<PixelRect>,
) {
  let reannounce = tick(canvas.tuning().reannounce_period);
  let mut listeners: HashMap<usize, ListenerState> = HashMap::new();

  loop {
    select! {
      recv(event_rx) -> event => match event {
        Ok(event) => dispatch(&canvas, &hint_tx, &mut listeners, event),
        Err(_) => break,
      },
      // Re-announce every listener's rects so long-running downloads and
      // evicted chunks get re-requested.
      recv(reannounce) -> _ => {
        for state in listeners.values() {
          for rect in &state.rects {
            hint_scheduler(&hint_tx, *rect);
          }
        }
      }
    }
  }

  trace!("canvas event broadcaster closed");
}

fn dispatch(
  canvas: &Canvas,
  hint_tx: &Sender<PixelRect>,
  listeners: &mut HashMap<usize, ListenerState>,
  event: CanvasEvent,
) {
  let grid = canvas.grid();

  match event {
    CanvasEvent::SetPixel { pos, color } => {
      for state in listeners.values() {
        if !state.use_virtual_chunks {
          log_callback(state.listener.handle_set_pixel(pos, color, None));
          continue;
        }
        if let Some(id) = state.tile_id_at(&grid, pos) {
          log_callback(state.listener.handle_set_pixel(pos, color, Some(id)));
        }
      }
    }

    CanvasEvent::SetImage { image } => {
      for state in listeners.values() {
        if !state.use_virtual_chunks {
          log_callback(state.listener.handle_set_image(&image, true, &[]));
          continue;
        }
        let ids = state.tile_ids(&grid, image.rect());
        if !ids.is_empty() {
          log_callback(state.listener.handle_set_image(&image, true, &ids));
        }
      }
    }

    CanvasEvent::InvalidateRect { rect } => {
      for state in listeners.values() {
        if !state.use_virtual_chunks {
          log_callback(state.listener.handle_invalidate_rect(rect, &[]));
          continue;
        }
        let ids = state.tile_ids(&grid, rect);
        if !ids.is_empty() {
          log_callback(state.listener.handle_invalidate_rect(rect, &ids));
        }
      }
    }

    CanvasEvent::InvalidateAll => {
      for state in listeners.values() {
        log_callback(state.listener.handle_invalidate_all());
      }
    }

    CanvasEvent::RevalidateRect { rect } => {
      for state in listeners.values() {
        if !state.use_virtual_chunks {
          log_callback(state.listener.handle_revalidate_rect(rect, &[]));
          continue;
        }
        let ids = state.tile_ids(&grid, rect);
        if !ids.is_empty() {
          log_callback(state.listener.handle_revalidate_rect(rect, &ids));
        }
      }
    }

    CanvasEvent::SignalDownload { rect } => {
      for state in listeners.values() {
        if !state.use_virtual_chunks {
          log_callback(state.listener.handle_signal_download(rect, &[]));
          continue;
        }
        let ids = state.tile_ids(&grid, rect);
        if !ids.is_empty() {
          log_callback(state.listener.handle_signal_download(rect, &ids));
        }
      }
    }

    CanvasEvent::SetTime { time } => {
      for state in listeners.values() {
        log_callback(state.listener.handle_set_time(time));
      }
    }

    CanvasEvent::Subscribe {
      listener,
      use_virtual_chunks,
    } => {
      let key = listener_key(&listener);
      listeners.insert(key, ListenerState::new(Arc::clone(&listener), use_virtual_chunks));

      // Without virtual chunks the listener starts from the full picture:
      // every known chunk image plus the current time.
      if !use_virtual_chunks {
        for chunk in canvas.all_chunks() {
          if let Ok((image, valid)) = chunk.image_copy(false) {
            log_callback(listener.handle_set_image(&image, valid, &[]));
          }
        }
        if let Ok(time) = canvas.time() {
          log_callback(listener.handle_set_time(time));
        }
      }
    }

    CanvasEvent::Unsubscribe { listener } => {
      listeners.remove(&listener_key(&listener));
    }

    CanvasEvent::ListenerRects { listener, rects } => {
      let Some(state) = listeners.get_mut(&listener_key(&listener)) else {
        return;
      };

      state.rects = rects;
      for rect in &state.rects {
        hint_scheduler(hint_tx, *rect);
      }

      if !state.use_virtual_chunks {
        return;
      }

      let viewport = state.rects.clone();
      let needed = state.needed_tiles(&grid, &viewport);

      let create: HashMap<PixelRect, VcId> = needed
        .iter()
        .filter(|(tile, _)| !state.virtual_chunks.contains_key(tile))
        .map(|(tile, id)| (*tile, *id))
        .collect();
      let remove: HashMap<PixelRect, VcId> = state
        .virtual_chunks
        .iter()
        .filter(|(tile, _)| !needed.contains_key(tile))
        .map(|(tile, id)| (*tile, *id))
        .collect();
      state.virtual_chunks = needed;

      if !create.is_empty() || !remove.is_empty() {
        log_callback(state.listener.handle_chunks_change(&create, &remove));
      }

      // New tiles start from the underlying chunk's pixels when available.
      for (tile, id) in &create {
        let coord = grid.chunk_coord(tile.min);
        if let Some(chunk) = canvas.chunk(coord) {
          if let Ok((image, valid)) = chunk.image_copy(false) {
            log_callback(state.listener.handle_set_image(&image, valid, &[*id]));
          }
        }
      }
    }
  }
}
