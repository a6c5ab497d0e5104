//! The download scheduler: turns viewport hints into chunk downloads and
//! evicts idle chunks.
//!
//! One thread per canvas drains the hint channel filled by viewport
//! registrations. Hints create missing chunks and reset their use timer; a
//! periodic sweep over all chunks catches the ones no viewport mentions
//! anymore, which is how far-away chunks eventually get evicted.

use std::sync::Arc;

use crossbeam_channel::{select, tick, Receiver, Sender};
use tracing::trace;

use super::{Canvas, ChunkRequest};
use crate::chunk::{Chunk, ChunkQueryState};
use crate::primitives::PixelRect;

pub(super) fn scheduler_loop(
  canvas: Arc<Canvas>,
  hint_rx: Receiver<PixelRect>,
  request_tx: Sender<ChunkRequest>,
) {
  let sweep = tick(canvas.tuning().sweep_period);

  loop {
    select! {
      recv(hint_rx) -> hint => match hint {
        Ok(rect) => handle_hint(&canvas, &request_tx, rect),
        Err(_) => break,
      },
      recv(sweep) -> _ => {
        // Sweep without resetting use timers, so untouched chunks age out.
        for chunk in canvas.all_chunks() {
          consider(&canvas, &request_tx, &chunk, false);
        }
      }
    }
  }

  trace!("canvas download scheduler closed");
}

fn handle_hint(canvas: &Canvas, request_tx: &Sender<ChunkRequest>, rect: PixelRect) {
  let Some(clipped) = rect.canon().intersection(&canvas.bounds()) else {
    return;
  };

  let chunk_rect = canvas.grid().outer_chunk_rect(clipped);
  let Ok(chunks) = canvas.chunks_in(chunk_rect, true, true) else {
    return;
  };

  for chunk in chunks {
    consider(canvas, request_tx, &chunk, true);
  }
}

fn consider(canvas: &Canvas, request_tx: &Sender<ChunkRequest>, chunk: &Arc<Chunk>, reset_timer: bool) {
  match chunk.query_state(reset_timer, canvas.tuning()) {
    ChunkQueryState::Download => {
      // Prefer dropping the request over blocking; the next hint or sweep
      // retries.
      if request_tx.try_send(ChunkRequest { rect: chunk.rect() }).is_err() {
        trace!(rect = ?chunk.rect(), "chunk request dropped");
      }
    }
    ChunkQueryState::Delete => {
      canvas.remove_chunk(canvas.grid().chunk_coord(chunk.rect().min));
    }
    ChunkQueryState::Keep => {}
  }
}
