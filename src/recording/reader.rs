//! Disk replayer: drives a canvas from recorded event streams.
//!
//! A replayer opens every `.pixrec` file of a named recording in filename
//! order (the timestamp names sort chronologically) and owns a time-demand
//! channel. Demands move the canvas forward by applying frames through the
//! ordinary canvas mutators, so listeners observe the replay exactly like a
//! live canvas. There is no seek index: a demand before the current replay
//! time restarts from the first file.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use crossbeam_channel::{bounded, Receiver, Sender};
use flate2::read::GzDecoder;
use tracing::{trace, warn};

use super::format::{read_frame, FrameBody, RecordingHeader};
use crate::canvas::{Canvas, ChunkRequest};
use crate::config::CanvasConfig;
use crate::error::CanvasError;

/// A canvas backed by an on-disk recording.
pub struct CanvasDiskReader {
  name: String,
  canvas: Arc<Canvas>,
  time_tx: Sender<SystemTime>,
}

impl CanvasDiskReader {
  /// Opens the recording `<root>/Recordings/<name>` and bootstraps a canvas
  /// from the first file's header.
  ///
  /// Returns the reader, the replayed canvas and its chunk-request
  /// receiver (replayed canvases never request downloads, but the channel
  /// must be drained or dropped like any other).
  pub fn open(
    root: &Path,
    name: &str,
  ) -> Result<(Self, Arc<Canvas>, Receiver<ChunkRequest>), CanvasError> {
    let dir = root.join("Recordings").join(name);

    let mut files: Vec<String> = fs::read_dir(&dir)?
      .filter_map(|entry| entry.ok())
      .map(|entry| entry.file_name().to_string_lossy().into_owned())
      .filter(|file_name| file_name.ends_with(".pixrec"))
      .collect();
    files.sort();

    if files.is_empty() {
      return Err(CanvasError::Format(format!(
        "no recordings in {}",
        dir.display()
      )));
    }

    let header = {
      let file = File::open(dir.join(&files[0]))?;
      let mut reader = GzDecoder::new(BufReader::new(file));
      RecordingHeader::read_from(&mut reader)?
    };

    let config = CanvasConfig {
      chunk_size: header.chunk_size,
      ..CanvasConfig::default()
    };
    let (canvas, requests) = Canvas::new(config);
    canvas.set_time(header.time)?;

    let (time_tx, time_rx) = bounded(0);
    let replay_canvas = Arc::clone(&canvas);
    thread::spawn(move || replay_loop(replay_canvas, dir, files, time_rx));

    let reader = Self {
      name: name.to_string(),
      canvas: Arc::clone(&canvas),
      time_tx,
    };

    // Prime the replayer so consumers start at the recording's beginning.
    let _ = reader.time_tx.send(header.time);

    Ok((reader, canvas, requests))
  }

  /// The recording name this reader replays.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Requests the canvas to be advanced (or rewound) to the given time.
  pub fn seek(&self, time: SystemTime) -> Result<(), CanvasError> {
    self.time_tx.send(time).map_err(|_| CanvasError::Closed)
  }

  /// Stops the replayer and closes the canvas.
  pub fn close(self) {
    self.canvas.close();
    // Dropping self disconnects the time channel, ending the replay task.
  }
}

fn replay_loop(
  canvas: Arc<Canvas>,
  dir: PathBuf,
  files: Vec<String>,
  time_rx: Receiver<SystemTime>,
) {
  let mut cur_time = match time_rx.recv() {
    Ok(time) => time,
    Err(_) => return,
  };

  'restart: loop {
    for file_name in &files {
      let path = dir.join(file_name);
      trace!("opening recording {}", path.display());

      let file = match File::open(&path) {
        Ok(file) => file,
        Err(err) => {
          warn!("can't open {}: {err}", path.display());
          continue;
        }
      };
      let mut reader = GzDecoder::new(BufReader::new(file));
      let mut rec_time = match RecordingHeader::read_from(&mut reader) {
        Ok(header) => header.time,
        Err(err) => {
          warn!("can't read {}: {err}", path.display());
          continue;
        }
      };

      loop {
        if rec_time >= cur_time {
          // Caught up. Publish the reached time and wait for a new demand.
          if canvas.set_time(cur_time).is_err() {
            return;
          }
          match time_rx.recv() {
            Err(_) => return,
            Ok(demand) if demand < cur_time => {
              let _ = canvas.invalidate_all();
              continue 'restart;
            }
            Ok(demand) => cur_time = demand,
          }
          continue;
        }

        match read_frame(&mut reader) {
          Ok(Some(frame)) => {
            rec_time = frame.time;
            if apply_frame(&canvas, frame.body).is_err() {
              return;
            }
          }
          Ok(None) => break,
          Err(err) => {
            warn!("error reading {}: {err}", path.display());
            break;
          }
        }
      }

      // Listeners must know about the discontinuity between files.
      if canvas.invalidate_all().is_err() {
        return;
      }
    }

    // Past the last file: nothing more to play until a backward seek.
    if canvas.set_time(cur_time).is_err() {
      return;
    }
    loop {
      match time_rx.recv() {
        Err(_) => return,
        Ok(demand) if demand < cur_time => {
          let _ = canvas.invalidate_all();
          continue 'restart;
        }
        Ok(demand) => cur_time = demand,
      }
    }
  }
}

/// Applies one frame through the canvas mutators.
///
/// Per-frame failures (a pixel without a chunk, say) are skipped exactly
/// like a live connection would produce them; only a closed canvas stops
/// the replay.
fn apply_frame(canvas: &Canvas, body: FrameBody) -> Result<(), CanvasError> {
  let result = match body {
    FrameBody::SetPixel { pos, color } => canvas.set_pixel(pos, color),
    FrameBody::InvalidateRect { rect } => canvas.invalidate_rect(rect),
    FrameBody::InvalidateAll => canvas.invalidate_all(),
    FrameBody::RevalidateRect { rect } => canvas.revalidate_rect(rect),
    FrameBody::SetImage { image } => canvas
      .signal_download(image.rect())
      .map(|_| ())
      .and_then(|_| canvas.set_image(&image, false, true)),
  };

  match result {
    Err(CanvasError::Closed) => Err(CanvasError::Closed),
    _ => Ok(()),
  }
}
