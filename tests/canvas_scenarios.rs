//! End-to-end canvas behavior: download replay, viewport churn, event
//! ordering and the download scheduler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use pixel_canvas::{
  Canvas, CanvasConfig, CanvasError, CanvasListener, PixelImage, PixelPos, PixelRect, Rgba,
  SchedulerTuning, VcId,
};

const RED: Rgba = Rgba::opaque(255, 0, 0);
const GREEN: Rgba = Rgba::opaque(0, 255, 0);
const BLUE: Rgba = Rgba::opaque(0, 0, 255);

/// One observed listener callback.
#[derive(Debug, Clone, PartialEq)]
enum Seen {
  SetPixel(PixelPos, Rgba, Option<VcId>),
  SetImage(PixelRect, bool, Vec<VcId>),
  InvalidateRect(PixelRect, Vec<VcId>),
  InvalidateAll,
  RevalidateRect(PixelRect, Vec<VcId>),
  SignalDownload(PixelRect, Vec<VcId>),
  ChunksChange(Vec<(PixelRect, VcId)>, Vec<(PixelRect, VcId)>),
  SetTime(SystemTime),
}

/// Records every callback for later inspection.
#[derive(Default)]
struct Recorder {
  events: Mutex<Vec<Seen>>,
}

impl Recorder {
  fn events(&self) -> Vec<Seen> {
    self.events.lock().unwrap().clone()
  }

  fn push(&self, event: Seen) {
    self.events.lock().unwrap().push(event);
  }

  /// Polls until the recorded events satisfy the predicate.
  fn wait_for(&self, what: &str, pred: impl Fn(&[Seen]) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
      let events = self.events();
      if pred(&events) {
        return;
      }
      if Instant::now() > deadline {
        panic!("timed out waiting for {what}; saw {events:#?}");
      }
      std::thread::sleep(Duration::from_millis(10));
    }
  }
}

fn sorted_tiles(tiles: &HashMap<PixelRect, VcId>) -> Vec<(PixelRect, VcId)> {
  let mut list: Vec<_> = tiles.iter().map(|(rect, id)| (*rect, *id)).collect();
  list.sort_by_key(|(rect, _)| (rect.min.y, rect.min.x));
  list
}

impl CanvasListener for Recorder {
  fn handle_chunks_change(
    &self,
    create: &HashMap<PixelRect, VcId>,
    remove: &HashMap<PixelRect, VcId>,
  ) -> Result<(), CanvasError> {
    self.push(Seen::ChunksChange(sorted_tiles(create), sorted_tiles(remove)));
    Ok(())
  }

  fn handle_invalidate_all(&self) -> Result<(), CanvasError> {
    self.push(Seen::InvalidateAll);
    Ok(())
  }

  fn handle_invalidate_rect(&self, rect: PixelRect, vc_ids: &[VcId]) -> Result<(), CanvasError> {
    self.push(Seen::InvalidateRect(rect, vc_ids.to_vec()));
    Ok(())
  }

  fn handle_set_image(
    &self,
    image: &PixelImage,
    valid: bool,
    vc_ids: &[VcId],
  ) -> Result<(), CanvasError> {
    self.push(Seen::SetImage(image.rect(), valid, vc_ids.to_vec()));
    Ok(())
  }

  fn handle_set_pixel(
    &self,
    pos: PixelPos,
    color: Rgba,
    vc_id: Option<VcId>,
  ) -> Result<(), CanvasError> {
    self.push(Seen::SetPixel(pos, color, vc_id));
    Ok(())
  }

  fn handle_signal_download(&self, rect: PixelRect, vc_ids: &[VcId]) -> Result<(), CanvasError> {
    self.push(Seen::SignalDownload(rect, vc_ids.to_vec()));
    Ok(())
  }

  fn handle_revalidate_rect(&self, rect: PixelRect, vc_ids: &[VcId]) -> Result<(), CanvasError> {
    self.push(Seen::RevalidateRect(rect, vc_ids.to_vec()));
    Ok(())
  }

  fn handle_set_time(&self, time: SystemTime) -> Result<(), CanvasError> {
    self.push(Seen::SetTime(time));
    Ok(())
  }
}

fn chunk256() -> CanvasConfig {
  CanvasConfig::default()
}

#[test]
fn pixels_during_download_replay_over_the_bulk_image() {
  let (canvas, _requests) = Canvas::new(chunk256());
  let rect = PixelRect::new(0, 0, 256, 256);

  let downloading = canvas.signal_download(rect).unwrap();
  assert_eq!(downloading, vec![rect]);

  canvas.set_pixel(PixelPos::new(5, 5), RED).unwrap();
  canvas.set_pixel(PixelPos::new(5, 6), GREEN).unwrap();
  canvas.set_image(&PixelImage::filled(rect, BLUE), false, true).unwrap();

  assert!(canvas.is_valid(rect).unwrap());
  assert_eq!(canvas.pixel(PixelPos::new(5, 5)).unwrap(), RED);
  assert_eq!(canvas.pixel(PixelPos::new(5, 6)).unwrap(), GREEN);
  assert_eq!(canvas.pixel(PixelPos::new(10, 10)).unwrap(), BLUE);

  canvas.close();
}

#[test]
fn viewport_churn_assigns_fresh_ids_on_readdition() {
  let (canvas, _requests) = Canvas::new(chunk256());
  let recorder = Arc::new(Recorder::default());
  canvas.subscribe_listener(recorder.clone(), true).unwrap();

  let tile0 = PixelRect::new(0, 0, 256, 256);
  let tile1 = PixelRect::new(256, 256, 512, 512);

  let changes = |events: &[Seen]| -> Vec<Seen> {
    events
      .iter()
      .filter(|e| matches!(e, Seen::ChunksChange(..)))
      .cloned()
      .collect()
  };

  canvas
    .register_rects(recorder.clone(), vec![PixelRect::new(0, 0, 100, 100)])
    .unwrap();
  recorder.wait_for("first chunks change", |e| changes(e).len() == 1);

  canvas
    .register_rects(recorder.clone(), vec![PixelRect::new(300, 300, 400, 400)])
    .unwrap();
  recorder.wait_for("second chunks change", |e| changes(e).len() == 2);

  canvas
    .register_rects(recorder.clone(), vec![PixelRect::new(0, 0, 100, 100)])
    .unwrap();
  recorder.wait_for("third chunks change", |e| changes(e).len() == 3);

  // Growing the viewport keeps the surviving tile's id.
  canvas
    .register_rects(
      recorder.clone(),
      vec![PixelRect::new(0, 0, 100, 100), PixelRect::new(300, 300, 400, 400)],
    )
    .unwrap();
  recorder.wait_for("fourth chunks change", |e| changes(e).len() == 4);

  assert_eq!(
    changes(&recorder.events()),
    vec![
      Seen::ChunksChange(vec![(tile0, VcId(1))], vec![]),
      Seen::ChunksChange(vec![(tile1, VcId(2))], vec![(tile0, VcId(1))]),
      Seen::ChunksChange(vec![(tile0, VcId(3))], vec![(tile1, VcId(2))]),
      Seen::ChunksChange(vec![(tile1, VcId(4))], vec![]),
    ]
  );

  canvas.close();
}

#[test]
fn virtual_chunk_listeners_only_see_their_tiles() {
  let (canvas, _requests) = Canvas::new(chunk256());
  let recorder = Arc::new(Recorder::default());
  canvas.subscribe_listener(recorder.clone(), true).unwrap();

  canvas
    .register_rects(recorder.clone(), vec![PixelRect::new(0, 0, 100, 100)])
    .unwrap();
  recorder.wait_for("viewport tiles", |e| {
    e.iter().any(|s| matches!(s, Seen::ChunksChange(..)))
  });

  // Inside the viewport tile.
  canvas.signal_download(PixelRect::new(0, 0, 256, 256)).unwrap();
  canvas.set_pixel(PixelPos::new(1, 1), RED).unwrap();
  // Far outside any tile the listener knows of.
  canvas.signal_download(PixelRect::new(5000, 5000, 5010, 5010)).unwrap();
  canvas.set_pixel(PixelPos::new(5001, 5001), GREEN).unwrap();

  // A trailing SetTime reaches every listener, so once it shows up all the
  // events above have been dispatched.
  canvas.set_time(SystemTime::now()).unwrap();
  recorder.wait_for("all events dispatched", |e| {
    e.iter().any(|s| matches!(s, Seen::SetTime(_)))
  });

  let events = recorder.events();
  assert!(events.contains(&Seen::SetPixel(PixelPos::new(1, 1), RED, Some(VcId(1)))));
  assert!(
    !events
      .iter()
      .any(|s| matches!(s, Seen::SetPixel(pos, ..) if *pos == PixelPos::new(5001, 5001))),
    "pixel outside the viewport leaked through: {events:#?}"
  );

  canvas.close();
}

/// Checks that all chunks are invalid by the time the InvalidateAll
/// callback runs.
struct InvalidateProbe {
  canvas: Arc<Canvas>,
  probed: PixelRect,
  observed_valid: Mutex<Option<bool>>,
}

impl CanvasListener for InvalidateProbe {
  fn handle_invalidate_all(&self) -> Result<(), CanvasError> {
    let valid = self.canvas.is_valid(self.probed)?;
    *self.observed_valid.lock().unwrap() = Some(valid);
    Ok(())
  }
}

#[test]
fn chunks_invalidate_before_the_invalidate_all_callback() {
  let (canvas, _requests) = Canvas::new(chunk256());

  let rect = PixelRect::new(0, 0, 512, 256);
  canvas.signal_download(rect).unwrap();
  canvas.set_image(&PixelImage::filled(rect, BLUE), false, true).unwrap();
  assert!(canvas.is_valid(rect).unwrap());

  let probe = Arc::new(InvalidateProbe {
    canvas: Arc::clone(&canvas),
    probed: rect,
    observed_valid: Mutex::new(None),
  });
  canvas.subscribe_listener(probe.clone(), false).unwrap();

  canvas.invalidate_all().unwrap();

  let deadline = Instant::now() + Duration::from_secs(5);
  loop {
    if let Some(valid) = *probe.observed_valid.lock().unwrap() {
      assert!(!valid, "a chunk was still valid during the callback");
      break;
    }
    assert!(Instant::now() < deadline, "InvalidateAll callback never fired");
    std::thread::sleep(Duration::from_millis(10));
  }

  canvas.close();
}

#[test]
fn plain_subscribers_get_existing_chunks_and_the_time() {
  let (canvas, _requests) = Canvas::new(chunk256());

  let rect = PixelRect::new(0, 0, 256, 256);
  canvas.signal_download(rect).unwrap();
  canvas.set_image(&PixelImage::filled(rect, BLUE), false, true).unwrap();

  let recorder = Arc::new(Recorder::default());
  canvas.subscribe_listener(recorder.clone(), false).unwrap();

  recorder.wait_for("initial sync", |events| {
    events.contains(&Seen::SetImage(rect, true, vec![]))
      && events.iter().any(|s| matches!(s, Seen::SetTime(_)))
  });

  canvas.close();
}

#[test]
fn matching_set_image_revalidates_instead_of_resending() {
  let (canvas, _requests) = Canvas::new(chunk256());
  let rect = PixelRect::new(0, 0, 256, 256);
  let blue = PixelImage::filled(rect, BLUE);

  canvas.signal_download(rect).unwrap();
  canvas.set_image(&blue, false, true).unwrap();

  let recorder = Arc::new(Recorder::default());
  canvas.subscribe_listener(recorder.clone(), false).unwrap();

  // The chunk is valid with identical data, so a second download produces a
  // revalidation, not a new image.
  canvas.signal_download(rect).unwrap();
  canvas.set_image(&blue, false, true).unwrap();

  recorder.wait_for("revalidate", |events| {
    events.contains(&Seen::RevalidateRect(rect, vec![]))
  });

  canvas.close();
}

#[test]
fn out_of_reach_mutations_behave() {
  let (canvas, _requests) = Canvas::new(chunk256());

  // No chunk yet: a pixel write is NotFound.
  assert!(matches!(
    canvas.set_pixel(PixelPos::new(0, 0), RED),
    Err(CanvasError::ChunkNotFound(_))
  ));

  // An image that contains no whole chunk writes nothing but succeeds.
  let small = PixelImage::new(PixelRect::new(10, 10, 20, 20));
  canvas.set_image(&small, false, true).unwrap();

  // Invalidating where no chunks exist is a no-op that still succeeds.
  canvas.invalidate_rect(PixelRect::new(9000, 9000, 9100, 9100)).unwrap();

  canvas.close();
}

#[test]
fn closed_canvas_rejects_every_mutation() {
  let (canvas, _requests) = Canvas::new(chunk256());
  canvas.close();

  assert!(matches!(
    canvas.set_pixel(PixelPos::new(0, 0), RED),
    Err(CanvasError::Closed)
  ));
  assert!(matches!(
    canvas.signal_download(PixelRect::new(0, 0, 10, 10)),
    Err(CanvasError::Closed)
  ));
  assert!(matches!(canvas.invalidate_all(), Err(CanvasError::Closed)));
  assert!(matches!(canvas.time(), Err(CanvasError::Closed)));
  assert!(matches!(
    canvas.pixel(PixelPos::new(0, 0)),
    Err(CanvasError::Closed)
  ));
  assert!(matches!(
    canvas.image_copy(PixelRect::new(0, 0, 10, 10), false, true),
    Err(CanvasError::Closed)
  ));
  assert!(matches!(
    canvas.is_valid(PixelRect::new(0, 0, 10, 10)),
    Err(CanvasError::Closed)
  ));
  assert!(matches!(
    canvas.subscribe_listener(Arc::new(Recorder::default()), false),
    Err(CanvasError::Closed)
  ));
}

#[test]
fn viewport_registration_triggers_chunk_downloads() {
  let (canvas, requests) = Canvas::new(chunk256());
  let recorder = Arc::new(Recorder::default());
  canvas.subscribe_listener(recorder.clone(), true).unwrap();

  canvas
    .register_rects(recorder.clone(), vec![PixelRect::new(0, 0, 100, 100)])
    .unwrap();

  let request = requests
    .recv_timeout(Duration::from_secs(5))
    .expect("the scheduler should request the viewport chunk");
  assert_eq!(request.rect, PixelRect::new(0, 0, 256, 256));

  canvas.close();
}

#[test]
fn idle_invalid_chunks_are_evicted() {
  let mut config = chunk256();
  config.tuning = SchedulerTuning {
    sweep_period: Duration::from_millis(50),
    idle_evict: Duration::ZERO,
    download_retry: Duration::ZERO,
    download_abandon: Duration::ZERO,
    ..SchedulerTuning::default()
  };
  let (canvas, _requests) = Canvas::new(config);

  canvas.signal_download(PixelRect::new(0, 0, 10, 10)).unwrap();

  let deadline = Instant::now() + Duration::from_secs(5);
  loop {
    if matches!(
      canvas.pixel(PixelPos::new(0, 0)),
      Err(CanvasError::ChunkNotFound(_))
    ) {
      break;
    }
    assert!(Instant::now() < deadline, "chunk was never evicted");
    std::thread::sleep(Duration::from_millis(20));
  }

  canvas.close();
}
