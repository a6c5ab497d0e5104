//! Binary format of `.pixrec` recording streams.
//!
//! A recording is a gzip stream holding a header followed by event frames:
//! - [`RecordingHeader`]: magic, version, session start time, chunk size
//!   and an optional RGB palette
//! - [`Frame`]: one timestamped canvas event
//!
//! Everything is little-endian. Times are nanoseconds since the Unix epoch
//! as i64.

use std::io::{self, Read, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::coords::ChunkSize;
use crate::error::CanvasError;
use crate::primitives::{PixelImage, PixelPos, PixelRect, Rgba};

/// Magic bytes identifying a recording ("PREC" in little-endian).
pub const MAGIC: u32 = 0x4345_5250;

/// Current format version.
pub const VERSION: u16 = 1;

const DATA_SET_PIXEL: u8 = 10;
const DATA_INVALIDATE_RECT: u8 = 20;
const DATA_INVALIDATE_ALL: u8 = 21;
const DATA_REVALIDATE_RECT: u8 = 22;
const DATA_SET_IMAGE: u8 = 30;

/// Converts a time to nanoseconds since the epoch.
pub(crate) fn nanos_since_epoch(time: SystemTime) -> i64 {
  match time.duration_since(UNIX_EPOCH) {
    Ok(d) => d.as_nanos() as i64,
    Err(e) => -(e.duration().as_nanos() as i64),
  }
}

/// Converts nanoseconds since the epoch back to a time.
pub(crate) fn time_from_nanos(nanos: i64) -> SystemTime {
  if nanos >= 0 {
    UNIX_EPOCH + Duration::from_nanos(nanos as u64)
  } else {
    UNIX_EPOCH - Duration::from_nanos(nanos.unsigned_abs())
  }
}

fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
  let mut buf = [0u8; 2];
  r.read_exact(&mut buf)?;
  Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
  let mut buf = [0u8; 4];
  r.read_exact(&mut buf)?;
  Ok(u32::from_le_bytes(buf))
}

fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
  let mut buf = [0u8; 4];
  r.read_exact(&mut buf)?;
  Ok(i32::from_le_bytes(buf))
}

fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
  let mut buf = [0u8; 8];
  r.read_exact(&mut buf)?;
  Ok(i64::from_le_bytes(buf))
}

/// Header of one recording file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingHeader {
  /// Session start time.
  pub time: SystemTime,
  /// Chunk dimensions of the recorded canvas.
  pub chunk_size: ChunkSize,
  /// RGB palette of palette-based games; empty on live captures.
  pub palette: Vec<[u8; 3]>,
}

impl RecordingHeader {
  /// Writes the header to a writer.
  pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), CanvasError> {
    w.write_all(&MAGIC.to_le_bytes())?;
    w.write_all(&VERSION.to_le_bytes())?;
    w.write_all(&nanos_since_epoch(self.time).to_le_bytes())?;
    w.write_all(&self.chunk_size.width.to_le_bytes())?;
    w.write_all(&self.chunk_size.height.to_le_bytes())?;
    w.write_all(&(self.palette.len() as u16).to_le_bytes())?;
    for rgb in &self.palette {
      w.write_all(rgb)?;
    }
    Ok(())
  }

  /// Reads and validates a header.
  pub fn read_from<R: Read>(r: &mut R) -> Result<Self, CanvasError> {
    let magic = read_u32(r)?;
    if magic != MAGIC {
      return Err(CanvasError::Format(format!(
        "bad magic number 0x{magic:08X}"
      )));
    }

    let version = read_u16(r)?;
    if version > VERSION {
      return Err(CanvasError::VersionMismatch(version));
    }

    let time = time_from_nanos(read_i64(r)?);
    let width = read_u32(r)?;
    let height = read_u32(r)?;
    let palette_len = read_u16(r)? as usize;

    let mut palette = Vec::with_capacity(palette_len);
    for _ in 0..palette_len {
      let mut rgb = [0u8; 3];
      r.read_exact(&mut rgb)?;
      palette.push(rgb);
    }

    Ok(Self {
      time,
      chunk_size: ChunkSize::new(width, height),
      palette,
    })
  }
}

/// The payload of one event frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameBody {
  SetPixel { pos: PixelPos, color: Rgba },
  InvalidateRect { rect: PixelRect },
  InvalidateAll,
  RevalidateRect { rect: PixelRect },
  SetImage { image: PixelImage },
}

/// One timestamped canvas event in a recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
  pub time: SystemTime,
  pub body: FrameBody,
}

/// Writes one frame.
pub fn write_frame<W: Write>(w: &mut W, frame: &Frame) -> Result<(), CanvasError> {
  let code = match frame.body {
    FrameBody::SetPixel { .. } => DATA_SET_PIXEL,
    FrameBody::InvalidateRect { .. } => DATA_INVALIDATE_RECT,
    FrameBody::InvalidateAll => DATA_INVALIDATE_ALL,
    FrameBody::RevalidateRect { .. } => DATA_REVALIDATE_RECT,
    FrameBody::SetImage { .. } => DATA_SET_IMAGE,
  };
  w.write_all(&[code])?;
  w.write_all(&nanos_since_epoch(frame.time).to_le_bytes())?;

  match &frame.body {
    FrameBody::SetPixel { pos, color } => {
      w.write_all(&pos.x.to_le_bytes())?;
      w.write_all(&pos.y.to_le_bytes())?;
      w.write_all(&[color.r, color.g, color.b])?;
    }
    FrameBody::InvalidateRect { rect } | FrameBody::RevalidateRect { rect } => {
      w.write_all(&rect.min.x.to_le_bytes())?;
      w.write_all(&rect.min.y.to_le_bytes())?;
      w.write_all(&rect.max.x.to_le_bytes())?;
      w.write_all(&rect.max.y.to_le_bytes())?;
    }
    FrameBody::InvalidateAll => {}
    FrameBody::SetImage { image } => {
      let rect = image.rect();
      if rect.width() > u16::MAX as i64 || rect.height() > u16::MAX as i64 {
        return Err(CanvasError::Codec(format!(
          "image {}x{} too large for a frame",
          rect.width(),
          rect.height()
        )));
      }
      let bytes = image.rgba_bytes();
      w.write_all(&rect.min.x.to_le_bytes())?;
      w.write_all(&rect.min.y.to_le_bytes())?;
      w.write_all(&(rect.width() as u16).to_le_bytes())?;
      w.write_all(&(rect.height() as u16).to_le_bytes())?;
      w.write_all(&(bytes.len() as u32).to_le_bytes())?;
      w.write_all(bytes)?;
    }
  }

  Ok(())
}

/// Reads one frame. Returns `None` at a clean end of stream.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<Frame>, CanvasError> {
  let mut code = [0u8; 1];
  if r.read(&mut code)? == 0 {
    return Ok(None);
  }
  let code = code[0];

  let time = time_from_nanos(read_i64(r)?);

  let body = match code {
    DATA_SET_PIXEL => {
      let x = read_i32(r)?;
      let y = read_i32(r)?;
      let mut rgb = [0u8; 3];
      r.read_exact(&mut rgb)?;
      FrameBody::SetPixel {
        pos: PixelPos::new(x, y),
        color: Rgba::opaque(rgb[0], rgb[1], rgb[2]),
      }
    }
    DATA_INVALIDATE_RECT | DATA_REVALIDATE_RECT => {
      let min_x = read_i32(r)?;
      let min_y = read_i32(r)?;
      let max_x = read_i32(r)?;
      let max_y = read_i32(r)?;
      let rect = PixelRect::new(min_x, min_y, max_x, max_y);
      if code == DATA_INVALIDATE_RECT {
        FrameBody::InvalidateRect { rect }
      } else {
        FrameBody::RevalidateRect { rect }
      }
    }
    DATA_INVALIDATE_ALL => FrameBody::InvalidateAll,
    DATA_SET_IMAGE => {
      let x = read_i32(r)?;
      let y = read_i32(r)?;
      let width = read_u16(r)? as i32;
      let height = read_u16(r)? as i32;
      let size = read_u32(r)? as usize;
      let rect = PixelRect::new(x, y, x + width, y + height);

      let pixels = (width as usize) * (height as usize);
      let mut bytes = vec![0u8; size];
      r.read_exact(&mut bytes)?;

      let image = if size == pixels * 4 {
        PixelImage::from_rgba_bytes(rect, &bytes)?
      } else if size == pixels * 3 {
        let mut rgba = Vec::with_capacity(pixels * 4);
        for rgb in bytes.chunks_exact(3) {
          rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        PixelImage::from_rgba_bytes(rect, &rgba)?
      } else {
        return Err(CanvasError::Codec(format!(
          "image payload of {size} bytes does not match {width}x{height}"
        )));
      };
      FrameBody::SetImage { image }
    }
    other => {
      return Err(CanvasError::Codec(format!("unknown frame type {other}")));
    }
  };

  Ok(Some(Frame { time, body }))
}
