//! Recording of canvas event streams to disk and replaying them back.
//!
//! Recordings are gzip-compressed `.pixrec` files grouped per canvas name
//! under a `Recordings/` directory, one file per session. The
//! [`CanvasDiskWriter`] is a listener that frames events into the current
//! file; the [`CanvasDiskReader`] reconstructs a canvas from a directory of
//! files and seeks it through time.

mod format;
mod reader;
mod writer;

pub use format::{read_frame, write_frame, Frame, FrameBody, RecordingHeader, MAGIC, VERSION};
pub use reader::CanvasDiskReader;
pub use writer::CanvasDiskWriter;
