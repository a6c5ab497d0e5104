//! Chunked pixel-canvas engine for pixel-drawing games.
//!
//! This crate sits between a game connection and any number of listeners
//! (UIs, bots, recorders) and keeps a shared, effectively unbounded pixel
//! canvas consistent under concurrent updates:
//!
//! - The canvas stores pixels in fixed-size chunks, each with its own
//!   validity and download state. Pixels arriving while a chunk downloads
//!   are queued and replayed over the bulk image, so chunks stay in sync
//!   even when downloads take a while.
//! - A per-canvas broadcast loop fans events out to listeners in order.
//!   Listeners can opt into virtual chunks: the canvas then projects their
//!   viewport onto chunk-aligned tiles with stable ids and filters events
//!   down to those tiles.
//! - A download scheduler turns viewport hints into chunk-download requests
//!   for the connection and evicts chunks no viewport cares about.
//! - Canvas events can be recorded to gzip `.pixrec` files and replayed
//!   later; a replayed canvas looks exactly like a live one to listeners.
//!
//! Construct a [`Canvas`] with [`Canvas::new`], feed it from the connection
//! via its mutators, and attach listeners with
//! [`Canvas::subscribe_listener`].

pub mod bridge;
mod canvas;
mod chunk;
mod config;
pub mod coords;
mod error;
mod listener;
pub mod primitives;
pub mod recording;

pub use bridge::{BridgeListener, HostMessage, RectMessage, ViewportCoalescer};
pub use canvas::{Canvas, ChunkRequest};
pub use config::{CanvasConfig, SchedulerTuning};
pub use coords::{ChunkCoord, ChunkGrid, ChunkRect, ChunkSize};
pub use error::CanvasError;
pub use listener::{CanvasListener, VcId};
pub use primitives::{PixelImage, PixelPos, PixelRect, Rgba, RgbaSurface};
pub use recording::{CanvasDiskReader, CanvasDiskWriter};
