//! framecap replay engine
//!
//! Reads a captured chunk stream, builds the frame's event/action timeline
//! once, and replays any range of it against a backend, including partial
//! replay from the middle of a deferred scope.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod backend;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod options;
pub mod stats;
pub mod timeline;
pub mod tracker;

pub use action::{ActionDescription, ActionFlags, ApiEvent};
pub use backend::ReplayBackend;
pub use context::{Gate, ReplayContext};
pub use dispatch::{DispatchTable, Handler};
pub use engine::{LIVE_ID_BASE, ReplayEngine, ReplayState};
pub use options::ReplayOptions;
pub use stats::{ChunkStats, FrameRecord, KindStats};
pub use timeline::{EventLocation, ScopeInfo, Timeline};
pub use tracker::{
    BufferBinding, ColourAttachment, EncoderKind, EncoderState, LoadOp, ScissorRect, Viewport,
};
