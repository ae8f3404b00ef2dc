//! framecap software backend
//!
//! A small in-memory GPU with deferred command buffers, a submission queue
//! and a one-row colour target. It has a capture wrapper that records
//! every call through the framecap recorder and a replay backend with a
//! handler for every chunk the wrapper writes, so whole frames can be
//! captured and replayed without any real driver.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod chunks;
pub mod demo;
pub mod device;
pub mod error;
pub mod replay;

#[cfg(test)]
mod scenario;

pub use capture::{SOFT_DRIVER_NAME, SOFT_DRIVER_VERSION, SoftCapture};
pub use chunks::SoftChunk;
pub use demo::{CLEAR_COLOUR, DEMO_WIDTH, Demo, DemoSchedule, PIPELINE_COLOURS, record_demo};
pub use device::{Attachment, Command, CommandBufferStatus, SoftDevice};
pub use error::SoftError;
pub use replay::{SoftReplayer, dispatch_table};
