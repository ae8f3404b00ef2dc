//! framecap capture recorder
//!
//! Turns intercepted calls into chunks, keeps deferred scopes apart until
//! they can be folded into the log in submission order, and assembles the
//! frame's chunk stream.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod context;
pub mod options;
pub mod queue;

pub use backend::CaptureBackend;
pub use context::{CaptureContext, CaptureState};
pub use options::CaptureOptions;
pub use queue::SubmissionQueue;
