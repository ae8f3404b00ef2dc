//! framecap core types
//!
//! Pure types shared by the capture and replay sides, with no I/O.
//! Everything here is serializable and has a stable encoding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod time;
pub mod version;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{IdAllocator, NativeHandle, ResourceId};
pub use time::{Timestamp, current_thread_id};
pub use version::{
    CONTAINER_VERSION, CaptureVersion, SERIALISE_VERSION, SUPPORTED_VERSIONS, is_supported_version,
};
