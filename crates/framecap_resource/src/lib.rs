//! framecap resource manager
//!
//! Identity allocation, the record arena, original/live ID mapping,
//! frame-reference tracking and the initial-contents store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod frame_ref;
pub mod initial;
pub mod manager;
pub mod mapping;
pub mod record;

pub use frame_ref::FrameRefType;
pub use initial::{InitialContents, InitialContentsAction, InitialContentsPolicy};
pub use manager::{ResourceManager, Wrapped};
pub use mapping::{LiveMap, LiveResource};
pub use record::{
    RecordData, RecordedChunk, ResourceRecord, ResourceType, ScopeData, ScopeError, ScopeStatus,
};
