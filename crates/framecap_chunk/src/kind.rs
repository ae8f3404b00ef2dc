//! Chunk kind numbering.
//!
//! A small fixed range of system kinds is shared by every backend. Backend
//! kinds start at [`FIRST_DRIVER_CHUNK`]. An unknown kind below that offset
//! can only mean the stream is damaged; an unknown kind above it is a
//! feature this build does not implement.

use framecap_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// First kind number available to backends
pub const FIRST_DRIVER_CHUNK: u32 = 1000;

/// Raw chunk kind as stored in the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKind(u32);

impl ChunkKind {
    /// Wrap a raw kind value
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Kind for the `index`th backend chunk
    #[must_use]
    pub const fn driver(index: u32) -> Self {
        Self(FIRST_DRIVER_CHUNK + index)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this kind lies in the backend range
    #[must_use]
    pub const fn is_driver(&self) -> bool {
        self.0 >= FIRST_DRIVER_CHUNK
    }

    /// Resolve to a system chunk, a backend chunk, or a corruption error.
    ///
    /// # Errors
    ///
    /// Returns `ApiDataCorrupted` for an unknown kind below the backend range
    pub fn classify(&self) -> CoreResult<ChunkClass> {
        if self.is_driver() {
            return Ok(ChunkClass::Driver(*self));
        }
        SystemChunk::from_raw(self.0)
            .map(ChunkClass::System)
            .ok_or_else(|| CoreError::corrupted(format!("unrecognised system chunk kind {}", self.0)))
    }
}

impl From<SystemChunk> for ChunkKind {
    fn from(value: SystemChunk) -> Self {
        Self(value as u32)
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match SystemChunk::from_raw(self.0) {
            Some(system) => write!(f, "{}", system.name()),
            None => write!(f, "Chunk#{}", self.0),
        }
    }
}

/// Chunk kinds shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum SystemChunk {
    /// Backend-identifying parameters, first chunk of every stream
    DriverInit = 1,
    /// Count of initial-contents chunks that follow
    InitialContentsList = 2,
    /// Pre-frame snapshot of one resource
    InitialContents = 3,
    /// Frame metadata, marks the start of the frame region
    CaptureScope = 4,
    /// Top-of-frame state
    CaptureBegin = 5,
    /// End of the frame, names the presented resource
    CaptureEnd = 6,
}

impl SystemChunk {
    /// All system chunks in numeric order
    pub const ALL: [SystemChunk; 6] = [
        Self::DriverInit,
        Self::InitialContentsList,
        Self::InitialContents,
        Self::CaptureScope,
        Self::CaptureBegin,
        Self::CaptureEnd,
    ];

    /// Look up by raw value
    #[must_use]
    pub fn from_raw(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| *s as u32 == value)
    }

    /// Display name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DriverInit => "DriverInit",
            Self::InitialContentsList => "InitialContentsList",
            Self::InitialContents => "InitialContents",
            Self::CaptureScope => "CaptureScope",
            Self::CaptureBegin => "CaptureBegin",
            Self::CaptureEnd => "CaptureEnd",
        }
    }

    /// Kind value
    #[must_use]
    pub fn kind(self) -> ChunkKind {
        self.into()
    }
}

/// Result of classifying a chunk kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkClass {
    /// One of the shared system chunks
    System(SystemChunk),
    /// A backend chunk
    Driver(ChunkKind),
}
