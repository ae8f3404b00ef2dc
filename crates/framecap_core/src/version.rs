//! Capture stream versioning.
//!
//! A chunk stream is stamped with a serialise version when it is opened.
//! Readers interpret only the versions listed in [`SUPPORTED_VERSIONS`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version written by this build.
///
/// Version 3 appends an integrity digest to every chunk.
pub const SERIALISE_VERSION: u64 = 0x0000_0003;

/// Versions this build can read.
///
/// Version 2 chunks have the same layout without the trailing digest.
pub const SUPPORTED_VERSIONS: &[u64] = &[0x0000_0002, 0x0000_0003];

/// Version of the section container that wraps the chunk stream.
pub const CONTAINER_VERSION: u32 = 1;

/// Whether a reader may interpret a stream stamped with `version`
#[must_use]
pub fn is_supported_version(version: u64) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// Typed serialise version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaptureVersion(u64);

impl CaptureVersion {
    /// The version this build writes
    pub const CURRENT: Self = Self(SERIALISE_VERSION);

    /// Wrap a raw version read from a stream
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this version is readable
    #[must_use]
    pub fn is_supported(&self) -> bool {
        is_supported_version(self.0)
    }

    /// Whether chunks carry a trailing integrity digest
    #[must_use]
    pub const fn has_chunk_digest(&self) -> bool {
        self.0 >= 0x0000_0003
    }
}

impl Default for CaptureVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for CaptureVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{:#x}", self.0)
    }
}
