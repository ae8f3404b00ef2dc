//! Canonical postcard encoding for container metadata.
//!
//! The chunk payload has its own self-describing format; this is only for
//! fixed Rust structures like the container header, where byte-stable
//! serde encoding is enough.

use framecap_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Byte-stable serialization
pub trait CanonicalEncode: Serialize {
    /// Encode to canonical bytes
    ///
    /// # Errors
    ///
    /// Returns `FileCorrupted` if the value cannot be represented
    fn encode(&self) -> CoreResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(CoreError::from)
    }

    /// Encoded length in bytes
    fn encoded_len(&self) -> usize {
        self.encode().map(|v| v.len()).unwrap_or(0)
    }
}

/// Counterpart of [`CanonicalEncode`]
pub trait CanonicalDecode<'de>: Deserialize<'de> {
    /// Decode from canonical bytes
    ///
    /// # Errors
    ///
    /// Returns `FileCorrupted` if the bytes are not a valid encoding
    fn decode(data: &'de [u8]) -> CoreResult<Self>
    where
        Self: Sized,
    {
        postcard::from_bytes(data).map_err(CoreError::from)
    }
}

impl<'de, T: Deserialize<'de>> CanonicalDecode<'de> for T {}
