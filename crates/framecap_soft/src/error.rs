//! Soft device errors.

use framecap_core::{CoreError, NativeHandle};
use framecap_replay::EncoderKind;

/// Misuse of the soft device
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SoftError {
    /// The handle names no object, or an object of another type
    #[error("{handle} is not a live {expected}")]
    UnknownObject {
        /// Handle given
        handle: NativeHandle,
        /// Object type the call needed
        expected: &'static str,
    },

    /// The command buffer is past recording
    #[error("command buffer {handle} is {status}, not recording")]
    NotRecording {
        /// Command buffer
        handle: NativeHandle,
        /// Its status
        status: &'static str,
    },

    /// The command needs a different encoder than the one open
    #[error("command buffer {handle} has {open:?} open, command needs {needed:?}")]
    WrongEncoder {
        /// Command buffer
        handle: NativeHandle,
        /// Encoder open now
        open: EncoderKind,
        /// Encoder the command needs
        needed: EncoderKind,
    },

    /// An access falls outside a buffer
    #[error("range {offset}+{size} outside buffer {handle} of {len} bytes")]
    OutOfBounds {
        /// Buffer
        handle: NativeHandle,
        /// Start of the access
        offset: u64,
        /// Length of the access
        size: u64,
        /// Buffer length
        len: usize,
    },

    /// Texture contents of the wrong size
    #[error("texture {handle} holds {expected} bytes, got {got}")]
    SizeMismatch {
        /// Texture
        handle: NativeHandle,
        /// Texture size in bytes
        expected: usize,
        /// Bytes supplied
        got: usize,
    },
}

impl From<SoftError> for CoreError {
    fn from(err: SoftError) -> Self {
        CoreError::InvalidState(err.to_string())
    }
}
