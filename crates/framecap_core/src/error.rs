//! Core error types for framecap.
//!
//! The taxonomy separates container-level corruption, chunk-stream
//! corruption, version mismatches and unsupported features. Stream-framing
//! errors are fatal for a read or replay pass; the log is immutable so a
//! retry can never change the outcome.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// The capture container is damaged (bad magic, missing section, header decode failure)
    #[error("File corrupted: {reason}")]
    FileCorrupted {
        /// What was wrong
        reason: String,
    },

    /// The chunk stream is truncated or inconsistent
    #[error("API data corrupted: {reason}")]
    ApiDataCorrupted {
        /// What was wrong
        reason: String,
    },

    /// The stream was written with a version this reader does not list as supported
    #[error("Incompatible capture version {version:#x}")]
    ApiIncompatibleVersion {
        /// Version found in the stream
        version: u64,
    },

    /// Unhandled chunk kind or missing backend capability
    #[error("Unsupported: {reason}")]
    ApiUnsupported {
        /// What is unsupported
        reason: String,
    },

    /// Reading or writing the underlying file failed
    #[error("File I/O failed: {reason}")]
    FileIoFailed {
        /// OS-level error text
        reason: String,
    },

    /// A chunk handler reported a failure while replaying
    #[error("Replay of {chunk} failed: {reason}")]
    ApiReplayFailed {
        /// Name of the chunk being replayed
        chunk: String,
        /// Handler's error text
        reason: String,
    },

    /// A caller-supplied argument is out of range
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// An operation was attempted in a state that does not permit it
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl CoreError {
    /// Shorthand for a chunk-stream corruption error
    pub fn corrupted(reason: impl Into<String>) -> Self {
        Self::ApiDataCorrupted {
            reason: reason.into(),
        }
    }

    /// Shorthand for an unsupported-feature error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::ApiUnsupported {
            reason: reason.into(),
        }
    }

    /// Whether this error breaks stream framing and must terminate the pass.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidParameter { .. })
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::FileIoFailed {
            reason: err.to_string(),
        }
    }
}

impl From<postcard::Error> for CoreError {
    fn from(err: postcard::Error) -> Self {
        Self::FileCorrupted {
            reason: format!("container header: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::corrupted("chunk truncated");
        assert_eq!(format!("{}", err), "API data corrupted: chunk truncated");

        let err = CoreError::ApiIncompatibleVersion { version: 0x10 };
        assert_eq!(format!("{}", err), "Incompatible capture version 0x10");
    }

    #[test]
    fn test_io_error_maps_to_file_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::FileIoFailed { .. }));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(CoreError::corrupted("x").is_fatal());
        assert!(CoreError::unsupported("x").is_fatal());
        assert!(
            !CoreError::InvalidParameter {
                name: "end".to_string(),
                reason: "past last event".to_string(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(CoreError::corrupted("a"), CoreError::corrupted("a"));
        assert_ne!(CoreError::corrupted("a"), CoreError::unsupported("a"));
    }
}
