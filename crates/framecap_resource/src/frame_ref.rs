//! How a resource is touched during the captured frame.

use serde::{Deserialize, Serialize};

/// Strongest access seen for a resource during the frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameRefType {
    /// Not referenced
    #[default]
    None,
    /// Only read so far
    Read,
    /// Part of the resource written, nothing read
    PartialWrite,
    /// The whole resource overwritten before any read
    CompleteWrite,
    /// Read and later written. Initial contents are required.
    ReadBeforeWrite,
    /// Fully written, then read. Initial contents are irrelevant.
    WriteBeforeRead,
}

impl FrameRefType {
    /// Fold a later access `next` into the access history `self`.
    #[must_use]
    pub fn compose(self, next: FrameRefType) -> FrameRefType {
        use FrameRefType::*;
        match (self, next) {
            (current, None) => current,
            (None, next) => next,
            (ReadBeforeWrite | WriteBeforeRead, _) => self,
            (Read, Read) => Read,
            (Read, _) => ReadBeforeWrite,
            (PartialWrite, Read | ReadBeforeWrite) => ReadBeforeWrite,
            (PartialWrite, PartialWrite) => PartialWrite,
            (PartialWrite, CompleteWrite | WriteBeforeRead) => next,
            (CompleteWrite, Read | WriteBeforeRead) => WriteBeforeRead,
            (CompleteWrite, _) => CompleteWrite,
        }
    }

    /// Whether replay must restore the resource's pre-frame contents
    #[must_use]
    pub const fn needs_initial_contents(self) -> bool {
        matches!(self, Self::Read | Self::PartialWrite | Self::ReadBeforeWrite)
    }

    /// Whether the resource was referenced at all
    #[must_use]
    pub const fn is_referenced(self) -> bool {
        !matches!(self, Self::None)
    }
}
