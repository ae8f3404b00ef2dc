//! Initial contents: the pre-frame state of a resource and the policy that
//! decides how much of it to keep.

use crate::frame_ref::FrameRefType;
use bytes::Bytes;
use framecap_chunk::{ChunkReader, ChunkWriter, Serialise};
use framecap_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Snapshot of a resource taken before the frame starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitialContents {
    /// Full copy of the resource bytes
    Bytes(Bytes),
    /// The resource can be zero-filled instead of copied
    Clear {
        /// Size of the resource in bytes
        size: u64,
    },
}

impl InitialContents {
    /// Size of the resource this snapshot restores
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Clear { size } => *size,
        }
    }

    /// Bytes replay should upload
    #[must_use]
    pub fn materialize(&self) -> Bytes {
        match self {
            Self::Bytes(bytes) => bytes.clone(),
            Self::Clear { size } => Bytes::from(vec![0u8; *size as usize]),
        }
    }
}

impl Serialise for InitialContents {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_struct(name, "InitialContents");
        match self {
            Self::Bytes(bytes) => {
                writer.write_enum("kind", "InitialContentsKind", 0);
                writer.write_bytes("data", bytes);
            }
            Self::Clear { size } => {
                writer.write_enum("kind", "InitialContentsKind", 1);
                writer.write_u64("size", *size);
            }
        }
        writer.end_struct();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.begin_struct(name, "InitialContents")?;
        match reader.read_enum("kind", "InitialContentsKind")? {
            0 => Ok(Self::Bytes(reader.read_bytes("data")?)),
            1 => Ok(Self::Clear {
                size: reader.read_u64("size")?,
            }),
            other => Err(CoreError::corrupted(format!(
                "unknown initial contents kind {other}"
            ))),
        }
    }
}

/// What to record for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialContentsAction {
    /// Read back and store the bytes
    Copy,
    /// Store a clear marker only
    Clear,
    /// Store nothing
    Skip,
}

/// How aggressively initial contents may be skipped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialContentsPolicy {
    /// Copy every resource, referenced or not
    #[default]
    CopyAll,
    /// Copy every resource the frame references
    NoOptimisation,
    /// Copy what is read, clear what is only overwritten
    ClearUnread,
    /// Copy only what is read before being written
    Fastest,
}

impl InitialContentsPolicy {
    /// Decide what to keep for a resource with the given frame access
    #[must_use]
    pub fn decide(self, frame_ref: FrameRefType) -> InitialContentsAction {
        match self {
            Self::CopyAll => InitialContentsAction::Copy,
            Self::NoOptimisation if frame_ref.is_referenced() => InitialContentsAction::Copy,
            Self::NoOptimisation => InitialContentsAction::Skip,
            _ if frame_ref.needs_initial_contents() => InitialContentsAction::Copy,
            Self::ClearUnread if frame_ref.is_referenced() => InitialContentsAction::Clear,
            Self::ClearUnread | Self::Fastest => InitialContentsAction::Skip,
        }
    }
}
