//! Resource records: the chunks produced for one object plus its side data.

use crate::frame_ref::FrameRefType;
use framecap_chunk::Chunk;
use framecap_core::{CoreError, ResourceId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of a captured object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// Linear memory
    Buffer,
    /// Image memory
    Texture,
    /// Compiled pipeline state
    Pipeline,
    /// Deferred recording scope (command buffer)
    Scope,
    /// The device itself
    Device,
    /// Backend-defined
    Other(u32),
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(tag) => write!(f, "Other({tag})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Lifecycle of a deferred recording scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeStatus {
    /// Created, no position in the submission order yet
    #[default]
    Unknown,
    /// Holds a submission sequence number
    Enqueued,
    /// Recording finished, waiting for earlier scopes
    Committed,
    /// Folded into the log
    Submitted,
}

/// Illegal scope transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("scope {scope} cannot move from {from:?} to {to:?}")]
pub struct ScopeError {
    /// The scope
    pub scope: ResourceId,
    /// Current status
    pub from: ScopeStatus,
    /// Requested status
    pub to: ScopeStatus,
}

impl From<ScopeError> for CoreError {
    fn from(err: ScopeError) -> Self {
        CoreError::InvalidState(err.to_string())
    }
}

impl ScopeStatus {
    /// Move to `to` if that is the next step of the lifecycle
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError`] for any other transition
    pub fn advance(&mut self, scope: ResourceId, to: ScopeStatus) -> Result<(), ScopeError> {
        let allowed = matches!(
            (*self, to),
            (ScopeStatus::Unknown, ScopeStatus::Enqueued)
                | (ScopeStatus::Enqueued, ScopeStatus::Committed)
                | (ScopeStatus::Committed, ScopeStatus::Submitted)
        );
        if allowed {
            *self = to;
            Ok(())
        } else {
            Err(ScopeError {
                scope,
                from: *self,
                to,
            })
        }
    }
}

/// Side data of a scope record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeData {
    /// Lifecycle position
    pub status: ScopeStatus,
    /// Submission sequence number, set at enqueue
    pub sequence: Option<u64>,
    /// Resources this scope touches, applied to the frame when it is released
    pub frame_refs: IndexMap<ResourceId, FrameRefType>,
}

impl ScopeData {
    /// Record an access made by this scope
    pub fn mark_referenced(&mut self, id: ResourceId, access: FrameRefType) {
        let entry = self.frame_refs.entry(id).or_default();
        *entry = entry.compose(access);
    }
}

/// Type-specific side data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RecordData {
    /// No side data
    #[default]
    None,
    /// A CPU-writable buffer and the bytes it held at the last sync point
    CpuBuffer {
        /// Baseline for diffing
        baseline: Vec<u8>,
    },
    /// A deferred recording scope
    Scope(ScopeData),
}

/// A chunk with its global recording order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedChunk {
    /// Global sequence across all records
    pub sequence: u64,
    /// The chunk
    pub chunk: Chunk,
}

/// Chunks and side data for one captured object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    id: ResourceId,
    ty: ResourceType,
    chunks: Vec<RecordedChunk>,
    created_in_frame: bool,
    /// Type-specific side data
    pub data: RecordData,
}

impl ResourceRecord {
    /// Create an empty record
    #[must_use]
    pub fn new(id: ResourceId, ty: ResourceType) -> Self {
        let data = if ty == ResourceType::Scope {
            RecordData::Scope(ScopeData::default())
        } else {
            RecordData::None
        };
        Self {
            id,
            ty,
            chunks: Vec::new(),
            created_in_frame: false,
            data,
        }
    }

    /// Resource ID
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Type tag
    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        self.ty
    }

    /// Chunks in recording order
    #[must_use]
    pub fn chunks(&self) -> &[RecordedChunk] {
        &self.chunks
    }

    /// Append a chunk
    pub fn push_chunk(&mut self, sequence: u64, chunk: Chunk) {
        self.chunks.push(RecordedChunk { sequence, chunk });
    }

    /// Remove and return all chunks
    pub fn take_chunks(&mut self) -> Vec<RecordedChunk> {
        std::mem::take(&mut self.chunks)
    }

    /// Whether the object was created during the active frame
    #[must_use]
    pub fn created_in_frame(&self) -> bool {
        self.created_in_frame
    }

    /// Mark the object as created during the active frame
    pub fn set_created_in_frame(&mut self, value: bool) {
        self.created_in_frame = value;
    }

    /// Scope side data, if this is a scope
    #[must_use]
    pub fn scope(&self) -> Option<&ScopeData> {
        match &self.data {
            RecordData::Scope(scope) => Some(scope),
            _ => None,
        }
    }

    /// Mutable scope side data, if this is a scope
    pub fn scope_mut(&mut self) -> Option<&mut ScopeData> {
        match &mut self.data {
            RecordData::Scope(scope) => Some(scope),
            _ => None,
        }
    }
}
