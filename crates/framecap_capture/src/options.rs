//! Capture configuration.

use framecap_chunk::ChunkMetadataOptions;
use framecap_resource::InitialContentsPolicy;
use serde::{Deserialize, Serialize};

/// Capture options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// How much pre-frame state to keep
    pub initial_contents: InitialContentsPolicy,
    /// Per-chunk metadata to record
    pub metadata: ChunkMetadataOptions,
    /// Diff CPU-writable buffers before each scope commit
    pub diff_cpu_buffers: bool,
}

impl CaptureOptions {
    /// Options whose output depends only on the calls made: no metadata
    #[must_use]
    pub fn deterministic() -> Self {
        Self::default().with_metadata(ChunkMetadataOptions::none())
    }

    /// Set initial contents policy
    #[must_use]
    pub fn with_initial_contents(mut self, policy: InitialContentsPolicy) -> Self {
        self.initial_contents = policy;
        self
    }

    /// Set metadata options
    #[must_use]
    pub fn with_metadata(mut self, metadata: ChunkMetadataOptions) -> Self {
        self.metadata = metadata;
        self
    }

    /// Enable or disable CPU buffer diffing
    #[must_use]
    pub fn with_diff_cpu_buffers(mut self, enabled: bool) -> Self {
        self.diff_cpu_buffers = enabled;
        self
    }
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            initial_contents: InitialContentsPolicy::default(),
            metadata: ChunkMetadataOptions::default(),
            diff_cpu_buffers: true,
        }
    }
}
