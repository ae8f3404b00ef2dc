//! Load-time statistics.

use framecap_chunk::{CaptureScopeInfo, Chunk};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Counters for one chunk kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStats {
    /// Chunks seen
    pub count: u64,
    /// Payload bytes
    pub bytes: u64,
    /// Sum of recorded call durations, where recorded
    pub duration_us: u64,
}

/// Per-kind chunk statistics of one load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStats {
    kinds: IndexMap<String, KindStats>,
}

impl ChunkStats {
    /// Create empty statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Account one chunk under `name`
    pub fn record(&mut self, name: &str, chunk: &Chunk) {
        let entry = self.kinds.entry(name.to_string()).or_default();
        entry.count += 1;
        entry.bytes += chunk.payload().len() as u64;
        entry.duration_us += chunk.metadata().duration_us.unwrap_or(0);
    }

    /// Counters for `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&KindStats> {
        self.kinds.get(name)
    }

    /// Counters in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &KindStats)> {
        self.kinds.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    /// Total chunks
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.kinds.values().map(|s| s.count).sum()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.kinds.clear();
    }
}

/// Frame described by the capture's `CaptureScope` chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Frame number and counters as recorded
    pub info: CaptureScopeInfo,
    /// Offset of the first frame chunk
    pub frame_start_offset: u64,
    /// Index of the first frame chunk
    pub frame_start_index: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use framecap_chunk::{ChunkKind, ChunkMetadata};

    #[test]
    fn test_record_accumulates() {
        let mut stats = ChunkStats::new();
        let timed = Chunk::from_parts(
            ChunkKind::driver(1),
            ChunkMetadata {
                duration_us: Some(5),
                ..ChunkMetadata::default()
            },
            Bytes::from_static(&[0u8; 12]),
        );
        stats.record("Draw", &timed);
        stats.record("Draw", &timed);
        stats.record("Present", &timed);
        let draw = stats.get("Draw").unwrap();
        assert_eq!(draw.count, 2);
        assert_eq!(draw.bytes, 24);
        assert_eq!(draw.duration_us, 10);
        assert_eq!(stats.total_chunks(), 3);
        let names: Vec<&str> = stats.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Draw", "Present"]);
    }
}
