//! Ordered merge of committed scopes into submission order.
//!
//! Sequence numbers are handed out at enqueue. A committed scope is
//! released only once every scope with a lower sequence number has been
//! released, no matter which thread committed first.

use framecap_core::ResourceId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
struct Pending {
    scope: ResourceId,
    committed: bool,
}

/// Scopes between enqueue and release
#[derive(Debug, Default)]
pub struct SubmissionQueue {
    next_sequence: u64,
    pending: BTreeMap<u64, Pending>,
}

impl SubmissionQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next submission slot for `scope`
    pub fn enqueue(&mut self, scope: ResourceId) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.insert(
            sequence,
            Pending {
                scope,
                committed: false,
            },
        );
        sequence
    }

    /// Mark a slot committed. Returns false for an unknown slot.
    pub fn mark_committed(&mut self, sequence: u64) -> bool {
        match self.pending.get_mut(&sequence) {
            Some(pending) => {
                pending.committed = true;
                true
            }
            None => false,
        }
    }

    /// Remove and return the longest committed prefix, in sequence order
    pub fn drain_ready(&mut self) -> Vec<(u64, ResourceId)> {
        let mut ready = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if !entry.get().committed {
                break;
            }
            let (sequence, pending) = entry.remove_entry();
            ready.push((sequence, pending.scope));
        }
        ready
    }

    /// Scopes waiting for release
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Scopes that are committed but blocked behind an earlier one
    #[must_use]
    pub fn blocked(&self) -> Vec<ResourceId> {
        self.pending
            .values()
            .filter(|p| p.committed)
            .map(|p| p.scope)
            .collect()
    }
}
