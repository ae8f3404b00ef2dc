//! Original to live ID mapping.
//!
//! Capture registers every object with original == live. Replay creates a
//! fresh live ID per re-created object and may temporarily substitute a
//! different live object for an original ID.

use framecap_core::{NativeHandle, ResourceId};
use std::collections::HashMap;

/// One live object as reported by [`LiveMap::live_resources`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveResource {
    /// ID used in the log
    pub original: ResourceId,
    /// ID of the object created this session
    pub live: ResourceId,
    /// Backend handle
    pub native: NativeHandle,
}

/// Bidirectional ID tables
#[derive(Debug, Default)]
pub struct LiveMap {
    to_live: HashMap<ResourceId, ResourceId>,
    to_original: HashMap<ResourceId, ResourceId>,
    natives: HashMap<ResourceId, NativeHandle>,
    replacements: HashMap<ResourceId, ResourceId>,
    replaced_by: HashMap<ResourceId, ResourceId>,
}

impl LiveMap {
    /// Create empty tables
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `original` to `live` backed by `native`
    pub fn add(&mut self, original: ResourceId, live: ResourceId, native: NativeHandle) {
        if let Some(previous) = self.to_live.insert(original, live) {
            if previous != live {
                self.to_original.remove(&previous);
                self.natives.remove(&previous);
            }
        }
        self.to_original.insert(live, original);
        self.natives.insert(live, native);
    }

    /// Whether `original` has a live object, ignoring replacements
    #[must_use]
    pub fn has(&self, original: ResourceId) -> bool {
        self.to_live.contains_key(&original)
    }

    /// Drop the mapping for `original` and return the live object it had
    pub fn erase(&mut self, original: ResourceId) -> Option<LiveResource> {
        let live = self.to_live.remove(&original)?;
        self.to_original.remove(&live);
        let native = self.natives.remove(&live).unwrap_or_default();
        Some(LiveResource {
            original,
            live,
            native,
        })
    }

    /// Live ID for `original`, preferring an installed replacement.
    /// Null if there is no mapping.
    #[must_use]
    pub fn live_id(&self, original: ResourceId) -> ResourceId {
        self.replacements
            .get(&original)
            .or_else(|| self.to_live.get(&original))
            .copied()
            .unwrap_or_default()
    }

    /// Original ID for `live`, resolving replacement objects too.
    /// Null if there is no mapping.
    #[must_use]
    pub fn original_id(&self, live: ResourceId) -> ResourceId {
        self.replaced_by
            .get(&live)
            .copied()
            .unwrap_or_else(|| self.unreplaced_original_id(live))
    }

    /// Original ID for `live` from the primary table only
    #[must_use]
    pub fn unreplaced_original_id(&self, live: ResourceId) -> ResourceId {
        self.to_original.get(&live).copied().unwrap_or_default()
    }

    /// Backend handle of a live object
    #[must_use]
    pub fn native(&self, live: ResourceId) -> Option<NativeHandle> {
        self.natives.get(&live).copied()
    }

    /// Substitute `live` (backed by `native`) for `original`
    pub fn replace(&mut self, original: ResourceId, live: ResourceId, native: NativeHandle) {
        if let Some(previous) = self.replacements.insert(original, live) {
            self.replaced_by.remove(&previous);
            if previous != live {
                self.natives.remove(&previous);
            }
        }
        self.replaced_by.insert(live, original);
        self.natives.insert(live, native);
    }

    /// Remove the substitute for `original` and return it
    pub fn remove_replacement(&mut self, original: ResourceId) -> Option<LiveResource> {
        let live = self.replacements.remove(&original)?;
        self.replaced_by.remove(&live);
        let native = self.natives.remove(&live).unwrap_or_default();
        Some(LiveResource {
            original,
            live,
            native,
        })
    }

    /// Whether a substitute is installed for `original`
    #[must_use]
    pub fn is_replaced(&self, original: ResourceId) -> bool {
        self.replacements.contains_key(&original)
    }

    /// All primary mappings, ordered by original ID
    #[must_use]
    pub fn live_resources(&self) -> Vec<LiveResource> {
        let mut out: Vec<LiveResource> = self
            .to_live
            .iter()
            .map(|(original, live)| LiveResource {
                original: *original,
                live: *live,
                native: self.natives.get(live).copied().unwrap_or_default(),
            })
            .collect();
        out.sort_by_key(|r| r.original);
        out
    }

    /// Number of primary mappings
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_live.len()
    }

    /// Whether there are no primary mappings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_live.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
