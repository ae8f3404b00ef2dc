//! Chunk kind to handler table.
//!
//! Built once per backend. The engine only knows system chunks; every
//! backend kind is replayed by the handler registered for it.

use crate::backend::ReplayBackend;
use crate::context::ReplayContext;
use framecap_chunk::{ChunkKind, ChunkReader};
use framecap_core::{CoreError, CoreResult};
use std::collections::HashMap;

/// Replays one backend chunk
pub type Handler<B> = fn(&mut ReplayContext<'_, B>, &mut ChunkReader<'_>) -> CoreResult<()>;

struct Entry<B: ReplayBackend> {
    name: String,
    handler: Handler<B>,
}

/// Registered handlers of one backend
pub struct DispatchTable<B: ReplayBackend> {
    entries: HashMap<ChunkKind, Entry<B>>,
}

impl<B: ReplayBackend> Default for DispatchTable<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ReplayBackend> std::fmt::Debug for DispatchTable<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("handlers", &self.entries.len())
            .finish()
    }
}

impl<B: ReplayBackend> DispatchTable<B> {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register the handler for a backend kind.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a system kind or a kind registered twice
    pub fn register(
        &mut self,
        kind: ChunkKind,
        name: impl Into<String>,
        handler: Handler<B>,
    ) -> CoreResult<()> {
        if !kind.is_driver() {
            return Err(CoreError::InvalidParameter {
                name: "kind".to_string(),
                reason: format!("{} is a system chunk kind", kind.as_u32()),
            });
        }
        if self.entries.contains_key(&kind) {
            return Err(CoreError::InvalidParameter {
                name: "kind".to_string(),
                reason: format!("{} already has a handler", kind.as_u32()),
            });
        }
        self.entries.insert(
            kind,
            Entry {
                name: name.into(),
                handler,
            },
        );
        Ok(())
    }

    /// Handler for `kind`
    #[must_use]
    pub fn handler(&self, kind: ChunkKind) -> Option<Handler<B>> {
        self.entries.get(&kind).map(|entry| entry.handler)
    }

    /// Registered name of `kind`
    #[must_use]
    pub fn name_of(&self, kind: ChunkKind) -> Option<&str> {
        self.entries.get(&kind).map(|entry| entry.name.as_str())
    }

    /// Registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
