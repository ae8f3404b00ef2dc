//! Per-thread chunk writers.
//!
//! Each authoring thread gets its own [`ChunkWriter`] so the common capture
//! path never contends. Writers are also listed in a shared registry so a
//! flush can visit every one of them.
//!
//! A writer is shared by its thread and the registry. Once either side lets
//! go, the other drops it: flush prunes writers of exited threads, and a
//! thread prunes writers of dropped registries.

use crate::chunk::ChunkMetadataOptions;
use crate::writer::{CallstackProvider, ChunkWriter};
use framecap_core::current_thread_id;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_WRITERS: RefCell<HashMap<u64, Arc<Mutex<ChunkWriter>>>> =
        RefCell::new(HashMap::new());
}

/// Per-thread counters reported by [`WriterRegistry::flush`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    /// Thread that owns the writer
    pub thread_id: u64,
    /// Chunks completed since the previous flush
    pub chunks: u64,
    /// Payload bytes since the previous flush
    pub bytes: u64,
}

#[derive(Debug)]
struct RegisteredWriter {
    thread_id: u64,
    writer: Arc<Mutex<ChunkWriter>>,
}

/// Shared list of per-thread writers
#[derive(Debug)]
pub struct WriterRegistry {
    id: u64,
    options: ChunkMetadataOptions,
    callstack: Option<CallstackProvider>,
    writers: Mutex<Vec<RegisteredWriter>>,
}

impl WriterRegistry {
    /// Create a registry whose writers record `options`
    #[must_use]
    pub fn new(options: ChunkMetadataOptions) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            options,
            callstack: None,
            writers: Mutex::new(Vec::new()),
        }
    }

    /// Give every writer a callstack provider
    #[must_use]
    pub fn with_callstack_provider(mut self, provider: CallstackProvider) -> Self {
        self.callstack = Some(provider);
        self
    }

    /// Metadata options of the writers
    #[must_use]
    pub fn options(&self) -> ChunkMetadataOptions {
        self.options
    }

    /// Run `f` with the calling thread's writer, creating it on first use
    pub fn with_thread_writer<R>(&self, f: impl FnOnce(&mut ChunkWriter) -> R) -> R {
        let writer = THREAD_WRITERS.with(|map| {
            let mut map = map.borrow_mut();
            if let Some(existing) = map.get(&self.id) {
                return Arc::clone(existing);
            }
            let mut fresh = ChunkWriter::new(self.options);
            if let Some(provider) = self.callstack {
                fresh = fresh.with_callstack_provider(provider);
            }
            let fresh = Arc::new(Mutex::new(fresh));
            let thread_id = current_thread_id();
            self.writers.lock().push(RegisteredWriter {
                thread_id,
                writer: Arc::clone(&fresh),
            });
            map.retain(|_, writer| Arc::strong_count(writer) > 1);
            map.insert(self.id, Arc::clone(&fresh));
            tracing::debug!(registry = self.id, thread_id, "registered chunk writer");
            fresh
        });
        let mut guard = writer.lock();
        f(&mut guard)
    }

    /// Number of writers held, including those of exited threads not yet
    /// flushed
    #[must_use]
    pub fn writer_count(&self) -> usize {
        self.writers.lock().len()
    }

    /// Visit every writer, resetting and reporting its counters. Writers
    /// of exited threads are reported one last time and then dropped.
    pub fn flush(&self) -> Vec<WriterStats> {
        let writers: Vec<(u64, Arc<Mutex<ChunkWriter>>)> = self
            .writers
            .lock()
            .iter()
            .map(|w| (w.thread_id, Arc::clone(&w.writer)))
            .collect();
        let stats = writers
            .into_iter()
            .map(|(thread_id, writer)| {
                let mut writer = writer.lock();
                if writer.is_open() {
                    tracing::warn!(thread_id, "flushing writer with an open chunk");
                }
                let (chunks, bytes) = writer.take_counters();
                WriterStats {
                    thread_id,
                    chunks,
                    bytes,
                }
            })
            .collect();

        let mut writers = self.writers.lock();
        let before = writers.len();
        writers.retain(|w| Arc::strong_count(&w.writer) > 1);
        if writers.len() < before {
            tracing::debug!(
                registry = self.id,
                pruned = before - writers.len(),
                "dropped writers of exited threads"
            );
        }
        stats
    }
}

impl Default for WriterRegistry {
    fn default() -> Self {
        Self::new(ChunkMetadataOptions::default())
    }
}
