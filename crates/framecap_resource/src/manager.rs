//! The resource manager: one arena of records keyed by ResourceId, plus
//! the ID maps, frame references and initial contents that hang off it.
//!
//! Every table sits behind its own lock, held only for the duration of a
//! map operation. No lock is held while calling into a backend.

use crate::frame_ref::FrameRefType;
use crate::initial::InitialContents;
use crate::mapping::{LiveMap, LiveResource};
use crate::record::{RecordedChunk, ResourceRecord, ResourceType};
use framecap_chunk::Chunk;
use framecap_core::{CoreError, CoreResult, IdAllocator, NativeHandle, ResourceId};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};

/// A wrapped backend object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wrapped {
    /// Identity in the log
    pub id: ResourceId,
    /// Backend handle
    pub native: NativeHandle,
    /// Type tag
    pub ty: ResourceType,
}

#[derive(Debug)]
enum IdSource {
    Global,
    Private(IdAllocator),
}

#[derive(Debug, Default)]
struct FrameState {
    active: bool,
    refs: IndexMap<ResourceId, FrameRefType>,
    pending_release: Vec<ResourceId>,
}

/// Owns every resource record and ID mapping of a session
#[derive(Debug)]
pub struct ResourceManager {
    ids: IdSource,
    wrapped: RwLock<IndexMap<ResourceId, Wrapped>>,
    records: RwLock<IndexMap<ResourceId, ResourceRecord>>,
    frame: Mutex<FrameState>,
    initial: Mutex<IndexMap<ResourceId, InitialContents>>,
    live: RwLock<LiveMap>,
    chunk_sequence: AtomicU64,
}

impl ResourceManager {
    /// Manager drawing IDs from the process-wide allocator
    #[must_use]
    pub fn new() -> Self {
        Self::with_ids(IdSource::Global)
    }

    /// Manager with its own allocator starting at `first`.
    ///
    /// Two captures made with private allocators assign identical IDs to
    /// identical call sequences.
    #[must_use]
    pub fn with_private_ids(first: u64) -> Self {
        Self::with_ids(IdSource::Private(IdAllocator::starting_at(first)))
    }

    fn with_ids(ids: IdSource) -> Self {
        Self {
            ids,
            wrapped: RwLock::new(IndexMap::new()),
            records: RwLock::new(IndexMap::new()),
            frame: Mutex::new(FrameState::default()),
            initial: Mutex::new(IndexMap::new()),
            live: RwLock::new(LiveMap::new()),
            chunk_sequence: AtomicU64::new(0),
        }
    }

    /// Generate a fresh identifier
    pub fn allocate_id(&self) -> ResourceId {
        match &self.ids {
            IdSource::Global => ResourceId::allocate(),
            IdSource::Private(allocator) => allocator.allocate(),
        }
    }

    // ---- capture side ----

    /// Give a backend object an identity and make it current
    pub fn wrap_resource(&self, native: NativeHandle, ty: ResourceType) -> Wrapped {
        let wrapped = Wrapped {
            id: self.allocate_id(),
            native,
            ty,
        };
        self.wrapped.write().insert(wrapped.id, wrapped);
        self.live.write().add(wrapped.id, wrapped.id, native);
        tracing::trace!(id = %wrapped.id, %native, %ty, "wrapped resource");
        wrapped
    }

    /// Look up a wrapped object
    #[must_use]
    pub fn wrapped(&self, id: ResourceId) -> Option<Wrapped> {
        self.wrapped.read().get(&id).copied()
    }

    /// Create the chunk record for a wrapper.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the wrapper already has a record
    pub fn add_resource_record(&self, wrapper: &Wrapped) -> CoreResult<()> {
        let mut records = self.records.write();
        if records.contains_key(&wrapper.id) {
            return Err(CoreError::InvalidState(format!(
                "resource {} already has a record",
                wrapper.id
            )));
        }
        records.insert(wrapper.id, ResourceRecord::new(wrapper.id, wrapper.ty));
        Ok(())
    }

    /// Whether `id` has a record
    #[must_use]
    pub fn has_record(&self, id: ResourceId) -> bool {
        self.records.read().contains_key(&id)
    }

    /// Number of records
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Read a record
    pub fn with_record<R>(&self, id: ResourceId, f: impl FnOnce(&ResourceRecord) -> R) -> Option<R> {
        self.records.read().get(&id).map(f)
    }

    /// Mutate a record
    pub fn with_record_mut<R>(
        &self,
        id: ResourceId,
        f: impl FnOnce(&mut ResourceRecord) -> R,
    ) -> Option<R> {
        self.records.write().get_mut(&id).map(f)
    }

    /// Next value of the global chunk order
    pub fn next_chunk_sequence(&self) -> u64 {
        self.chunk_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Append a chunk to a record. Returns false, dropping the chunk, if
    /// `id` has no record.
    pub fn record_chunk(&self, id: ResourceId, chunk: Chunk) -> bool {
        let sequence = self.next_chunk_sequence();
        let mut records = self.records.write();
        match records.get_mut(&id) {
            Some(record) => {
                record.push_chunk(sequence, chunk);
                true
            }
            None => {
                tracing::warn!(%id, kind = %chunk.kind(), "chunk for unrecorded resource dropped");
                false
            }
        }
    }

    /// Remove a record
    pub fn remove_record(&self, id: ResourceId) -> Option<ResourceRecord> {
        self.records.write().shift_remove(&id)
    }

    /// IDs of all records, in creation order
    #[must_use]
    pub fn record_ids(&self) -> Vec<ResourceId> {
        self.records.read().keys().copied().collect()
    }

    /// Chunks of every non-scope record created before the active frame,
    /// in global recording order
    #[must_use]
    pub fn pre_frame_chunks(&self) -> Vec<RecordedChunk> {
        let records = self.records.read();
        let mut chunks: Vec<RecordedChunk> = records
            .values()
            .filter(|r| r.resource_type() != ResourceType::Scope && !r.created_in_frame())
            .flat_map(|r| r.chunks().iter().cloned())
            .collect();
        chunks.sort_by_key(|c| c.sequence);
        chunks
    }

    /// Release a wrapper. Returns false if removal is deferred because the
    /// resource is referenced by the active frame.
    pub fn release_resource(&self, id: ResourceId) -> bool {
        {
            let mut frame = self.frame.lock();
            if frame.active && frame.refs.contains_key(&id) {
                if !frame.pending_release.contains(&id) {
                    frame.pending_release.push(id);
                }
                tracing::debug!(%id, "release deferred to end of frame");
                return false;
            }
        }
        self.drop_resource(id);
        true
    }

    fn drop_resource(&self, id: ResourceId) {
        self.wrapped.write().shift_remove(&id);
        self.records.write().shift_remove(&id);
        self.initial.lock().shift_remove(&id);
        self.live.write().erase(id);
    }

    // ---- frame references ----

    /// Start tracking references for a new frame
    pub fn begin_frame(&self) {
        let mut frame = self.frame.lock();
        frame.active = true;
        frame.refs.clear();
    }

    /// Whether a frame is being captured
    #[must_use]
    pub fn frame_active(&self) -> bool {
        self.frame.lock().active
    }

    /// Record an access to `id` during the frame
    pub fn mark_frame_referenced(&self, id: ResourceId, access: FrameRefType) {
        let mut frame = self.frame.lock();
        let entry = frame.refs.entry(id).or_default();
        *entry = entry.compose(access);
    }

    /// Strongest access to `id` this frame
    #[must_use]
    pub fn frame_ref(&self, id: ResourceId) -> FrameRefType {
        self.frame.lock().refs.get(&id).copied().unwrap_or_default()
    }

    /// Every resource referenced this frame, in first-reference order
    #[must_use]
    pub fn frame_refs(&self) -> Vec<(ResourceId, FrameRefType)> {
        self.frame.lock().refs.iter().map(|(id, r)| (*id, *r)).collect()
    }

    /// Stop tracking and carry out deferred releases, returning them
    pub fn end_frame(&self) -> Vec<ResourceId> {
        let released = {
            let mut frame = self.frame.lock();
            frame.active = false;
            frame.refs.clear();
            std::mem::take(&mut frame.pending_release)
        };
        for id in &released {
            self.drop_resource(*id);
        }
        released
    }

    // ---- initial contents ----

    /// Store a resource's pre-frame snapshot
    pub fn set_initial_contents(&self, id: ResourceId, contents: InitialContents) {
        self.initial.lock().insert(id, contents);
    }

    /// Snapshot for `id`
    #[must_use]
    pub fn initial_contents(&self, id: ResourceId) -> Option<InitialContents> {
        self.initial.lock().get(&id).cloned()
    }

    /// Every snapshot, ordered by resource ID
    #[must_use]
    pub fn all_initial_contents(&self) -> Vec<(ResourceId, InitialContents)> {
        let mut all: Vec<_> = self
            .initial
            .lock()
            .iter()
            .map(|(id, c)| (*id, c.clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Drop every snapshot
    pub fn clear_initial_contents(&self) {
        self.initial.lock().clear();
    }

    // ---- live mapping ----

    /// Map `original` to a fresh live ID backed by `native`
    pub fn register_live(&self, original: ResourceId, native: NativeHandle) -> ResourceId {
        let live = self.allocate_id();
        self.live.write().add(original, live, native);
        live
    }

    /// Map `original` to an existing live ID
    pub fn add_live_resource(&self, original: ResourceId, live: ResourceId, native: NativeHandle) {
        self.live.write().add(original, live, native);
    }

    /// Whether `original` has a live object
    #[must_use]
    pub fn has_live_resource(&self, original: ResourceId) -> bool {
        self.live.read().has(original)
    }

    /// Forget the live object for `original`
    pub fn erase_live_resource(&self, original: ResourceId) -> Option<LiveResource> {
        self.live.write().erase(original)
    }

    /// Live ID for `original`, null if unmapped
    #[must_use]
    pub fn get_live_id(&self, original: ResourceId) -> ResourceId {
        self.live.read().live_id(original)
    }

    /// Original ID for `live`, null if unmapped
    #[must_use]
    pub fn get_original_id(&self, live: ResourceId) -> ResourceId {
        self.live.read().original_id(live)
    }

    /// Original ID for `live`, ignoring replacements
    #[must_use]
    pub fn get_unreplaced_original_id(&self, live: ResourceId) -> ResourceId {
        self.live.read().unreplaced_original_id(live)
    }

    /// Temporarily substitute a different live object for `original`
    pub fn replace_resource(&self, original: ResourceId, live: ResourceId, native: NativeHandle) {
        self.live.write().replace(original, live, native);
    }

    /// Undo [`ResourceManager::replace_resource`]
    pub fn remove_replacement(&self, original: ResourceId) -> Option<LiveResource> {
        self.live.write().remove_replacement(original)
    }

    /// Backend handle for a live ID
    #[must_use]
    pub fn get_native(&self, live: ResourceId) -> Option<NativeHandle> {
        self.live.read().native(live)
    }

    /// Backend handle currently standing in for `original`
    #[must_use]
    pub fn live_native(&self, original: ResourceId) -> Option<NativeHandle> {
        let live = self.live.read();
        live.native(live.live_id(original))
    }

    /// Every primary live mapping
    #[must_use]
    pub fn live_resources(&self) -> Vec<LiveResource> {
        self.live.read().live_resources()
    }

    /// Drop every live mapping
    pub fn clear_live(&self) {
        self.live.write().clear();
    }
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecap_chunk::{ChunkKind, ChunkMetadataOptions, ChunkWriter};
    use proptest::prelude::*;

    fn chunk(tag: u32) -> Chunk {
        let mut writer = ChunkWriter::new(ChunkMetadataOptions::none());
        writer.begin_chunk(ChunkKind::driver(tag));
        writer.end_chunk().unwrap()
    }

    #[test]
    fn test_private_ids_are_reproducible() {
        let a = ResourceManager::with_private_ids(1);
        let b = ResourceManager::with_private_ids(1);
        let ids_a: Vec<_> = (0..4).map(|_| a.allocate_id()).collect();
        let ids_b: Vec<_> = (0..4).map(|_| b.allocate_id()).collect();
        assert_eq!(ids_a, ids_b);
        assert_eq!(ids_a[0], ResourceId::from_raw(1));
    }

    #[test]
    fn test_record_twice_fails() {
        let rm = ResourceManager::with_private_ids(1);
        let w = rm.wrap_resource(NativeHandle::from_raw(1), ResourceType::Buffer);
        rm.add_resource_record(&w).unwrap();
        assert!(matches!(
            rm.add_resource_record(&w),
            Err(CoreError::InvalidState(_))
        ));
    }

    #[test]
    fn test_chunk_for_unknown_record_dropped() {
        let rm = ResourceManager::with_private_ids(1);
        assert!(!rm.record_chunk(ResourceId::from_raw(99), chunk(0)));
    }

    #[test]
    fn test_pre_frame_chunks_in_creation_order() {
        let rm = ResourceManager::with_private_ids(1);
        let a = rm.wrap_resource(NativeHandle::from_raw(1), ResourceType::Buffer);
        let b = rm.wrap_resource(NativeHandle::from_raw(2), ResourceType::Texture);
        let s = rm.wrap_resource(NativeHandle::from_raw(3), ResourceType::Scope);
        for w in [&a, &b, &s] {
            rm.add_resource_record(w).unwrap();
        }
        rm.record_chunk(b.id, chunk(1));
        rm.record_chunk(a.id, chunk(2));
        rm.record_chunk(s.id, chunk(3));
        rm.record_chunk(b.id, chunk(4));

        let kinds: Vec<u32> = rm
            .pre_frame_chunks()
            .iter()
            .map(|c| c.chunk.kind().as_u32() - 1000)
            .collect();
        assert_eq!(kinds, vec![1, 2, 4]);

        rm.with_record_mut(b.id, |r| r.set_created_in_frame(true));
        let kinds: Vec<u32> = rm
            .pre_frame_chunks()
            .iter()
            .map(|c| c.chunk.kind().as_u32() - 1000)
            .collect();
        assert_eq!(kinds, vec![2]);
    }

    #[test]
    fn test_release_deferred_while_referenced() {
        let rm = ResourceManager::with_private_ids(1);
        let w = rm.wrap_resource(NativeHandle::from_raw(1), ResourceType::Buffer);
        rm.add_resource_record(&w).unwrap();
        rm.begin_frame();
        rm.mark_frame_referenced(w.id, FrameRefType::Read);
        assert!(!rm.release_resource(w.id));
        assert!(rm.has_record(w.id));
        assert_eq!(rm.end_frame(), vec![w.id]);
        assert!(!rm.has_record(w.id));
        assert!(rm.get_live_id(w.id).is_null());
    }

    #[test]
    fn test_release_immediate_when_unreferenced() {
        let rm = ResourceManager::with_private_ids(1);
        let w = rm.wrap_resource(NativeHandle::from_raw(1), ResourceType::Buffer);
        rm.add_resource_record(&w).unwrap();
        rm.begin_frame();
        assert!(rm.release_resource(w.id));
        assert!(!rm.has_record(w.id));
    }

    #[test]
    fn test_frame_ref_composition() {
        let rm = ResourceManager::with_private_ids(1);
        let id = rm.allocate_id();
        rm.begin_frame();
        rm.mark_frame_referenced(id, FrameRefType::PartialWrite);
        rm.mark_frame_referenced(id, FrameRefType::Read);
        assert_eq!(rm.frame_ref(id), FrameRefType::ReadBeforeWrite);
        rm.end_frame();
        assert_eq!(rm.frame_ref(id), FrameRefType::None);
    }

    #[test]
    fn test_replay_mapping() {
        let rm = ResourceManager::with_private_ids(1000);
        let original = ResourceId::from_raw(7);
        let live = rm.register_live(original, NativeHandle::from_raw(0x70));
        assert_ne!(live, original);
        assert_eq!(rm.get_live_id(original), live);
        assert_eq!(rm.live_native(original), Some(NativeHandle::from_raw(0x70)));

        let temp = rm.allocate_id();
        rm.replace_resource(original, temp, NativeHandle::from_raw(0x71));
        assert_eq!(rm.live_native(original), Some(NativeHandle::from_raw(0x71)));
        assert_eq!(rm.get_original_id(temp), original);
        assert!(rm.get_unreplaced_original_id(temp).is_null());
        rm.remove_replacement(original);
        assert_eq!(rm.get_live_id(original), live);
    }

    #[test]
    fn test_initial_contents_sorted() {
        let rm = ResourceManager::with_private_ids(1);
        rm.set_initial_contents(ResourceId::from_raw(5), InitialContents::Clear { size: 4 });
        rm.set_initial_contents(
            ResourceId::from_raw(2),
            InitialContents::Bytes(bytes::Bytes::from_static(b"ab")),
        );
        let ids: Vec<_> = rm.all_initial_contents().iter().map(|(id, _)| id.as_u64()).collect();
        assert_eq!(ids, vec![2, 5]);
    }

    proptest! {
        #[test]
        fn test_capture_id_stability(count in 1usize..64) {
            let rm = ResourceManager::new();
            let wrapped: Vec<_> = (0..count)
                .map(|n| rm.wrap_resource(NativeHandle::from_raw(n as u64 + 1), ResourceType::Buffer))
                .collect();
            for w in &wrapped {
                prop_assert_eq!(rm.get_original_id(rm.get_live_id(w.id)), w.id);
            }
        }
    }
}
