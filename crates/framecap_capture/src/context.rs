//! The capture context: turns intercepted calls into chunks, groups them
//! per recording scope, and assembles the frame's chunk stream.

use crate::backend::CaptureBackend;
use crate::options::CaptureOptions;
use crate::queue::SubmissionQueue;
use framecap_chunk::{
    BufferDiff, CaptureFile, CaptureScopeInfo, Chunk, ChunkKind, ChunkWriter, DriverInitParams,
    FrameStats, StreamWriter, SystemChunk, WriterRegistry, diff_range,
};
use framecap_core::{CoreError, CoreResult, NativeHandle, ResourceId};
use framecap_resource::{
    FrameRefType, InitialContents, InitialContentsAction, RecordData, ResourceManager,
    ResourceType, ScopeError, ScopeStatus, Wrapped,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Whether a frame is being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    /// Calls are tracked but no frame is recorded
    BackgroundCapturing,
    /// A frame is being recorded
    ActiveCapturing,
}

#[derive(Debug, Default)]
struct FrameRecord {
    begin: Option<Chunk>,
    chunks: Vec<Chunk>,
    stats: FrameStats,
}

/// Capture-side engine state shared by every wrapped object
pub struct CaptureContext<B: CaptureBackend> {
    backend: B,
    options: CaptureOptions,
    resources: Arc<ResourceManager>,
    writers: WriterRegistry,
    state: RwLock<CaptureState>,
    frame_number: AtomicU64,
    frame: Mutex<FrameRecord>,
    queue: Mutex<SubmissionQueue>,
}

impl<B: CaptureBackend> CaptureContext<B> {
    /// Create a context drawing IDs from the process-wide allocator
    #[must_use]
    pub fn new(backend: B, options: CaptureOptions) -> Self {
        Self::with_resources(backend, options, Arc::new(ResourceManager::new()))
    }

    /// Create a context over an existing resource manager
    #[must_use]
    pub fn with_resources(
        backend: B,
        options: CaptureOptions,
        resources: Arc<ResourceManager>,
    ) -> Self {
        Self {
            writers: WriterRegistry::new(options.metadata),
            backend,
            options,
            resources,
            state: RwLock::new(CaptureState::BackgroundCapturing),
            frame_number: AtomicU64::new(0),
            frame: Mutex::new(FrameRecord::default()),
            queue: Mutex::new(SubmissionQueue::new()),
        }
    }

    /// The wrapped backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Options in effect
    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// The resource manager
    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Current state
    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    /// Whether a frame is being recorded
    pub fn is_capturing(&self) -> bool {
        self.state() == CaptureState::ActiveCapturing
    }

    /// Number of the next frame to be captured
    pub fn frame_number(&self) -> u64 {
        self.frame_number.load(Ordering::Relaxed)
    }

    /// Build one chunk on the calling thread's writer
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `f` leaves a struct or array open
    pub fn chunk(
        &self,
        kind: impl Into<ChunkKind>,
        f: impl FnOnce(&mut ChunkWriter),
    ) -> CoreResult<Chunk> {
        let kind = kind.into();
        self.writers.with_thread_writer(|writer| {
            writer.begin_chunk(kind);
            f(writer);
            writer.end_chunk()
        })
    }

    /// Wrap a backend object and create its record
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the new ID somehow already has a record
    pub fn wrap(&self, native: NativeHandle, ty: ResourceType) -> CoreResult<Wrapped> {
        let wrapped = self.resources.wrap_resource(native, ty);
        self.resources.add_resource_record(&wrapped)?;
        Ok(wrapped)
    }

    /// Record the creation chunk of `id`. During a frame it is also part of
    /// the frame, since replay must re-create the object at that point.
    pub fn record_creation(&self, id: ResourceId, chunk: Chunk) {
        if self.is_capturing() {
            self.resources
                .with_record_mut(id, |r| r.set_created_in_frame(true));
            self.resources.mark_frame_referenced(id, FrameRefType::CompleteWrite);
            let mut frame = self.frame.lock();
            frame.chunks.push(chunk.clone());
            frame.stats.root_chunks += 1;
        }
        self.resources.record_chunk(id, chunk);
    }

    /// Record a call made directly on the device. Outside a frame it is
    /// not recorded.
    pub fn record_root(&self, chunk: Chunk, refs: &[(ResourceId, FrameRefType)]) {
        if !self.is_capturing() {
            return;
        }
        for (id, access) in refs {
            self.resources.mark_frame_referenced(*id, *access);
        }
        let mut frame = self.frame.lock();
        frame.chunks.push(chunk);
        frame.stats.root_chunks += 1;
    }

    /// Record a call made inside a deferred recording scope
    pub fn record_scope(&self, scope: ResourceId, chunk: Chunk, refs: &[(ResourceId, FrameRefType)]) {
        if !refs.is_empty() {
            self.resources.with_record_mut(scope, |record| {
                if let Some(data) = record.scope_mut() {
                    for (id, access) in refs {
                        data.mark_referenced(*id, *access);
                    }
                }
            });
        }
        self.resources.record_chunk(scope, chunk);
    }

    /// Start diffing a CPU-writable buffer from its current contents
    pub fn track_cpu_buffer(&self, id: ResourceId) {
        let baseline = self
            .resources
            .wrapped(id)
            .and_then(|w| self.backend.read_back(w.native))
            .map(|b| b.to_vec())
            .unwrap_or_default();
        self.resources.with_record_mut(id, |record| {
            record.data = RecordData::CpuBuffer { baseline };
        });
    }

    fn scope_status(&self, scope: ResourceId) -> CoreResult<(ScopeStatus, Option<u64>)> {
        self.resources
            .with_record(scope, |r| r.scope().map(|s| (s.status, s.sequence)))
            .flatten()
            .ok_or_else(|| CoreError::InvalidParameter {
                name: "scope".to_string(),
                reason: format!("{scope} is not a recorded scope"),
            })
    }

    /// Give a scope its submission slot and record the enqueue call
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `scope` is not a scope, `InvalidState` if it
    /// was already enqueued
    pub fn enqueue_scope(&self, scope: ResourceId, chunk: Chunk) -> CoreResult<u64> {
        let (status, _) = self.scope_status(scope)?;
        let mut next = status;
        next.advance(scope, ScopeStatus::Enqueued)?;

        let sequence = self.queue.lock().enqueue(scope);
        self.resources.with_record_mut(scope, |record| {
            if let Some(data) = record.scope_mut() {
                data.status = ScopeStatus::Enqueued;
                data.sequence = Some(sequence);
            }
        });
        self.resources.record_chunk(scope, chunk);
        tracing::debug!(%scope, sequence, "scope enqueued");
        Ok(sequence)
    }

    /// Finish a scope. CPU buffer diffs are recorded ahead of the commit
    /// chunk, then every scope that is now in submission order is folded
    /// into the frame. Returns the scopes released by this call.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `scope` is not a scope, `InvalidState` unless
    /// it is enqueued
    pub fn commit_scope(&self, scope: ResourceId, commit: Chunk) -> CoreResult<Vec<ResourceId>> {
        let (status, sequence) = self.scope_status(scope)?;
        let Some(sequence) = sequence.filter(|_| status == ScopeStatus::Enqueued) else {
            return Err(ScopeError {
                scope,
                from: status,
                to: ScopeStatus::Committed,
            }
            .into());
        };

        if self.is_capturing() && self.options.diff_cpu_buffers {
            self.diff_cpu_buffers(scope)?;
        }

        self.resources.record_chunk(scope, commit);
        self.resources.with_record_mut(scope, |record| {
            if let Some(data) = record.scope_mut() {
                data.status = ScopeStatus::Committed;
            }
        });

        let mut queue = self.queue.lock();
        queue.mark_committed(sequence);
        let ready = queue.drain_ready();
        let mut released = Vec::with_capacity(ready.len());
        for (sequence, ready_scope) in ready {
            self.release_scope(ready_scope, sequence)?;
            released.push(ready_scope);
        }
        Ok(released)
    }

    fn release_scope(&self, scope: ResourceId, sequence: u64) -> CoreResult<()> {
        let taken = self
            .resources
            .with_record_mut(scope, |record| -> Result<_, ScopeError> {
                let Some(data) = record.scope_mut() else {
                    return Ok(None);
                };
                data.status.advance(scope, ScopeStatus::Submitted)?;
                let refs = std::mem::take(&mut data.frame_refs);
                Ok(Some((record.take_chunks(), refs)))
            })
            .transpose()?
            .flatten();
        let Some((chunks, refs)) = taken else {
            tracing::warn!(%scope, "released scope has no record");
            return Ok(());
        };

        if !self.is_capturing() {
            tracing::trace!(%scope, sequence, chunks = chunks.len(), "scope released outside frame");
            self.resources.release_resource(scope);
            return Ok(());
        }
        for (id, access) in refs {
            self.resources.mark_frame_referenced(id, access);
        }
        self.resources.mark_frame_referenced(scope, FrameRefType::Read);
        // Frame-referenced, so the record lives until end_frame.
        self.resources.release_resource(scope);
        let mut frame = self.frame.lock();
        frame.stats.scopes += 1;
        frame.stats.scope_chunks += chunks.len() as u32;
        tracing::debug!(%scope, sequence, chunks = chunks.len(), "scope folded into frame");
        frame.chunks.extend(chunks.into_iter().map(|c| c.chunk));
        Ok(())
    }

    fn diff_cpu_buffers(&self, scope: ResourceId) -> CoreResult<()> {
        let tracked: Vec<ResourceId> = self
            .resources
            .record_ids()
            .into_iter()
            .filter(|id| {
                self.resources
                    .with_record(*id, |r| matches!(r.data, RecordData::CpuBuffer { .. }))
                    .unwrap_or(false)
            })
            .collect();

        for buffer in tracked {
            let Some(wrapped) = self.resources.wrapped(buffer) else {
                continue;
            };
            let Some(current) = self.backend.read_back(wrapped.native) else {
                tracing::warn!(%buffer, "CPU buffer contents unavailable, diff skipped");
                continue;
            };
            let diff = self
                .resources
                .with_record_mut(buffer, |record| match &mut record.data {
                    RecordData::CpuBuffer { baseline } => {
                        let (start, end) = diff_range(baseline, &current)?;
                        baseline.clear();
                        baseline.extend_from_slice(&current);
                        Some((start, end, end - start == current.len()))
                    }
                    _ => None,
                })
                .flatten();
            let Some((start, end, whole)) = diff else {
                continue;
            };
            let payload = BufferDiff {
                buffer,
                offset: start as u64,
                data: current.slice(start..end),
            };
            let chunk = self.chunk(self.backend.buffer_diff_kind(), |w| {
                w.write_resource("scope", scope);
                w.serialise("diff", &payload);
            })?;
            let access = if whole {
                FrameRefType::CompleteWrite
            } else {
                FrameRefType::PartialWrite
            };
            tracing::trace!(%buffer, start, end, "CPU buffer modified");
            self.record_scope(scope, chunk, &[(buffer, access)]);
        }
        Ok(())
    }

    /// Start recording a frame: snapshot initial contents, reset CPU
    /// baselines and record `CaptureBegin`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a frame is already being recorded
    pub fn begin_frame(&self) -> CoreResult<()> {
        if self.is_capturing() {
            return Err(CoreError::InvalidState("frame capture already active".to_string()));
        }
        self.resources.begin_frame();

        let mut snapshots = 0usize;
        for id in self.resources.record_ids() {
            let Some(wrapped) = self.resources.wrapped(id) else {
                continue;
            };
            self.resources.with_record_mut(id, |r| r.set_created_in_frame(false));
            if !matches!(wrapped.ty, ResourceType::Buffer | ResourceType::Texture) {
                continue;
            }
            match self.backend.read_back(wrapped.native) {
                Some(bytes) => {
                    self.resources.with_record_mut(id, |record| {
                        if let RecordData::CpuBuffer { baseline } = &mut record.data {
                            baseline.clear();
                            baseline.extend_from_slice(&bytes);
                        }
                    });
                    self.resources
                        .set_initial_contents(id, InitialContents::Bytes(bytes));
                    snapshots += 1;
                }
                None => tracing::warn!(%id, "initial contents unavailable"),
            }
        }

        let frame_number = self.frame_number();
        let begin = self.chunk(SystemChunk::CaptureBegin, |w| {
            w.write_u64("frame_number", frame_number);
            self.backend.serialise_frame_state(w);
        })?;
        *self.frame.lock() = FrameRecord {
            begin: Some(begin),
            ..FrameRecord::default()
        };
        *self.state.write() = CaptureState::ActiveCapturing;
        tracing::info!(frame_number, snapshots, "frame capture started");
        Ok(())
    }

    /// Finish the frame and assemble its capture.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no frame is being recorded
    pub fn end_frame(&self, presented: ResourceId) -> CoreResult<CaptureFile> {
        if !self.is_capturing() {
            return Err(CoreError::InvalidState("no frame capture active".to_string()));
        }
        let present_chunk = self.chunk(SystemChunk::CaptureEnd, |w| {
            w.write_resource("presented", presented);
        })?;
        *self.state.write() = CaptureState::BackgroundCapturing;

        let blocked = self.queue.lock().blocked();
        if !blocked.is_empty() {
            tracing::warn!(
                scopes = blocked.len(),
                "committed scopes still waiting on earlier submissions are not in this frame"
            );
        }

        let frame = std::mem::take(&mut *self.frame.lock());
        let initial = self.resolve_initial_contents();
        let creation = self.resources.pre_frame_chunks();

        let mut stats = frame.stats;
        stats.initial_contents = initial.len() as u32;
        stats.creation_chunks = creation.len() as u32;
        let frame_number = self.frame_number.fetch_add(1, Ordering::Relaxed);

        let mut stream = StreamWriter::new();
        let driver = DriverInitParams {
            driver_name: self.backend.driver_name().to_string(),
            driver_version: self.backend.driver_version(),
            machine_ident: framecap_machine_ident(),
        };
        stream.write_chunk(&self.chunk(SystemChunk::DriverInit, |w| {
            w.serialise("params", &driver);
        })?);
        for recorded in &creation {
            stream.write_chunk(&recorded.chunk);
        }
        stream.write_chunk(&self.chunk(SystemChunk::InitialContentsList, |w| {
            w.write_u32("count", initial.len() as u32);
        })?);
        for (id, contents) in &initial {
            stream.write_chunk(&self.chunk(SystemChunk::InitialContents, |w| {
                w.write_resource("id", *id);
                w.serialise("contents", contents);
            })?);
        }
        stream.write_chunk(&self.chunk(SystemChunk::CaptureScope, |w| {
            w.serialise(
                "info",
                &CaptureScopeInfo {
                    frame_number,
                    stats,
                },
            );
        })?);
        if let Some(begin) = &frame.begin {
            stream.write_chunk(begin);
        }
        for chunk in &frame.chunks {
            stream.write_chunk(chunk);
        }
        stream.write_chunk(&present_chunk);

        let released = self.resources.end_frame();
        self.resources.clear_initial_contents();
        for stat in self.writers.flush() {
            tracing::debug!(
                thread_id = stat.thread_id,
                chunks = stat.chunks,
                bytes = stat.bytes,
                "writer flushed"
            );
        }
        tracing::info!(
            frame_number,
            chunks = stream.chunk_count(),
            bytes = stream.len(),
            scopes = stats.scopes,
            deferred_releases = released.len(),
            "frame capture finished"
        );
        Ok(CaptureFile::new(self.backend.driver_name(), stream.finish()))
    }

    fn resolve_initial_contents(&self) -> Vec<(ResourceId, InitialContents)> {
        let policy = self.options.initial_contents;
        self.resources
            .all_initial_contents()
            .into_iter()
            .filter_map(|(id, contents)| {
                let frame_ref = self.resources.frame_ref(id);
                match policy.decide(frame_ref) {
                    InitialContentsAction::Copy => Some((id, contents)),
                    InitialContentsAction::Clear => Some((
                        id,
                        InitialContents::Clear {
                            size: contents.size(),
                        },
                    )),
                    InitialContentsAction::Skip => {
                        tracing::trace!(%id, ?frame_ref, "initial contents skipped");
                        None
                    }
                }
            })
            .collect()
    }
}

fn framecap_machine_ident() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use framecap_chunk::{StreamReader, ChunkClass};
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryBackend {
        memory: Mutex<HashMap<NativeHandle, Vec<u8>>>,
    }

    impl MemoryBackend {
        fn set(&self, native: NativeHandle, bytes: &[u8]) {
            self.memory.lock().insert(native, bytes.to_vec());
        }
    }

    impl CaptureBackend for MemoryBackend {
        fn driver_name(&self) -> &str {
            "memory"
        }

        fn driver_version(&self) -> u32 {
            1
        }

        fn read_back(&self, native: NativeHandle) -> Option<Bytes> {
            self.memory.lock().get(&native).map(|b| Bytes::from(b.clone()))
        }

        fn serialise_frame_state(&self, writer: &mut ChunkWriter) {
            writer.write_u32("objects", self.memory.lock().len() as u32);
        }

        fn buffer_diff_kind(&self) -> ChunkKind {
            ChunkKind::driver(99)
        }
    }

    fn context() -> CaptureContext<MemoryBackend> {
        CaptureContext::with_resources(
            MemoryBackend::default(),
            CaptureOptions::deterministic(),
            Arc::new(ResourceManager::with_private_ids(1)),
        )
    }

    fn call(ctx: &CaptureContext<MemoryBackend>, tag: u32) -> Chunk {
        ctx.chunk(ChunkKind::driver(tag), |w| w.write_u32("tag", tag)).unwrap()
    }

    fn frame_kinds(file: &CaptureFile) -> Vec<u32> {
        let mut reader = StreamReader::open(file.frame_capture.clone()).unwrap();
        let mut kinds = Vec::new();
        while let Some(read) = reader.read_chunk().unwrap() {
            kinds.push(read.chunk.kind().as_u32());
        }
        kinds
    }

    fn new_scope(ctx: &CaptureContext<MemoryBackend>, native: u64) -> ResourceId {
        ctx.wrap(NativeHandle::from_raw(native), ResourceType::Scope).unwrap().id
    }

    #[test]
    fn test_begin_twice_fails() {
        let ctx = context();
        ctx.begin_frame().unwrap();
        assert!(matches!(ctx.begin_frame(), Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn test_end_without_begin_fails() {
        let ctx = context();
        assert!(ctx.end_frame(ResourceId::null()).is_err());
    }

    #[test]
    fn test_commit_requires_enqueue() {
        let ctx = context();
        let scope = new_scope(&ctx, 1);
        let err = ctx.commit_scope(scope, call(&ctx, 1)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidState(_)));
    }

    #[test]
    fn test_frame_layout() {
        let ctx = context();
        let buffer = ctx.wrap(NativeHandle::from_raw(10), ResourceType::Buffer).unwrap();
        ctx.backend().set(buffer.native, &[1, 2, 3, 4]);
        ctx.record_creation(buffer.id, call(&ctx, 0));

        ctx.begin_frame().unwrap();
        let scope = new_scope(&ctx, 20);
        ctx.enqueue_scope(scope, call(&ctx, 1)).unwrap();
        ctx.record_scope(scope, call(&ctx, 2), &[(buffer.id, FrameRefType::Read)]);
        let released = ctx.commit_scope(scope, call(&ctx, 3)).unwrap();
        assert_eq!(released, vec![scope]);
        ctx.record_root(call(&ctx, 4), &[]);
        let file = ctx.end_frame(buffer.id).unwrap();

        let system = |s: SystemChunk| s as u32;
        assert_eq!(
            frame_kinds(&file),
            vec![
                system(SystemChunk::DriverInit),
                1000,
                system(SystemChunk::InitialContentsList),
                system(SystemChunk::InitialContents),
                system(SystemChunk::CaptureScope),
                system(SystemChunk::CaptureBegin),
                1001,
                1002,
                1003,
                1004,
                system(SystemChunk::CaptureEnd),
            ]
        );
        assert_eq!(ctx.frame_number(), 1);
        assert!(!ctx.is_capturing());
    }

    #[test]
    fn test_scopes_fold_in_submission_order() {
        let ctx = context();
        ctx.begin_frame().unwrap();
        let scopes: Vec<_> = (0..3).map(|n| new_scope(&ctx, 100 + n)).collect();
        for (n, scope) in scopes.iter().enumerate() {
            ctx.enqueue_scope(*scope, call(&ctx, 10 + n as u32)).unwrap();
        }
        assert!(ctx.commit_scope(scopes[2], call(&ctx, 22)).unwrap().is_empty());
        assert!(ctx.commit_scope(scopes[1], call(&ctx, 21)).unwrap().is_empty());
        assert_eq!(ctx.commit_scope(scopes[0], call(&ctx, 20)).unwrap(), scopes);
        let file = ctx.end_frame(ResourceId::null()).unwrap();
        let driver: Vec<u32> = frame_kinds(&file)
            .into_iter()
            .filter(|k| *k >= 1000)
            .map(|k| k - 1000)
            .collect();
        assert_eq!(driver, vec![10, 20, 11, 21, 12, 22]);
    }

    #[test]
    fn test_cpu_diff_chunk_precedes_commit() {
        let ctx = context();
        let buffer = ctx.wrap(NativeHandle::from_raw(10), ResourceType::Buffer).unwrap();
        ctx.backend().set(buffer.native, &[0; 8]);
        ctx.track_cpu_buffer(buffer.id);

        ctx.begin_frame().unwrap();
        let scope = new_scope(&ctx, 20);
        ctx.enqueue_scope(scope, call(&ctx, 1)).unwrap();
        ctx.backend().set(buffer.native, &[0, 0, 7, 7, 0, 0, 0, 0]);
        ctx.commit_scope(scope, call(&ctx, 3)).unwrap();
        let file = ctx.end_frame(ResourceId::null()).unwrap();

        let mut reader = StreamReader::open(file.frame_capture.clone()).unwrap();
        let mut diff = None;
        let mut order = Vec::new();
        while let Some(read) = reader.read_chunk().unwrap() {
            if let Ok(ChunkClass::Driver(kind)) = read.chunk.kind().classify() {
                order.push(kind.as_u32() - 1000);
                if kind == ChunkKind::driver(99) {
                    let mut payload = read.chunk.reader();
                    assert_eq!(payload.read_resource("scope").unwrap(), scope);
                    diff = Some(payload.deserialise::<BufferDiff>("diff").unwrap());
                }
            }
        }
        assert_eq!(order, vec![1, 99, 3]);
        let diff = diff.unwrap();
        assert_eq!(diff.offset, 2);
        assert_eq!(diff.data.as_ref(), &[7, 7]);
    }

    #[test]
    fn test_no_diff_without_change() {
        let ctx = context();
        let buffer = ctx.wrap(NativeHandle::from_raw(10), ResourceType::Buffer).unwrap();
        ctx.backend().set(buffer.native, &[5; 4]);
        ctx.track_cpu_buffer(buffer.id);
        ctx.begin_frame().unwrap();
        let scope = new_scope(&ctx, 20);
        ctx.enqueue_scope(scope, call(&ctx, 1)).unwrap();
        ctx.commit_scope(scope, call(&ctx, 3)).unwrap();
        let file = ctx.end_frame(ResourceId::null()).unwrap();
        assert!(!frame_kinds(&file).contains(&1099));
    }

    #[test]
    fn test_missing_readback_skips_only_that_buffer() {
        let ctx = context();
        let good = ctx.wrap(NativeHandle::from_raw(1), ResourceType::Buffer).unwrap();
        let bad = ctx.wrap(NativeHandle::from_raw(2), ResourceType::Buffer).unwrap();
        ctx.backend().set(good.native, &[0; 4]);
        ctx.track_cpu_buffer(good.id);
        ctx.track_cpu_buffer(bad.id);

        ctx.begin_frame().unwrap();
        let scope = new_scope(&ctx, 20);
        ctx.enqueue_scope(scope, call(&ctx, 1)).unwrap();
        ctx.backend().set(good.native, &[1; 4]);
        ctx.commit_scope(scope, call(&ctx, 3)).unwrap();
        let file = ctx.end_frame(ResourceId::null()).unwrap();
        assert_eq!(frame_kinds(&file).iter().filter(|k| **k == 1099).count(), 1);
    }

    #[test]
    fn test_scope_outside_frame_is_dropped() {
        let ctx = context();
        let scope = new_scope(&ctx, 20);
        ctx.enqueue_scope(scope, call(&ctx, 1)).unwrap();
        ctx.commit_scope(scope, call(&ctx, 3)).unwrap();
        ctx.begin_frame().unwrap();
        let file = ctx.end_frame(ResourceId::null()).unwrap();
        assert!(frame_kinds(&file).iter().all(|k| *k < 1000));
    }

    #[test]
    fn test_submitted_scope_records_do_not_accumulate() {
        let ctx = context();
        let buffer = ctx.wrap(NativeHandle::from_raw(10), ResourceType::Buffer).unwrap();
        ctx.backend().set(buffer.native, &[0; 4]);

        for frame in 0..50u64 {
            ctx.begin_frame().unwrap();
            let scopes: Vec<_> = (0..20).map(|n| new_scope(&ctx, 1000 + frame * 20 + n)).collect();
            for scope in &scopes {
                ctx.enqueue_scope(*scope, call(&ctx, 1)).unwrap();
                ctx.record_scope(*scope, call(&ctx, 2), &[(buffer.id, FrameRefType::Read)]);
                ctx.commit_scope(*scope, call(&ctx, 3)).unwrap();
            }
            // Folded scopes stay alive until the frame is written.
            assert_eq!(ctx.resources().record_count(), 1 + scopes.len());
            ctx.end_frame(buffer.id).unwrap();
            assert_eq!(ctx.resources().record_count(), 1);
            assert!(scopes.iter().all(|scope| ctx.resources().wrapped(*scope).is_none()));
        }

        let scope = new_scope(&ctx, 20);
        ctx.enqueue_scope(scope, call(&ctx, 1)).unwrap();
        ctx.commit_scope(scope, call(&ctx, 3)).unwrap();
        assert!(!ctx.resources().has_record(scope));
        assert_eq!(ctx.resources().record_count(), 1);
    }

    #[test]
    fn test_initial_contents_policy_applied() {
        let options = CaptureOptions::deterministic()
            .with_initial_contents(framecap_resource::InitialContentsPolicy::Fastest);
        let ctx = CaptureContext::with_resources(
            MemoryBackend::default(),
            options,
            Arc::new(ResourceManager::with_private_ids(1)),
        );
        let read = ctx.wrap(NativeHandle::from_raw(1), ResourceType::Buffer).unwrap();
        let unused = ctx.wrap(NativeHandle::from_raw(2), ResourceType::Buffer).unwrap();
        ctx.backend().set(read.native, &[1; 4]);
        ctx.backend().set(unused.native, &[2; 4]);

        ctx.begin_frame().unwrap();
        ctx.record_root(call(&ctx, 5), &[(read.id, FrameRefType::Read)]);
        let file = ctx.end_frame(ResourceId::null()).unwrap();

        let initial = frame_kinds(&file)
            .into_iter()
            .filter(|k| *k == SystemChunk::InitialContents as u32)
            .count();
        assert_eq!(initial, 1);
    }

    #[test]
    fn test_in_frame_creation_goes_to_frame() {
        let ctx = context();
        ctx.begin_frame().unwrap();
        let buffer = ctx.wrap(NativeHandle::from_raw(10), ResourceType::Buffer).unwrap();
        ctx.record_creation(buffer.id, call(&ctx, 0));
        let file = ctx.end_frame(ResourceId::null()).unwrap();
        let kinds = frame_kinds(&file);
        let scope_at = kinds
            .iter()
            .position(|k| *k == SystemChunk::CaptureScope as u32)
            .unwrap();
        let create_at = kinds.iter().position(|k| *k == 1000).unwrap();
        assert!(create_at > scope_at);
        assert_eq!(kinds.iter().filter(|k| **k == 1000).count(), 1);
    }
}
