//! Replay session.
//!
//! Loading makes one linear pass over the stream: pre-frame chunks are
//! executed as they come, and at `CaptureScope` the rest of the stream is
//! replayed once to build the event/action timeline. Later passes execute
//! a range of that timeline, either from the top of the frame or, in
//! partial mode, from the target event with a stand-in scope object.

use crate::action::{ActionDescription, ApiEvent};
use crate::backend::ReplayBackend;
use crate::context::{Gate, PartialScope, PassMode, PassState, ReplayContext, restore_partial};
use crate::dispatch::DispatchTable;
use crate::options::ReplayOptions;
use crate::stats::{ChunkStats, FrameRecord};
use crate::timeline::{ScopeInfo, Timeline};
use crate::tracker::EncoderState;
use bytes::Bytes;
use framecap_chunk::{
    CaptureFile, CaptureScopeInfo, ChunkClass, ChunkKind, DriverInitParams, StreamChunk,
    StreamReader, StructuredChunk, SystemChunk, chunk_name, export_stream,
};
use framecap_core::{CoreError, CoreResult, ResourceId};
use framecap_resource::{InitialContents, ResourceManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// First ID handed to objects created during replay, kept clear of
/// captured IDs so the two never look alike in logs
pub const LIVE_ID_BASE: u64 = 1 << 48;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayState {
    /// Nothing loaded
    Idle,
    /// Initial read in progress
    LoadingReplaying,
    /// Timeline built; ranges can be replayed
    ActiveReplaying,
    /// Decoding chunks without touching the backend
    StructuredExport,
}

/// One replay session over one capture
pub struct ReplayEngine<B: ReplayBackend> {
    backend: B,
    dispatch: DispatchTable<B>,
    options: ReplayOptions,
    resources: ResourceManager,
    state: ReplayState,
    stream: Option<StreamReader>,
    driver: Option<DriverInitParams>,
    frame: Option<FrameRecord>,
    timeline: Timeline,
    trackers: HashMap<ResourceId, EncoderState>,
    saved_states: HashMap<(ResourceId, u32), EncoderState>,
    stats: ChunkStats,
    presented: ResourceId,
    fatal: Option<CoreError>,
}

impl<B: ReplayBackend> std::fmt::Debug for ReplayEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("state", &self.state)
            .field("last_event", &self.timeline.last_event())
            .field("fatal", &self.fatal)
            .finish()
    }
}

impl<B: ReplayBackend> ReplayEngine<B> {
    /// Create an idle session
    pub fn new(backend: B, dispatch: DispatchTable<B>, options: ReplayOptions) -> Self {
        Self {
            backend,
            dispatch,
            options,
            resources: ResourceManager::with_private_ids(LIVE_ID_BASE),
            state: ReplayState::Idle,
            stream: None,
            driver: None,
            frame: None,
            timeline: Timeline::new(),
            trackers: HashMap::new(),
            saved_states: HashMap::new(),
            stats: ChunkStats::new(),
            presented: ResourceId::null(),
            fatal: None,
        }
    }

    /// Session state
    #[must_use]
    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Options in effect
    #[must_use]
    pub fn options(&self) -> ReplayOptions {
        self.options
    }

    /// The backend
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The backend, mutably
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Replay-side resource manager
    #[must_use]
    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// The timeline built at load
    #[must_use]
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Chunk statistics collected at load
    #[must_use]
    pub fn stats(&self) -> &ChunkStats {
        &self.stats
    }

    /// Frame described by `CaptureScope`
    #[must_use]
    pub fn frame(&self) -> Option<&FrameRecord> {
        self.frame.as_ref()
    }

    /// Parameters from `DriverInit`
    #[must_use]
    pub fn driver(&self) -> Option<&DriverInitParams> {
        self.driver.as_ref()
    }

    /// Resource named by `CaptureEnd`
    #[must_use]
    pub fn presented(&self) -> ResourceId {
        self.presented
    }

    /// The latched error, if any
    #[must_use]
    pub fn fatal_error(&self) -> Option<&CoreError> {
        self.fatal.as_ref()
    }

    /// Highest event ID of the loaded frame
    #[must_use]
    pub fn last_event(&self) -> u32 {
        self.timeline.last_event()
    }

    /// Event by ID
    #[must_use]
    pub fn event(&self, event_id: u32) -> Option<&ApiEvent> {
        self.timeline.event(event_id)
    }

    /// Action produced by `event_id`
    #[must_use]
    pub fn action(&self, event_id: u32) -> Option<&ActionDescription> {
        self.timeline.action(event_id)
    }

    /// Top-level actions
    #[must_use]
    pub fn actions(&self) -> &[ActionDescription] {
        self.timeline.actions()
    }

    /// Committed scope by original ID
    #[must_use]
    pub fn scope_info(&self, scope: ResourceId) -> Option<&ScopeInfo> {
        self.timeline.scope_info(scope)
    }

    /// Tracked encoder state of a scope
    #[must_use]
    pub fn tracker(&self, scope: ResourceId) -> Option<&EncoderState> {
        self.trackers.get(&scope)
    }

    fn latch<T>(&mut self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(err) = &result {
            if err.is_fatal() {
                tracing::error!(error = %err, "replay failed, session latched");
                self.fatal = Some(err.clone());
            }
        }
        result
    }

    fn name_of(&self, kind: ChunkKind) -> CoreResult<String> {
        chunk_name(kind, &|k| self.dispatch.name_of(k).map(str::to_string))
    }

    /// Load a capture file.
    ///
    /// # Errors
    ///
    /// `ApiUnsupported` if the capture was made by a different backend,
    /// otherwise as [`ReplayEngine::load_stream`]
    pub fn load(&mut self, file: &CaptureFile) -> CoreResult<()> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        if file.driver_name != self.backend.driver_name() {
            let err = CoreError::unsupported(format!(
                "capture was made with driver {}, replaying with {}",
                file.driver_name,
                self.backend.driver_name()
            ));
            return self.latch(Err(err));
        }
        self.load_stream(file.frame_capture.clone())
    }

    /// Read a chunk stream, execute its pre-frame chunks and build the
    /// frame's timeline.
    ///
    /// # Errors
    ///
    /// Stream framing and corruption errors, handler errors, and
    /// `InvalidState` if the session already holds a capture. Fatal
    /// errors latch the session.
    pub fn load_stream(&mut self, data: Bytes) -> CoreResult<()> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        if self.state != ReplayState::Idle {
            return Err(CoreError::InvalidState(format!(
                "cannot load into a session in state {:?}",
                self.state
            )));
        }
        self.state = ReplayState::LoadingReplaying;
        let result = self.read_log(data);
        match &result {
            Ok(()) => {
                self.state = ReplayState::ActiveReplaying;
                tracing::info!(
                    events = self.timeline.last_event(),
                    scopes = self.timeline.scopes().count(),
                    chunks = self.stats.total_chunks(),
                    "capture loaded"
                );
            }
            Err(_) => self.state = ReplayState::Idle,
        }
        self.latch(result)
    }

    fn read_log(&mut self, data: Bytes) -> CoreResult<()> {
        let mut reader = StreamReader::open(data)?;
        self.stream = Some(reader.clone());
        tracing::debug!(version = reader.version().as_u64(), bytes = reader.len(), "reading log");

        while let Some(read) = reader.read_chunk()? {
            let kind = read.chunk.kind();
            match kind.classify()? {
                ChunkClass::System(SystemChunk::DriverInit) => {
                    self.record_stats(&read)?;
                    let mut chunk = read.chunk.reader();
                    let params: DriverInitParams = chunk.deserialise("params")?;
                    chunk.end_chunk()?;
                    if params.driver_name != self.backend.driver_name() {
                        return Err(CoreError::unsupported(format!(
                            "capture was made with driver {}, replaying with {}",
                            params.driver_name,
                            self.backend.driver_name()
                        )));
                    }
                    tracing::debug!(driver = %params.driver_name, version = params.driver_version, "driver init");
                    self.driver = Some(params);
                }
                ChunkClass::System(SystemChunk::InitialContentsList) => {
                    self.record_stats(&read)?;
                    let mut chunk = read.chunk.reader();
                    let count = chunk.read_u32("count")?;
                    chunk.end_chunk()?;
                    tracing::debug!(count, "initial contents list");
                }
                ChunkClass::System(SystemChunk::InitialContents) => {
                    self.record_stats(&read)?;
                    let mut chunk = read.chunk.reader();
                    let id = chunk.read_resource("id")?;
                    let contents: InitialContents = chunk.deserialise("contents")?;
                    chunk.end_chunk()?;
                    self.resources.set_initial_contents(id, contents);
                }
                ChunkClass::System(SystemChunk::CaptureScope) => {
                    self.record_stats(&read)?;
                    let mut chunk = read.chunk.reader();
                    let info: CaptureScopeInfo = chunk.deserialise("info")?;
                    chunk.end_chunk()?;
                    let frame = FrameRecord {
                        info,
                        frame_start_offset: reader.offset(),
                        frame_start_index: reader.next_index(),
                    };
                    self.frame = Some(frame);
                    tracing::debug!(frame = info.frame_number, "capture scope");

                    self.apply_initial_contents()?;
                    self.backend.wait_idle()?;
                    let pass = PassState::new(PassMode::Load, self.options, 1, u32::MAX);
                    return self.run_pass(pass, reader);
                }
                ChunkClass::System(other) => {
                    return Err(CoreError::corrupted(format!(
                        "{} chunk before CaptureScope",
                        other.name()
                    )));
                }
                ChunkClass::Driver(_) => {
                    let mut pass = PassState::new(PassMode::Init, self.options, 0, 0);
                    self.replay_chunk(&mut pass, &read, Gate::Execute)?;
                }
            }
        }
        Err(CoreError::corrupted("stream has no CaptureScope chunk"))
    }

    fn record_stats(&mut self, read: &StreamChunk) -> CoreResult<()> {
        if self.options.collect_stats {
            let name = self.name_of(read.chunk.kind())?;
            self.stats.record(&name, &read.chunk);
        }
        Ok(())
    }

    fn apply_initial_contents(&mut self) -> CoreResult<()> {
        for (id, contents) in self.resources.all_initial_contents() {
            match self.resources.live_native(id) {
                Some(native) => self.backend.apply_initial_contents(native, &contents)?,
                None => tracing::warn!(%id, "initial contents for a resource with no live object"),
            }
        }
        Ok(())
    }

    /// Replay events `start..=end`.
    ///
    /// A full replay resets initial contents and executes the frame from
    /// its first chunk up to `end`, whatever `start` is. A partial replay
    /// executes only `start..=end`; if `start` lies inside a scope, that
    /// scope is re-issued on a fresh object with its encoder state
    /// restored first.
    ///
    /// # Errors
    ///
    /// The latched error if the session is latched, `InvalidState` before
    /// a load, `InvalidParameter` for a range outside `1..=last_event`,
    /// `ApiUnsupported` for a partial replay into an interleaved scope,
    /// otherwise handler and backend errors. Fatal errors latch.
    pub fn replay_log(&mut self, start: u32, end: u32, partial: bool) -> CoreResult<()> {
        if let Some(err) = &self.fatal {
            return Err(err.clone());
        }
        if self.state != ReplayState::ActiveReplaying {
            return Err(CoreError::InvalidState("no capture loaded".to_string()));
        }
        let last = self.timeline.last_event();
        if start == 0 || end < start || end > last {
            return Err(CoreError::InvalidParameter {
                name: "range".to_string(),
                reason: format!("{start}..={end} is outside 1..={last}"),
            });
        }
        if partial {
            if let Some(info) = self.timeline.scope_containing(start) {
                if info.interleaved {
                    return Err(CoreError::unsupported(format!(
                        "partial replay into interleaved scope {}",
                        info.scope
                    )));
                }
            }
        }
        tracing::debug!(start, end, partial, "replay log");
        let result = if partial {
            self.partial_replay(start, end)
        } else {
            self.full_replay(end)
        };
        self.latch(result)
    }

    fn stream_reader(&self) -> CoreResult<StreamReader> {
        self.stream
            .clone()
            .ok_or_else(|| CoreError::InvalidState("no capture loaded".to_string()))
    }

    fn full_replay(&mut self, end: u32) -> CoreResult<()> {
        let frame = self
            .frame
            .ok_or_else(|| CoreError::InvalidState("no frame loaded".to_string()))?;
        if self.options.apply_initial_contents {
            self.apply_initial_contents()?;
            self.backend.wait_idle()?;
        }
        let mut reader = self.stream_reader()?;
        reader.seek(frame.frame_start_offset, frame.frame_start_index)?;
        let pass = PassState::new(PassMode::Replay, self.options, 1, end);
        self.run_pass(pass, reader)
    }

    fn partial_replay(&mut self, start: u32, end: u32) -> CoreResult<()> {
        let event = *self
            .timeline
            .event(start)
            .ok_or_else(|| CoreError::InvalidParameter {
                name: "start".to_string(),
                reason: format!("event {start} does not exist"),
            })?;
        let mut reader = self.stream_reader()?;
        let mut pass = PassState::new(PassMode::Replay, self.options, start, end);

        match self.timeline.scope_containing(start).copied() {
            None => reader.seek(event.file_offset, event.chunk_index)?,
            Some(info) => {
                let native = self.backend.create_scope()?;
                let live = self.resources.allocate_id();
                self.resources.replace_resource(info.scope, live, native);
                pass.partial = Some(PartialScope {
                    original: info.scope,
                    native,
                });
                pass.entered.insert(info.scope, false);
                pass.needs_resume = Some(info.scope);

                let saved = if start > info.base_event_id {
                    self.saved_states.get(&(info.scope, start)).cloned()
                } else {
                    None
                };
                match saved {
                    Some(state) => {
                        tracing::debug!(scope = %info.scope, start, "partial replay from saved state");
                        self.trackers.insert(info.scope, state);
                        reader.seek(event.file_offset, event.chunk_index)?;
                    }
                    None => {
                        tracing::debug!(scope = %info.scope, start, "partial replay rebuilding state");
                        self.trackers.insert(info.scope, EncoderState::default());
                        reader.seek(info.first_chunk_offset, info.first_chunk_index)?;
                    }
                }
            }
        }
        self.run_pass(pass, reader)
    }

    fn gate_for(&self, pass: &PassState, file_offset: u64) -> Option<Gate> {
        let Some(location) = self.timeline.location(file_offset) else {
            return Some(Gate::Skip);
        };
        if location.event_id > pass.end {
            // scopes can hold later events than the root chunks around them
            return location.scope.map(|_| Gate::Skip);
        }
        if location.event_id >= pass.start {
            Some(Gate::Execute)
        } else if location.scope.is_some() && location.scope == pass.partial_original() {
            Some(Gate::StateOnly)
        } else {
            Some(Gate::Skip)
        }
    }

    fn run_pass(&mut self, mut pass: PassState, mut reader: StreamReader) -> CoreResult<()> {
        while let Some(read) = reader.read_chunk()? {
            let gate = match pass.mode {
                PassMode::Replay => match self.gate_for(&pass, read.offset) {
                    Some(gate) => gate,
                    None => break,
                },
                PassMode::Init | PassMode::Load => Gate::Execute,
            };
            if self.replay_chunk(&mut pass, &read, gate)? {
                break;
            }
        }
        self.finish_pass(pass)
    }

    /// Replay one chunk. Returns true at `CaptureEnd`.
    fn replay_chunk(&mut self, pass: &mut PassState, read: &StreamChunk, gate: Gate) -> CoreResult<bool> {
        let kind = read.chunk.kind();
        let name = self.name_of(kind)?;
        if pass.mode != PassMode::Replay && self.options.collect_stats {
            self.stats.record(&name, &read.chunk);
        }
        pass.begin_chunk(read.index, read.offset, name, gate);

        let mut reader = read.chunk.reader();
        let mut frame_end = false;
        match kind.classify()? {
            ChunkClass::System(SystemChunk::CaptureBegin) => {
                let frame_number = reader.read_u64("frame_number")?;
                self.backend.load_frame_state(&mut reader)?;
                tracing::trace!(frame_number, "capture begin");
            }
            ChunkClass::System(SystemChunk::CaptureEnd) => {
                self.presented = reader.read_resource("presented")?;
                frame_end = true;
            }
            ChunkClass::System(other) => {
                return Err(CoreError::corrupted(format!(
                    "{} chunk inside the frame at offset {}",
                    other.name(),
                    read.offset
                )));
            }
            ChunkClass::Driver(kind) => {
                let handler = self.dispatch.handler(kind).ok_or_else(|| {
                    CoreError::unsupported(format!(
                        "no handler for chunk kind {} at offset {}",
                        kind.as_u32(),
                        read.offset
                    ))
                })?;
                let mut ctx = ReplayContext {
                    backend: &mut self.backend,
                    resources: &self.resources,
                    timeline: &mut self.timeline,
                    trackers: &mut self.trackers,
                    pass: &mut *pass,
                };
                handler(&mut ctx, &mut reader)?;
            }
        }
        reader.end_chunk()?;

        if pass.mode == PassMode::Load {
            if pass.event.is_none() {
                self.timeline
                    .add_event(pass.owner, read.index, read.offset)?;
            }
            self.timeline.finish_chunk(pass.owner);
        }
        Ok(frame_end)
    }

    fn finish_pass(&mut self, mut pass: PassState) -> CoreResult<()> {
        if pass.mode == PassMode::Load {
            self.timeline.finish();
        }
        if pass.mode == PassMode::Replay {
            // scopes cut short by the end of the range still have to run
            let unfinished: Vec<ResourceId> = pass
                .entered
                .iter()
                .filter(|(_, submitted)| !**submitted)
                .map(|(scope, _)| *scope)
                .collect();
            for scope in unfinished {
                self.submit_truncated(&mut pass, scope)?;
            }
        }
        self.backend.wait_idle()?;
        for native in pass.release_after_wait.drain(..) {
            self.backend.release(native);
        }
        Ok(())
    }

    fn submit_truncated(&mut self, pass: &mut PassState, scope: ResourceId) -> CoreResult<()> {
        let Some(native) = self.resources.live_native(scope) else {
            tracing::warn!(%scope, "truncated scope has no live object");
            return Ok(());
        };
        if let Some(state) = self.trackers.get(&scope).filter(|s| s.is_open()) {
            // resumable by a partial replay starting at the next event
            self.saved_states
                .insert((scope, pass.end.saturating_add(1)), state.clone());
            self.backend.close_encoder(native)?;
        }
        self.backend.submit_scope(native)?;
        pass.entered.insert(scope, true);
        if pass.partial_original() == Some(scope) {
            restore_partial(&self.resources, pass);
        }
        tracing::trace!(%scope, end = pass.end, "truncated scope submitted");
        Ok(())
    }

    /// Decode a chunk stream without executing anything. Backend kinds
    /// with no handler are named `<unknown>`.
    ///
    /// # Errors
    ///
    /// Stream framing and corruption errors, or `InvalidState` if the
    /// session holds a loaded capture
    pub fn export_structured(&mut self, data: Bytes) -> CoreResult<Vec<StructuredChunk>> {
        if !matches!(self.state, ReplayState::Idle | ReplayState::StructuredExport) {
            return Err(CoreError::InvalidState(format!(
                "cannot export from a session in state {:?}",
                self.state
            )));
        }
        self.state = ReplayState::StructuredExport;
        export_stream(data, &|kind| self.dispatch.name_of(kind).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionFlags;
    use crate::tracker::EncoderKind;
    use framecap_chunk::{
        Chunk, ChunkMetadataOptions, ChunkReader, ChunkWriter, FrameStats, StreamWriter,
        UNKNOWN_CHUNK_NAME,
    };
    use framecap_core::NativeHandle;

    const CREATE: ChunkKind = ChunkKind::driver(0);
    const BEGIN: ChunkKind = ChunkKind::driver(1);
    const PIPELINE: ChunkKind = ChunkKind::driver(2);
    const DRAW: ChunkKind = ChunkKind::driver(3);
    const END: ChunkKind = ChunkKind::driver(4);
    const COMMIT: ChunkKind = ChunkKind::driver(5);
    const MARKER: ChunkKind = ChunkKind::driver(6);
    const UNHANDLED: ChunkKind = ChunkKind::driver(40);

    #[derive(Debug, Default)]
    struct Recorder {
        next: u64,
        scopes: HashMap<NativeHandle, Vec<u32>>,
        submitted: Vec<Vec<u32>>,
        resumed: Vec<EncoderState>,
        closes: usize,
        waits: usize,
        released: Vec<NativeHandle>,
    }

    impl ReplayBackend for Recorder {
        fn driver_name(&self) -> &str {
            "recorder"
        }

        fn load_frame_state(&mut self, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
            reader.read_u32("objects").map(|_| ())
        }

        fn create_scope(&mut self) -> CoreResult<NativeHandle> {
            self.next += 1;
            let native = NativeHandle::from_raw(self.next);
            self.scopes.insert(native, Vec::new());
            Ok(native)
        }

        fn submit_scope(&mut self, scope: NativeHandle) -> CoreResult<()> {
            let work = self
                .scopes
                .get(&scope)
                .cloned()
                .ok_or_else(|| CoreError::InvalidState("unknown scope".to_string()))?;
            self.submitted.push(work);
            Ok(())
        }

        fn close_encoder(&mut self, _scope: NativeHandle) -> CoreResult<()> {
            self.closes += 1;
            Ok(())
        }

        fn resume_encoder(
            &mut self,
            _scope: NativeHandle,
            state: &EncoderState,
            _resolve: &dyn Fn(ResourceId) -> Option<NativeHandle>,
        ) -> CoreResult<()> {
            self.resumed.push(state.clone());
            Ok(())
        }

        fn wait_idle(&mut self) -> CoreResult<()> {
            self.waits += 1;
            Ok(())
        }

        fn apply_initial_contents(
            &mut self,
            _native: NativeHandle,
            _contents: &InitialContents,
        ) -> CoreResult<()> {
            Ok(())
        }

        fn release(&mut self, native: NativeHandle) {
            self.scopes.remove(&native);
            self.released.push(native);
        }
    }

    fn on_create(ctx: &mut ReplayContext<'_, Recorder>, r: &mut ChunkReader<'_>) -> CoreResult<()> {
        let scope = r.read_resource("scope")?;
        ctx.create_scope(scope)
    }

    fn on_begin(ctx: &mut ReplayContext<'_, Recorder>, r: &mut ChunkReader<'_>) -> CoreResult<()> {
        let scope = r.read_resource("scope")?;
        ctx.enter_scope(scope)?;
        if ctx.gate() != Gate::Skip {
            ctx.tracker(scope).begin(EncoderKind::Render, vec![]);
        }
        ctx.add_action("Begin", ActionFlags::BEGIN_PASS)
    }

    fn on_pipeline(ctx: &mut ReplayContext<'_, Recorder>, r: &mut ChunkReader<'_>) -> CoreResult<()> {
        let scope = r.read_resource("scope")?;
        let pipeline = r.read_resource("pipeline")?;
        ctx.enter_scope(scope)?;
        if ctx.gate() != Gate::Skip {
            ctx.tracker(scope).pipeline = Some(pipeline);
        }
        Ok(())
    }

    fn on_draw(ctx: &mut ReplayContext<'_, Recorder>, r: &mut ChunkReader<'_>) -> CoreResult<()> {
        let scope = r.read_resource("scope")?;
        let vertex = r.read_u32("vertex")?;
        ctx.enter_scope(scope)?;
        if ctx.gate() == Gate::Execute {
            let native = ctx.require_native(scope)?;
            if let Some(work) = ctx.backend().scopes.get_mut(&native) {
                work.push(vertex);
            }
        }
        ctx.add_action("Draw", ActionFlags::DRAW)
    }

    fn on_end(ctx: &mut ReplayContext<'_, Recorder>, r: &mut ChunkReader<'_>) -> CoreResult<()> {
        let scope = r.read_resource("scope")?;
        ctx.enter_scope(scope)?;
        if ctx.gate() != Gate::Skip {
            ctx.tracker(scope).end();
        }
        ctx.add_action("End", ActionFlags::END_PASS)
    }

    fn on_commit(ctx: &mut ReplayContext<'_, Recorder>, r: &mut ChunkReader<'_>) -> CoreResult<()> {
        let scope = r.read_resource("scope")?;
        ctx.commit_scope(scope)
    }

    fn on_marker(ctx: &mut ReplayContext<'_, Recorder>, r: &mut ChunkReader<'_>) -> CoreResult<()> {
        let name = r.read_string("name")?;
        ctx.set_marker(name)
    }

    fn table() -> DispatchTable<Recorder> {
        let mut table = DispatchTable::new();
        table.register(CREATE, "Create", on_create).unwrap();
        table.register(BEGIN, "Begin", on_begin).unwrap();
        table.register(PIPELINE, "Pipeline", on_pipeline).unwrap();
        table.register(DRAW, "Draw", on_draw).unwrap();
        table.register(END, "End", on_end).unwrap();
        table.register(COMMIT, "Commit", on_commit).unwrap();
        table.register(MARKER, "Marker", on_marker).unwrap();
        table
    }

    fn engine() -> ReplayEngine<Recorder> {
        ReplayEngine::new(Recorder::default(), table(), ReplayOptions::default())
    }

    struct Log {
        writer: ChunkWriter,
        stream: StreamWriter,
    }

    impl Log {
        fn new(driver: &str) -> Self {
            let mut log = Self {
                writer: ChunkWriter::new(ChunkMetadataOptions::none()),
                stream: StreamWriter::new(),
            };
            let params = DriverInitParams {
                driver_name: driver.to_string(),
                driver_version: 1,
                machine_ident: "test".to_string(),
            };
            log.system(SystemChunk::DriverInit, |w| w.serialise("params", &params));
            log.system(SystemChunk::InitialContentsList, |w| w.write_u32("count", 0));
            let info = CaptureScopeInfo {
                frame_number: 0,
                stats: FrameStats::default(),
            };
            log.system(SystemChunk::CaptureScope, |w| w.serialise("info", &info));
            log.system(SystemChunk::CaptureBegin, |w| {
                w.write_u64("frame_number", 0);
                w.write_u32("objects", 0);
            });
            log
        }

        fn chunk(&mut self, kind: ChunkKind, f: impl FnOnce(&mut ChunkWriter)) -> u64 {
            self.writer.begin_chunk(kind);
            f(&mut self.writer);
            let chunk: Chunk = self.writer.end_chunk().unwrap();
            self.stream.write_chunk(&chunk)
        }

        fn system(&mut self, kind: SystemChunk, f: impl FnOnce(&mut ChunkWriter)) -> u64 {
            self.chunk(kind.kind(), f)
        }

        fn scope_op(&mut self, kind: ChunkKind, scope: u64) -> u64 {
            self.chunk(kind, |w| w.write_resource("scope", ResourceId::from_raw(scope)))
        }

        fn pipeline(&mut self, scope: u64, pipeline: u64) -> u64 {
            self.chunk(PIPELINE, |w| {
                w.write_resource("scope", ResourceId::from_raw(scope));
                w.write_resource("pipeline", ResourceId::from_raw(pipeline));
            })
        }

        fn draw(&mut self, scope: u64, vertex: u32) -> u64 {
            self.chunk(DRAW, |w| {
                w.write_resource("scope", ResourceId::from_raw(scope));
                w.write_u32("vertex", vertex);
            })
        }

        fn scope(&mut self, scope: u64, draws: &[u32]) {
            self.scope_op(CREATE, scope);
            self.scope_op(BEGIN, scope);
            self.pipeline(scope, 50);
            for vertex in draws {
                self.draw(scope, *vertex);
            }
            self.scope_op(END, scope);
            self.scope_op(COMMIT, scope);
        }

        fn finish(mut self) -> Bytes {
            self.chunk(MARKER, |w| w.write_str("name", "frame done"));
            self.system(SystemChunk::CaptureEnd, |w| {
                w.write_resource("presented", ResourceId::null())
            });
            self.stream.finish()
        }
    }

    // CaptureBegin = 1, A: start 2, create 3, begin 4, pipeline 5,
    // draws 6 7, end 8, commit 9; B: start 10, create 11, begin 12,
    // pipeline 13, draws 14 15, end 16, commit 17; marker 18, end 19
    fn two_scopes() -> Bytes {
        let mut log = Log::new("recorder");
        log.scope(10, &[1, 2]);
        log.scope(11, &[3, 4]);
        log.finish()
    }

    const A: ResourceId = ResourceId::from_raw(10);
    const B: ResourceId = ResourceId::from_raw(11);

    #[test]
    fn test_load_builds_timeline() {
        let mut engine = engine();
        engine.load_stream(two_scopes()).unwrap();
        assert_eq!(engine.state(), ReplayState::ActiveReplaying);
        assert_eq!(engine.last_event(), 19);

        let a = *engine.scope_info(A).unwrap();
        assert_eq!((a.start_event_id, a.base_event_id, a.end_event_id), (2, 3, 9));
        let b = *engine.scope_info(B).unwrap();
        assert_eq!((b.start_event_id, b.base_event_id, b.end_event_id), (10, 11, 17));

        assert!(engine.action(6).unwrap().flags.contains(ActionFlags::DRAW));
        assert_eq!(engine.action(18).unwrap().action_id, 0);
        assert!(engine.action(17).unwrap().flags.contains(ActionFlags::SCOPE_BOUNDARY));
        assert_eq!(engine.backend().submitted, vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(engine.stats().get("Draw").unwrap().count, 4);
        assert!(!engine.tracker(A).unwrap().is_open());
    }

    #[test]
    fn test_full_replay_to_end() {
        let mut engine = engine();
        engine.load_stream(two_scopes()).unwrap();
        engine.backend_mut().submitted.clear();
        engine.replay_log(1, 19, false).unwrap();
        assert_eq!(engine.backend().submitted, vec![vec![1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_full_replay_truncated_inside_scope() {
        let mut engine = engine();
        engine.load_stream(two_scopes()).unwrap();
        engine.backend_mut().submitted.clear();
        let closes = engine.backend().closes;

        engine.replay_log(1, 6, false).unwrap();
        assert_eq!(engine.backend().submitted, vec![vec![1]]);
        assert_eq!(engine.backend().closes, closes + 1);
        let state = engine.tracker(A).unwrap();
        assert_eq!(state.kind, EncoderKind::Render);
        assert_eq!(state.pipeline, Some(ResourceId::from_raw(50)));
    }

    #[test]
    fn test_partial_replay_from_saved_state() {
        let mut engine = engine();
        engine.load_stream(two_scopes()).unwrap();
        engine.replay_log(1, 6, false).unwrap();
        engine.backend_mut().submitted.clear();

        engine.replay_log(7, 7, true).unwrap();
        assert_eq!(engine.backend().submitted, vec![vec![2]]);
        assert_eq!(engine.backend().resumed.len(), 1);
        assert_eq!(
            engine.backend().resumed[0].pipeline,
            Some(ResourceId::from_raw(50))
        );
        // the captured scope's own object is back in place
        let live = engine.resources().get_live_id(A);
        assert!(engine.resources().get_native(live).is_some());
        assert!(!engine.backend().released.is_empty());
    }

    #[test]
    fn test_partial_replay_rebuilds_state_without_save() {
        let mut partial = engine();
        partial.load_stream(two_scopes()).unwrap();
        partial.backend_mut().submitted.clear();
        partial.replay_log(7, 7, true).unwrap();
        assert_eq!(partial.backend().submitted, vec![vec![2]]);
        assert_eq!(partial.backend().resumed.len(), 1);

        let mut full = engine();
        full.load_stream(two_scopes()).unwrap();
        full.replay_log(1, 7, false).unwrap();
        assert_eq!(partial.tracker(A), full.tracker(A));
    }

    #[test]
    fn test_partial_replay_spanning_scopes() {
        let mut engine = engine();
        engine.load_stream(two_scopes()).unwrap();
        engine.backend_mut().submitted.clear();
        engine.replay_log(7, 13, true).unwrap();
        // rest of A on the stand-in, then B from its start up to its first draw
        assert_eq!(engine.backend().submitted, vec![vec![2], vec![]]);
        assert_eq!(engine.tracker(B).unwrap().pipeline, Some(ResourceId::from_raw(50)));
    }

    #[test]
    fn test_partial_replay_root_event() {
        let mut engine = engine();
        engine.load_stream(two_scopes()).unwrap();
        engine.backend_mut().submitted.clear();
        engine.replay_log(18, 19, true).unwrap();
        assert!(engine.backend().submitted.is_empty());
    }

    #[test]
    fn test_invalid_range_does_not_latch() {
        let mut engine = engine();
        engine.load_stream(two_scopes()).unwrap();
        let err = engine.replay_log(5, 99, false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameter { .. }));
        assert!(engine.replay_log(0, 3, true).is_err());
        assert!(engine.fatal_error().is_none());
        engine.replay_log(1, 3, false).unwrap();
    }

    #[test]
    fn test_replay_before_load() {
        let mut engine = engine();
        assert!(matches!(
            engine.replay_log(1, 1, false),
            Err(CoreError::InvalidState(_))
        ));
    }

    #[test]
    fn test_unhandled_kind_latches() {
        let mut log = Log::new("recorder");
        log.chunk(UNHANDLED, |w| w.write_u32("x", 1));
        let data = log.finish();

        let mut engine = engine();
        let err = engine.load_stream(data).unwrap_err();
        assert!(matches!(err, CoreError::ApiUnsupported { .. }));
        assert_eq!(engine.fatal_error(), Some(&err));
        assert_eq!(engine.replay_log(1, 1, false), Err(err));
    }

    #[test]
    fn test_corrupted_chunk_latches() {
        let mut log = Log::new("recorder");
        log.scope_op(CREATE, 10);
        log.scope_op(BEGIN, 10);
        let offset = log.draw(10, 7);
        log.scope_op(END, 10);
        log.scope_op(COMMIT, 10);
        let mut raw = log.finish().to_vec();
        raw[offset as usize + 20] ^= 0x40;

        let mut engine = engine();
        let err = engine.load_stream(Bytes::from(raw)).unwrap_err();
        assert!(matches!(err, CoreError::ApiDataCorrupted { .. }));
        assert!(engine.fatal_error().is_some());
        assert!(engine.replay_log(1, 1, false).is_err());
    }

    #[test]
    fn test_driver_mismatch() {
        let mut engine = engine();
        let err = engine.load_stream(Log::new("other").finish()).unwrap_err();
        assert!(matches!(err, CoreError::ApiUnsupported { .. }));
    }

    #[test]
    fn test_missing_capture_scope() {
        let mut writer = ChunkWriter::new(ChunkMetadataOptions::none());
        let mut stream = StreamWriter::new();
        writer.begin_chunk(SystemChunk::InitialContentsList);
        writer.write_u32("count", 0);
        stream.write_chunk(&writer.end_chunk().unwrap());
        let mut engine = engine();
        assert!(matches!(
            engine.load_stream(stream.finish()),
            Err(CoreError::ApiDataCorrupted { .. })
        ));
    }

    #[test]
    fn test_interleaved_partial_unsupported() {
        let mut log = Log::new("recorder");
        log.scope_op(CREATE, 10);
        log.scope_op(CREATE, 11);
        log.scope_op(BEGIN, 10);
        log.draw(10, 1);
        log.scope_op(END, 10);
        log.scope_op(COMMIT, 10);
        log.scope_op(COMMIT, 11);
        let mut engine = engine();
        engine.load_stream(log.finish()).unwrap();
        let a = *engine.scope_info(A).unwrap();
        assert!(a.interleaved);
        engine.replay_log(1, engine.last_event(), false).unwrap();
        let err = engine
            .replay_log(a.base_event_id + 2, a.base_event_id + 2, true)
            .unwrap_err();
        assert!(matches!(err, CoreError::ApiUnsupported { .. }));
        assert!(engine.fatal_error().is_none());
    }

    #[test]
    fn test_export_names_unknown_kinds() {
        let mut log = Log::new("recorder");
        log.chunk(UNHANDLED, |w| w.write_u32("x", 1));
        let mut engine = engine();
        let chunks = engine.export_structured(log.finish()).unwrap();
        assert_eq!(engine.state(), ReplayState::StructuredExport);
        assert!(chunks.iter().any(|c| c.name == UNKNOWN_CHUNK_NAME));
        assert!(chunks.iter().any(|c| c.name == "Marker"));
        assert!(engine.backend().submitted.is_empty());
    }
}
