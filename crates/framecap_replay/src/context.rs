//! Per-pass state handed to every chunk handler.
//!
//! A handler decodes its chunk's fields, routes itself to a scope with
//! [`ReplayContext::enter_scope`] when it belongs to one, then checks
//! [`ReplayContext::gate`]: `Execute` calls the backend, `StateOnly` only
//! updates the encoder tracker, `Skip` does neither.

use crate::action::{ActionDescription, ActionFlags};
use crate::backend::ReplayBackend;
use crate::options::ReplayOptions;
use crate::timeline::Timeline;
use crate::tracker::EncoderState;
use framecap_core::{CoreError, CoreResult, NativeHandle, ResourceId};
use framecap_resource::ResourceManager;
use indexmap::IndexMap;
use std::collections::HashMap;

/// How much of a chunk to replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Call the backend and update tracked state
    Execute,
    /// Update tracked state only
    StateOnly,
    /// Decode and ignore
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassMode {
    /// Pre-frame chunks of the initial read: executed, no events
    Init,
    /// Building the timeline while executing the whole frame
    Load,
    /// Executing a range of an already built timeline
    Replay,
}

/// Fresh scope object standing in for a captured one during partial replay
#[derive(Debug, Clone, Copy)]
pub(crate) struct PartialScope {
    pub original: ResourceId,
    pub native: NativeHandle,
}

#[derive(Debug)]
pub(crate) struct PassState {
    pub mode: PassMode,
    pub options: ReplayOptions,
    pub start: u32,
    pub end: u32,
    pub gate: Gate,
    pub chunk_index: u64,
    pub chunk_offset: u64,
    pub chunk_name: String,
    pub owner: Option<ResourceId>,
    pub event: Option<u32>,
    /// Scopes created this pass, and whether they were submitted
    pub entered: IndexMap<ResourceId, bool>,
    pub partial: Option<PartialScope>,
    pub needs_resume: Option<ResourceId>,
    pub release_after_wait: Vec<NativeHandle>,
}

impl PassState {
    pub fn new(mode: PassMode, options: ReplayOptions, start: u32, end: u32) -> Self {
        Self {
            mode,
            options,
            start,
            end,
            gate: Gate::Execute,
            chunk_index: 0,
            chunk_offset: 0,
            chunk_name: String::new(),
            owner: None,
            event: None,
            entered: IndexMap::new(),
            partial: None,
            needs_resume: None,
            release_after_wait: Vec::new(),
        }
    }

    pub fn begin_chunk(&mut self, index: u64, offset: u64, name: String, gate: Gate) {
        self.chunk_index = index;
        self.chunk_offset = offset;
        self.chunk_name = name;
        self.gate = gate;
        self.owner = None;
        self.event = None;
    }

    pub fn partial_original(&self) -> Option<ResourceId> {
        self.partial.map(|p| p.original)
    }
}

/// Replay session state borrowed by one chunk handler
pub struct ReplayContext<'a, B: ReplayBackend> {
    pub(crate) backend: &'a mut B,
    pub(crate) resources: &'a ResourceManager,
    pub(crate) timeline: &'a mut Timeline,
    pub(crate) trackers: &'a mut HashMap<ResourceId, EncoderState>,
    pub(crate) pass: &'a mut PassState,
}

impl<B: ReplayBackend> ReplayContext<'_, B> {
    /// What the current chunk may do
    #[must_use]
    pub fn gate(&self) -> Gate {
        self.pass.gate
    }

    /// Whether the timeline is being built by this pass
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.pass.mode == PassMode::Load
    }

    /// Index of the current chunk
    #[must_use]
    pub fn chunk_index(&self) -> u64 {
        self.pass.chunk_index
    }

    /// Byte offset of the current chunk
    #[must_use]
    pub fn chunk_offset(&self) -> u64 {
        self.pass.chunk_offset
    }

    /// Name of the current chunk
    #[must_use]
    pub fn chunk_name(&self) -> &str {
        &self.pass.chunk_name
    }

    /// Scope the current chunk was routed to
    #[must_use]
    pub fn owner(&self) -> Option<ResourceId> {
        self.pass.owner
    }

    /// The backend being driven
    pub fn backend(&mut self) -> &mut B {
        &mut *self.backend
    }

    /// Replay-side resource manager
    #[must_use]
    pub fn resources(&self) -> &ResourceManager {
        self.resources
    }

    /// Handler failure for the current chunk
    pub fn fail(&self, reason: impl Into<String>) -> CoreError {
        CoreError::ApiReplayFailed {
            chunk: self.pass.chunk_name.clone(),
            reason: reason.into(),
        }
    }

    fn route(&mut self, scope: ResourceId) {
        self.pass.owner = Some(scope);
        if self.pass.mode == PassMode::Load {
            self.timeline
                .enter_scope(scope, self.pass.chunk_index, self.pass.chunk_offset);
        }
    }

    /// Route the current chunk to `scope`.
    ///
    /// A scope whose object was not created during this pass cannot take
    /// new work, so its chunks drop to `StateOnly`. The first executed
    /// chunk of a partially replayed scope resumes its encoder.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if resuming fails
    pub fn enter_scope(&mut self, scope: ResourceId) -> CoreResult<()> {
        self.route(scope);
        if self.pass.gate != Gate::Execute {
            return Ok(());
        }
        if !self.pass.entered.contains_key(&scope) {
            self.pass.gate = Gate::StateOnly;
            return Ok(());
        }
        if self.pass.needs_resume == Some(scope) {
            self.pass.needs_resume = None;
            self.resume(scope)?;
        }
        Ok(())
    }

    fn resume(&mut self, scope: ResourceId) -> CoreResult<()> {
        let state = self.trackers.get(&scope).cloned().unwrap_or_default();
        if !state.is_open() {
            return Ok(());
        }
        let native = self.require_native(scope)?;
        let resources = self.resources;
        tracing::debug!(%scope, kind = ?state.kind, "resuming encoder for partial replay");
        self.backend
            .resume_encoder(native, &state, &|id| resources.live_native(id))
    }

    /// Start a scope: reset its tracker and, when executing, replace its
    /// live object with a fresh one
    ///
    /// # Errors
    ///
    /// Returns the backend's error if creation fails
    pub fn create_scope(&mut self, scope: ResourceId) -> CoreResult<()> {
        self.route(scope);
        if self.pass.gate == Gate::Skip {
            return Ok(());
        }
        self.trackers.insert(scope, EncoderState::default());
        if self.pass.partial_original() == Some(scope) {
            // the stand-in already exists and starts with nothing open
            if self.pass.gate == Gate::Execute {
                self.pass.needs_resume = None;
            }
            return Ok(());
        }
        if self.pass.gate != Gate::Execute {
            return Ok(());
        }
        if let Some(old) = self.resources.erase_live_resource(scope) {
            self.backend.release(old.native);
        }
        let native = self.backend.create_scope()?;
        self.resources.register_live(scope, native);
        self.pass.entered.insert(scope, false);
        Ok(())
    }

    /// Route an enqueue chunk to `scope`
    ///
    /// # Errors
    ///
    /// As [`ReplayContext::enter_scope`]
    pub fn enqueue_scope(&mut self, scope: ResourceId) -> CoreResult<()> {
        self.enter_scope(scope)
    }

    /// Commit `scope`: fold it into the timeline when loading, submit it
    /// when executing
    ///
    /// # Errors
    ///
    /// Returns timeline or backend errors
    pub fn commit_scope(&mut self, scope: ResourceId) -> CoreResult<()> {
        self.enter_scope(scope)?;
        if self.pass.mode == PassMode::Load {
            let info =
                self.timeline
                    .commit_scope(scope, self.pass.chunk_index, self.pass.chunk_offset)?;
            self.pass.event = Some(info.end_event_id);
        }
        if self.pass.gate != Gate::Execute {
            return Ok(());
        }
        if self.pass.entered.get(&scope) != Some(&false) {
            return Ok(());
        }
        self.submit(scope)
    }

    fn submit(&mut self, scope: ResourceId) -> CoreResult<()> {
        let native = self.require_native(scope)?;
        if self.trackers.get(&scope).is_some_and(EncoderState::is_open) {
            tracing::warn!(%scope, "scope committed with an open encoder");
            self.backend.close_encoder(native)?;
        }
        self.backend.submit_scope(native)?;
        if self.pass.options.wait_after_submit {
            self.backend.wait_idle()?;
        }
        self.pass.entered.insert(scope, true);
        if self.pass.partial_original() == Some(scope) {
            restore_partial(self.resources, self.pass);
        }
        Ok(())
    }

    /// Record the current chunk's event. Only the first call per chunk
    /// counts, and only while loading.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the routed scope has no timeline
    pub fn add_event(&mut self) -> CoreResult<()> {
        if self.pass.mode != PassMode::Load || self.pass.event.is_some() {
            return Ok(());
        }
        let event =
            self.timeline
                .add_event(self.pass.owner, self.pass.chunk_index, self.pass.chunk_offset)?;
        self.pass.event = Some(event);
        Ok(())
    }

    /// Record the current chunk as an action, recording its event first
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the routed scope has no timeline
    pub fn add_action(&mut self, name: impl Into<String>, flags: ActionFlags) -> CoreResult<()> {
        if self.pass.mode != PassMode::Load {
            return Ok(());
        }
        self.add_event()?;
        let event = self.pass.event.unwrap_or_default();
        self.timeline
            .add_action(self.pass.owner, event, ActionDescription::new(name, flags))
    }

    /// Open a marker region
    ///
    /// # Errors
    ///
    /// As [`ReplayContext::add_action`]
    pub fn push_marker(&mut self, name: impl Into<String>) -> CoreResult<()> {
        self.add_action(name, ActionFlags::PUSH_MARKER)
    }

    /// Add a point marker
    ///
    /// # Errors
    ///
    /// As [`ReplayContext::add_action`]
    pub fn set_marker(&mut self, name: impl Into<String>) -> CoreResult<()> {
        self.add_action(name, ActionFlags::SET_MARKER)
    }

    /// Close the innermost marker region
    ///
    /// # Errors
    ///
    /// As [`ReplayContext::add_event`]
    pub fn pop_marker(&mut self) -> CoreResult<()> {
        if self.pass.mode != PassMode::Load {
            return Ok(());
        }
        self.add_event()?;
        if !self.timeline.pop_marker(self.pass.owner)? {
            tracing::warn!(chunk = self.pass.chunk_index, "marker pop with no open region");
        }
        Ok(())
    }

    /// Tracked encoder state of `scope`
    pub fn tracker(&mut self, scope: ResourceId) -> &mut EncoderState {
        self.trackers.entry(scope).or_default()
    }

    /// Map `original` to a new backend object
    pub fn register_live(&mut self, original: ResourceId, native: NativeHandle) -> ResourceId {
        self.resources.register_live(original, native)
    }

    /// Backend handle currently standing in for `original`
    #[must_use]
    pub fn live_native(&self, original: ResourceId) -> Option<NativeHandle> {
        self.resources.live_native(original)
    }

    /// As [`ReplayContext::live_native`], failing the chunk if unmapped
    ///
    /// # Errors
    ///
    /// Returns `ApiReplayFailed` if `original` has no live object
    pub fn require_native(&self, original: ResourceId) -> CoreResult<NativeHandle> {
        self.live_native(original)
            .ok_or_else(|| self.fail(format!("{original} has no live object")))
    }

    /// Destroy the live object of `original`
    pub fn release_live(&mut self, original: ResourceId) {
        if let Some(live) = self.resources.erase_live_resource(original) {
            self.backend.release(live.native);
        }
    }
}

/// Put the captured scope's own object back and queue the stand-in for
/// release once the backend is idle
pub(crate) fn restore_partial(resources: &ResourceManager, pass: &mut PassState) {
    if let Some(partial) = pass.partial.take() {
        resources.remove_replacement(partial.original);
        pass.release_after_wait.push(partial.native);
        tracing::trace!(scope = %partial.original, "partial scope restored");
    }
}
