//! What the replay engine needs from the backend it drives.

use crate::tracker::EncoderState;
use framecap_chunk::ChunkReader;
use framecap_core::{CoreResult, NativeHandle, ResourceId};
use framecap_resource::InitialContents;

/// Replay-side backend contract.
///
/// The engine only calls these for work it owns itself: scope objects,
/// submission, encoder suspension and initial contents. Everything else a
/// chunk does goes through the backend's own handlers.
pub trait ReplayBackend {
    /// Name that must match the capture's `DriverInit`
    fn driver_name(&self) -> &str;

    /// Read the backend part of `CaptureBegin`
    fn load_frame_state(&mut self, reader: &mut ChunkReader<'_>) -> CoreResult<()>;

    /// Create an empty deferred scope
    fn create_scope(&mut self) -> CoreResult<NativeHandle>;

    /// Submit a scope for execution
    fn submit_scope(&mut self, scope: NativeHandle) -> CoreResult<()>;

    /// Close whatever encoder is open on `scope`
    fn close_encoder(&mut self, scope: NativeHandle) -> CoreResult<()>;

    /// Open an encoder on `scope` matching `state`, loading attachment
    /// contents, and bind everything `state` has bound. `resolve` maps the
    /// state's original IDs to backend handles.
    fn resume_encoder(
        &mut self,
        scope: NativeHandle,
        state: &EncoderState,
        resolve: &dyn Fn(ResourceId) -> Option<NativeHandle>,
    ) -> CoreResult<()>;

    /// Block until submitted work has finished
    fn wait_idle(&mut self) -> CoreResult<()>;

    /// Reset an object to its pre-frame contents
    fn apply_initial_contents(
        &mut self,
        native: NativeHandle,
        contents: &InitialContents,
    ) -> CoreResult<()>;

    /// Destroy an object
    fn release(&mut self, native: NativeHandle);
}
