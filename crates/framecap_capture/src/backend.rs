//! What the recorder needs from the backend it wraps.

use bytes::Bytes;
use framecap_chunk::{ChunkKind, ChunkWriter};
use framecap_core::NativeHandle;

/// Capture-side backend contract
pub trait CaptureBackend: Send + Sync {
    /// Name recorded in `DriverInit` and the container header
    fn driver_name(&self) -> &str;

    /// Version recorded in `DriverInit`
    fn driver_version(&self) -> u32;

    /// Current contents of a resource, or `None` if it cannot be read
    fn read_back(&self, native: NativeHandle) -> Option<Bytes>;

    /// Write the top-of-frame state into the open `CaptureBegin` chunk
    fn serialise_frame_state(&self, writer: &mut ChunkWriter);

    /// Chunk kind used for CPU buffer diffs
    fn buffer_diff_kind(&self) -> ChunkKind;
}
