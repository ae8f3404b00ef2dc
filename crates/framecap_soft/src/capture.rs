//! Capture-side wrappers: every soft device call goes to the device and is
//! recorded as one chunk.

use crate::chunks::SoftChunk;
use crate::device::{Attachment, Command, SoftDevice};
use bytes::Bytes;
use framecap_capture::{CaptureBackend, CaptureContext, CaptureOptions};
use framecap_chunk::{CaptureFile, ChunkKind, ChunkWriter};
use framecap_core::{CoreError, CoreResult, NativeHandle, ResourceId};
use framecap_replay::{ColourAttachment, LoadOp, ScissorRect, Viewport};
use framecap_resource::{FrameRefType, ResourceManager, ResourceType};
use parking_lot::Mutex;
use std::sync::Arc;

/// Driver name written into captures of the soft device
pub const SOFT_DRIVER_NAME: &str = "soft";

/// Version written into `DriverInit`
pub const SOFT_DRIVER_VERSION: u32 = 1;

impl CaptureBackend for SoftDevice {
    fn driver_name(&self) -> &str {
        SOFT_DRIVER_NAME
    }

    fn driver_version(&self) -> u32 {
        SOFT_DRIVER_VERSION
    }

    fn read_back(&self, native: NativeHandle) -> Option<Bytes> {
        SoftDevice::read_back(self, native)
    }

    fn serialise_frame_state(&self, writer: &mut ChunkWriter) {
        writer.write_u32("objects", self.object_count() as u32);
    }

    fn buffer_diff_kind(&self) -> ChunkKind {
        SoftChunk::BufferDidModify.kind()
    }
}

/// A soft device under capture. Shareable across recording threads.
pub struct SoftCapture {
    ctx: CaptureContext<SoftDevice>,
    /// Device objects whose release waits for the frame to end
    deferred: Mutex<Vec<NativeHandle>>,
}

impl SoftCapture {
    /// Capture calls made on `device`
    #[must_use]
    pub fn new(device: SoftDevice, options: CaptureOptions) -> Self {
        Self {
            ctx: CaptureContext::new(device, options),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// As [`SoftCapture::new`] over an existing resource manager
    #[must_use]
    pub fn with_resources(
        device: SoftDevice,
        options: CaptureOptions,
        resources: Arc<ResourceManager>,
    ) -> Self {
        Self {
            ctx: CaptureContext::with_resources(device, options, resources),
            deferred: Mutex::new(Vec::new()),
        }
    }

    /// The recorder
    pub fn context(&self) -> &CaptureContext<SoftDevice> {
        &self.ctx
    }

    /// The device calls go to
    pub fn device(&self) -> &SoftDevice {
        self.ctx.backend()
    }

    /// Device handle behind `id`
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `id` was not created through this capture
    pub fn native(&self, id: ResourceId) -> CoreResult<NativeHandle> {
        self.ctx
            .resources()
            .wrapped(id)
            .map(|w| w.native)
            .ok_or_else(|| CoreError::InvalidParameter {
                name: "id".to_string(),
                reason: format!("{id} is not a soft device object"),
            })
    }

    /// Start recording a frame
    ///
    /// # Errors
    ///
    /// `InvalidState` if a frame is already being recorded
    pub fn begin_frame(&self) -> CoreResult<()> {
        self.ctx.begin_frame()
    }

    /// Finish the frame
    ///
    /// # Errors
    ///
    /// `InvalidState` without a matching `begin_frame`
    pub fn end_frame(&self, presented: ResourceId) -> CoreResult<CaptureFile> {
        let file = self.ctx.end_frame(presented)?;
        for native in std::mem::take(&mut *self.deferred.lock()) {
            self.device().release(native);
        }
        Ok(file)
    }

    /// Destroy an object. An object the current frame references stays
    /// alive on both sides until `end_frame`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `id` was not created through this capture
    pub fn release(&self, id: ResourceId) -> CoreResult<()> {
        let native = self.native(id)?;
        if self.ctx.resources().release_resource(id) {
            self.device().release(native);
        } else {
            self.deferred.lock().push(native);
        }
        tracing::debug!(%id, "object released");
        Ok(())
    }

    /// Create a buffer. CPU-visible buffers are diffed at every commit.
    ///
    /// # Errors
    ///
    /// Errors from the recorder
    pub fn create_buffer(&self, data: &[u8], cpu_visible: bool) -> CoreResult<ResourceId> {
        let native = self.device().create_buffer(data);
        let wrapped = self.ctx.wrap(native, ResourceType::Buffer)?;
        let chunk = self.ctx.chunk(SoftChunk::CreateBuffer, |w| {
            w.write_resource("buffer", wrapped.id);
            w.write_bytes("data", data);
            w.write_bool("cpu_visible", cpu_visible);
        })?;
        self.ctx.record_creation(wrapped.id, chunk);
        if cpu_visible {
            self.ctx.track_cpu_buffer(wrapped.id);
        }
        Ok(wrapped.id)
    }

    /// Create a zeroed texture
    ///
    /// # Errors
    ///
    /// Errors from the recorder
    pub fn create_texture(&self, width: u32, height: u32) -> CoreResult<ResourceId> {
        let native = self.device().create_texture(width, height);
        let wrapped = self.ctx.wrap(native, ResourceType::Texture)?;
        let chunk = self.ctx.chunk(SoftChunk::CreateTexture, |w| {
            w.write_resource("texture", wrapped.id);
            w.write_u32("width", width);
            w.write_u32("height", height);
        })?;
        self.ctx.record_creation(wrapped.id, chunk);
        Ok(wrapped.id)
    }

    /// Create a pipeline drawing in `colour`
    ///
    /// # Errors
    ///
    /// Errors from the recorder
    pub fn create_pipeline(&self, colour: u32) -> CoreResult<ResourceId> {
        let native = self.device().create_pipeline(colour);
        let wrapped = self.ctx.wrap(native, ResourceType::Pipeline)?;
        let chunk = self.ctx.chunk(SoftChunk::CreatePipeline, |w| {
            w.write_resource("pipeline", wrapped.id);
            w.write_u32("colour", colour);
        })?;
        self.ctx.record_creation(wrapped.id, chunk);
        Ok(wrapped.id)
    }

    /// Create a command buffer. Its calls are kept apart until it is
    /// submitted.
    ///
    /// # Errors
    ///
    /// Errors from the recorder
    pub fn create_command_buffer(&self) -> CoreResult<ResourceId> {
        let native = self.device().create_command_buffer();
        let wrapped = self.ctx.wrap(native, ResourceType::Scope)?;
        let chunk = self.ctx.chunk(SoftChunk::CreateCommandBuffer, |w| {
            w.write_resource("scope", wrapped.id);
        })?;
        self.ctx.record_scope(wrapped.id, chunk, &[]);
        Ok(wrapped.id)
    }

    /// CPU write into a buffer. Not recorded itself; a CPU-visible buffer
    /// shows the change as a diff at the next commit.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an unknown buffer, `InvalidState` for an
    /// out of range write
    pub fn write_buffer(&self, buffer: ResourceId, offset: u64, data: &[u8]) -> CoreResult<()> {
        let native = self.native(buffer)?;
        Ok(self.device().write_buffer(native, offset, data)?)
    }

    fn scope_call(
        &self,
        scope: ResourceId,
        kind: SoftChunk,
        command: Command,
        refs: &[(ResourceId, FrameRefType)],
        args: impl FnOnce(&mut ChunkWriter),
    ) -> CoreResult<()> {
        let native = self.native(scope)?;
        self.device().record(native, command)?;
        let chunk = self.ctx.chunk(kind, |w| {
            w.write_resource("scope", scope);
            args(w);
        })?;
        self.ctx.record_scope(scope, chunk, refs);
        Ok(())
    }

    /// Reserve the command buffer's submission slot
    ///
    /// # Errors
    ///
    /// `InvalidState` if it was already enqueued
    pub fn enqueue(&self, scope: ResourceId) -> CoreResult<u64> {
        let native = self.native(scope)?;
        self.device().enqueue(native)?;
        let chunk = self.ctx.chunk(SoftChunk::Enqueue, |w| {
            w.write_resource("scope", scope);
        })?;
        self.ctx.enqueue_scope(scope, chunk)
    }

    /// Finish the command buffer. Returns the scopes this commit released
    /// into the frame.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the command buffer was enqueued and has no
    /// encoder open
    pub fn commit(&self, scope: ResourceId) -> CoreResult<Vec<ResourceId>> {
        let native = self.native(scope)?;
        self.device().commit(native)?;
        let chunk = self.ctx.chunk(SoftChunk::Commit, |w| {
            w.write_resource("scope", scope);
        })?;
        self.ctx.commit_scope(scope, chunk)
    }

    /// Open a render encoder
    ///
    /// # Errors
    ///
    /// Device errors, or `InvalidParameter` for unknown objects
    pub fn begin_render_pass(
        &self,
        scope: ResourceId,
        attachments: &[ColourAttachment],
    ) -> CoreResult<()> {
        let targets = attachments
            .iter()
            .map(|a| {
                Ok(Attachment {
                    texture: self.native(a.texture)?,
                    load: a.load,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        let refs: Vec<_> = attachments
            .iter()
            .map(|a| {
                let access = match a.load {
                    LoadOp::Load => FrameRefType::PartialWrite,
                    LoadOp::Clear(_) | LoadOp::DontCare => FrameRefType::CompleteWrite,
                };
                (a.texture, access)
            })
            .collect();
        let attachments = attachments.to_vec();
        self.scope_call(
            scope,
            SoftChunk::BeginRenderPass,
            Command::BeginRender {
                attachments: targets,
            },
            &refs,
            |w| w.serialise("attachments", &attachments),
        )
    }

    /// Open a transfer encoder
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn begin_transfer_pass(&self, scope: ResourceId) -> CoreResult<()> {
        self.scope_call(scope, SoftChunk::BeginTransferPass, Command::BeginTransfer, &[], |_| {})
    }

    /// Close the open encoder
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn end_encoding(&self, scope: ResourceId) -> CoreResult<()> {
        self.scope_call(scope, SoftChunk::EndEncoding, Command::EndEncoding, &[], |_| {})
    }

    /// Bind a pipeline
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn set_pipeline(&self, scope: ResourceId, pipeline: ResourceId) -> CoreResult<()> {
        let native = self.native(pipeline)?;
        self.scope_call(
            scope,
            SoftChunk::SetPipeline,
            Command::SetPipeline(native),
            &[(pipeline, FrameRefType::Read)],
            |w| w.write_resource("pipeline", pipeline),
        )
    }

    /// Bind a vertex stage buffer
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn set_vertex_buffer(
        &self,
        scope: ResourceId,
        slot: u32,
        buffer: ResourceId,
        offset: u64,
    ) -> CoreResult<()> {
        let native = self.native(buffer)?;
        self.scope_call(
            scope,
            SoftChunk::SetVertexBuffer,
            Command::SetVertexBuffer {
                slot,
                buffer: native,
                offset,
            },
            &[(buffer, FrameRefType::Read)],
            |w| {
                w.write_u32("slot", slot);
                w.write_resource("buffer", buffer);
                w.write_u64("offset", offset);
            },
        )
    }

    /// Bind a fragment stage buffer
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn set_fragment_buffer(
        &self,
        scope: ResourceId,
        slot: u32,
        buffer: ResourceId,
        offset: u64,
    ) -> CoreResult<()> {
        let native = self.native(buffer)?;
        self.scope_call(
            scope,
            SoftChunk::SetFragmentBuffer,
            Command::SetFragmentBuffer {
                slot,
                buffer: native,
                offset,
            },
            &[(buffer, FrameRefType::Read)],
            |w| {
                w.write_u32("slot", slot);
                w.write_resource("buffer", buffer);
                w.write_u64("offset", offset);
            },
        )
    }

    /// Bind a fragment stage texture
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn set_fragment_texture(
        &self,
        scope: ResourceId,
        slot: u32,
        texture: ResourceId,
    ) -> CoreResult<()> {
        let native = self.native(texture)?;
        self.scope_call(
            scope,
            SoftChunk::SetFragmentTexture,
            Command::SetFragmentTexture {
                slot,
                texture: native,
            },
            &[(texture, FrameRefType::Read)],
            |w| {
                w.write_u32("slot", slot);
                w.write_resource("texture", texture);
            },
        )
    }

    /// Set the viewport
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn set_viewport(&self, scope: ResourceId, viewport: Viewport) -> CoreResult<()> {
        self.scope_call(
            scope,
            SoftChunk::SetViewport,
            Command::SetViewport(viewport),
            &[],
            |w| w.serialise("viewport", &viewport),
        )
    }

    /// Set the scissor
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn set_scissor(&self, scope: ResourceId, scissor: ScissorRect) -> CoreResult<()> {
        self.scope_call(
            scope,
            SoftChunk::SetScissor,
            Command::SetScissor(scissor),
            &[],
            |w| w.serialise("scissor", &scissor),
        )
    }

    /// Set the blend constant
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn set_blend_colour(&self, scope: ResourceId, colour: [f32; 4]) -> CoreResult<()> {
        self.scope_call(
            scope,
            SoftChunk::SetBlendColour,
            Command::SetBlendColour(colour),
            &[],
            |w| w.serialise("colour", &colour),
        )
    }

    /// Draw `vertex_count` vertices starting at `first_vertex`
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn draw(&self, scope: ResourceId, first_vertex: u32, vertex_count: u32) -> CoreResult<()> {
        self.scope_call(
            scope,
            SoftChunk::Draw,
            Command::Draw {
                first_vertex,
                vertex_count,
            },
            &[],
            |w| {
                w.write_u32("first_vertex", first_vertex);
                w.write_u32("vertex_count", vertex_count);
            },
        )
    }

    /// Copy `size` bytes between buffers
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn copy_buffer(
        &self,
        scope: ResourceId,
        src: ResourceId,
        src_offset: u64,
        dst: ResourceId,
        dst_offset: u64,
        size: u64,
    ) -> CoreResult<()> {
        let command = Command::CopyBuffer {
            src: self.native(src)?,
            src_offset,
            dst: self.native(dst)?,
            dst_offset,
            size,
        };
        self.scope_call(
            scope,
            SoftChunk::CopyBuffer,
            command,
            &[(src, FrameRefType::Read), (dst, FrameRefType::PartialWrite)],
            |w| {
                w.write_resource("src", src);
                w.write_u64("src_offset", src_offset);
                w.write_resource("dst", dst);
                w.write_u64("dst_offset", dst_offset);
                w.write_u64("size", size);
            },
        )
    }

    /// Fill `size` bytes of a buffer with `value`
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn fill_buffer(
        &self,
        scope: ResourceId,
        buffer: ResourceId,
        offset: u64,
        size: u64,
        value: u8,
    ) -> CoreResult<()> {
        let native = self.native(buffer)?;
        self.scope_call(
            scope,
            SoftChunk::FillBuffer,
            Command::FillBuffer {
                buffer: native,
                offset,
                size,
                value,
            },
            &[(buffer, FrameRefType::PartialWrite)],
            |w| {
                w.write_resource("buffer", buffer);
                w.write_u64("offset", offset);
                w.write_u64("size", size);
                w.write_u8("value", value);
            },
        )
    }

    /// Open a debug group
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn push_marker(&self, scope: ResourceId, name: &str) -> CoreResult<()> {
        self.scope_call(
            scope,
            SoftChunk::PushMarker,
            Command::PushMarker(name.to_string()),
            &[],
            |w| w.write_str("name", name),
        )
    }

    /// Close the innermost debug group
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn pop_marker(&self, scope: ResourceId) -> CoreResult<()> {
        self.scope_call(scope, SoftChunk::PopMarker, Command::PopMarker, &[], |_| {})
    }

    /// Add a point marker
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn insert_marker(&self, scope: ResourceId, name: &str) -> CoreResult<()> {
        self.scope_call(
            scope,
            SoftChunk::InsertMarker,
            Command::InsertMarker(name.to_string()),
            &[],
            |w| w.write_str("name", name),
        )
    }

    /// Present a texture
    ///
    /// # Errors
    ///
    /// Device errors
    pub fn present(&self, texture: ResourceId) -> CoreResult<()> {
        let native = self.native(texture)?;
        self.device().present(native)?;
        let chunk = self.ctx.chunk(SoftChunk::Present, |w| {
            w.write_resource("texture", texture);
        })?;
        self.ctx.record_root(chunk, &[(texture, FrameRefType::Read)]);
        Ok(())
    }

    /// Run all committed work
    ///
    /// # Errors
    ///
    /// Device execution errors
    pub fn wait_idle(&self) -> CoreResult<()> {
        Ok(self.device().wait_idle()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecap_chunk::{ChunkClass, StreamReader};

    fn capture() -> SoftCapture {
        SoftCapture::with_resources(
            SoftDevice::new(),
            CaptureOptions::deterministic(),
            Arc::new(ResourceManager::with_private_ids(1)),
        )
    }

    fn soft_kinds(file: &CaptureFile) -> Vec<SoftChunk> {
        let mut reader = StreamReader::open(file.frame_capture.clone()).unwrap();
        let mut kinds = Vec::new();
        while let Some(read) = reader.read_chunk().unwrap() {
            if let Ok(ChunkClass::Driver(kind)) = read.chunk.kind().classify() {
                kinds.push(SoftChunk::from_kind(kind).unwrap());
            }
        }
        kinds
    }

    #[test]
    fn test_calls_reach_device_and_log() {
        let cap = capture();
        let target = cap.create_texture(2, 1).unwrap();
        let pipeline = cap.create_pipeline(0x40).unwrap();
        cap.begin_frame().unwrap();
        let cb = cap.create_command_buffer().unwrap();
        cap.enqueue(cb).unwrap();
        cap.begin_render_pass(
            cb,
            &[ColourAttachment {
                texture: target,
                load: LoadOp::Clear(1),
            }],
        )
        .unwrap();
        cap.set_pipeline(cb, pipeline).unwrap();
        cap.draw(cb, 1, 1).unwrap();
        cap.end_encoding(cb).unwrap();
        assert_eq!(cap.commit(cb).unwrap(), vec![cb]);
        cap.present(target).unwrap();
        cap.wait_idle().unwrap();
        let file = cap.end_frame(target).unwrap();

        assert_eq!(
            cap.device().read_texture(cap.native(target).unwrap()).unwrap(),
            vec![1, 0x40]
        );
        assert_eq!(
            soft_kinds(&file),
            vec![
                SoftChunk::CreateTexture,
                SoftChunk::CreatePipeline,
                SoftChunk::CreateCommandBuffer,
                SoftChunk::Enqueue,
                SoftChunk::BeginRenderPass,
                SoftChunk::SetPipeline,
                SoftChunk::Draw,
                SoftChunk::EndEncoding,
                SoftChunk::Commit,
                SoftChunk::Present,
            ]
        );
    }

    #[test]
    fn test_device_errors_surface() {
        let cap = capture();
        let cb = cap.create_command_buffer().unwrap();
        assert!(matches!(cap.draw(cb, 0, 1), Err(CoreError::InvalidState(_))));
        assert!(matches!(
            cap.set_pipeline(cb, ResourceId::from_raw(999)),
            Err(CoreError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_release_destroys_record_and_object() {
        let cap = capture();
        let buffer = cap.create_buffer(&[1; 4], false).unwrap();
        let objects = cap.device().object_count();
        let records = cap.context().resources().record_count();

        cap.release(buffer).unwrap();
        assert_eq!(cap.device().object_count(), objects - 1);
        assert_eq!(cap.context().resources().record_count(), records - 1);
        assert!(matches!(cap.release(buffer), Err(CoreError::InvalidParameter { .. })));
    }

    #[test]
    fn test_release_of_frame_referenced_object_waits_for_end_frame() {
        let cap = capture();
        let target = cap.create_texture(1, 1).unwrap();
        let objects = cap.device().object_count();
        cap.begin_frame().unwrap();
        cap.present(target).unwrap();

        cap.release(target).unwrap();
        assert_eq!(cap.device().object_count(), objects);
        assert!(cap.context().resources().has_record(target));

        cap.end_frame(target).unwrap();
        assert_eq!(cap.device().object_count(), objects - 1);
        assert!(!cap.context().resources().has_record(target));
    }

    #[test]
    fn test_records_stay_bounded_across_frames() {
        let cap = capture();
        let target = cap.create_texture(1, 1).unwrap();
        let pipeline = cap.create_pipeline(0x10).unwrap();
        let baseline = cap.context().resources().record_count();

        for _ in 0..50 {
            cap.begin_frame().unwrap();
            for _ in 0..20 {
                let cb = cap.create_command_buffer().unwrap();
                cap.enqueue(cb).unwrap();
                cap.begin_render_pass(
                    cb,
                    &[ColourAttachment {
                        texture: target,
                        load: LoadOp::Load,
                    }],
                )
                .unwrap();
                cap.set_pipeline(cb, pipeline).unwrap();
                cap.draw(cb, 0, 1).unwrap();
                cap.end_encoding(cb).unwrap();
                cap.commit(cb).unwrap();
            }
            cap.present(target).unwrap();
            cap.wait_idle().unwrap();
            cap.end_frame(target).unwrap();
            assert_eq!(cap.context().resources().record_count(), baseline);
        }
    }

    #[test]
    fn test_cpu_write_becomes_diff_in_committing_scope() {
        let cap = capture();
        let shared = cap.create_buffer(&[0; 8], true).unwrap();
        cap.begin_frame().unwrap();
        let cb = cap.create_command_buffer().unwrap();
        cap.enqueue(cb).unwrap();
        cap.write_buffer(shared, 4, &[1, 2]).unwrap();
        cap.commit(cb).unwrap();
        let file = cap.end_frame(ResourceId::null()).unwrap();
        let kinds = soft_kinds(&file);
        assert_eq!(
            &kinds[kinds.len() - 2..],
            &[SoftChunk::BufferDidModify, SoftChunk::Commit]
        );
    }
}
