//! Replay-side handlers: rebuild soft device calls from their chunks.
//!
//! Every handler decodes its arguments first, then updates the tracker
//! unless the chunk is skipped, and only talks to the device when the
//! chunk executes.

use crate::capture::SOFT_DRIVER_NAME;
use crate::chunks::SoftChunk;
use crate::device::{Attachment, Command, SoftDevice};
use crate::error::SoftError;
use framecap_chunk::{BufferDiff, ChunkReader};
use framecap_core::{CoreError, CoreResult, NativeHandle, ResourceId};
use framecap_replay::{
    ActionFlags, BufferBinding, ColourAttachment, DispatchTable, EncoderKind, EncoderState, Gate,
    Handler, LoadOp, ReplayBackend, ReplayContext, ScissorRect, Viewport,
};
use framecap_resource::InitialContents;

/// The soft device as a replay target
#[derive(Debug, Clone, Default)]
pub struct SoftReplayer {
    device: SoftDevice,
    frame_objects: Option<u32>,
}

impl SoftReplayer {
    /// Replay onto `device`
    #[must_use]
    pub fn new(device: SoftDevice) -> Self {
        Self {
            device,
            frame_objects: None,
        }
    }

    /// The device being driven
    pub fn device(&self) -> &SoftDevice {
        &self.device
    }

    /// Object count the capture saw at frame start
    #[must_use]
    pub fn frame_objects(&self) -> Option<u32> {
        self.frame_objects
    }
}

fn device_error(handle: NativeHandle) -> impl Fn(SoftError) -> CoreError {
    move |err| CoreError::ApiReplayFailed {
        chunk: format!("device object {handle}"),
        reason: err.to_string(),
    }
}

impl ReplayBackend for SoftReplayer {
    fn driver_name(&self) -> &str {
        SOFT_DRIVER_NAME
    }

    fn load_frame_state(&mut self, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
        let objects = reader.read_u32("objects")?;
        tracing::trace!(objects, "soft frame state");
        self.frame_objects = Some(objects);
        Ok(())
    }

    fn create_scope(&mut self) -> CoreResult<NativeHandle> {
        Ok(self.device.create_command_buffer())
    }

    fn submit_scope(&mut self, scope: NativeHandle) -> CoreResult<()> {
        self.device.commit(scope).map_err(device_error(scope))
    }

    fn close_encoder(&mut self, scope: NativeHandle) -> CoreResult<()> {
        if self.device.open_encoder(scope) == Some(EncoderKind::None) {
            return Ok(());
        }
        self.device
            .record(scope, Command::EndEncoding)
            .map_err(device_error(scope))
    }

    fn resume_encoder(
        &mut self,
        scope: NativeHandle,
        state: &EncoderState,
        resolve: &dyn Fn(ResourceId) -> Option<NativeHandle>,
    ) -> CoreResult<()> {
        let native = |id: ResourceId| {
            resolve(id).ok_or_else(|| CoreError::ApiReplayFailed {
                chunk: "resume encoder".to_string(),
                reason: format!("{id} has no live object"),
            })
        };
        let mut commands = Vec::new();
        match state.kind {
            EncoderKind::None => return Ok(()),
            EncoderKind::Transfer => commands.push(Command::BeginTransfer),
            EncoderKind::Compute => commands.push(Command::BeginCompute),
            EncoderKind::Render => {
                let attachments = state
                    .resume_attachments()
                    .into_iter()
                    .map(|a| {
                        Ok(Attachment {
                            texture: native(a.texture)?,
                            load: a.load,
                        })
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                commands.push(Command::BeginRender { attachments });
                if let Some(pipeline) = state.pipeline {
                    commands.push(Command::SetPipeline(native(pipeline)?));
                }
                for (slot, binding) in &state.vertex_buffers {
                    commands.push(Command::SetVertexBuffer {
                        slot: *slot,
                        buffer: native(binding.buffer)?,
                        offset: binding.offset,
                    });
                }
                for (slot, binding) in &state.fragment_buffers {
                    commands.push(Command::SetFragmentBuffer {
                        slot: *slot,
                        buffer: native(binding.buffer)?,
                        offset: binding.offset,
                    });
                }
                for (slot, texture) in &state.fragment_textures {
                    commands.push(Command::SetFragmentTexture {
                        slot: *slot,
                        texture: native(*texture)?,
                    });
                }
                commands.extend(state.viewport.map(Command::SetViewport));
                commands.extend(state.scissor.map(Command::SetScissor));
                commands.extend(state.blend_colour.map(Command::SetBlendColour));
            }
        }
        for command in commands {
            self.device
                .record(scope, command)
                .map_err(device_error(scope))?;
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> CoreResult<()> {
        self.device.wait_idle().map_err(|err| CoreError::ApiReplayFailed {
            chunk: "wait idle".to_string(),
            reason: err.to_string(),
        })
    }

    fn apply_initial_contents(
        &mut self,
        native: NativeHandle,
        contents: &InitialContents,
    ) -> CoreResult<()> {
        self.device
            .restore(native, &contents.materialize())
            .map_err(device_error(native))
    }

    fn release(&mut self, native: NativeHandle) {
        self.device.release(native);
    }
}

type Ctx<'a> = ReplayContext<'a, SoftReplayer>;

/// Handler table covering every soft chunk kind
///
/// # Errors
///
/// Never in practice; registration only fails for duplicate kinds
pub fn dispatch_table() -> CoreResult<DispatchTable<SoftReplayer>> {
    let mut table = DispatchTable::new();
    for soft in SoftChunk::ALL {
        table.register(soft.kind(), soft.name(), handler(soft))?;
    }
    Ok(table)
}

fn handler(soft: SoftChunk) -> Handler<SoftReplayer> {
    match soft {
        SoftChunk::CreateBuffer => create_buffer,
        SoftChunk::CreateTexture => create_texture,
        SoftChunk::CreatePipeline => create_pipeline,
        SoftChunk::CreateCommandBuffer => create_command_buffer,
        SoftChunk::Enqueue => enqueue,
        SoftChunk::Commit => commit,
        SoftChunk::BeginRenderPass => begin_render_pass,
        SoftChunk::BeginTransferPass => begin_transfer_pass,
        SoftChunk::EndEncoding => end_encoding,
        SoftChunk::SetPipeline => set_pipeline,
        SoftChunk::SetVertexBuffer => set_vertex_buffer,
        SoftChunk::SetFragmentBuffer => set_fragment_buffer,
        SoftChunk::SetFragmentTexture => set_fragment_texture,
        SoftChunk::SetViewport => set_viewport,
        SoftChunk::SetScissor => set_scissor,
        SoftChunk::SetBlendColour => set_blend_colour,
        SoftChunk::Draw => draw,
        SoftChunk::CopyBuffer => copy_buffer,
        SoftChunk::FillBuffer => fill_buffer,
        SoftChunk::PushMarker => push_marker,
        SoftChunk::PopMarker => pop_marker,
        SoftChunk::InsertMarker => insert_marker,
        SoftChunk::Present => present,
        SoftChunk::BufferDidModify => buffer_did_modify,
    }
}

fn enter(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<ResourceId> {
    let scope = reader.read_resource("scope")?;
    ctx.enter_scope(scope)?;
    Ok(scope)
}

fn record(ctx: &mut Ctx<'_>, scope: ResourceId, command: Command) -> CoreResult<()> {
    let native = ctx.require_native(scope)?;
    ctx.backend()
        .device
        .record(native, command)
        .map_err(|err| ctx.fail(err.to_string()))
}

fn create_buffer(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let id = reader.read_resource("buffer")?;
    let data = reader.read_bytes("data")?;
    let _cpu_visible = reader.read_bool("cpu_visible")?;
    if ctx.gate() != Gate::Execute {
        return Ok(());
    }
    match ctx.live_native(id) {
        Some(native) => ctx
            .backend()
            .device
            .restore(native, &data)
            .map_err(|err| ctx.fail(err.to_string()))?,
        None => {
            let native = ctx.backend().device.create_buffer(&data);
            ctx.register_live(id, native);
        }
    }
    Ok(())
}

fn create_texture(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let id = reader.read_resource("texture")?;
    let width = reader.read_u32("width")?;
    let height = reader.read_u32("height")?;
    if ctx.gate() != Gate::Execute {
        return Ok(());
    }
    let reusable = ctx
        .live_native(id)
        .filter(|native| ctx.backend().device().texture_size(*native) == Some((width, height)));
    match reusable {
        Some(native) => ctx
            .backend()
            .device
            .clear_texture(native)
            .map_err(|err| ctx.fail(err.to_string()))?,
        None => {
            ctx.release_live(id);
            let native = ctx.backend().device.create_texture(width, height);
            ctx.register_live(id, native);
        }
    }
    Ok(())
}

fn create_pipeline(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let id = reader.read_resource("pipeline")?;
    let colour = reader.read_u32("colour")?;
    if ctx.gate() != Gate::Execute || ctx.live_native(id).is_some() {
        return Ok(());
    }
    let native = ctx.backend().device.create_pipeline(colour);
    ctx.register_live(id, native);
    Ok(())
}

fn create_command_buffer(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = reader.read_resource("scope")?;
    ctx.create_scope(scope)
}

fn enqueue(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = reader.read_resource("scope")?;
    ctx.enqueue_scope(scope)
}

fn commit(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = reader.read_resource("scope")?;
    ctx.commit_scope(scope)
}

fn begin_render_pass(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let attachments: Vec<ColourAttachment> = reader.deserialise("attachments")?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope)
            .begin(EncoderKind::Render, attachments.clone());
    }
    if ctx.gate() == Gate::Execute {
        let targets = attachments
            .iter()
            .map(|a| {
                Ok(Attachment {
                    texture: ctx.require_native(a.texture)?,
                    load: a.load,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        record(
            ctx,
            scope,
            Command::BeginRender {
                attachments: targets,
            },
        )?;
    }
    let mut flags = ActionFlags::BEGIN_PASS;
    if attachments
        .iter()
        .any(|a| matches!(a.load, LoadOp::Clear(_)))
    {
        flags |= ActionFlags::CLEAR;
    }
    ctx.add_action(format!("Render pass ({} targets)", attachments.len()), flags)
}

fn begin_transfer_pass(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope).begin(EncoderKind::Transfer, Vec::new());
    }
    if ctx.gate() == Gate::Execute {
        record(ctx, scope, Command::BeginTransfer)?;
    }
    ctx.add_action("Transfer pass", ActionFlags::BEGIN_PASS)
}

fn end_encoding(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope).end();
    }
    if ctx.gate() == Gate::Execute {
        record(ctx, scope, Command::EndEncoding)?;
    }
    ctx.add_action("End encoding", ActionFlags::END_PASS)
}

fn set_pipeline(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let pipeline = reader.read_resource("pipeline")?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope).pipeline = Some(pipeline);
    }
    if ctx.gate() == Gate::Execute {
        let native = ctx.require_native(pipeline)?;
        record(ctx, scope, Command::SetPipeline(native))?;
    }
    Ok(())
}

fn read_binding(reader: &mut ChunkReader<'_>) -> CoreResult<(u32, BufferBinding)> {
    let slot = reader.read_u32("slot")?;
    let buffer = reader.read_resource("buffer")?;
    let offset = reader.read_u64("offset")?;
    Ok((slot, BufferBinding { buffer, offset }))
}

fn set_vertex_buffer(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let (slot, binding) = read_binding(reader)?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope).vertex_buffers.insert(slot, binding);
    }
    if ctx.gate() == Gate::Execute {
        let buffer = ctx.require_native(binding.buffer)?;
        record(
            ctx,
            scope,
            Command::SetVertexBuffer {
                slot,
                buffer,
                offset: binding.offset,
            },
        )?;
    }
    Ok(())
}

fn set_fragment_buffer(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let (slot, binding) = read_binding(reader)?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope).fragment_buffers.insert(slot, binding);
    }
    if ctx.gate() == Gate::Execute {
        let buffer = ctx.require_native(binding.buffer)?;
        record(
            ctx,
            scope,
            Command::SetFragmentBuffer {
                slot,
                buffer,
                offset: binding.offset,
            },
        )?;
    }
    Ok(())
}

fn set_fragment_texture(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let slot = reader.read_u32("slot")?;
    let texture = reader.read_resource("texture")?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope).fragment_textures.insert(slot, texture);
    }
    if ctx.gate() == Gate::Execute {
        let native = ctx.require_native(texture)?;
        record(
            ctx,
            scope,
            Command::SetFragmentTexture {
                slot,
                texture: native,
            },
        )?;
    }
    Ok(())
}

fn set_viewport(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let viewport: Viewport = reader.deserialise("viewport")?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope).viewport = Some(viewport);
    }
    if ctx.gate() == Gate::Execute {
        record(ctx, scope, Command::SetViewport(viewport))?;
    }
    Ok(())
}

fn set_scissor(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let scissor: ScissorRect = reader.deserialise("scissor")?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope).scissor = Some(scissor);
    }
    if ctx.gate() == Gate::Execute {
        record(ctx, scope, Command::SetScissor(scissor))?;
    }
    Ok(())
}

fn set_blend_colour(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let colour: [f32; 4] = reader.deserialise("colour")?;
    if ctx.gate() != Gate::Skip {
        ctx.tracker(scope).blend_colour = Some(colour);
    }
    if ctx.gate() == Gate::Execute {
        record(ctx, scope, Command::SetBlendColour(colour))?;
    }
    Ok(())
}

fn draw(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let first_vertex = reader.read_u32("first_vertex")?;
    let vertex_count = reader.read_u32("vertex_count")?;
    if ctx.gate() == Gate::Execute {
        record(
            ctx,
            scope,
            Command::Draw {
                first_vertex,
                vertex_count,
            },
        )?;
    }
    ctx.add_action(
        format!("Draw({first_vertex}, {vertex_count})"),
        ActionFlags::DRAW,
    )
}

fn copy_buffer(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let src = reader.read_resource("src")?;
    let src_offset = reader.read_u64("src_offset")?;
    let dst = reader.read_resource("dst")?;
    let dst_offset = reader.read_u64("dst_offset")?;
    let size = reader.read_u64("size")?;
    if ctx.gate() == Gate::Execute {
        let command = Command::CopyBuffer {
            src: ctx.require_native(src)?,
            src_offset,
            dst: ctx.require_native(dst)?,
            dst_offset,
            size,
        };
        record(ctx, scope, command)?;
    }
    ctx.add_action(format!("Copy {size} bytes"), ActionFlags::COPY)
}

fn fill_buffer(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let buffer = reader.read_resource("buffer")?;
    let offset = reader.read_u64("offset")?;
    let size = reader.read_u64("size")?;
    let value = reader.read_u8("value")?;
    if ctx.gate() == Gate::Execute {
        let command = Command::FillBuffer {
            buffer: ctx.require_native(buffer)?,
            offset,
            size,
            value,
        };
        record(ctx, scope, command)?;
    }
    ctx.add_action(format!("Fill {size} bytes"), ActionFlags::CLEAR)
}

fn push_marker(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let name = reader.read_string("name")?;
    if ctx.gate() == Gate::Execute {
        record(ctx, scope, Command::PushMarker(name.clone()))?;
    }
    ctx.push_marker(name)
}

fn pop_marker(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    if ctx.gate() == Gate::Execute {
        record(ctx, scope, Command::PopMarker)?;
    }
    ctx.pop_marker()
}

fn insert_marker(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let scope = enter(ctx, reader)?;
    let name = reader.read_string("name")?;
    if ctx.gate() == Gate::Execute {
        record(ctx, scope, Command::InsertMarker(name.clone()))?;
    }
    ctx.set_marker(name)
}

fn present(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    let texture = reader.read_resource("texture")?;
    if ctx.gate() == Gate::Execute {
        let native = ctx.require_native(texture)?;
        ctx.backend()
            .device
            .present(native)
            .map_err(|err| ctx.fail(err.to_string()))?;
    }
    ctx.add_action("Present", ActionFlags::PRESENT)
}

/// A CPU write made before the scope was committed. Work already
/// submitted must finish first so it cannot see the new bytes.
fn buffer_did_modify(ctx: &mut Ctx<'_>, reader: &mut ChunkReader<'_>) -> CoreResult<()> {
    enter(ctx, reader)?;
    let diff: BufferDiff = reader.deserialise("diff")?;
    if ctx.gate() != Gate::Execute {
        return Ok(());
    }
    let native = ctx.require_native(diff.buffer)?;
    ctx.backend().wait_idle()?;
    ctx.backend()
        .device
        .write_buffer(native, diff.offset, &diff.data)
        .map_err(|err| ctx.fail(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_handler() {
        let table = dispatch_table().unwrap();
        assert_eq!(table.len(), SoftChunk::ALL.len());
        for soft in SoftChunk::ALL {
            assert!(table.handler(soft.kind()).is_some());
            assert_eq!(table.name_of(soft.kind()), Some(soft.name()));
        }
    }

    #[test]
    fn test_resume_rebinds_tracked_state() {
        let device = SoftDevice::new();
        let target = device.create_texture(2, 1);
        let pipeline = device.create_pipeline(5);
        let vertices = device.create_buffer(&[0; 8]);
        let scope = device.create_command_buffer();
        let ids = [
            ResourceId::from_raw(1),
            ResourceId::from_raw(2),
            ResourceId::from_raw(3),
        ];
        let natives = [target, pipeline, vertices];
        let resolve = |id: ResourceId| {
            ids.iter()
                .position(|known| *known == id)
                .map(|index| natives[index])
        };

        let mut state = EncoderState::default();
        state.begin(
            EncoderKind::Render,
            vec![ColourAttachment {
                texture: ids[0],
                load: LoadOp::Clear(3),
            }],
        );
        state.pipeline = Some(ids[1]);
        state.vertex_buffers.insert(
            0,
            BufferBinding {
                buffer: ids[2],
                offset: 4,
            },
        );

        let mut replayer = SoftReplayer::new(device.clone());
        replayer.resume_encoder(scope, &state, &resolve).unwrap();
        assert_eq!(
            device.commands(scope).unwrap(),
            vec![
                Command::BeginRender {
                    attachments: vec![Attachment {
                        texture: target,
                        load: LoadOp::Load,
                    }],
                },
                Command::SetPipeline(pipeline),
                Command::SetVertexBuffer {
                    slot: 0,
                    buffer: vertices,
                    offset: 4,
                },
            ]
        );
        replayer.close_encoder(scope).unwrap();
        replayer.close_encoder(scope).unwrap();
        replayer.submit_scope(scope).unwrap();
        replayer.wait_idle().unwrap();
    }

    #[test]
    fn test_resume_with_unmapped_resource_fails() {
        let device = SoftDevice::new();
        let scope = device.create_command_buffer();
        let mut state = EncoderState::default();
        state.begin(
            EncoderKind::Render,
            vec![ColourAttachment {
                texture: ResourceId::from_raw(7),
                load: LoadOp::Load,
            }],
        );
        let mut replayer = SoftReplayer::new(device);
        let err = replayer
            .resume_encoder(scope, &state, &|_| None)
            .unwrap_err();
        assert!(matches!(err, CoreError::ApiReplayFailed { .. }));
    }
}
