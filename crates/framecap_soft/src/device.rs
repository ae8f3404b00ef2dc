//! The software device: a small GPU whose whole state lives in memory.
//!
//! Command buffers queue in enqueue order and run only when
//! [`SoftDevice::wait_idle`] is called. A draw writes
//! `pipeline colour + vertex word` into pixel `vertex % pixel count` of every
//! attached texture, so running the same draws twice gives the same image.

use crate::error::SoftError;
use bytes::Bytes;
use framecap_core::NativeHandle;
use framecap_replay::{EncoderKind, LoadOp, ScissorRect, Viewport};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Render target of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    /// Target texture
    pub texture: NativeHandle,
    /// Load behaviour
    pub load: LoadOp,
}

/// One recorded device command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open a render encoder
    BeginRender {
        /// Targets
        attachments: Vec<Attachment>,
    },
    /// Open a transfer encoder
    BeginTransfer,
    /// Open a compute encoder
    BeginCompute,
    /// Close the open encoder
    EndEncoding,
    /// Bind a pipeline
    SetPipeline(NativeHandle),
    /// Bind a vertex stage buffer
    SetVertexBuffer {
        /// Slot
        slot: u32,
        /// Buffer
        buffer: NativeHandle,
        /// Byte offset
        offset: u64,
    },
    /// Bind a fragment stage buffer
    SetFragmentBuffer {
        /// Slot
        slot: u32,
        /// Buffer
        buffer: NativeHandle,
        /// Byte offset
        offset: u64,
    },
    /// Bind a fragment stage texture
    SetFragmentTexture {
        /// Slot
        slot: u32,
        /// Texture
        texture: NativeHandle,
    },
    /// Set the viewport
    SetViewport(Viewport),
    /// Set the scissor
    SetScissor(ScissorRect),
    /// Set the blend constant
    SetBlendColour([f32; 4]),
    /// Draw vertices
    Draw {
        /// First vertex
        first_vertex: u32,
        /// Vertex count
        vertex_count: u32,
    },
    /// Copy between buffers
    CopyBuffer {
        /// Source buffer
        src: NativeHandle,
        /// Source offset
        src_offset: u64,
        /// Destination buffer
        dst: NativeHandle,
        /// Destination offset
        dst_offset: u64,
        /// Bytes to copy
        size: u64,
    },
    /// Fill a buffer range with one byte
    FillBuffer {
        /// Buffer
        buffer: NativeHandle,
        /// Offset
        offset: u64,
        /// Bytes to fill
        size: u64,
        /// Fill value
        value: u8,
    },
    /// Open a debug group
    PushMarker(String),
    /// Close a debug group
    PopMarker,
    /// Point marker
    InsertMarker(String),
}

impl Command {
    /// Encoder the command must be recorded in. `None` for commands
    /// allowed anywhere.
    fn needs(&self) -> Option<EncoderKind> {
        match self {
            Self::BeginRender { .. } | Self::BeginTransfer | Self::BeginCompute => {
                Some(EncoderKind::None)
            }
            Self::EndEncoding
            | Self::PushMarker(_)
            | Self::PopMarker
            | Self::InsertMarker(_) => None,
            Self::SetPipeline(_)
            | Self::SetVertexBuffer { .. }
            | Self::SetFragmentBuffer { .. }
            | Self::SetFragmentTexture { .. }
            | Self::SetViewport(_)
            | Self::SetScissor(_)
            | Self::SetBlendColour(_)
            | Self::Draw { .. } => Some(EncoderKind::Render),
            Self::CopyBuffer { .. } | Self::FillBuffer { .. } => Some(EncoderKind::Transfer),
        }
    }

    fn opens(&self) -> Option<EncoderKind> {
        match self {
            Self::BeginRender { .. } => Some(EncoderKind::Render),
            Self::BeginTransfer => Some(EncoderKind::Transfer),
            Self::BeginCompute => Some(EncoderKind::Compute),
            Self::EndEncoding => Some(EncoderKind::None),
            _ => None,
        }
    }
}

/// Lifecycle of a command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferStatus {
    /// Taking commands
    Recording,
    /// Holding a queue slot, still taking commands
    Enqueued,
    /// Finished, waiting to run
    Committed,
    /// Ran
    Completed,
}

impl CommandBufferStatus {
    fn name(self) -> &'static str {
        match self {
            Self::Recording => "recording",
            Self::Enqueued => "enqueued",
            Self::Committed => "committed",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug)]
struct CommandBuffer {
    status: CommandBufferStatus,
    encoder: EncoderKind,
    commands: Vec<Command>,
}

#[derive(Debug)]
struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

#[derive(Debug)]
enum Object {
    Buffer(Vec<u8>),
    Texture(Texture),
    Pipeline(u32),
    CommandBuffer(CommandBuffer),
}

#[derive(Debug, Default)]
struct DeviceState {
    next_handle: u64,
    objects: HashMap<NativeHandle, Object>,
    queue: VecDeque<NativeHandle>,
    presented: Vec<NativeHandle>,
    executed: u64,
}

/// Handle to a software device. Clones share the device.
#[derive(Debug, Clone, Default)]
pub struct SoftDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl SoftDevice {
    /// Create an empty device
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, object: Object) -> NativeHandle {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = NativeHandle::from_raw(state.next_handle);
        state.objects.insert(handle, object);
        handle
    }

    /// Create a buffer holding `data`
    pub fn create_buffer(&self, data: &[u8]) -> NativeHandle {
        self.insert(Object::Buffer(data.to_vec()))
    }

    /// Create a zeroed `width` x `height` texture
    pub fn create_texture(&self, width: u32, height: u32) -> NativeHandle {
        self.insert(Object::Texture(Texture {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }))
    }

    /// Create a pipeline that draws in `colour`
    pub fn create_pipeline(&self, colour: u32) -> NativeHandle {
        self.insert(Object::Pipeline(colour))
    }

    /// Create an empty command buffer
    pub fn create_command_buffer(&self) -> NativeHandle {
        self.insert(Object::CommandBuffer(CommandBuffer {
            status: CommandBufferStatus::Recording,
            encoder: EncoderKind::None,
            commands: Vec::new(),
        }))
    }

    /// Destroy an object. Unknown handles are ignored.
    pub fn release(&self, handle: NativeHandle) {
        let mut state = self.state.lock();
        state.objects.remove(&handle);
        state.queue.retain(|queued| *queued != handle);
    }

    /// Number of live objects
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Command buffers that have run
    #[must_use]
    pub fn executed(&self) -> u64 {
        self.state.lock().executed
    }

    /// CPU write into a buffer
    ///
    /// # Errors
    ///
    /// `UnknownObject` or `OutOfBounds`
    pub fn write_buffer(&self, handle: NativeHandle, offset: u64, data: &[u8]) -> Result<(), SoftError> {
        let mut state = self.state.lock();
        let buffer = state.buffer_mut(handle)?;
        let range = checked_range(handle, buffer.len(), offset, data.len() as u64)?;
        buffer[range].copy_from_slice(data);
        Ok(())
    }

    /// Contents of a buffer
    #[must_use]
    pub fn read_buffer(&self, handle: NativeHandle) -> Option<Vec<u8>> {
        match self.state.lock().objects.get(&handle) {
            Some(Object::Buffer(bytes)) => Some(bytes.clone()),
            _ => None,
        }
    }

    /// Pixels of a texture
    #[must_use]
    pub fn read_texture(&self, handle: NativeHandle) -> Option<Vec<u32>> {
        match self.state.lock().objects.get(&handle) {
            Some(Object::Texture(texture)) => Some(texture.pixels.clone()),
            _ => None,
        }
    }

    /// Size of a texture
    #[must_use]
    pub fn texture_size(&self, handle: NativeHandle) -> Option<(u32, u32)> {
        match self.state.lock().objects.get(&handle) {
            Some(Object::Texture(texture)) => Some((texture.width, texture.height)),
            _ => None,
        }
    }

    /// Contents of a buffer or texture as bytes, pixels little-endian
    #[must_use]
    pub fn read_back(&self, handle: NativeHandle) -> Option<Bytes> {
        match self.state.lock().objects.get(&handle)? {
            Object::Buffer(bytes) => Some(Bytes::copy_from_slice(bytes)),
            Object::Texture(texture) => Some(
                texture
                    .pixels
                    .iter()
                    .flat_map(|pixel| pixel.to_le_bytes())
                    .collect::<Vec<u8>>()
                    .into(),
            ),
            Object::Pipeline(_) | Object::CommandBuffer(_) => None,
        }
    }

    /// Replace the whole contents of a buffer or texture. A buffer takes
    /// the new length; a texture must be given exactly its size.
    ///
    /// # Errors
    ///
    /// `UnknownObject` or `SizeMismatch`
    pub fn restore(&self, handle: NativeHandle, data: &[u8]) -> Result<(), SoftError> {
        let mut state = self.state.lock();
        match state.objects.get_mut(&handle) {
            Some(Object::Buffer(bytes)) => {
                bytes.clear();
                bytes.extend_from_slice(data);
                Ok(())
            }
            Some(Object::Texture(texture)) => {
                let expected = texture.pixels.len() * 4;
                if data.len() != expected {
                    return Err(SoftError::SizeMismatch {
                        handle,
                        expected,
                        got: data.len(),
                    });
                }
                for (pixel, word) in texture.pixels.iter_mut().zip(data.chunks_exact(4)) {
                    *pixel = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                }
                Ok(())
            }
            _ => Err(SoftError::UnknownObject {
                handle,
                expected: "buffer or texture",
            }),
        }
    }

    /// Zero a texture
    ///
    /// # Errors
    ///
    /// `UnknownObject`
    pub fn clear_texture(&self, handle: NativeHandle) -> Result<(), SoftError> {
        let mut state = self.state.lock();
        state.texture_mut(handle)?.pixels.fill(0);
        Ok(())
    }

    /// Append a command to a command buffer
    ///
    /// # Errors
    ///
    /// `UnknownObject`, `NotRecording`, or `WrongEncoder` when the command
    /// does not fit the open encoder
    pub fn record(&self, handle: NativeHandle, command: Command) -> Result<(), SoftError> {
        let mut state = self.state.lock();
        let buffer = state.command_buffer_mut(handle)?;
        if !matches!(
            buffer.status,
            CommandBufferStatus::Recording | CommandBufferStatus::Enqueued
        ) {
            return Err(SoftError::NotRecording {
                handle,
                status: buffer.status.name(),
            });
        }
        let needed = match command {
            Command::EndEncoding if buffer.encoder == EncoderKind::None => {
                Some(EncoderKind::Render)
            }
            ref other => other.needs(),
        };
        if let Some(needed) = needed.filter(|needed| *needed != buffer.encoder) {
            return Err(SoftError::WrongEncoder {
                handle,
                open: buffer.encoder,
                needed,
            });
        }
        if let Some(kind) = command.opens() {
            buffer.encoder = kind;
        }
        buffer.commands.push(command);
        Ok(())
    }

    /// Encoder open on a command buffer
    #[must_use]
    pub fn open_encoder(&self, handle: NativeHandle) -> Option<EncoderKind> {
        match self.state.lock().objects.get(&handle) {
            Some(Object::CommandBuffer(buffer)) => Some(buffer.encoder),
            _ => None,
        }
    }

    /// Commands recorded so far
    #[must_use]
    pub fn commands(&self, handle: NativeHandle) -> Option<Vec<Command>> {
        match self.state.lock().objects.get(&handle) {
            Some(Object::CommandBuffer(buffer)) => Some(buffer.commands.clone()),
            _ => None,
        }
    }

    /// Status of a command buffer
    #[must_use]
    pub fn status(&self, handle: NativeHandle) -> Option<CommandBufferStatus> {
        match self.state.lock().objects.get(&handle) {
            Some(Object::CommandBuffer(buffer)) => Some(buffer.status),
            _ => None,
        }
    }

    /// Reserve the command buffer's place in the queue
    ///
    /// # Errors
    ///
    /// `UnknownObject`, or `NotRecording` unless it is still recording
    pub fn enqueue(&self, handle: NativeHandle) -> Result<(), SoftError> {
        let mut state = self.state.lock();
        let buffer = state.command_buffer_mut(handle)?;
        if buffer.status != CommandBufferStatus::Recording {
            return Err(SoftError::NotRecording {
                handle,
                status: buffer.status.name(),
            });
        }
        buffer.status = CommandBufferStatus::Enqueued;
        state.queue.push_back(handle);
        Ok(())
    }

    /// Finish a command buffer. One that was never enqueued takes the next
    /// queue slot now.
    ///
    /// # Errors
    ///
    /// `UnknownObject`, `NotRecording` if already committed, or
    /// `WrongEncoder` if an encoder is still open
    pub fn commit(&self, handle: NativeHandle) -> Result<(), SoftError> {
        let mut state = self.state.lock();
        let buffer = state.command_buffer_mut(handle)?;
        let enqueued = match buffer.status {
            CommandBufferStatus::Recording => false,
            CommandBufferStatus::Enqueued => true,
            other => {
                return Err(SoftError::NotRecording {
                    handle,
                    status: other.name(),
                });
            }
        };
        if buffer.encoder != EncoderKind::None {
            return Err(SoftError::WrongEncoder {
                handle,
                open: buffer.encoder,
                needed: EncoderKind::None,
            });
        }
        buffer.status = CommandBufferStatus::Committed;
        if !enqueued {
            state.queue.push_back(handle);
        }
        Ok(())
    }

    /// Run every committed command buffer at the head of the queue
    ///
    /// # Errors
    ///
    /// The first command that fails; later buffers stay queued
    pub fn wait_idle(&self) -> Result<(), SoftError> {
        let mut state = self.state.lock();
        while let Some(head) = state.queue.front().copied() {
            let commands = match state.objects.get_mut(&head) {
                Some(Object::CommandBuffer(buffer))
                    if buffer.status == CommandBufferStatus::Committed =>
                {
                    buffer.status = CommandBufferStatus::Completed;
                    std::mem::take(&mut buffer.commands)
                }
                Some(Object::CommandBuffer(_)) => break,
                _ => {
                    state.queue.pop_front();
                    continue;
                }
            };
            state.queue.pop_front();
            state.execute(&commands)?;
            state.executed += 1;
        }
        Ok(())
    }

    /// Show a texture
    ///
    /// # Errors
    ///
    /// `UnknownObject`
    pub fn present(&self, texture: NativeHandle) -> Result<(), SoftError> {
        let mut state = self.state.lock();
        state.texture_mut(texture)?;
        state.presented.push(texture);
        Ok(())
    }

    /// Textures presented so far
    #[must_use]
    pub fn presented(&self) -> Vec<NativeHandle> {
        self.state.lock().presented.clone()
    }
}

fn checked_range(
    handle: NativeHandle,
    len: usize,
    offset: u64,
    size: u64,
) -> Result<std::ops::Range<usize>, SoftError> {
    let out_of_bounds = SoftError::OutOfBounds {
        handle,
        offset,
        size,
        len,
    };
    let end = offset.checked_add(size).ok_or_else(|| out_of_bounds.clone())?;
    if end > len as u64 {
        return Err(out_of_bounds);
    }
    Ok(offset as usize..end as usize)
}

impl DeviceState {
    fn buffer(&self, handle: NativeHandle) -> Result<&Vec<u8>, SoftError> {
        match self.objects.get(&handle) {
            Some(Object::Buffer(bytes)) => Ok(bytes),
            _ => Err(SoftError::UnknownObject {
                handle,
                expected: "buffer",
            }),
        }
    }

    fn buffer_mut(&mut self, handle: NativeHandle) -> Result<&mut Vec<u8>, SoftError> {
        match self.objects.get_mut(&handle) {
            Some(Object::Buffer(bytes)) => Ok(bytes),
            _ => Err(SoftError::UnknownObject {
                handle,
                expected: "buffer",
            }),
        }
    }

    fn texture_mut(&mut self, handle: NativeHandle) -> Result<&mut Texture, SoftError> {
        match self.objects.get_mut(&handle) {
            Some(Object::Texture(texture)) => Ok(texture),
            _ => Err(SoftError::UnknownObject {
                handle,
                expected: "texture",
            }),
        }
    }

    fn pipeline(&self, handle: NativeHandle) -> Result<u32, SoftError> {
        match self.objects.get(&handle) {
            Some(Object::Pipeline(colour)) => Ok(*colour),
            _ => Err(SoftError::UnknownObject {
                handle,
                expected: "pipeline",
            }),
        }
    }

    fn command_buffer_mut(&mut self, handle: NativeHandle) -> Result<&mut CommandBuffer, SoftError> {
        match self.objects.get_mut(&handle) {
            Some(Object::CommandBuffer(buffer)) => Ok(buffer),
            _ => Err(SoftError::UnknownObject {
                handle,
                expected: "command buffer",
            }),
        }
    }

    /// Vertex words `first..first + count` of the buffer bound at slot 0.
    /// Words past the end of the buffer, or with nothing bound, read 0.
    fn vertex_words(
        &self,
        binding: Option<(NativeHandle, u64)>,
        first: u32,
        count: u32,
    ) -> Result<Vec<u32>, SoftError> {
        let Some((handle, offset)) = binding else {
            return Ok(vec![0; count as usize]);
        };
        let bytes = self.buffer(handle)?;
        Ok((u64::from(first)..u64::from(first) + u64::from(count))
            .map(|vertex| {
                let start = offset + vertex * 4;
                usize::try_from(start)
                    .ok()
                    .and_then(|start| bytes.get(start..start + 4))
                    .map_or(0, |w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            })
            .collect())
    }

    fn execute(&mut self, commands: &[Command]) -> Result<(), SoftError> {
        let mut targets: Vec<NativeHandle> = Vec::new();
        let mut colour = 0u32;
        let mut vertex: BTreeMap<u32, (NativeHandle, u64)> = BTreeMap::new();

        for command in commands {
            match command {
                Command::BeginRender { attachments } => {
                    targets.clear();
                    colour = 0;
                    vertex.clear();
                    for attachment in attachments {
                        let texture = self.texture_mut(attachment.texture)?;
                        if let LoadOp::Clear(fill) = attachment.load {
                            texture.pixels.fill(fill);
                        }
                        targets.push(attachment.texture);
                    }
                }
                Command::SetPipeline(pipeline) => colour = self.pipeline(*pipeline)?,
                Command::SetVertexBuffer {
                    slot,
                    buffer,
                    offset,
                } => {
                    vertex.insert(*slot, (*buffer, *offset));
                }
                Command::Draw {
                    first_vertex,
                    vertex_count,
                } => {
                    let words =
                        self.vertex_words(vertex.get(&0).copied(), *first_vertex, *vertex_count)?;
                    for target in &targets {
                        let texture = self.texture_mut(*target)?;
                        let len = texture.pixels.len() as u64;
                        if len == 0 {
                            continue;
                        }
                        for (index, word) in (u64::from(*first_vertex)..).zip(&words) {
                            texture.pixels[(index % len) as usize] = colour.wrapping_add(*word);
                        }
                    }
                }
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let source = self.buffer(*src)?;
                    let from = checked_range(*src, source.len(), *src_offset, *size)?;
                    let data = source[from].to_vec();
                    let target = self.buffer_mut(*dst)?;
                    let to = checked_range(*dst, target.len(), *dst_offset, *size)?;
                    target[to].copy_from_slice(&data);
                }
                Command::FillBuffer {
                    buffer,
                    offset,
                    size,
                    value,
                } => {
                    let target = self.buffer_mut(*buffer)?;
                    let range = checked_range(*buffer, target.len(), *offset, *size)?;
                    target[range].fill(*value);
                }
                Command::EndEncoding => {
                    targets.clear();
                    vertex.clear();
                }
                Command::BeginTransfer
                | Command::BeginCompute
                | Command::SetFragmentBuffer { .. }
                | Command::SetFragmentTexture { .. }
                | Command::SetViewport(_)
                | Command::SetScissor(_)
                | Command::SetBlendColour(_)
                | Command::PushMarker(_)
                | Command::PopMarker
                | Command::InsertMarker(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn render_pass(device: &SoftDevice, cb: NativeHandle, target: NativeHandle, load: LoadOp) {
        device
            .record(
                cb,
                Command::BeginRender {
                    attachments: vec![Attachment {
                        texture: target,
                        load,
                    }],
                },
            )
            .unwrap();
    }

    #[test]
    fn test_draw_writes_colour_plus_vertex_word() {
        let device = SoftDevice::new();
        let target = device.create_texture(4, 1);
        let vertices = device.create_buffer(&words(&[1, 2, 3, 4]));
        let pipeline = device.create_pipeline(0x100);
        let cb = device.create_command_buffer();

        render_pass(&device, cb, target, LoadOp::Clear(7));
        device.record(cb, Command::SetPipeline(pipeline)).unwrap();
        device
            .record(
                cb,
                Command::SetVertexBuffer {
                    slot: 0,
                    buffer: vertices,
                    offset: 0,
                },
            )
            .unwrap();
        device
            .record(
                cb,
                Command::Draw {
                    first_vertex: 1,
                    vertex_count: 2,
                },
            )
            .unwrap();
        device.record(cb, Command::EndEncoding).unwrap();
        device.commit(cb).unwrap();

        assert_eq!(device.read_texture(target).unwrap(), vec![0; 4]);
        device.wait_idle().unwrap();
        assert_eq!(device.read_texture(target).unwrap(), vec![7, 0x102, 0x103, 7]);
        assert_eq!(device.status(cb), Some(CommandBufferStatus::Completed));
    }

    #[test]
    fn test_queue_runs_in_enqueue_order() {
        let device = SoftDevice::new();
        let target = device.create_texture(1, 1);
        let first = device.create_command_buffer();
        let second = device.create_command_buffer();
        device.enqueue(first).unwrap();
        device.enqueue(second).unwrap();
        render_pass(&device, first, target, LoadOp::Clear(1));
        device.record(first, Command::EndEncoding).unwrap();
        render_pass(&device, second, target, LoadOp::Clear(2));
        device.record(second, Command::EndEncoding).unwrap();

        device.commit(second).unwrap();
        device.wait_idle().unwrap();
        assert_eq!(device.executed(), 0, "second must wait for first");

        device.commit(first).unwrap();
        device.wait_idle().unwrap();
        assert_eq!(device.executed(), 2);
        assert_eq!(device.read_texture(target).unwrap(), vec![2]);
    }

    #[test]
    fn test_encoder_rules() {
        let device = SoftDevice::new();
        let cb = device.create_command_buffer();
        let draw = Command::Draw {
            first_vertex: 0,
            vertex_count: 1,
        };
        assert!(matches!(
            device.record(cb, draw.clone()),
            Err(SoftError::WrongEncoder { .. })
        ));
        assert!(device.record(cb, Command::EndEncoding).is_err());
        device.record(cb, Command::BeginTransfer).unwrap();
        assert!(device.record(cb, draw).is_err());
        assert!(device.record(cb, Command::BeginTransfer).is_err());
        assert!(matches!(device.commit(cb), Err(SoftError::WrongEncoder { .. })));
        device.record(cb, Command::EndEncoding).unwrap();
        device.commit(cb).unwrap();
        assert!(matches!(
            device.record(cb, Command::PopMarker),
            Err(SoftError::NotRecording { .. })
        ));
    }

    #[test]
    fn test_transfer_commands() {
        let device = SoftDevice::new();
        let src = device.create_buffer(&[1, 2, 3, 4]);
        let dst = device.create_buffer(&[0; 6]);
        let cb = device.create_command_buffer();
        device.record(cb, Command::BeginTransfer).unwrap();
        device
            .record(
                cb,
                Command::CopyBuffer {
                    src,
                    src_offset: 1,
                    dst,
                    dst_offset: 0,
                    size: 3,
                },
            )
            .unwrap();
        device
            .record(
                cb,
                Command::FillBuffer {
                    buffer: dst,
                    offset: 4,
                    size: 2,
                    value: 9,
                },
            )
            .unwrap();
        device.record(cb, Command::EndEncoding).unwrap();
        device.commit(cb).unwrap();
        device.wait_idle().unwrap();
        assert_eq!(device.read_buffer(dst).unwrap(), vec![2, 3, 4, 0, 9, 9]);
    }

    #[test]
    fn test_out_of_bounds_copy_fails_at_execution() {
        let device = SoftDevice::new();
        let src = device.create_buffer(&[1, 2]);
        let cb = device.create_command_buffer();
        device.record(cb, Command::BeginTransfer).unwrap();
        device
            .record(
                cb,
                Command::CopyBuffer {
                    src,
                    src_offset: 0,
                    dst: src,
                    dst_offset: 1,
                    size: 2,
                },
            )
            .unwrap();
        device.record(cb, Command::EndEncoding).unwrap();
        device.commit(cb).unwrap();
        assert!(matches!(device.wait_idle(), Err(SoftError::OutOfBounds { .. })));
    }

    #[test]
    fn test_read_back_and_restore() {
        let device = SoftDevice::new();
        let texture = device.create_texture(2, 1);
        device.restore(texture, &words(&[5, 6])).unwrap();
        assert_eq!(device.read_texture(texture).unwrap(), vec![5, 6]);
        assert_eq!(device.read_back(texture).unwrap().as_ref(), words(&[5, 6]).as_slice());
        assert!(matches!(
            device.restore(texture, &[1, 2, 3]),
            Err(SoftError::SizeMismatch { .. })
        ));

        let buffer = device.create_buffer(&[0; 4]);
        device.write_buffer(buffer, 2, &[8, 8]).unwrap();
        assert_eq!(device.read_back(buffer).unwrap().as_ref(), &[0, 0, 8, 8]);
        assert!(device.write_buffer(buffer, 3, &[1, 1]).is_err());

        let pipeline = device.create_pipeline(1);
        assert!(device.read_back(pipeline).is_none());
        device.release(pipeline);
        assert_eq!(device.object_count(), 2);
    }
}
