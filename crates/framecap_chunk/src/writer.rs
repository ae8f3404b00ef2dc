//! Write side of the chunk serializer.
//!
//! `begin_chunk`, typed element writes, `end_chunk`. Element writes are
//! infallible; structural mistakes (unbalanced structs, no open chunk) are
//! reported by `end_chunk`.

use crate::chunk::{Chunk, ChunkMetadata, ChunkMetadataOptions};
use crate::element::ElementTag;
use crate::kind::ChunkKind;
use crate::serialise::Serialise;
use bytes::{BufMut, BytesMut};
use framecap_core::{CoreError, CoreResult, ResourceId, Timestamp, current_thread_id};
use std::time::Instant;

/// Produces callstack frames for chunk metadata
pub type CallstackProvider = fn() -> Vec<u64>;

#[derive(Debug)]
struct OpenChunk {
    kind: ChunkKind,
    started: Instant,
    timestamp: Timestamp,
}

#[derive(Debug, Clone, Copy)]
struct OpenContainer {
    tag: ElementTag,
    count_at: usize,
    count: u32,
}

/// Serializes typed elements into chunks
#[derive(Debug)]
pub struct ChunkWriter {
    options: ChunkMetadataOptions,
    callstack: Option<CallstackProvider>,
    open: Option<OpenChunk>,
    payload: BytesMut,
    containers: Vec<OpenContainer>,
    chunks_written: u64,
    bytes_written: u64,
}

impl ChunkWriter {
    /// Create a writer recording the given metadata
    #[must_use]
    pub fn new(options: ChunkMetadataOptions) -> Self {
        Self {
            options,
            callstack: None,
            open: None,
            payload: BytesMut::with_capacity(256),
            containers: Vec::new(),
            chunks_written: 0,
            bytes_written: 0,
        }
    }

    /// Install a callstack provider, used when callstacks are enabled
    #[must_use]
    pub fn with_callstack_provider(mut self, provider: CallstackProvider) -> Self {
        self.callstack = Some(provider);
        self
    }

    /// Metadata options
    #[must_use]
    pub fn options(&self) -> ChunkMetadataOptions {
        self.options
    }

    /// Whether a chunk is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Chunks completed since the last [`ChunkWriter::take_counters`]
    #[must_use]
    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }

    /// Reset and return `(chunks, payload bytes)` written so far
    pub fn take_counters(&mut self) -> (u64, u64) {
        let counters = (self.chunks_written, self.bytes_written);
        self.chunks_written = 0;
        self.bytes_written = 0;
        counters
    }

    /// Start a chunk. An unfinished chunk is discarded.
    pub fn begin_chunk(&mut self, kind: impl Into<ChunkKind>) {
        let kind = kind.into();
        if let Some(previous) = self.open.take() {
            tracing::warn!(
                discarded = %previous.kind,
                next = %kind,
                "chunk begun while another was open"
            );
        }
        self.payload.clear();
        self.containers.clear();
        self.open = Some(OpenChunk {
            kind,
            started: Instant::now(),
            timestamp: if self.options.timestamp {
                Timestamp::now()
            } else {
                Timestamp::default()
            },
        });
    }

    /// Finish the open chunk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no chunk is open or a struct or array is
    /// still open
    pub fn end_chunk(&mut self) -> CoreResult<Chunk> {
        let open = self
            .open
            .take()
            .ok_or_else(|| CoreError::InvalidState("end_chunk without begin_chunk".to_string()))?;
        if let Some(container) = self.containers.last() {
            let tag = container.tag.name();
            self.containers.clear();
            self.payload.clear();
            return Err(CoreError::InvalidState(format!(
                "chunk {} ended with an open {tag}",
                open.kind
            )));
        }

        let metadata = ChunkMetadata {
            duration_us: self
                .options
                .duration
                .then(|| open.started.elapsed().as_micros() as u64),
            timestamp: self.options.timestamp.then_some(open.timestamp),
            thread_id: self.options.thread_id.then(current_thread_id),
            callstack: match (self.options.callstack, self.callstack) {
                (true, Some(provider)) => Some(provider()),
                _ => None,
            },
        };

        let payload = self.payload.split().freeze();
        self.chunks_written += 1;
        self.bytes_written += payload.len() as u64;
        Ok(Chunk::from_parts(open.kind, metadata, payload))
    }

    fn header(&mut self, tag: ElementTag, name: &str) {
        if let Some(container) = self.containers.last_mut() {
            container.count += 1;
        }
        self.payload.put_u8(tag as u8);
        put_name(&mut self.payload, name);
    }

    /// Absent optional value
    pub fn write_null(&mut self, name: &str) {
        self.header(ElementTag::Null, name);
    }

    /// Boolean
    pub fn write_bool(&mut self, name: &str, value: bool) {
        self.header(ElementTag::Bool, name);
        self.payload.put_u8(u8::from(value));
    }

    /// Unsigned 8-bit
    pub fn write_u8(&mut self, name: &str, value: u8) {
        self.header(ElementTag::U8, name);
        self.payload.put_u8(value);
    }

    /// Unsigned 16-bit
    pub fn write_u16(&mut self, name: &str, value: u16) {
        self.header(ElementTag::U16, name);
        self.payload.put_u16_le(value);
    }

    /// Unsigned 32-bit
    pub fn write_u32(&mut self, name: &str, value: u32) {
        self.header(ElementTag::U32, name);
        self.payload.put_u32_le(value);
    }

    /// Unsigned 64-bit
    pub fn write_u64(&mut self, name: &str, value: u64) {
        self.header(ElementTag::U64, name);
        self.payload.put_u64_le(value);
    }

    /// Signed 32-bit
    pub fn write_i32(&mut self, name: &str, value: i32) {
        self.header(ElementTag::I32, name);
        self.payload.put_i32_le(value);
    }

    /// Signed 64-bit
    pub fn write_i64(&mut self, name: &str, value: i64) {
        self.header(ElementTag::I64, name);
        self.payload.put_i64_le(value);
    }

    /// Single-precision float, stored bit for bit
    pub fn write_f32(&mut self, name: &str, value: f32) {
        self.header(ElementTag::F32, name);
        self.payload.put_u32_le(value.to_bits());
    }

    /// Double-precision float, stored bit for bit
    pub fn write_f64(&mut self, name: &str, value: f64) {
        self.header(ElementTag::F64, name);
        self.payload.put_u64_le(value.to_bits());
    }

    /// UTF-8 string
    pub fn write_str(&mut self, name: &str, value: &str) {
        self.header(ElementTag::String, name);
        self.payload.put_u32_le(value.len() as u32);
        self.payload.put_slice(value.as_bytes());
    }

    /// Opaque byte blob
    pub fn write_bytes(&mut self, name: &str, value: &[u8]) {
        self.header(ElementTag::Bytes, name);
        self.payload.put_u64_le(value.len() as u64);
        self.payload.put_slice(value);
    }

    /// Resource identifier
    pub fn write_resource(&mut self, name: &str, value: ResourceId) {
        self.header(ElementTag::ResourceId, name);
        self.payload.put_u64_le(value.as_u64());
    }

    /// Enum discriminant annotated with its type name
    pub fn write_enum(&mut self, name: &str, type_name: &str, value: u32) {
        self.header(ElementTag::Enum, name);
        put_name(&mut self.payload, type_name);
        self.payload.put_u32_le(value);
    }

    /// Open a struct. Every element until [`ChunkWriter::end_struct`] is a child.
    pub fn begin_struct(&mut self, name: &str, type_name: &str) {
        self.header(ElementTag::Struct, name);
        put_name(&mut self.payload, type_name);
        self.open_container(ElementTag::Struct);
    }

    /// Close the innermost struct
    pub fn end_struct(&mut self) {
        self.close_container(ElementTag::Struct);
    }

    /// Open an array. Children should be named [`crate::ARRAY_ELEMENT_NAME`].
    pub fn begin_array(&mut self, name: &str) {
        self.header(ElementTag::Array, name);
        self.open_container(ElementTag::Array);
    }

    /// Close the innermost array
    pub fn end_array(&mut self) {
        self.close_container(ElementTag::Array);
    }

    /// Write any [`Serialise`] value
    pub fn serialise<T: Serialise + ?Sized>(&mut self, name: &str, value: &T) {
        value.serialise(name, self);
    }

    fn open_container(&mut self, tag: ElementTag) {
        let count_at = self.payload.len();
        self.payload.put_u32_le(0);
        self.containers.push(OpenContainer {
            tag,
            count_at,
            count: 0,
        });
    }

    fn close_container(&mut self, tag: ElementTag) {
        match self.containers.pop() {
            Some(container) if container.tag == tag => {
                let at = container.count_at;
                self.payload[at..at + 4].copy_from_slice(&container.count.to_le_bytes());
            }
            Some(container) => {
                tracing::warn!(
                    expected = tag.name(),
                    open = container.tag.name(),
                    "mismatched container close"
                );
                self.containers.push(container);
            }
            None => tracing::warn!(tag = tag.name(), "container closed with none open"),
        }
    }
}

impl Default for ChunkWriter {
    fn default() -> Self {
        Self::new(ChunkMetadataOptions::default())
    }
}

fn put_name(out: &mut BytesMut, name: &str) {
    let mut end = name.len().min(u16::MAX as usize);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    out.put_u16_le(end as u16);
    out.put_slice(&name.as_bytes()[..end]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_without_begin() {
        let mut writer = ChunkWriter::default();
        assert!(matches!(writer.end_chunk(), Err(CoreError::InvalidState(_))));
    }

    #[test]
    fn test_unbalanced_struct_rejected() {
        let mut writer = ChunkWriter::default();
        writer.begin_chunk(ChunkKind::driver(0));
        writer.begin_struct("desc", "BufferDesc");
        writer.write_u64("size", 4);
        assert!(matches!(writer.end_chunk(), Err(CoreError::InvalidState(_))));
        assert!(!writer.is_open());
    }

    #[test]
    fn test_metadata_follows_options() {
        let mut writer = ChunkWriter::new(ChunkMetadataOptions::none().with_thread_id(true));
        writer.begin_chunk(ChunkKind::driver(1));
        writer.write_u32("x", 1);
        let chunk = writer.end_chunk().unwrap();
        assert!(chunk.metadata().duration_us.is_none());
        assert!(chunk.metadata().timestamp.is_none());
        assert_eq!(chunk.metadata().thread_id, Some(current_thread_id()));
        assert!(chunk.metadata().callstack.is_none());
    }

    #[test]
    fn test_callstack_provider() {
        fn frames() -> Vec<u64> {
            vec![0xdead, 0xbeef]
        }
        let mut writer = ChunkWriter::new(ChunkMetadataOptions::none().with_callstack(true))
            .with_callstack_provider(frames);
        writer.begin_chunk(ChunkKind::driver(1));
        let chunk = writer.end_chunk().unwrap();
        assert_eq!(chunk.metadata().callstack, Some(vec![0xdead, 0xbeef]));
    }

    #[test]
    fn test_counters() {
        let mut writer = ChunkWriter::new(ChunkMetadataOptions::none());
        for _ in 0..3 {
            writer.begin_chunk(ChunkKind::driver(2));
            writer.write_bytes("data", &[0u8; 10]);
            writer.end_chunk().unwrap();
        }
        assert_eq!(writer.chunks_written(), 3);
        let (chunks, bytes) = writer.take_counters();
        assert_eq!(chunks, 3);
        assert!(bytes >= 30);
        assert_eq!(writer.chunks_written(), 0);
    }

    #[test]
    fn test_begin_discards_open_chunk() {
        let mut writer = ChunkWriter::new(ChunkMetadataOptions::none());
        writer.begin_chunk(ChunkKind::driver(0));
        writer.write_u32("lost", 7);
        writer.begin_chunk(ChunkKind::driver(1));
        let chunk = writer.end_chunk().unwrap();
        assert_eq!(chunk.kind(), ChunkKind::driver(1));
        assert!(chunk.payload().is_empty());
    }
}
