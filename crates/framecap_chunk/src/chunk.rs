//! Immutable chunk records and their wire framing.
//!
//! Layout, little-endian:
//!
//! ```text
//! kind: u32
//! flags: u8                      metadata presence bits
//! [duration_us: u64]
//! [timestamp_us: u64]
//! [thread_id: u64]
//! [callstack: u32 count, u64 frames]
//! payload_len: u64
//! payload
//! [digest: 8 bytes]              truncated BLAKE3 of everything above, v3+
//! ```

use crate::kind::ChunkKind;
use crate::reader::ChunkReader;
use bytes::{BufMut, Bytes, BytesMut};
use framecap_core::{CaptureVersion, CoreError, CoreResult, Timestamp};
use serde::{Deserialize, Serialize};

const FLAG_DURATION: u8 = 1 << 0;
const FLAG_TIMESTAMP: u8 = 1 << 1;
const FLAG_THREAD_ID: u8 = 1 << 2;
const FLAG_CALLSTACK: u8 = 1 << 3;
const KNOWN_FLAGS: u8 = FLAG_DURATION | FLAG_TIMESTAMP | FLAG_THREAD_ID | FLAG_CALLSTACK;

/// Size of the trailing digest
pub const CHUNK_DIGEST_SIZE: usize = 8;

/// Longest callstack a reader will accept
pub const MAX_CALLSTACK_DEPTH: u32 = 256;

/// Which metadata fields a writer records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkMetadataOptions {
    /// Record how long the intercepted call took
    pub duration: bool,
    /// Record wall-clock time
    pub timestamp: bool,
    /// Record the authoring thread
    pub thread_id: bool,
    /// Record a callstack when a provider is installed
    pub callstack: bool,
}

impl ChunkMetadataOptions {
    /// Record nothing. Output then depends only on the calls made.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            duration: false,
            timestamp: false,
            thread_id: false,
            callstack: false,
        }
    }

    /// Toggle durations
    #[must_use]
    pub fn with_duration(mut self, enabled: bool) -> Self {
        self.duration = enabled;
        self
    }

    /// Toggle timestamps
    #[must_use]
    pub fn with_timestamp(mut self, enabled: bool) -> Self {
        self.timestamp = enabled;
        self
    }

    /// Toggle thread IDs
    #[must_use]
    pub fn with_thread_id(mut self, enabled: bool) -> Self {
        self.thread_id = enabled;
        self
    }

    /// Toggle callstacks
    #[must_use]
    pub fn with_callstack(mut self, enabled: bool) -> Self {
        self.callstack = enabled;
        self
    }
}

impl Default for ChunkMetadataOptions {
    fn default() -> Self {
        Self {
            duration: true,
            timestamp: true,
            thread_id: true,
            callstack: false,
        }
    }
}

/// Optional per-chunk metadata. Readers tolerate any field being absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Duration of the intercepted call in microseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<u64>,
    /// When the chunk was written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// Authoring thread
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<u64>,
    /// Return addresses, innermost first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callstack: Option<Vec<u64>>,
}

impl ChunkMetadata {
    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.duration_us.is_some() {
            flags |= FLAG_DURATION;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_TIMESTAMP;
        }
        if self.thread_id.is_some() {
            flags |= FLAG_THREAD_ID;
        }
        if self.callstack.is_some() {
            flags |= FLAG_CALLSTACK;
        }
        flags
    }
}

/// One immutable typed record in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    kind: ChunkKind,
    metadata: ChunkMetadata,
    payload: Bytes,
}

impl Chunk {
    /// Assemble a chunk from parts. Normally produced by [`crate::ChunkWriter::end_chunk`].
    #[must_use]
    pub fn from_parts(kind: ChunkKind, metadata: ChunkMetadata, payload: Bytes) -> Self {
        Self {
            kind,
            metadata,
            payload,
        }
    }

    /// Chunk kind
    #[must_use]
    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// Metadata
    #[must_use]
    pub fn metadata(&self) -> &ChunkMetadata {
        &self.metadata
    }

    /// Serialized element payload
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Start reading the payload's elements
    #[must_use]
    pub fn reader(&self) -> ChunkReader<'_> {
        ChunkReader::new(self.kind, &self.payload)
    }

    /// Append the framed chunk to `out`
    pub fn encode_into(&self, out: &mut BytesMut, version: CaptureVersion) {
        let start = out.len();
        out.put_u32_le(self.kind.as_u32());
        out.put_u8(self.metadata.flags());
        if let Some(duration) = self.metadata.duration_us {
            out.put_u64_le(duration);
        }
        if let Some(timestamp) = self.metadata.timestamp {
            out.put_u64_le(timestamp.as_micros());
        }
        if let Some(thread_id) = self.metadata.thread_id {
            out.put_u64_le(thread_id);
        }
        if let Some(callstack) = &self.metadata.callstack {
            out.put_u32_le(callstack.len() as u32);
            for frame in callstack {
                out.put_u64_le(*frame);
            }
        }
        out.put_u64_le(self.payload.len() as u64);
        out.put_slice(&self.payload);
        if version.has_chunk_digest() {
            let digest = digest(&out[start..]);
            out.put_slice(&digest);
        }
    }

    /// Encode to a standalone buffer
    #[must_use]
    pub fn to_bytes(&self, version: CaptureVersion) -> Bytes {
        let mut out = BytesMut::with_capacity(self.payload.len() + 48);
        self.encode_into(&mut out, version);
        out.freeze()
    }

    /// Decode one framed chunk from the front of `data`.
    ///
    /// Returns the chunk and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns `ApiDataCorrupted` if the chunk is truncated, has unknown
    /// flags, or fails its digest
    pub fn decode(data: &Bytes, version: CaptureVersion) -> CoreResult<(Self, usize)> {
        let mut pos = 0usize;
        let kind = ChunkKind::from_raw(read_u32(data, &mut pos)?);
        let flags = read_u8(data, &mut pos)?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(CoreError::corrupted(format!(
                "chunk {kind} has unknown metadata flags {flags:#x}"
            )));
        }

        let mut metadata = ChunkMetadata::default();
        if flags & FLAG_DURATION != 0 {
            metadata.duration_us = Some(read_u64(data, &mut pos)?);
        }
        if flags & FLAG_TIMESTAMP != 0 {
            metadata.timestamp = Some(Timestamp::from_micros(read_u64(data, &mut pos)?));
        }
        if flags & FLAG_THREAD_ID != 0 {
            metadata.thread_id = Some(read_u64(data, &mut pos)?);
        }
        if flags & FLAG_CALLSTACK != 0 {
            let depth = read_u32(data, &mut pos)?;
            if depth > MAX_CALLSTACK_DEPTH {
                return Err(CoreError::corrupted(format!(
                    "chunk {kind} callstack depth {depth} exceeds {MAX_CALLSTACK_DEPTH}"
                )));
            }
            let mut frames = Vec::with_capacity(depth as usize);
            for _ in 0..depth {
                frames.push(read_u64(data, &mut pos)?);
            }
            metadata.callstack = Some(frames);
        }

        let payload_len = read_u64(data, &mut pos)?;
        let payload_len = usize::try_from(payload_len)
            .ok()
            .filter(|len| pos.checked_add(*len).is_some_and(|end| end <= data.len()))
            .ok_or_else(|| {
                CoreError::corrupted(format!(
                    "chunk {kind} payload of {payload_len} bytes overruns stream"
                ))
            })?;
        let payload = data.slice(pos..pos + payload_len);
        pos += payload_len;

        if version.has_chunk_digest() {
            let stored = take(data, &mut pos, CHUNK_DIGEST_SIZE)?;
            let computed = digest(&data[..pos - CHUNK_DIGEST_SIZE]);
            if stored != computed.as_slice() {
                return Err(CoreError::corrupted(format!("chunk {kind} failed digest check")));
            }
        }

        Ok((
            Self {
                kind,
                metadata,
                payload,
            },
            pos,
        ))
    }
}

fn digest(bytes: &[u8]) -> [u8; CHUNK_DIGEST_SIZE] {
    let hash = blake3::hash(bytes);
    let mut out = [0u8; CHUNK_DIGEST_SIZE];
    out.copy_from_slice(&hash.as_bytes()[..CHUNK_DIGEST_SIZE]);
    out
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> CoreResult<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| CoreError::corrupted("chunk header truncated"))?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_u8(data: &[u8], pos: &mut usize) -> CoreResult<u8> {
    Ok(take(data, pos, 1)?[0])
}

fn read_u32(data: &[u8], pos: &mut usize) -> CoreResult<u32> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(take(data, pos, 4)?);
    Ok(u32::from_le_bytes(raw))
}

fn read_u64(data: &[u8], pos: &mut usize) -> CoreResult<u64> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(take(data, pos, 8)?);
    Ok(u64::from_le_bytes(raw))
}
