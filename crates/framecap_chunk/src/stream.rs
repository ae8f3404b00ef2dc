//! Chunk stream framing.
//!
//! A stream is an 8-byte magic, a `u64` serialise version, then framed
//! chunks back to back. Offsets handed out by the writer and reader are
//! byte positions from the start of the stream, so they can be stored in
//! events and used to seek later.

use crate::chunk::Chunk;
use bytes::{BufMut, Bytes, BytesMut};
use framecap_core::{CaptureVersion, CoreError, CoreResult};

/// Stream magic
pub const STREAM_MAGIC: [u8; 8] = *b"FCAPCHNK";

/// Bytes before the first chunk
pub const STREAM_HEADER_SIZE: usize = 16;

/// Appends framed chunks to an in-memory stream
#[derive(Debug)]
pub struct StreamWriter {
    version: CaptureVersion,
    buf: BytesMut,
    chunks: u64,
}

impl StreamWriter {
    /// Start a stream at the current version
    #[must_use]
    pub fn new() -> Self {
        Self::with_version(CaptureVersion::CURRENT)
    }

    /// Start a stream stamped with `version`
    #[must_use]
    pub fn with_version(version: CaptureVersion) -> Self {
        let mut buf = BytesMut::with_capacity(4096);
        buf.put_slice(&STREAM_MAGIC);
        buf.put_u64_le(version.as_u64());
        Self {
            version,
            buf,
            chunks: 0,
        }
    }

    /// Version stamped in the header
    #[must_use]
    pub fn version(&self) -> CaptureVersion {
        self.version
    }

    /// Append a chunk and return the offset it begins at
    pub fn write_chunk(&mut self, chunk: &Chunk) -> u64 {
        let offset = self.buf.len() as u64;
        chunk.encode_into(&mut self.buf, self.version);
        self.chunks += 1;
        offset
    }

    /// Number of chunks written
    #[must_use]
    pub fn chunk_count(&self) -> u64 {
        self.chunks
    }

    /// Current stream length
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether only the header has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks == 0
    }

    /// Finish and return the stream bytes
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// A chunk read from a stream with its position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    /// Byte offset the chunk began at
    pub offset: u64,
    /// Zero-based chunk index within the stream
    pub index: u64,
    /// The chunk
    pub chunk: Chunk,
}

/// Forward reader over a chunk stream
#[derive(Debug, Clone)]
pub struct StreamReader {
    data: Bytes,
    version: CaptureVersion,
    pos: usize,
    index: u64,
}

impl StreamReader {
    /// Validate the header and position at the first chunk.
    ///
    /// # Errors
    ///
    /// `FileCorrupted` for a short stream or bad magic,
    /// `ApiIncompatibleVersion` for a version this build does not read
    pub fn open(data: Bytes) -> CoreResult<Self> {
        if data.len() < STREAM_HEADER_SIZE {
            return Err(CoreError::FileCorrupted {
                reason: format!("chunk stream of {} bytes has no header", data.len()),
            });
        }
        if data[..8] != STREAM_MAGIC {
            return Err(CoreError::FileCorrupted {
                reason: "chunk stream magic mismatch".to_string(),
            });
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data[8..16]);
        let version = CaptureVersion::from_raw(u64::from_le_bytes(raw));
        if !version.is_supported() {
            return Err(CoreError::ApiIncompatibleVersion {
                version: version.as_u64(),
            });
        }
        Ok(Self {
            data,
            version,
            pos: STREAM_HEADER_SIZE,
            index: 0,
        })
    }

    /// Version stamped in the header
    #[must_use]
    pub fn version(&self) -> CaptureVersion {
        self.version
    }

    /// Offset of the next chunk
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.pos as u64
    }

    /// Index the next chunk will have
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.index
    }

    /// Whether every chunk has been read
    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Total stream length
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the stream has no chunks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() <= STREAM_HEADER_SIZE
    }

    /// Read the next chunk, or `None` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns `ApiDataCorrupted` for a damaged chunk
    pub fn read_chunk(&mut self) -> CoreResult<Option<StreamChunk>> {
        if self.is_at_end() {
            return Ok(None);
        }
        let rest = self.data.slice(self.pos..);
        let (chunk, used) = Chunk::decode(&rest, self.version).map_err(|err| match err {
            CoreError::ApiDataCorrupted { reason } => CoreError::corrupted(format!(
                "chunk {} at offset {}: {reason}",
                self.index, self.pos
            )),
            other => other,
        })?;
        let read = StreamChunk {
            offset: self.pos as u64,
            index: self.index,
            chunk,
        };
        self.pos += used;
        self.index += 1;
        Ok(Some(read))
    }

    /// Reposition at a chunk boundary previously reported by this stream.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the offset lies outside the chunk area
    pub fn seek(&mut self, offset: u64, index: u64) -> CoreResult<()> {
        let pos = usize::try_from(offset)
            .ok()
            .filter(|pos| (STREAM_HEADER_SIZE..=self.data.len()).contains(pos))
            .ok_or_else(|| CoreError::InvalidParameter {
                name: "offset".to_string(),
                reason: format!("{offset} is outside the chunk stream"),
            })?;
        self.pos = pos;
        self.index = index;
        Ok(())
    }

    /// Underlying bytes
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}
