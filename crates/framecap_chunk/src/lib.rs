//! framecap chunk serializer
//!
//! Typed, self-describing binary chunks with optional metadata, the
//! versioned stream that holds them, and the section container that
//! carries a stream to disk.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod container;
pub mod element;
pub mod encoding;
pub mod kind;
pub mod reader;
pub mod serialise;
pub mod stream;
pub mod structured;
pub mod system;
pub mod thread;
pub mod writer;

pub use chunk::{CHUNK_DIGEST_SIZE, Chunk, ChunkMetadata, ChunkMetadataOptions};
pub use container::{CaptureFile, ContainerHeader, SectionHeader, SectionKind};
pub use element::{ARRAY_ELEMENT_NAME, ElementTag};
pub use encoding::{CanonicalDecode, CanonicalEncode};
pub use kind::{ChunkClass, ChunkKind, FIRST_DRIVER_CHUNK, SystemChunk};
pub use reader::ChunkReader;
pub use serialise::Serialise;
pub use stream::{STREAM_HEADER_SIZE, StreamChunk, StreamReader, StreamWriter};
pub use structured::{
    SdObject, SdValue, StructuredChunk, UNKNOWN_CHUNK_NAME, chunk_name, export_stream, to_json,
};
pub use system::{BufferDiff, CaptureScopeInfo, DriverInitParams, FrameStats, diff_range};
pub use thread::{WriterRegistry, WriterStats};
pub use writer::{CallstackProvider, ChunkWriter};
