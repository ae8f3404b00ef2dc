//! Structured export: decode any chunk stream into a serde tree without
//! knowing the handlers for its chunks.

use crate::chunk::ChunkMetadata;
use crate::element::ElementTag;
use crate::kind::{ChunkClass, ChunkKind};
use crate::reader::ChunkReader;
use crate::stream::{StreamChunk, StreamReader};
use bytes::Bytes;
use framecap_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Name given to backend chunks with no registered name
pub const UNKNOWN_CHUNK_NAME: &str = "<unknown>";

const MAX_NESTING: usize = 64;

/// A decoded element value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SdValue {
    /// Absent optional
    Null,
    /// Boolean
    Bool(bool),
    /// Any unsigned integer width
    Unsigned(u64),
    /// Any signed integer width
    Signed(i64),
    /// Any float width
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Byte blob as lowercase hex
    Bytes(String),
    /// Resource ID
    Resource(u64),
    /// Enum discriminant
    Enum {
        /// Declared type
        type_name: String,
        /// Discriminant
        value: u32,
    },
    /// Named children
    Struct {
        /// Declared type
        type_name: String,
        /// Children in write order
        children: Vec<SdObject>,
    },
    /// Array elements
    Array(Vec<SdObject>),
}

/// A named element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdObject {
    /// Element name
    pub name: String,
    /// Element value
    pub value: SdValue,
}

impl SdObject {
    /// Find a direct child of a struct by name
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&SdObject> {
        match &self.value {
            SdValue::Struct { children, .. } | SdValue::Array(children) => {
                children.iter().find(|c| c.name == name)
            }
            _ => None,
        }
    }
}

/// One chunk in exported form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredChunk {
    /// Chunk index in the stream
    pub index: u64,
    /// Byte offset in the stream
    pub offset: u64,
    /// Raw kind
    pub kind: u32,
    /// Resolved name
    pub name: String,
    /// Metadata as recorded
    pub metadata: ChunkMetadata,
    /// Top-level elements
    pub elements: Vec<SdObject>,
}

impl StructuredChunk {
    /// Decode every element of `read`
    ///
    /// # Errors
    ///
    /// Returns `ApiDataCorrupted` if the payload does not walk cleanly
    pub fn decode(read: &StreamChunk, name: impl Into<String>) -> CoreResult<Self> {
        let mut reader = read.chunk.reader();
        let mut elements = Vec::new();
        while !reader.is_at_end() {
            elements.push(read_element(&mut reader, 0)?);
        }
        Ok(Self {
            index: read.index,
            offset: read.offset,
            kind: read.chunk.kind().as_u32(),
            name: name.into(),
            metadata: read.chunk.metadata().clone(),
            elements,
        })
    }

    /// Find a top-level element by name
    #[must_use]
    pub fn element(&self, name: &str) -> Option<&SdObject> {
        self.elements.iter().find(|e| e.name == name)
    }
}

/// Read the next element of any type
///
/// # Errors
///
/// Returns `ApiDataCorrupted` for damaged data or nesting beyond 64 levels
pub fn read_element(reader: &mut ChunkReader<'_>, depth: usize) -> CoreResult<SdObject> {
    if depth > MAX_NESTING {
        return Err(reader.corrupt("element nesting too deep"));
    }
    let (tag, name) = reader.raw_header()?;
    let value = match tag {
        ElementTag::Null => SdValue::Null,
        ElementTag::Bool => match reader.raw_u8()? {
            0 => SdValue::Bool(false),
            1 => SdValue::Bool(true),
            other => return Err(reader.corrupt(format!("bool '{name}' has value {other}"))),
        },
        ElementTag::U8 => SdValue::Unsigned(u64::from(reader.raw_u8()?)),
        ElementTag::U16 => SdValue::Unsigned(u64::from(reader.raw_u16()?)),
        ElementTag::U32 => SdValue::Unsigned(u64::from(reader.raw_u32()?)),
        ElementTag::U64 => SdValue::Unsigned(reader.raw_u64()?),
        ElementTag::I32 => SdValue::Signed(i64::from(reader.raw_u32()? as i32)),
        ElementTag::I64 => SdValue::Signed(reader.raw_u64()? as i64),
        ElementTag::F32 => SdValue::Float(f64::from(f32::from_bits(reader.raw_u32()?))),
        ElementTag::F64 => SdValue::Float(f64::from_bits(reader.raw_u64()?)),
        ElementTag::String => SdValue::String(reader.raw_string()?),
        ElementTag::Bytes => SdValue::Bytes(hex::encode(reader.raw_bytes()?)),
        ElementTag::ResourceId => SdValue::Resource(reader.raw_u64()?),
        ElementTag::Enum => {
            let type_name = reader.raw_name()?.to_string();
            SdValue::Enum {
                type_name,
                value: reader.raw_u32()?,
            }
        }
        ElementTag::Struct => {
            let type_name = reader.raw_name()?.to_string();
            let children = read_children(reader, depth)?;
            SdValue::Struct {
                type_name,
                children,
            }
        }
        ElementTag::Array => SdValue::Array(read_children(reader, depth)?),
    };
    Ok(SdObject {
        name: name.to_string(),
        value,
    })
}

fn read_children(reader: &mut ChunkReader<'_>, depth: usize) -> CoreResult<Vec<SdObject>> {
    let count = reader.container_count()?;
    let mut children = Vec::with_capacity(count as usize);
    for _ in 0..count {
        children.push(read_element(reader, depth + 1)?);
    }
    Ok(children)
}

/// Resolve a chunk kind to its display name.
///
/// System kinds use their fixed names, backend kinds ask `driver_name` and
/// fall back to [`UNKNOWN_CHUNK_NAME`].
///
/// # Errors
///
/// Returns `ApiDataCorrupted` for an unknown kind below the backend range
pub fn chunk_name(
    kind: ChunkKind,
    driver_name: &dyn Fn(ChunkKind) -> Option<String>,
) -> CoreResult<String> {
    Ok(match kind.classify()? {
        ChunkClass::System(system) => system.name().to_string(),
        ChunkClass::Driver(kind) => {
            driver_name(kind).unwrap_or_else(|| UNKNOWN_CHUNK_NAME.to_string())
        }
    })
}

/// Decode a whole chunk stream.
///
/// # Errors
///
/// Returns the stream's framing errors and any element corruption
pub fn export_stream(
    stream: Bytes,
    driver_name: &dyn Fn(ChunkKind) -> Option<String>,
) -> CoreResult<Vec<StructuredChunk>> {
    let mut reader = StreamReader::open(stream)?;
    let mut chunks = Vec::new();
    while let Some(read) = reader.read_chunk()? {
        let name = chunk_name(read.chunk.kind(), driver_name)?;
        chunks.push(StructuredChunk::decode(&read, name)?);
    }
    tracing::debug!(chunks = chunks.len(), "structured export complete");
    Ok(chunks)
}

/// Render exported chunks as pretty JSON
///
/// # Errors
///
/// Returns `InvalidState` if serialization fails
pub fn to_json(chunks: &[StructuredChunk]) -> CoreResult<String> {
    serde_json::to_string_pretty(chunks)
        .map_err(|e| CoreError::InvalidState(format!("structured export: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadataOptions;
    use crate::kind::SystemChunk;
    use crate::stream::StreamWriter;
    use crate::writer::ChunkWriter;
    use framecap_core::ResourceId;

    fn sample_stream() -> Bytes {
        let mut writer = ChunkWriter::new(ChunkMetadataOptions::none());
        let mut stream = StreamWriter::new();

        writer.begin_chunk(SystemChunk::DriverInit);
        writer.write_str("driver", "soft");
        stream.write_chunk(&writer.end_chunk().unwrap());

        writer.begin_chunk(ChunkKind::driver(0));
        writer.write_resource("buffer", ResourceId::from_raw(5));
        writer.begin_struct("desc", "BufferDesc");
        writer.write_u64("size", 16);
        writer.write_enum("usage", "Usage", 2);
        writer.write_bytes("data", &[0xab, 0xcd]);
        writer.end_struct();
        writer.begin_array("list");
        writer.write_i32("$el", -1);
        writer.write_f32("$el", 0.5);
        writer.end_array();
        writer.write_null("label");
        stream.write_chunk(&writer.end_chunk().unwrap());

        writer.begin_chunk(ChunkKind::driver(77));
        writer.write_bool("flag", true);
        stream.write_chunk(&writer.end_chunk().unwrap());

        stream.finish()
    }

    fn names(kind: ChunkKind) -> Option<String> {
        (kind == ChunkKind::driver(0)).then(|| "CreateBuffer".to_string())
    }

    #[test]
    fn test_export_tree() {
        let chunks = export_stream(sample_stream(), &names).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].name, "DriverInit");
        assert_eq!(chunks[1].name, "CreateBuffer");
        assert_eq!(chunks[2].name, UNKNOWN_CHUNK_NAME);

        let desc = chunks[1].element("desc").unwrap();
        assert_eq!(desc.child("size").unwrap().value, SdValue::Unsigned(16));
        assert_eq!(
            desc.child("data").unwrap().value,
            SdValue::Bytes("abcd".to_string())
        );
        assert_eq!(
            chunks[1].element("buffer").unwrap().value,
            SdValue::Resource(5)
        );
        match &chunks[1].element("list").unwrap().value {
            SdValue::Array(items) => {
                assert_eq!(items[0].value, SdValue::Signed(-1));
                assert_eq!(items[1].value, SdValue::Float(0.5));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(chunks[1].element("label").unwrap().value, SdValue::Null);
    }

    #[test]
    fn test_export_offsets_are_monotonic() {
        let chunks = export_stream(sample_stream(), &names).unwrap();
        assert!(chunks.windows(2).all(|w| w[0].offset < w[1].offset));
        assert_eq!(chunks.iter().map(|c| c.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_json_rendering() {
        let chunks = export_stream(sample_stream(), &names).unwrap();
        let json = to_json(&chunks).unwrap();
        let parsed: Vec<StructuredChunk> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, chunks);
        assert!(json.contains("\"CreateBuffer\""));
    }

    #[test]
    fn test_unknown_system_kind_fails_export() {
        let mut writer = ChunkWriter::new(ChunkMetadataOptions::none());
        let mut stream = StreamWriter::new();
        writer.begin_chunk(ChunkKind::from_raw(500));
        stream.write_chunk(&writer.end_chunk().unwrap());
        let err = export_stream(stream.finish(), &names).unwrap_err();
        assert!(matches!(err, CoreError::ApiDataCorrupted { .. }));
    }
}
