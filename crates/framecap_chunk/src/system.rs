//! Payload layouts of the system chunks and of the CPU buffer diff chunk,
//! shared by the capture and replay sides.

use crate::reader::ChunkReader;
use crate::serialise::Serialise;
use crate::writer::ChunkWriter;
use bytes::Bytes;
use framecap_core::{CoreResult, ResourceId};
use serde::{Deserialize, Serialize};

/// `DriverInit` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInitParams {
    /// Backend name, must match the replaying backend
    pub driver_name: String,
    /// Backend version
    pub driver_version: u32,
    /// Machine the capture was made on
    pub machine_ident: String,
}

impl Serialise for DriverInitParams {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_struct(name, "DriverInitParams");
        writer.write_str("driver_name", &self.driver_name);
        writer.write_u32("driver_version", self.driver_version);
        writer.write_str("machine_ident", &self.machine_ident);
        writer.end_struct();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.begin_struct(name, "DriverInitParams")?;
        Ok(Self {
            driver_name: reader.read_string("driver_name")?,
            driver_version: reader.read_u32("driver_version")?,
            machine_ident: reader.read_string("machine_ident")?,
        })
    }
}

/// Counters written into `CaptureScope`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    /// Chunks recorded directly on the device during the frame
    pub root_chunks: u32,
    /// Scopes folded into the frame
    pub scopes: u32,
    /// Chunks contributed by those scopes
    pub scope_chunks: u32,
    /// Initial contents entries
    pub initial_contents: u32,
    /// Pre-frame creation chunks
    pub creation_chunks: u32,
}

impl Serialise for FrameStats {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_struct(name, "FrameStats");
        writer.write_u32("root_chunks", self.root_chunks);
        writer.write_u32("scopes", self.scopes);
        writer.write_u32("scope_chunks", self.scope_chunks);
        writer.write_u32("initial_contents", self.initial_contents);
        writer.write_u32("creation_chunks", self.creation_chunks);
        writer.end_struct();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.begin_struct(name, "FrameStats")?;
        Ok(Self {
            root_chunks: reader.read_u32("root_chunks")?,
            scopes: reader.read_u32("scopes")?,
            scope_chunks: reader.read_u32("scope_chunks")?,
            initial_contents: reader.read_u32("initial_contents")?,
            creation_chunks: reader.read_u32("creation_chunks")?,
        })
    }
}

/// `CaptureScope` payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureScopeInfo {
    /// Frame number within the capture session
    pub frame_number: u64,
    /// Frame counters
    pub stats: FrameStats,
}

impl Serialise for CaptureScopeInfo {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_struct(name, "CaptureScopeInfo");
        writer.write_u64("frame_number", self.frame_number);
        self.stats.serialise("stats", writer);
        writer.end_struct();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.begin_struct(name, "CaptureScopeInfo")?;
        Ok(Self {
            frame_number: reader.read_u64("frame_number")?,
            stats: reader.deserialise("stats")?,
        })
    }
}

/// CPU-side modification of a buffer, found by diffing against a baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDiff {
    /// Modified buffer
    pub buffer: ResourceId,
    /// First differing byte
    pub offset: u64,
    /// New contents of the differing range
    pub data: Bytes,
}

impl Serialise for BufferDiff {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_struct(name, "BufferDiff");
        writer.write_resource("buffer", self.buffer);
        writer.write_u64("offset", self.offset);
        writer.write_bytes("data", &self.data);
        writer.end_struct();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.begin_struct(name, "BufferDiff")?;
        Ok(Self {
            buffer: reader.read_resource("buffer")?,
            offset: reader.read_u64("offset")?,
            data: reader.read_bytes("data")?,
        })
    }
}

/// Smallest range `[start, end)` over which `current` differs from
/// `baseline`. Length changes count as differences to the end.
#[must_use]
pub fn diff_range(baseline: &[u8], current: &[u8]) -> Option<(usize, usize)> {
    let common = baseline.len().min(current.len());
    let start = baseline[..common]
        .iter()
        .zip(&current[..common])
        .position(|(a, b)| a != b);
    let end = if baseline.len() != current.len() {
        Some(current.len())
    } else {
        baseline
            .iter()
            .zip(current)
            .rposition(|(a, b)| a != b)
            .map(|last| last + 1)
    };
    match (start, end) {
        (Some(start), Some(end)) => Some((start, end)),
        (None, Some(end)) if end > common => Some((common, end)),
        _ => None,
    }
}
