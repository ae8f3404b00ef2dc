//! Section container that wraps a chunk stream on disk.
//!
//! ```text
//! magic: b"FCAPFILE"
//! container_version: u32
//! header_len: u32
//! header: postcard ContainerHeader
//! section bodies
//! ```
//!
//! Section offsets are relative to the end of the header.

use crate::encoding::{CanonicalDecode, CanonicalEncode};
use bytes::{BufMut, Bytes, BytesMut};
use framecap_core::{CONTAINER_VERSION, CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Container magic
pub const CONTAINER_MAGIC: [u8; 8] = *b"FCAPFILE";

const PREAMBLE_SIZE: usize = 16;

/// What a section holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionKind {
    /// The chunk stream
    FrameCapture,
    /// Free-form UTF-8 notes
    Notes,
}

/// One entry of the section table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionHeader {
    /// Section kind
    pub kind: SectionKind,
    /// Display name
    pub name: String,
    /// Offset from the end of the header
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
}

/// Container header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    /// Container layout version
    pub container_version: u32,
    /// Backend that produced the capture
    pub driver_name: String,
    /// Host description
    pub machine_ident: String,
    /// Section table
    pub sections: Vec<SectionHeader>,
}

impl CanonicalEncode for ContainerHeader {}

/// A capture file in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    /// Backend that produced the capture
    pub driver_name: String,
    /// Host description
    pub machine_ident: String,
    /// The chunk stream
    pub frame_capture: Bytes,
    /// Optional notes section
    pub notes: Option<String>,
}

impl CaptureFile {
    /// Wrap a chunk stream
    #[must_use]
    pub fn new(driver_name: impl Into<String>, frame_capture: Bytes) -> Self {
        Self {
            driver_name: driver_name.into(),
            machine_ident: machine_ident(),
            frame_capture,
            notes: None,
        }
    }

    /// Attach notes
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Override the host description
    #[must_use]
    pub fn with_machine_ident(mut self, ident: impl Into<String>) -> Self {
        self.machine_ident = ident.into();
        self
    }

    /// Serialize the container
    ///
    /// # Errors
    ///
    /// Returns `FileCorrupted` if the header cannot be encoded
    pub fn to_bytes(&self) -> CoreResult<Bytes> {
        let mut sections = vec![SectionHeader {
            kind: SectionKind::FrameCapture,
            name: "FrameCapture".to_string(),
            offset: 0,
            length: self.frame_capture.len() as u64,
        }];
        if let Some(notes) = &self.notes {
            sections.push(SectionHeader {
                kind: SectionKind::Notes,
                name: "Notes".to_string(),
                offset: self.frame_capture.len() as u64,
                length: notes.len() as u64,
            });
        }
        let header = ContainerHeader {
            container_version: CONTAINER_VERSION,
            driver_name: self.driver_name.clone(),
            machine_ident: self.machine_ident.clone(),
            sections,
        }
        .encode()?;

        let notes_len = self.notes.as_ref().map_or(0, String::len);
        let mut out =
            BytesMut::with_capacity(PREAMBLE_SIZE + header.len() + self.frame_capture.len() + notes_len);
        out.put_slice(&CONTAINER_MAGIC);
        out.put_u32_le(CONTAINER_VERSION);
        out.put_u32_le(header.len() as u32);
        out.put_slice(&header);
        out.put_slice(&self.frame_capture);
        if let Some(notes) = &self.notes {
            out.put_slice(notes.as_bytes());
        }
        Ok(out.freeze())
    }

    /// Parse a container.
    ///
    /// # Errors
    ///
    /// Returns `FileCorrupted` for bad magic, an unknown container version,
    /// a damaged header, a section outside the file or a missing
    /// `FrameCapture` section
    pub fn from_bytes(data: Bytes) -> CoreResult<Self> {
        if data.len() < PREAMBLE_SIZE || data[..8] != CONTAINER_MAGIC {
            return Err(file_corrupted("not a capture file"));
        }
        let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        if version != CONTAINER_VERSION {
            return Err(file_corrupted(format!("container version {version} is not readable")));
        }
        let header_len = u32::from_le_bytes([data[12], data[13], data[14], data[15]]) as usize;
        let body_start = PREAMBLE_SIZE
            .checked_add(header_len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| file_corrupted("container header overruns file"))?;
        let header = ContainerHeader::decode(&data[PREAMBLE_SIZE..body_start])?;
        let body = data.slice(body_start..);

        let section = |kind: SectionKind| -> CoreResult<Option<Bytes>> {
            let Some(entry) = header.sections.iter().find(|s| s.kind == kind) else {
                return Ok(None);
            };
            let start = usize::try_from(entry.offset).ok();
            let end = start.zip(usize::try_from(entry.length).ok()).and_then(|(s, l)| s.checked_add(l));
            match (start, end) {
                (Some(start), Some(end)) if end <= body.len() => Ok(Some(body.slice(start..end))),
                _ => Err(file_corrupted(format!("section {} lies outside the file", entry.name))),
            }
        };

        let frame_capture = section(SectionKind::FrameCapture)?
            .ok_or_else(|| file_corrupted("no FrameCapture section"))?;
        let notes = section(SectionKind::Notes)?
            .map(|raw| {
                String::from_utf8(raw.to_vec()).map_err(|_| file_corrupted("notes are not UTF-8"))
            })
            .transpose()?;

        Ok(Self {
            driver_name: header.driver_name,
            machine_ident: header.machine_ident,
            frame_capture,
            notes,
        })
    }

    /// Write to disk
    ///
    /// # Errors
    ///
    /// Returns `FileIoFailed` on I/O errors
    pub fn write_to(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path.as_ref(), &bytes)?;
        tracing::info!(path = %path.as_ref().display(), bytes = bytes.len(), "capture written");
        Ok(())
    }

    /// Read from disk
    ///
    /// # Errors
    ///
    /// Returns `FileIoFailed` on I/O errors and `FileCorrupted` for a bad container
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(Bytes::from(data))
    }
}

fn file_corrupted(reason: impl Into<String>) -> CoreError {
    CoreError::FileCorrupted {
        reason: reason.into(),
    }
}

fn machine_ident() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
