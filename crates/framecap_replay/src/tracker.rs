//! Encoder state of one in-flight scope.
//!
//! Handlers update the tracker for both executed and state-only chunks, so
//! at any event it holds what a full replay would have bound. Partial
//! replay resumes a backend encoder from it.

use framecap_chunk::{ChunkReader, ChunkWriter, Serialise};
use framecap_core::{CoreError, CoreResult, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which sub-encoder is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    /// No encoder open
    #[default]
    None,
    /// Render pass
    Render,
    /// Blit / copy pass
    Transfer,
    /// Compute pass
    Compute,
}

impl EncoderKind {
    /// Wire value
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Render => 1,
            Self::Transfer => 2,
            Self::Compute => 3,
        }
    }

    /// Decode a wire value
    ///
    /// # Errors
    ///
    /// Returns `ApiDataCorrupted` for an unknown value
    pub fn from_u32(value: u32) -> CoreResult<Self> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Render,
            2 => Self::Transfer,
            3 => Self::Compute,
            other => return Err(CoreError::corrupted(format!("encoder kind {other}"))),
        })
    }
}

/// What happens to an attachment when a pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOp {
    /// Keep existing contents
    #[default]
    Load,
    /// Fill with a packed RGBA8 colour
    Clear(u32),
    /// Contents are undefined
    DontCare,
}

impl Serialise for LoadOp {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_struct(name, "LoadOp");
        let (kind, colour) = match self {
            Self::Load => (0, 0),
            Self::Clear(colour) => (1, *colour),
            Self::DontCare => (2, 0),
        };
        writer.write_enum("action", "LoadAction", kind);
        writer.write_u32("clear_colour", colour);
        writer.end_struct();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.begin_struct(name, "LoadOp")?;
        let kind = reader.read_enum("action", "LoadAction")?;
        let colour = reader.read_u32("clear_colour")?;
        match kind {
            0 => Ok(Self::Load),
            1 => Ok(Self::Clear(colour)),
            2 => Ok(Self::DontCare),
            other => Err(CoreError::corrupted(format!("load action {other}"))),
        }
    }
}

/// Colour target of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColourAttachment {
    /// Target texture
    pub texture: ResourceId,
    /// Load behaviour
    pub load: LoadOp,
}

impl Serialise for ColourAttachment {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_struct(name, "ColourAttachment");
        writer.write_resource("texture", self.texture);
        self.load.serialise("load", writer);
        writer.end_struct();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.begin_struct(name, "ColourAttachment")?;
        Ok(Self {
            texture: reader.read_resource("texture")?,
            load: reader.deserialise("load")?,
        })
    }
}

/// A buffer bound at an offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferBinding {
    /// Bound buffer
    pub buffer: ResourceId,
    /// Byte offset
    pub offset: u64,
}

/// Viewport rectangle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

impl Serialise for Viewport {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_struct(name, "Viewport");
        writer.write_f32("x", self.x);
        writer.write_f32("y", self.y);
        writer.write_f32("width", self.width);
        writer.write_f32("height", self.height);
        writer.end_struct();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.begin_struct(name, "Viewport")?;
        Ok(Self {
            x: reader.read_f32("x")?,
            y: reader.read_f32("y")?,
            width: reader.read_f32("width")?,
            height: reader.read_f32("height")?,
        })
    }
}

/// Scissor rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScissorRect {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Serialise for ScissorRect {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_struct(name, "ScissorRect");
        writer.write_u32("x", self.x);
        writer.write_u32("y", self.y);
        writer.write_u32("width", self.width);
        writer.write_u32("height", self.height);
        writer.end_struct();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.begin_struct(name, "ScissorRect")?;
        Ok(Self {
            x: reader.read_u32("x")?,
            y: reader.read_u32("y")?,
            width: reader.read_u32("width")?,
            height: reader.read_u32("height")?,
        })
    }
}

/// Tracked encoder state of one scope
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EncoderState {
    /// Open sub-encoder
    pub kind: EncoderKind,
    /// Bound pipeline
    pub pipeline: Option<ResourceId>,
    /// Vertex stage buffers by slot
    pub vertex_buffers: BTreeMap<u32, BufferBinding>,
    /// Fragment stage buffers by slot
    pub fragment_buffers: BTreeMap<u32, BufferBinding>,
    /// Fragment stage textures by slot
    pub fragment_textures: BTreeMap<u32, ResourceId>,
    /// Viewport, if set
    pub viewport: Option<Viewport>,
    /// Scissor, if set
    pub scissor: Option<ScissorRect>,
    /// Blend constant, if set
    pub blend_colour: Option<[f32; 4]>,
    /// Targets of the open render pass
    pub colour_attachments: Vec<ColourAttachment>,
}

impl EncoderState {
    /// Whether an encoder is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.kind != EncoderKind::None
    }

    /// Open an encoder. Bindings never carry over between encoders.
    pub fn begin(&mut self, kind: EncoderKind, attachments: Vec<ColourAttachment>) {
        *self = Self {
            kind,
            colour_attachments: attachments,
            ..Self::default()
        };
    }

    /// Close the open encoder
    pub fn end(&mut self) {
        *self = Self::default();
    }

    /// Every resource the state refers to
    #[must_use]
    pub fn resources(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self.pipeline.into_iter().collect();
        ids.extend(self.vertex_buffers.values().map(|b| b.buffer));
        ids.extend(self.fragment_buffers.values().map(|b| b.buffer));
        ids.extend(self.fragment_textures.values().copied());
        ids.extend(self.colour_attachments.iter().map(|a| a.texture));
        ids.sort();
        ids.dedup();
        ids
    }

    /// The attachments to use when resuming mid-pass: existing contents
    /// must survive, so every load op becomes `Load`
    #[must_use]
    pub fn resume_attachments(&self) -> Vec<ColourAttachment> {
        self.colour_attachments
            .iter()
            .map(|a| ColourAttachment {
                texture: a.texture,
                load: LoadOp::Load,
            })
            .collect()
    }
}
