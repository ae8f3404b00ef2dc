//! Chunk kinds of the software device.

use framecap_chunk::ChunkKind;
use serde::{Deserialize, Serialize};

/// One intercepted soft device call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum SoftChunk {
    /// Buffer creation with its initial bytes
    CreateBuffer = 0,
    /// Texture creation
    CreateTexture = 1,
    /// Pipeline creation
    CreatePipeline = 2,
    /// Command buffer creation
    CreateCommandBuffer = 3,
    /// Command buffer takes its submission slot
    Enqueue = 4,
    /// Command buffer is finished
    Commit = 5,
    /// Render encoder opened
    BeginRenderPass = 6,
    /// Transfer encoder opened
    BeginTransferPass = 7,
    /// Open encoder closed
    EndEncoding = 8,
    /// Pipeline bound
    SetPipeline = 9,
    /// Vertex stage buffer bound
    SetVertexBuffer = 10,
    /// Fragment stage buffer bound
    SetFragmentBuffer = 11,
    /// Fragment stage texture bound
    SetFragmentTexture = 12,
    /// Viewport set
    SetViewport = 13,
    /// Scissor set
    SetScissor = 14,
    /// Blend constant set
    SetBlendColour = 15,
    /// Draw call
    Draw = 16,
    /// Buffer to buffer copy
    CopyBuffer = 17,
    /// Buffer fill
    FillBuffer = 18,
    /// Debug group opened
    PushMarker = 19,
    /// Debug group closed
    PopMarker = 20,
    /// Point marker
    InsertMarker = 21,
    /// Texture presented
    Present = 22,
    /// CPU write to a shared buffer
    BufferDidModify = 23,
}

impl SoftChunk {
    /// Every kind, in wire order
    pub const ALL: [SoftChunk; 24] = [
        Self::CreateBuffer,
        Self::CreateTexture,
        Self::CreatePipeline,
        Self::CreateCommandBuffer,
        Self::Enqueue,
        Self::Commit,
        Self::BeginRenderPass,
        Self::BeginTransferPass,
        Self::EndEncoding,
        Self::SetPipeline,
        Self::SetVertexBuffer,
        Self::SetFragmentBuffer,
        Self::SetFragmentTexture,
        Self::SetViewport,
        Self::SetScissor,
        Self::SetBlendColour,
        Self::Draw,
        Self::CopyBuffer,
        Self::FillBuffer,
        Self::PushMarker,
        Self::PopMarker,
        Self::InsertMarker,
        Self::Present,
        Self::BufferDidModify,
    ];

    /// Stream kind
    #[must_use]
    pub const fn kind(self) -> ChunkKind {
        ChunkKind::driver(self as u32)
    }

    /// Soft kind of a stream kind
    #[must_use]
    pub fn from_kind(kind: ChunkKind) -> Option<Self> {
        Self::ALL.into_iter().find(|soft| soft.kind() == kind)
    }

    /// Display name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CreateBuffer => "Device::newBuffer",
            Self::CreateTexture => "Device::newTexture",
            Self::CreatePipeline => "Device::newPipeline",
            Self::CreateCommandBuffer => "Queue::commandBuffer",
            Self::Enqueue => "CommandBuffer::enqueue",
            Self::Commit => "CommandBuffer::commit",
            Self::BeginRenderPass => "CommandBuffer::renderEncoder",
            Self::BeginTransferPass => "CommandBuffer::transferEncoder",
            Self::EndEncoding => "Encoder::endEncoding",
            Self::SetPipeline => "RenderEncoder::setPipeline",
            Self::SetVertexBuffer => "RenderEncoder::setVertexBuffer",
            Self::SetFragmentBuffer => "RenderEncoder::setFragmentBuffer",
            Self::SetFragmentTexture => "RenderEncoder::setFragmentTexture",
            Self::SetViewport => "RenderEncoder::setViewport",
            Self::SetScissor => "RenderEncoder::setScissorRect",
            Self::SetBlendColour => "RenderEncoder::setBlendColor",
            Self::Draw => "RenderEncoder::draw",
            Self::CopyBuffer => "TransferEncoder::copyBuffer",
            Self::FillBuffer => "TransferEncoder::fillBuffer",
            Self::PushMarker => "CommandBuffer::pushDebugGroup",
            Self::PopMarker => "CommandBuffer::popDebugGroup",
            Self::InsertMarker => "CommandBuffer::insertDebugSignpost",
            Self::Present => "Device::present",
            Self::BufferDidModify => "Buffer::didModifyRange",
        }
    }
}

impl From<SoftChunk> for ChunkKind {
    fn from(soft: SoftChunk) -> Self {
        soft.kind()
    }
}

impl std::fmt::Display for SoftChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_driver_kinds_in_order() {
        for (index, soft) in SoftChunk::ALL.into_iter().enumerate() {
            assert!(soft.kind().is_driver());
            assert_eq!(soft as usize, index);
            assert_eq!(SoftChunk::from_kind(soft.kind()), Some(soft));
        }
        assert_eq!(SoftChunk::from_kind(ChunkKind::driver(500)), None);
    }

    #[test]
    fn test_names_unique() {
        let mut names: Vec<&str> = SoftChunk::ALL.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SoftChunk::ALL.len());
    }
}
