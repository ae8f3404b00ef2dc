//! Logical type tags carried by every serialized element.
//!
//! Each element in a chunk payload is `tag: u8`, `name: u16 len + utf8`,
//! then the value. The tag makes the stream self-describing so export
//! tooling can walk a chunk without knowing its handler.

use framecap_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Type tag of one element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ElementTag {
    /// Absent optional value, no payload
    Null = 0,
    /// `u8` 0 or 1
    Bool = 1,
    /// Unsigned 8-bit
    U8 = 2,
    /// Unsigned 16-bit
    U16 = 3,
    /// Unsigned 32-bit
    U32 = 4,
    /// Unsigned 64-bit
    U64 = 5,
    /// Signed 32-bit
    I32 = 6,
    /// Signed 64-bit
    I64 = 7,
    /// IEEE single
    F32 = 8,
    /// IEEE double
    F64 = 9,
    /// `u32` length + utf8
    String = 10,
    /// `u64` length + raw bytes
    Bytes = 11,
    /// Resource ID as `u64`
    ResourceId = 12,
    /// Type name + `u32` discriminant
    Enum = 13,
    /// Type name + `u32` child count + children
    Struct = 14,
    /// `u32` child count + children
    Array = 15,
}

impl ElementTag {
    /// Decode a tag byte
    ///
    /// # Errors
    ///
    /// Returns `ApiDataCorrupted` for an unknown tag
    pub fn from_u8(value: u8) -> CoreResult<Self> {
        Ok(match value {
            0 => Self::Null,
            1 => Self::Bool,
            2 => Self::U8,
            3 => Self::U16,
            4 => Self::U32,
            5 => Self::U64,
            6 => Self::I32,
            7 => Self::I64,
            8 => Self::F32,
            9 => Self::F64,
            10 => Self::String,
            11 => Self::Bytes,
            12 => Self::ResourceId,
            13 => Self::Enum,
            14 => Self::Struct,
            15 => Self::Array,
            other => return Err(CoreError::corrupted(format!("unknown element tag {other}"))),
        })
    }

    /// Short lowercase name used in structured export
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::ResourceId => "resource",
            Self::Enum => "enum",
            Self::Struct => "struct",
            Self::Array => "array",
        }
    }
}

/// Name given to array children
pub const ARRAY_ELEMENT_NAME: &str = "$el";
