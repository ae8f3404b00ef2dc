//! Values that know how to encode themselves as chunk elements.

use crate::element::{ARRAY_ELEMENT_NAME, ElementTag};
use crate::reader::ChunkReader;
use crate::writer::ChunkWriter;
use framecap_core::{CoreResult, ResourceId};

/// Symmetric element encoding.
///
/// `deserialise` must read exactly what `serialise` wrote, in the same order.
pub trait Serialise: Sized {
    /// Write `self` as one element named `name`
    fn serialise(&self, name: &str, writer: &mut ChunkWriter);

    /// Read back an element named `name`
    ///
    /// # Errors
    ///
    /// Returns `ApiDataCorrupted` if the stream does not hold this type here
    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self>;
}

macro_rules! primitive_serialise {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Serialise for $ty {
                fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
                    writer.$write(name, *self);
                }

                fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
                    reader.$read(name)
                }
            }
        )*
    };
}

primitive_serialise! {
    bool => write_bool, read_bool;
    u8 => write_u8, read_u8;
    u16 => write_u16, read_u16;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    i32 => write_i32, read_i32;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
    ResourceId => write_resource, read_resource;
}

impl Serialise for String {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.write_str(name, self);
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        reader.read_string(name)
    }
}

impl<T: Serialise> Serialise for Vec<T> {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_array(name);
        for item in self {
            item.serialise(ARRAY_ELEMENT_NAME, writer);
        }
        writer.end_array();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        let count = reader.begin_array(name)?;
        let mut items = Vec::with_capacity(count as usize);
        for _ in 0..count {
            items.push(T::deserialise(ARRAY_ELEMENT_NAME, reader)?);
        }
        Ok(items)
    }
}

impl<T: Serialise, const N: usize> Serialise for [T; N] {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        writer.begin_array(name);
        for item in self {
            item.serialise(ARRAY_ELEMENT_NAME, writer);
        }
        writer.end_array();
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        let count = reader.begin_array(name)?;
        if count as usize != N {
            return Err(reader.corrupt(format!("array '{name}' has {count} elements, expected {N}")));
        }
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::deserialise(ARRAY_ELEMENT_NAME, reader)?);
        }
        items
            .try_into()
            .map_err(|_| reader.corrupt(format!("array '{name}' length changed while reading")))
    }
}

impl<T: Serialise> Serialise for Option<T> {
    fn serialise(&self, name: &str, writer: &mut ChunkWriter) {
        match self {
            Some(value) => value.serialise(name, writer),
            None => writer.write_null(name),
        }
    }

    fn deserialise(name: &str, reader: &mut ChunkReader<'_>) -> CoreResult<Self> {
        if reader.peek_tag()? == ElementTag::Null {
            reader.read_null(name)?;
            Ok(None)
        } else {
            T::deserialise(name, reader).map(Some)
        }
    }
}
