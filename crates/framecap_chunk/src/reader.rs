//! Read side of the chunk serializer.
//!
//! Elements must be read in the order they were written. Each read names
//! the tag and element name it expects; any mismatch, overrun or trailing
//! byte is `ApiDataCorrupted`.

use crate::element::ElementTag;
use crate::kind::ChunkKind;
use crate::serialise::Serialise;
use bytes::Bytes;
use framecap_core::{CoreError, CoreResult, ResourceId};

/// Smallest possible encoded element: tag plus empty name
pub(crate) const MIN_ELEMENT_SIZE: usize = 3;

/// Reads typed elements back out of a chunk payload
#[derive(Debug)]
pub struct ChunkReader<'a> {
    kind: ChunkKind,
    data: &'a Bytes,
    pos: usize,
}

impl<'a> ChunkReader<'a> {
    /// Read over `data`, reporting errors against `kind`
    #[must_use]
    pub fn new(kind: ChunkKind, data: &'a Bytes) -> Self {
        Self { kind, data, pos: 0 }
    }

    /// Kind of the chunk being read
    #[must_use]
    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// Bytes not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether every element has been read
    #[must_use]
    pub fn is_at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    /// Confirm the payload was consumed exactly.
    ///
    /// # Errors
    ///
    /// Returns `ApiDataCorrupted` if bytes remain
    pub fn end_chunk(&self) -> CoreResult<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.corrupt(format!("{} trailing payload bytes", self.remaining())))
        }
    }

    pub(crate) fn corrupt(&self, what: impl std::fmt::Display) -> CoreError {
        CoreError::corrupted(format!("chunk {} at payload offset {}: {what}", self.kind, self.pos))
    }

    pub(crate) fn take(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        let data: &'a Bytes = self.data;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| self.corrupt(format!("read of {len} bytes overruns payload")))?;
        let slice = &data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N)?);
        Ok(raw)
    }

    pub(crate) fn raw_u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn raw_u16(&mut self) -> CoreResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub(crate) fn raw_u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub(crate) fn raw_u64(&mut self) -> CoreResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub(crate) fn raw_name(&mut self) -> CoreResult<&'a str> {
        let len = self.raw_u16()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw).map_err(|_| self.corrupt("element name is not UTF-8"))
    }

    pub(crate) fn raw_string(&mut self) -> CoreResult<String> {
        let len = self.raw_u32()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| self.corrupt("string element is not UTF-8"))
    }

    pub(crate) fn raw_bytes(&mut self) -> CoreResult<Bytes> {
        let len = self.raw_u64()?;
        let len = usize::try_from(len)
            .ok()
            .filter(|len| *len <= self.remaining())
            .ok_or_else(|| self.corrupt(format!("byte blob of {len} bytes overruns payload")))?;
        let start = self.pos;
        self.pos += len;
        Ok(self.data.slice(start..start + len))
    }

    /// Read the next element header without interpreting its value
    pub(crate) fn raw_header(&mut self) -> CoreResult<(ElementTag, &'a str)> {
        let tag = ElementTag::from_u8(self.raw_u8()?).map_err(|e| self.corrupt(e))?;
        let name = self.raw_name()?;
        Ok((tag, name))
    }

    /// Tag of the next element, without consuming it
    ///
    /// # Errors
    ///
    /// Returns `ApiDataCorrupted` at end of payload or for an unknown tag
    pub fn peek_tag(&self) -> CoreResult<ElementTag> {
        let byte = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.corrupt("peek past end of payload"))?;
        ElementTag::from_u8(byte).map_err(|e| self.corrupt(e))
    }

    fn expect(&mut self, tag: ElementTag, name: &str) -> CoreResult<()> {
        let (found_tag, found_name) = self.raw_header()?;
        if found_tag != tag {
            return Err(self.corrupt(format!(
                "expected {} '{name}', found {} '{found_name}'",
                tag.name(),
                found_tag.name()
            )));
        }
        if found_name != name {
            return Err(self.corrupt(format!(
                "expected element '{name}', found '{found_name}'"
            )));
        }
        Ok(())
    }

    fn expect_type_name(&mut self, type_name: &str) -> CoreResult<()> {
        let found = self.raw_name()?;
        if found == type_name {
            Ok(())
        } else {
            Err(self.corrupt(format!("expected type {type_name}, found {found}")))
        }
    }

    /// Absent optional value
    pub fn read_null(&mut self, name: &str) -> CoreResult<()> {
        self.expect(ElementTag::Null, name)
    }

    /// Boolean
    pub fn read_bool(&mut self, name: &str) -> CoreResult<bool> {
        self.expect(ElementTag::Bool, name)?;
        match self.raw_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.corrupt(format!("bool '{name}' has value {other}"))),
        }
    }

    /// Unsigned 8-bit
    pub fn read_u8(&mut self, name: &str) -> CoreResult<u8> {
        self.expect(ElementTag::U8, name)?;
        self.raw_u8()
    }

    /// Unsigned 16-bit
    pub fn read_u16(&mut self, name: &str) -> CoreResult<u16> {
        self.expect(ElementTag::U16, name)?;
        self.raw_u16()
    }

    /// Unsigned 32-bit
    pub fn read_u32(&mut self, name: &str) -> CoreResult<u32> {
        self.expect(ElementTag::U32, name)?;
        self.raw_u32()
    }

    /// Unsigned 64-bit
    pub fn read_u64(&mut self, name: &str) -> CoreResult<u64> {
        self.expect(ElementTag::U64, name)?;
        self.raw_u64()
    }

    /// Signed 32-bit
    pub fn read_i32(&mut self, name: &str) -> CoreResult<i32> {
        self.expect(ElementTag::I32, name)?;
        Ok(self.raw_u32()? as i32)
    }

    /// Signed 64-bit
    pub fn read_i64(&mut self, name: &str) -> CoreResult<i64> {
        self.expect(ElementTag::I64, name)?;
        Ok(self.raw_u64()? as i64)
    }

    /// Single-precision float
    pub fn read_f32(&mut self, name: &str) -> CoreResult<f32> {
        self.expect(ElementTag::F32, name)?;
        Ok(f32::from_bits(self.raw_u32()?))
    }

    /// Double-precision float
    pub fn read_f64(&mut self, name: &str) -> CoreResult<f64> {
        self.expect(ElementTag::F64, name)?;
        Ok(f64::from_bits(self.raw_u64()?))
    }

    /// UTF-8 string
    pub fn read_string(&mut self, name: &str) -> CoreResult<String> {
        self.expect(ElementTag::String, name)?;
        self.raw_string()
    }

    /// Byte blob, sliced from the payload without copying
    pub fn read_bytes(&mut self, name: &str) -> CoreResult<Bytes> {
        self.expect(ElementTag::Bytes, name)?;
        self.raw_bytes()
    }

    /// Resource identifier
    pub fn read_resource(&mut self, name: &str) -> CoreResult<ResourceId> {
        self.expect(ElementTag::ResourceId, name)?;
        Ok(ResourceId::from_raw(self.raw_u64()?))
    }

    /// Enum discriminant; the recorded type name must match
    pub fn read_enum(&mut self, name: &str, type_name: &str) -> CoreResult<u32> {
        self.expect(ElementTag::Enum, name)?;
        self.expect_type_name(type_name)?;
        self.raw_u32()
    }

    /// Open a struct and return its child count
    pub fn begin_struct(&mut self, name: &str, type_name: &str) -> CoreResult<u32> {
        self.expect(ElementTag::Struct, name)?;
        self.expect_type_name(type_name)?;
        self.container_count()
    }

    /// Open an array and return its element count
    pub fn begin_array(&mut self, name: &str) -> CoreResult<u32> {
        self.expect(ElementTag::Array, name)?;
        self.container_count()
    }

    pub(crate) fn container_count(&mut self) -> CoreResult<u32> {
        let count = self.raw_u32()?;
        if (count as usize).saturating_mul(MIN_ELEMENT_SIZE) > self.remaining() {
            return Err(self.corrupt(format!("container of {count} children overruns payload")));
        }
        Ok(count)
    }

    /// Read any [`Serialise`] value
    pub fn deserialise<T: Serialise>(&mut self, name: &str) -> CoreResult<T> {
        T::deserialise(name, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadataOptions;
    use crate::writer::ChunkWriter;

    fn written(build: impl FnOnce(&mut ChunkWriter)) -> crate::Chunk {
        let mut writer = ChunkWriter::new(ChunkMetadataOptions::none());
        writer.begin_chunk(ChunkKind::driver(0));
        build(&mut writer);
        writer.end_chunk().unwrap()
    }

    #[test]
    fn test_primitives_roundtrip() {
        let chunk = written(|w| {
            w.write_bool("b", true);
            w.write_u8("u8", 0xab);
            w.write_u16("u16", 0xabcd);
            w.write_u32("u32", 0xdead_beef);
            w.write_u64("u64", u64::MAX);
            w.write_i32("i32", -5);
            w.write_i64("i64", i64::MIN);
            w.write_f32("f32", -0.0);
            w.write_f64("f64", f64::NAN);
            w.write_str("s", "héllo");
            w.write_bytes("blob", &[1, 2, 3]);
            w.write_resource("res", ResourceId::from_raw(42));
            w.write_enum("mode", "LoadOp", 2);
        });
        let mut r = chunk.reader();
        assert!(r.read_bool("b").unwrap());
        assert_eq!(r.read_u8("u8").unwrap(), 0xab);
        assert_eq!(r.read_u16("u16").unwrap(), 0xabcd);
        assert_eq!(r.read_u32("u32").unwrap(), 0xdead_beef);
        assert_eq!(r.read_u64("u64").unwrap(), u64::MAX);
        assert_eq!(r.read_i32("i32").unwrap(), -5);
        assert_eq!(r.read_i64("i64").unwrap(), i64::MIN);
        assert_eq!(r.read_f32("f32").unwrap().to_bits(), (-0.0f32).to_bits());
        assert_eq!(r.read_f64("f64").unwrap().to_bits(), f64::NAN.to_bits());
        assert_eq!(r.read_string("s").unwrap(), "héllo");
        assert_eq!(r.read_bytes("blob").unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(r.read_resource("res").unwrap(), ResourceId::from_raw(42));
        assert_eq!(r.read_enum("mode", "LoadOp").unwrap(), 2);
        r.end_chunk().unwrap();
    }

    #[test]
    fn test_nested_struct_counts() {
        let chunk = written(|w| {
            w.begin_struct("outer", "Outer");
            w.write_u32("a", 1);
            w.begin_array("list");
            w.write_u32("$el", 10);
            w.write_u32("$el", 20);
            w.end_array();
            w.end_struct();
        });
        let mut r = chunk.reader();
        assert_eq!(r.begin_struct("outer", "Outer").unwrap(), 2);
        assert_eq!(r.read_u32("a").unwrap(), 1);
        assert_eq!(r.begin_array("list").unwrap(), 2);
        assert_eq!(r.read_u32("$el").unwrap(), 10);
        assert_eq!(r.read_u32("$el").unwrap(), 20);
        r.end_chunk().unwrap();
    }

    #[test]
    fn test_tag_mismatch_is_corruption() {
        let chunk = written(|w| w.write_u32("x", 1));
        let err = chunk.reader().read_u64("x").unwrap_err();
        assert!(matches!(err, CoreError::ApiDataCorrupted { .. }));
    }

    #[test]
    fn test_name_mismatch_is_corruption() {
        let chunk = written(|w| w.write_u32("x", 1));
        let err = chunk.reader().read_u32("y").unwrap_err();
        assert!(matches!(err, CoreError::ApiDataCorrupted { .. }));
    }

    #[test]
    fn test_enum_type_mismatch() {
        let chunk = written(|w| w.write_enum("e", "A", 1));
        assert!(chunk.reader().read_enum("e", "B").is_err());
    }

    #[test]
    fn test_overrun_is_corruption() {
        let chunk = written(|w| w.write_u32("x", 1));
        let mut r = chunk.reader();
        r.read_u32("x").unwrap();
        assert!(matches!(
            r.read_u32("x"),
            Err(CoreError::ApiDataCorrupted { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let chunk = written(|w| {
            w.write_u32("x", 1);
            w.write_u32("y", 2);
        });
        let mut r = chunk.reader();
        r.read_u32("x").unwrap();
        assert!(r.end_chunk().is_err());
    }

    #[test]
    fn test_bad_bool_value() {
        let payload = Bytes::from_static(&[1, 1, 0, b'b', 7]);
        let mut r = ChunkReader::new(ChunkKind::driver(0), &payload);
        assert!(r.read_bool("b").is_err());
    }

    #[test]
    fn test_huge_container_count_rejected() {
        let mut raw = vec![ElementTag::Array as u8, 1, 0, b'a'];
        raw.extend_from_slice(&u32::MAX.to_le_bytes());
        let payload = Bytes::from(raw);
        let mut r = ChunkReader::new(ChunkKind::driver(0), &payload);
        assert!(r.begin_array("a").is_err());
    }
}
