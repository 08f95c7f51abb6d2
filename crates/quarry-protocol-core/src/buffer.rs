use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, DecodeResult, EncodeError, EncodeResult};

/// Default maximum string length, in characters.
pub const MAX_STRING_LEN: usize = 32767;
/// Group limit for a 32-bit VarInt.
pub const VAR_INT_MAX_GROUPS: usize = 5;
/// Group limit for a 64-bit VarLong.
pub const VAR_LONG_MAX_GROUPS: usize = 10;

/// A growable byte buffer with independent reader and writer cursors.
///
/// The writer cursor is the end of the written data; every `write_*` appends
/// there. Every `read_*` consumes from the reader cursor. `get_*`/`set_*`
/// address absolute indices and move neither cursor.
///
/// Reads are all-or-nothing: a read that fails leaves the reader cursor
/// where it was before the call, so a failed decode never shifts what a
/// later read sees.
///
/// Ownership replaces manual reference counting: dropping the buffer
/// releases it. To share bytes across tasks, [`ByteBuf::freeze`] them into
/// a reference-counted [`Bytes`] and clone that.
#[derive(Debug, Clone, Default)]
pub struct ByteBuf {
    data: BytesMut,
    reader_index: usize,
    marked_reader_index: usize,
    direct: bool,
}

macro_rules! fixed_width {
    ($($ty:ty => $read:ident, $get:ident, $write:ident, $set:ident;)*) => {
        $(
            pub fn $read(&mut self) -> DecodeResult<$ty> {
                let value = self.$get(self.reader_index)?;
                self.reader_index += std::mem::size_of::<$ty>();
                Ok(value)
            }

            pub fn $get(&self, index: usize) -> DecodeResult<$ty> {
                let bytes = self.bytes_at(index, std::mem::size_of::<$ty>(), stringify!($ty))?;
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                Ok(<$ty>::from_be_bytes(raw))
            }

            pub fn $write(&mut self, value: $ty) {
                self.data.extend_from_slice(&value.to_be_bytes());
            }

            pub fn $set(&mut self, index: usize, value: $ty) -> EncodeResult<()> {
                self.patch(index, &value.to_be_bytes())
            }
        )*
    };
}

impl ByteBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_parts(BytesMut::with_capacity(capacity), false)
    }

    pub(crate) fn from_parts(data: BytesMut, direct: bool) -> Self {
        Self {
            data,
            reader_index: 0,
            marked_reader_index: 0,
            direct,
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::from(BytesMut::from(bytes))
    }

    // === Cursors ===

    pub fn reader_index(&self) -> usize {
        self.reader_index
    }

    pub fn writer_index(&self) -> usize {
        self.data.len()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn readable_bytes(&self) -> usize {
        self.data.len() - self.reader_index
    }

    pub fn is_readable(&self) -> bool {
        self.readable_bytes() > 0
    }

    /// Whether the buffer came from a direct (I/O-facing) allocation.
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    pub fn set_reader_index(&mut self, index: usize) -> DecodeResult<()> {
        if index > self.data.len() {
            return Err(DecodeError::IndexOutOfBounds {
                index,
                writer_index: self.data.len(),
            });
        }
        self.reader_index = index;
        Ok(())
    }

    pub fn skip_bytes(&mut self, n: usize) -> DecodeResult<()> {
        self.bytes_at(self.reader_index, n, "skipped bytes")?;
        self.reader_index += n;
        Ok(())
    }

    pub fn mark_reader_index(&mut self) {
        self.marked_reader_index = self.reader_index;
    }

    pub fn reset_reader_index(&mut self) {
        self.reader_index = self.marked_reader_index.min(self.data.len());
    }

    /// Drop everything after `writer_index`. Used to undo a partial write.
    pub fn truncate(&mut self, writer_index: usize) {
        self.data.truncate(writer_index);
        self.reader_index = self.reader_index.min(writer_index);
        self.marked_reader_index = self.marked_reader_index.min(writer_index);
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.reader_index = 0;
        self.marked_reader_index = 0;
    }

    /// Release the bytes before the reader cursor; both cursors shift left.
    pub fn discard_read_bytes(&mut self) {
        self.data.advance(self.reader_index);
        self.marked_reader_index = self.marked_reader_index.saturating_sub(self.reader_index);
        self.reader_index = 0;
    }

    /// The readable region, without consuming it.
    pub fn readable(&self) -> &[u8] {
        &self.data[self.reader_index..]
    }

    /// Run `read`, restoring the reader cursor if it fails.
    pub fn rewind_on_error<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> DecodeResult<T>,
    ) -> DecodeResult<T> {
        let start = self.reader_index;
        let result = read(self);
        if result.is_err() {
            self.reader_index = start;
        }
        result
    }

    fn bytes_at(&self, index: usize, len: usize, what: &'static str) -> DecodeResult<&[u8]> {
        let writer_index = self.data.len();
        if index > writer_index {
            return Err(DecodeError::IndexOutOfBounds { index, writer_index });
        }
        let available = writer_index - index;
        if available < len {
            return Err(DecodeError::NotEnoughData {
                what,
                needed: len,
                available,
            });
        }
        Ok(&self.data[index..index + len])
    }

    fn patch(&mut self, index: usize, bytes: &[u8]) -> EncodeResult<()> {
        let writer_index = self.data.len();
        let end = match index.checked_add(bytes.len()) {
            Some(end) if end <= writer_index => end,
            _ => {
                return Err(EncodeError::IndexOutOfBounds {
                    index,
                    len: bytes.len(),
                    writer_index,
                })
            }
        };
        self.data[index..end].copy_from_slice(bytes);
        Ok(())
    }

    // === Views ===

    /// An independent copy of the readable region with fresh cursors.
    pub fn copy(&self) -> ByteBuf {
        Self::from_parts(BytesMut::from(self.readable()), self.direct)
    }

    /// An independent copy of `len` bytes at `index`, with fresh cursors.
    pub fn slice(&self, index: usize, len: usize) -> DecodeResult<ByteBuf> {
        let bytes = self.bytes_at(index, len, "slice")?;
        Ok(Self::from_parts(BytesMut::from(bytes), self.direct))
    }

    /// Consume `len` readable bytes into a new buffer without copying.
    /// Already-read bytes are discarded first, so the mark is reset.
    pub fn read_slice(&mut self, len: usize) -> DecodeResult<ByteBuf> {
        self.bytes_at(self.reader_index, len, "slice")?;
        self.discard_read_bytes();
        self.marked_reader_index = 0;
        Ok(Self::from_parts(self.data.split_to(len), self.direct))
    }

    /// Move the whole readable region into a new buffer without copying,
    /// leaving this one empty.
    pub fn split_readable(&mut self) -> ByteBuf {
        let mut taken = self.data.split();
        taken.advance(self.reader_index);
        self.reader_index = 0;
        self.marked_reader_index = 0;
        Self::from_parts(taken, self.direct)
    }

    /// Freeze the readable region into shared, immutable bytes. Cloning the
    /// result retains it; dropping the last clone releases it.
    pub fn freeze(self) -> Bytes {
        let mut data = self.data;
        data.advance(self.reader_index);
        data.freeze()
    }

    /// The readable region as raw storage.
    pub fn into_inner(self) -> BytesMut {
        let mut data = self.data;
        data.advance(self.reader_index);
        data
    }

    // === Fixed-width primitives (big-endian) ===

    fixed_width! {
        u8 => read_u8, get_u8, write_u8, set_u8;
        i8 => read_i8, get_i8, write_i8, set_i8;
        u16 => read_u16, get_u16, write_u16, set_u16;
        i16 => read_i16, get_i16, write_i16, set_i16;
        u32 => read_u32, get_u32, write_u32, set_u32;
        i32 => read_i32, get_i32, write_i32, set_i32;
        u64 => read_u64, get_u64, write_u64, set_u64;
        i64 => read_i64, get_i64, write_i64, set_i64;
        f32 => read_f32, get_f32, write_f32, set_f32;
        f64 => read_f64, get_f64, write_f64, set_f64;
    }

    pub fn read_bool(&mut self) -> DecodeResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn get_bool(&self, index: usize) -> DecodeResult<bool> {
        Ok(self.get_u8(index)? != 0)
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn set_bool(&mut self, index: usize, value: bool) -> EncodeResult<()> {
        self.set_u8(index, value as u8)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn read_bytes(&mut self, len: usize) -> DecodeResult<Vec<u8>> {
        let bytes = self.bytes_at(self.reader_index, len, "bytes")?.to_vec();
        self.reader_index += len;
        Ok(bytes)
    }

    pub fn set_bytes(&mut self, index: usize, bytes: &[u8]) -> EncodeResult<()> {
        self.patch(index, bytes)
    }

    // === Variable-length integers ===

    /// Read an unsigned varint of at most `max_groups` 7-bit groups whose
    /// value must fit in `bits` bits.
    pub fn read_var_uint(
        &mut self,
        max_groups: usize,
        bits: u32,
        what: &'static str,
    ) -> DecodeResult<u64> {
        match scan_var_uint(self.readable(), max_groups, bits, what)? {
            Some((value, len)) => {
                self.reader_index += len;
                Ok(value)
            }
            None => Err(DecodeError::NotEnoughData {
                what,
                needed: self.readable_bytes() + 1,
                available: self.readable_bytes(),
            }),
        }
    }

    pub fn read_var_int(&mut self) -> DecodeResult<i32> {
        self.read_var_int_bounded(VAR_INT_MAX_GROUPS)
    }

    /// Read a VarInt that may use at most `max_groups` bytes.
    pub fn read_var_int_bounded(&mut self, max_groups: usize) -> DecodeResult<i32> {
        Ok(self.read_var_uint(max_groups, 32, "VarInt")? as u32 as i32)
    }

    pub fn read_var_long(&mut self) -> DecodeResult<i64> {
        Ok(self.read_var_uint(VAR_LONG_MAX_GROUPS, 64, "VarLong")? as i64)
    }

    /// Decode the VarInt at `index` without moving the reader cursor.
    /// Returns the value and its encoded length.
    pub fn get_var_int(&self, index: usize) -> DecodeResult<(i32, usize)> {
        let bytes = self.data.get(index..).ok_or(DecodeError::IndexOutOfBounds {
            index,
            writer_index: self.data.len(),
        })?;
        match scan_var_uint(bytes, VAR_INT_MAX_GROUPS, 32, "VarInt")? {
            Some((value, len)) => Ok((value as u32 as i32, len)),
            None => Err(DecodeError::NotEnoughData {
                what: "VarInt",
                needed: bytes.len() + 1,
                available: bytes.len(),
            }),
        }
    }

    pub fn write_var_int(&mut self, value: i32) {
        let mut value = value as u32;
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.data.put_u8(byte);
            if value == 0 {
                break;
            }
        }
    }

    pub fn write_var_long(&mut self, value: i64) {
        let mut value = value as u64;
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.data.put_u8(byte);
            if value == 0 {
                break;
            }
        }
    }

    /// Write a VarInt padded to exactly `width` bytes, so it can be patched
    /// in place later with [`ByteBuf::set_var_int_padded`].
    pub fn write_var_int_padded(&mut self, value: i32, width: usize) -> EncodeResult<()> {
        let encoded = padded_var_int(value, width)?;
        self.data.extend_from_slice(&encoded[..width]);
        Ok(())
    }

    /// Overwrite a padded VarInt of `width` bytes at `index`, typically a
    /// length prefix reserved before the payload was known.
    pub fn set_var_int_padded(&mut self, index: usize, value: i32, width: usize) -> EncodeResult<()> {
        let encoded = padded_var_int(value, width)?;
        self.patch(index, &encoded[..width])
    }

    // === Length-prefixed data ===

    /// Read a VarInt length and check it against `max` before anything is
    /// allocated for it.
    pub fn read_length(&mut self, what: &'static str, max: usize) -> DecodeResult<usize> {
        self.rewind_on_error(|buf| {
            let len = buf.read_var_int()?;
            if len < 0 {
                return Err(DecodeError::NegativeLength {
                    what,
                    len: len as i64,
                });
            }
            let len = len as usize;
            if len > max {
                return Err(DecodeError::TooLong { what, len, max });
            }
            Ok(len)
        })
    }

    fn write_length(&mut self, what: &'static str, len: usize) -> EncodeResult<()> {
        let len = i32::try_from(len).map_err(|_| EncodeError::LengthOverflow { what, len })?;
        self.write_var_int(len);
        Ok(())
    }

    pub fn read_byte_array(&mut self, max_len: usize) -> DecodeResult<Vec<u8>> {
        self.rewind_on_error(|buf| {
            let len = buf.read_length("byte array", max_len)?;
            buf.read_bytes(len)
        })
    }

    pub fn write_byte_array(&mut self, bytes: &[u8]) -> EncodeResult<()> {
        self.write_length("byte array", bytes.len())?;
        self.write_bytes(bytes);
        Ok(())
    }

    /// Consume everything that is left, failing if it is more than `max_len`.
    pub fn read_remaining_bytes(&mut self, max_len: usize) -> DecodeResult<Vec<u8>> {
        let len = self.readable_bytes();
        if len > max_len {
            return Err(DecodeError::TooLong {
                what: "remaining bytes",
                len,
                max: max_len,
            });
        }
        self.read_bytes(len)
    }

    /// Read a UTF-8 string of at most `max_chars` characters.
    pub fn read_string(&mut self, max_chars: usize) -> DecodeResult<String> {
        self.rewind_on_error(|buf| {
            let len = buf.read_length("string", max_chars.saturating_mul(4))?;
            let bytes = buf.read_bytes(len)?;
            let s = String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { what: "string" })?;
            let chars = s.chars().count();
            if chars > max_chars {
                return Err(DecodeError::TooLong {
                    what: "string",
                    len: chars,
                    max: max_chars,
                });
            }
            Ok(s)
        })
    }

    pub fn write_string(&mut self, s: &str) -> EncodeResult<()> {
        self.write_string_limited(s, MAX_STRING_LEN)
    }

    pub fn write_string_limited(&mut self, s: &str, max_chars: usize) -> EncodeResult<()> {
        let chars = s.chars().count();
        if chars > max_chars {
            return Err(EncodeError::StringTooLong {
                len: chars,
                max: max_chars,
            });
        }
        self.write_length("string", s.len())?;
        self.write_bytes(s.as_bytes());
        Ok(())
    }

    /// Read a VarInt count followed by that many elements.
    pub fn read_array<T>(
        &mut self,
        max_count: usize,
        mut read: impl FnMut(&mut Self) -> DecodeResult<T>,
    ) -> DecodeResult<Vec<T>> {
        self.rewind_on_error(|buf| {
            let count = buf.read_length("array", max_count)?;
            let mut items = Vec::with_capacity(count.min(buf.readable_bytes()));
            for _ in 0..count {
                items.push(read(buf)?);
            }
            Ok(items)
        })
    }

    pub fn write_array<T>(
        &mut self,
        items: &[T],
        mut write: impl FnMut(&mut Self, &T) -> EncodeResult<()>,
    ) -> EncodeResult<()> {
        self.write_length("array", items.len())?;
        for item in items {
            write(self, item)?;
        }
        Ok(())
    }

    /// Read a boolean presence flag followed by the value when present.
    pub fn read_option<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> DecodeResult<T>,
    ) -> DecodeResult<Option<T>> {
        self.rewind_on_error(|buf| {
            if buf.read_bool()? {
                read(buf).map(Some)
            } else {
                Ok(None)
            }
        })
    }

    pub fn write_option<T>(
        &mut self,
        value: Option<&T>,
        write: impl FnOnce(&mut Self, &T) -> EncodeResult<()>,
    ) -> EncodeResult<()> {
        self.write_bool(value.is_some());
        match value {
            Some(value) => write(self, value),
            None => Ok(()),
        }
    }

    pub(crate) fn data_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    pub(crate) fn advance_reader(&mut self, n: usize) {
        self.reader_index += n;
    }
}

impl From<BytesMut> for ByteBuf {
    fn from(data: BytesMut) -> Self {
        Self::from_parts(data, false)
    }
}

impl From<Vec<u8>> for ByteBuf {
    fn from(data: Vec<u8>) -> Self {
        Self::from(BytesMut::from(&data[..]))
    }
}

impl AsRef<[u8]> for ByteBuf {
    fn as_ref(&self) -> &[u8] {
        self.readable()
    }
}

/// Decode an unsigned varint from the front of `bytes`.
///
/// Returns `Ok(None)` when `bytes` ends before the varint does, so callers
/// reading from a stream can wait for more input.
pub fn scan_var_uint(
    bytes: &[u8],
    max_groups: usize,
    bits: u32,
    what: &'static str,
) -> DecodeResult<Option<(u64, usize)>> {
    let max_groups = max_groups.min(bits.div_ceil(7) as usize);
    let mut value: u64 = 0;
    for (group, &byte) in bytes.iter().take(max_groups).enumerate() {
        let payload = (byte & 0x7F) as u64;
        let shift = 7 * group as u32;
        if shift + 7 > bits && payload >> (bits - shift) != 0 {
            return Err(DecodeError::VarIntOverflow { what, bits });
        }
        value |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, group + 1)));
        }
    }
    if bytes.len() >= max_groups {
        return Err(DecodeError::VarIntTooLong { what, max_groups });
    }
    Ok(None)
}

/// Calculate the byte length of a VarInt.
pub fn var_int_len(value: i32) -> usize {
    let bits = 32 - (value as u32).leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Calculate the byte length of a VarLong.
pub fn var_long_len(value: i64) -> usize {
    let bits = 64 - (value as u64).leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

fn padded_var_int(value: i32, width: usize) -> EncodeResult<[u8; VAR_INT_MAX_GROUPS]> {
    if width == 0 || width > VAR_INT_MAX_GROUPS || var_int_len(value) > width {
        return Err(EncodeError::VarIntTooWide {
            value: value as i64,
            width,
        });
    }
    let mut out = [0u8; VAR_INT_MAX_GROUPS];
    let mut rest = value as u32;
    for (i, byte) in out.iter_mut().enumerate().take(width) {
        *byte = (rest & 0x7F) as u8;
        rest >>= 7;
        if i + 1 < width {
            *byte |= 0x80;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_varint_roundtrip() {
        let test_cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (255, vec![0xFF, 0x01]),
            (25565, vec![0xDD, 0xC7, 0x01]),
            (2097151, vec![0xFF, 0xFF, 0x7F]),
            (i32::MAX, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]),
            (-1, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
            (i32::MIN, vec![0x80, 0x80, 0x80, 0x80, 0x08]),
        ];

        for (value, expected_bytes) in test_cases {
            let mut buf = ByteBuf::new();
            buf.write_var_int(value);
            assert_eq!(buf.readable(), &expected_bytes[..], "write_var_int({}) failed", value);
            assert_eq!(var_int_len(value), expected_bytes.len());

            let mut buf = ByteBuf::from_slice(&expected_bytes);
            assert_eq!(buf.read_var_int().unwrap(), value, "read_var_int for {} failed", value);
            assert!(!buf.is_readable());
        }
    }

    #[test]
    fn test_varlong_boundaries() {
        for value in [0, 127, 128, i32::MAX as i64, i64::MAX, -1, i64::MIN] {
            let mut buf = ByteBuf::new();
            buf.write_var_long(value);
            assert_eq!(buf.writer_index(), var_long_len(value));
            assert_eq!(buf.read_var_long().unwrap(), value);
        }
        let mut buf = ByteBuf::new();
        buf.write_var_long(-1);
        assert_eq!(buf.writer_index(), 10);
    }

    #[test]
    fn test_varint_too_many_groups() {
        let mut buf = ByteBuf::from_slice(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(matches!(
            buf.read_var_int(),
            Err(DecodeError::VarIntTooLong { max_groups: 5, .. })
        ));
        assert_eq!(buf.reader_index(), 0);
    }

    #[test]
    fn test_varint_overflowing_last_group() {
        let mut buf = ByteBuf::from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert!(matches!(
            buf.read_var_int(),
            Err(DecodeError::VarIntOverflow { bits: 32, .. })
        ));
        let mut buf = ByteBuf::from_slice(&[0xFF; 9].iter().copied().chain([0x02]).collect::<Vec<_>>());
        assert!(matches!(
            buf.read_var_long(),
            Err(DecodeError::VarIntOverflow { bits: 64, .. })
        ));
    }

    #[test]
    fn test_varint_bounded_groups() {
        let mut buf = ByteBuf::new();
        buf.write_var_int(2097152);
        assert!(matches!(
            buf.read_var_int_bounded(3),
            Err(DecodeError::VarIntTooLong { max_groups: 3, .. })
        ));
        assert_eq!(buf.read_var_int().unwrap(), 2097152);
    }

    #[test]
    fn test_truncated_varint_is_not_enough_data() {
        let mut buf = ByteBuf::from_slice(&[0x80, 0x80]);
        assert!(matches!(buf.read_var_int(), Err(DecodeError::NotEnoughData { .. })));
        assert_eq!(scan_var_uint(&[0x80, 0x80], 5, 32, "VarInt").unwrap(), None);
    }

    #[test]
    fn test_read_past_writer_index() {
        let mut buf = ByteBuf::new();
        buf.write_u16(7);
        assert!(matches!(
            buf.read_i32(),
            Err(DecodeError::NotEnoughData {
                needed: 4,
                available: 2,
                ..
            })
        ));
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.read_u16().unwrap(), 7);
    }

    #[test]
    fn test_indexed_access_does_not_move_cursors() {
        let mut buf = ByteBuf::new();
        buf.write_i32(0);
        buf.write_u8(9);
        buf.set_i32(0, 0x0102_0304).unwrap();
        assert_eq!(buf.get_i32(0).unwrap(), 0x0102_0304);
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.writer_index(), 5);
        assert!(buf.set_i64(0, 1).is_err());
        assert_eq!(buf.read_i32().unwrap(), 0x0102_0304);
    }

    #[test]
    fn test_patch_padded_length_prefix() {
        let mut buf = ByteBuf::new();
        let prefix_at = buf.writer_index();
        buf.write_var_int_padded(0, 3).unwrap();
        buf.write_string("hello").unwrap();
        let body_len = buf.writer_index() - prefix_at - 3;
        buf.set_var_int_padded(prefix_at, body_len as i32, 3).unwrap();

        assert_eq!(buf.get_var_int(prefix_at).unwrap(), (6, 3));
        assert_eq!(buf.read_var_int().unwrap(), 6);
        assert_eq!(buf.read_string(16).unwrap(), "hello");
        assert!(buf.write_var_int_padded(2097152, 3).is_err());
    }

    #[test]
    fn test_string_limits() {
        let mut buf = ByteBuf::new();
        buf.write_string("Hello, Quarry!").unwrap();
        assert!(matches!(
            buf.read_string(4),
            Err(DecodeError::TooLong { what: "string", .. })
        ));
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.read_string(32).unwrap(), "Hello, Quarry!");

        assert!(matches!(
            ByteBuf::new().write_string_limited("too long", 3),
            Err(EncodeError::StringTooLong { len: 8, max: 3 })
        ));
    }

    #[test]
    fn test_invalid_utf8_rewinds() {
        let mut buf = ByteBuf::new();
        buf.write_byte_array(&[0xC3, 0x28]).unwrap();
        assert!(matches!(buf.read_string(16), Err(DecodeError::InvalidUtf8 { .. })));
        assert_eq!(buf.reader_index(), 0);
    }

    #[test]
    fn test_oversized_length_rejected_before_allocation() {
        // Declares i32::MAX bytes but carries none.
        let mut buf = ByteBuf::new();
        buf.write_var_int(i32::MAX);
        assert!(matches!(
            buf.read_byte_array(1024),
            Err(DecodeError::TooLong {
                len: 2147483647,
                max: 1024,
                ..
            })
        ));
        let mut buf = ByteBuf::new();
        buf.write_var_int(-5);
        assert!(matches!(
            buf.read_byte_array(1024),
            Err(DecodeError::NegativeLength { len: -5, .. })
        ));
    }

    #[test]
    fn test_array_and_option() {
        let mut buf = ByteBuf::new();
        buf.write_array(&[1i64, -2, 3], |b, v| {
            b.write_var_long(*v);
            Ok(())
        })
        .unwrap();
        buf.write_option(Some(&"x"), |b, s| b.write_string(s)).unwrap();
        buf.write_option::<&str>(None, |b, s| b.write_string(s)).unwrap();

        assert_eq!(buf.read_array(8, |b| b.read_var_long()).unwrap(), vec![1, -2, 3]);
        assert_eq!(buf.read_option(|b| b.read_string(4)).unwrap().as_deref(), Some("x"));
        assert_eq!(buf.read_option(|b| b.read_string(4)).unwrap(), None);
    }

    #[test]
    fn test_views_have_own_cursors() {
        let mut buf = ByteBuf::new();
        buf.write_bytes(&[1, 2, 3, 4, 5]);
        buf.read_u8().unwrap();

        let mut copy = buf.copy();
        assert_eq!(copy.readable(), &[2, 3, 4, 5]);
        copy.set_u8(0, 9).unwrap();
        assert_eq!(buf.get_u8(1).unwrap(), 2);

        let slice = buf.slice(3, 2).unwrap();
        assert_eq!(slice.readable(), &[4, 5]);
        assert_eq!(buf.reader_index(), 1);

        let head = buf.read_slice(2).unwrap();
        assert_eq!(head.readable(), &[2, 3]);
        assert_eq!(buf.readable(), &[4, 5]);

        let rest = buf.split_readable();
        assert_eq!(rest.readable(), &[4, 5]);
        assert!(!buf.is_readable());
    }

    #[test]
    fn test_slice_outside_writer_index() {
        let buf = ByteBuf::from_slice(&[1, 2, 3]);
        assert!(matches!(
            buf.slice(10, 0),
            Err(DecodeError::IndexOutOfBounds {
                index: 10,
                writer_index: 3
            })
        ));
        assert!(matches!(buf.get_u8(4), Err(DecodeError::IndexOutOfBounds { .. })));
        assert!(buf.slice(3, 0).unwrap().readable().is_empty());
        assert!(matches!(buf.slice(2, 2), Err(DecodeError::NotEnoughData { .. })));
    }

    #[test]
    fn test_freeze_shares_readable_region() {
        let mut buf = ByteBuf::new();
        buf.write_bytes(b"skip-keep");
        buf.skip_bytes(5).unwrap();
        let shared = buf.freeze();
        let retained = shared.clone();
        drop(shared);
        assert_eq!(&retained[..], b"keep");
    }

    #[test]
    fn test_mark_and_discard() {
        let mut buf = ByteBuf::new();
        buf.write_bytes(&[1, 2, 3, 4]);
        buf.read_u8().unwrap();
        buf.mark_reader_index();
        buf.read_u16().unwrap();
        buf.reset_reader_index();
        assert_eq!(buf.read_u8().unwrap(), 2);
        buf.discard_read_bytes();
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.readable(), &[3, 4]);
    }

    proptest! {
        #[test]
        fn var_int_roundtrip(value in any::<i32>()) {
            let mut buf = ByteBuf::new();
            buf.write_var_int(value);
            prop_assert_eq!(buf.writer_index(), var_int_len(value));
            prop_assert_eq!(buf.read_var_int().unwrap(), value);
        }

        #[test]
        fn var_long_roundtrip(value in any::<i64>()) {
            let mut buf = ByteBuf::new();
            buf.write_var_long(value);
            prop_assert_eq!(buf.writer_index(), var_long_len(value));
            prop_assert_eq!(buf.read_var_long().unwrap(), value);
        }

        #[test]
        fn primitives_roundtrip(
            a in any::<bool>(), b in any::<i8>(), c in any::<u16>(), d in any::<i16>(),
            e in any::<i32>(), f in any::<i64>(), g in any::<f32>(), h in any::<f64>(),
        ) {
            let mut buf = ByteBuf::new();
            buf.write_bool(a);
            buf.write_i8(b);
            buf.write_u16(c);
            buf.write_i16(d);
            buf.write_i32(e);
            buf.write_i64(f);
            buf.write_f32(g);
            buf.write_f64(h);
            prop_assert_eq!(buf.read_bool().unwrap(), a);
            prop_assert_eq!(buf.read_i8().unwrap(), b);
            prop_assert_eq!(buf.read_u16().unwrap(), c);
            prop_assert_eq!(buf.read_i16().unwrap(), d);
            prop_assert_eq!(buf.read_i32().unwrap(), e);
            prop_assert_eq!(buf.read_i64().unwrap(), f);
            prop_assert_eq!(buf.read_f32().unwrap().to_bits(), g.to_bits());
            prop_assert_eq!(buf.read_f64().unwrap().to_bits(), h.to_bits());
            prop_assert!(!buf.is_readable());
        }

        #[test]
        fn string_roundtrip(s in "\\PC{0,64}") {
            let mut buf = ByteBuf::new();
            buf.write_string(&s).unwrap();
            prop_assert_eq!(buf.read_string(64).unwrap(), s);
        }
    }
}
