use bytes::Buf;

use crate::error::{NbtError, NbtResult};
use crate::tag::TagType;
use crate::value::NbtValue;

/// Ceilings applied while reading a tree from untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NbtLimits {
    /// Maximum nesting of compounds and lists.
    pub max_depth: usize,
    /// Maximum number of bytes the whole tree may occupy on the wire.
    pub max_bytes: usize,
}

impl NbtLimits {
    pub const fn new(max_depth: usize, max_bytes: usize) -> Self {
        Self {
            max_depth,
            max_bytes,
        }
    }
}

impl Default for NbtLimits {
    fn default() -> Self {
        Self::new(512, 2 * 1024 * 1024)
    }
}

/// Read a network-form tag: a type byte followed by a nameless payload.
/// A leading end tag means the tree is absent.
pub fn read_network<B: Buf>(buf: &mut B, limits: NbtLimits) -> NbtResult<Option<NbtValue>> {
    let mut reader = LimitedReader::new(buf, limits);
    match reader.tag()? {
        TagType::End => Ok(None),
        tag => reader.payload(tag).map(Some),
    }
}

/// Read a file-form root: type byte, name, then a compound payload.
pub fn read_named<B: Buf>(buf: &mut B, limits: NbtLimits) -> NbtResult<(String, NbtValue)> {
    let mut reader = LimitedReader::new(buf, limits);
    let tag = reader.tag()?;
    if tag != TagType::Compound {
        return Err(NbtError::RootNotCompound(tag.id()));
    }
    let name = reader.string()?;
    let value = reader.payload(tag)?;
    Ok((name, value))
}

/// Counts every byte it consumes and tracks nesting, failing as soon as
/// either ceiling is crossed. Lengths are charged before anything is
/// allocated for them.
struct LimitedReader<'a, B> {
    buf: &'a mut B,
    limits: NbtLimits,
    used: usize,
    depth: usize,
}

impl<'a, B: Buf> LimitedReader<'a, B> {
    fn new(buf: &'a mut B, limits: NbtLimits) -> Self {
        Self {
            buf,
            limits,
            used: 0,
            depth: 0,
        }
    }

    fn charge(&mut self, n: usize) -> NbtResult<()> {
        let used = self.used.saturating_add(n);
        if used > self.limits.max_bytes {
            return Err(NbtError::SizeExceeded {
                max: self.limits.max_bytes,
            });
        }
        if self.buf.remaining() < n {
            return Err(NbtError::NotEnoughData {
                needed: n,
                available: self.buf.remaining(),
            });
        }
        self.used = used;
        Ok(())
    }

    fn u8(&mut self) -> NbtResult<u8> {
        self.charge(1)?;
        Ok(self.buf.get_u8())
    }

    fn tag(&mut self) -> NbtResult<TagType> {
        TagType::try_from(self.u8()?)
    }

    fn length(&mut self) -> NbtResult<usize> {
        self.charge(4)?;
        let len = self.buf.get_i32();
        if len < 0 {
            return Err(NbtError::NegativeLength(len));
        }
        Ok(len as usize)
    }

    fn string(&mut self) -> NbtResult<String> {
        self.charge(2)?;
        let len = self.buf.get_u16() as usize;
        self.charge(len)?;
        let mut bytes = vec![0u8; len];
        self.buf.copy_to_slice(&mut bytes);
        String::from_utf8(bytes).map_err(|_| NbtError::InvalidUtf8)
    }

    fn enter(&mut self) -> NbtResult<()> {
        self.depth += 1;
        if self.depth > self.limits.max_depth {
            return Err(NbtError::DepthExceeded {
                max: self.limits.max_depth,
            });
        }
        Ok(())
    }

    fn payload(&mut self, tag: TagType) -> NbtResult<NbtValue> {
        Ok(match tag {
            TagType::Byte => {
                self.charge(1)?;
                NbtValue::Byte(self.buf.get_i8())
            }
            TagType::Short => {
                self.charge(2)?;
                NbtValue::Short(self.buf.get_i16())
            }
            TagType::Int => {
                self.charge(4)?;
                NbtValue::Int(self.buf.get_i32())
            }
            TagType::Long => {
                self.charge(8)?;
                NbtValue::Long(self.buf.get_i64())
            }
            TagType::Float => {
                self.charge(4)?;
                NbtValue::Float(self.buf.get_f32())
            }
            TagType::Double => {
                self.charge(8)?;
                NbtValue::Double(self.buf.get_f64())
            }
            TagType::ByteArray => {
                let len = self.length()?;
                self.charge(len)?;
                NbtValue::ByteArray((0..len).map(|_| self.buf.get_i8()).collect())
            }
            TagType::String => NbtValue::String(self.string()?),
            TagType::List => {
                self.enter()?;
                let elem = self.tag()?;
                self.charge(4)?;
                let len = self.buf.get_i32();
                if len < 0 {
                    return Err(NbtError::NegativeLength(len));
                }
                if elem == TagType::End && len > 0 {
                    return Err(NbtError::NonEmptyEndList(len));
                }
                // Every element occupies at least one byte; cap the
                // preallocation by what the input can actually hold.
                let mut items = Vec::with_capacity((len as usize).min(self.buf.remaining()));
                for _ in 0..len {
                    items.push(self.payload(elem)?);
                }
                self.depth -= 1;
                NbtValue::List(items)
            }
            TagType::Compound => {
                self.enter()?;
                let mut entries = Vec::new();
                loop {
                    let tag = self.tag()?;
                    if tag == TagType::End {
                        break;
                    }
                    let name = self.string()?;
                    let value = self.payload(tag)?;
                    entries.push((name, value));
                }
                self.depth -= 1;
                NbtValue::Compound(entries)
            }
            TagType::IntArray => {
                let len = self.length()?;
                self.charge(len.saturating_mul(4))?;
                NbtValue::IntArray((0..len).map(|_| self.buf.get_i32()).collect())
            }
            TagType::LongArray => {
                let len = self.length()?;
                self.charge(len.saturating_mul(8))?;
                NbtValue::LongArray((0..len).map(|_| self.buf.get_i64()).collect())
            }
            TagType::End => return Err(NbtError::UnknownTag(TagType::End.id())),
        })
    }
}
