use quarry_nbt::{NbtLimits, NbtValue};
use quarry_types::{BlockPos, Identifier, ItemStack, Vec3d, Vec3f};
use uuid::Uuid;

use crate::buffer::{ByteBuf, MAX_STRING_LEN};
use crate::error::{DecodeResult, EncodeError, EncodeResult};

/// A value that can be read from the wire.
pub trait Decode: Sized {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self>;
}

/// A value that can be written to the wire.
pub trait Encode {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()>;
}

/// An `i32` carried as a VarInt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarInt(pub i32);

/// An `i64` carried as a VarLong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarLong(pub i64);

impl ByteBuf {
    /// Read a UUID as two big-endian longs, most significant first.
    pub fn read_uuid(&mut self) -> DecodeResult<Uuid> {
        self.rewind_on_error(|buf| {
            let most = buf.read_u64()? as u128;
            let least = buf.read_u64()? as u128;
            Ok(Uuid::from_u128((most << 64) | least))
        })
    }

    pub fn write_uuid(&mut self, uuid: &Uuid) {
        let bits = uuid.as_u128();
        self.write_u64((bits >> 64) as u64);
        self.write_u64(bits as u64);
    }

    pub fn read_block_pos(&mut self) -> DecodeResult<BlockPos> {
        Ok(BlockPos::decode(self.read_u64()?))
    }

    pub fn get_block_pos(&self, index: usize) -> DecodeResult<BlockPos> {
        Ok(BlockPos::decode(self.get_u64(index)?))
    }

    /// Write a packed block position. Coordinates outside the packed field
    /// widths are rejected instead of being silently wrapped.
    pub fn write_block_pos(&mut self, pos: &BlockPos) -> EncodeResult<()> {
        if !pos.is_packable() {
            return Err(EncodeError::BlockPosOutOfRange {
                x: pos.x,
                y: pos.y,
                z: pos.z,
            });
        }
        self.write_u64(pos.encode());
        Ok(())
    }

    pub fn read_vec3d(&mut self) -> DecodeResult<Vec3d> {
        self.rewind_on_error(|buf| Ok(Vec3d::new(buf.read_f64()?, buf.read_f64()?, buf.read_f64()?)))
    }

    pub fn write_vec3d(&mut self, v: &Vec3d) {
        self.write_f64(v.x);
        self.write_f64(v.y);
        self.write_f64(v.z);
    }

    pub fn read_vec3f(&mut self) -> DecodeResult<Vec3f> {
        self.rewind_on_error(|buf| Ok(Vec3f::new(buf.read_f32()?, buf.read_f32()?, buf.read_f32()?)))
    }

    pub fn write_vec3f(&mut self, v: &Vec3f) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    /// Read a namespaced key; a bare name lands in the default namespace.
    pub fn read_identifier(&mut self) -> DecodeResult<Identifier> {
        self.rewind_on_error(|buf| {
            let raw = buf.read_string(MAX_STRING_LEN)?;
            Ok(Identifier::parse(&raw)?)
        })
    }

    pub fn write_identifier(&mut self, id: &Identifier) -> EncodeResult<()> {
        self.write_string(&id.to_wire_string())
    }

    /// Read an optional network NBT tree under `limits`. A leading end tag
    /// means absent. The reader cursor only moves if the whole tree parses.
    pub fn read_nbt(&mut self, limits: NbtLimits) -> DecodeResult<Option<NbtValue>> {
        let mut view = self.readable();
        let before = view.len();
        let value = quarry_nbt::read_network(&mut view, limits)?;
        let consumed = before - view.len();
        self.advance_reader(consumed);
        Ok(value)
    }

    /// Write an optional network NBT tree. Nothing is written if the tree
    /// cannot be represented.
    pub fn write_nbt(&mut self, value: Option<&NbtValue>) -> EncodeResult<()> {
        quarry_nbt::write_network(value, self.data_mut())?;
        Ok(())
    }

    /// Read an optional item stack: presence flag, item id, count, then the
    /// stack's NBT data carried opaquely.
    pub fn read_item_stack(&mut self, limits: NbtLimits) -> DecodeResult<Option<ItemStack>> {
        self.read_option(|buf| {
            let item_id = buf.read_var_int()?;
            let count = buf.read_i8()?;
            let tag = buf.read_nbt(limits)?;
            Ok(ItemStack {
                item_id,
                count,
                tag,
            })
        })
    }

    pub fn write_item_stack(&mut self, stack: Option<&ItemStack>) -> EncodeResult<()> {
        let start = self.writer_index();
        self.write_option(stack, |buf, stack| {
            buf.write_var_int(stack.item_id);
            buf.write_i8(stack.count);
            buf.write_nbt(stack.tag.as_ref())
        })
        .inspect_err(|_| self.truncate(start))
    }
}

macro_rules! primitive_codec {
    ($($ty:ty => $read:ident, $write:ident;)*) => {
        $(
            impl Decode for $ty {
                fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
                    buf.$read()
                }
            }

            impl Encode for $ty {
                fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
                    buf.$write(*self);
                    Ok(())
                }
            }
        )*
    };
}

primitive_codec! {
    bool => read_bool, write_bool;
    u8 => read_u8, write_u8;
    i8 => read_i8, write_i8;
    u16 => read_u16, write_u16;
    i16 => read_i16, write_i16;
    i32 => read_i32, write_i32;
    i64 => read_i64, write_i64;
    f32 => read_f32, write_f32;
    f64 => read_f64, write_f64;
}

impl Decode for VarInt {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        buf.read_var_int().map(VarInt)
    }
}

impl Encode for VarInt {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_var_int(self.0);
        Ok(())
    }
}

impl Decode for VarLong {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        buf.read_var_long().map(VarLong)
    }
}

impl Encode for VarLong {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_var_long(self.0);
        Ok(())
    }
}

impl Decode for String {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        buf.read_string(MAX_STRING_LEN)
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_string(self)
    }
}

impl Decode for Uuid {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        buf.read_uuid()
    }
}

impl Encode for Uuid {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_uuid(self);
        Ok(())
    }
}

impl Decode for BlockPos {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        buf.read_block_pos()
    }
}

impl Encode for BlockPos {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_block_pos(self)
    }
}

impl Decode for Vec3d {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        buf.read_vec3d()
    }
}

impl Encode for Vec3d {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_vec3d(self);
        Ok(())
    }
}

impl Decode for Vec3f {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        buf.read_vec3f()
    }
}

impl Encode for Vec3f {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_vec3f(self);
        Ok(())
    }
}

impl Decode for Identifier {
    fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
        buf.read_identifier()
    }
}

impl Encode for Identifier {
    fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
        buf.write_identifier(self)
    }
}
