use std::any::{Any, TypeId};
use std::fmt::{self, Debug};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::buffer::ByteBuf;
use crate::codec::{Decode, Encode};
use crate::error::{DecodeResult, EncodeError, EncodeResult};

/// Any value that crosses the wire boundary.
///
/// Implemented for every `'static` type that is `Send + Sync + Debug`, so
/// catalogue types never implement it by hand. Work with packets through the
/// helpers on `dyn Packet`; on a `Box<dyn Packet>` pass `&*packet` so the
/// concrete type, not the box, is inspected.
pub trait Packet: Any + Send + Sync + Debug + 'static {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;

    fn type_name_of(&self) -> &'static str;
}

impl<T: Any + Send + Sync + Debug> Packet for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn type_name_of(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl dyn Packet {
    pub fn packet_type(&self) -> PacketType {
        PacketType {
            id: Any::type_id(self.as_any()),
            name: self.type_name_of(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name_of()
    }

    pub fn is<T: Packet>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    pub fn downcast_mut<T: Packet>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }

    /// Take ownership of the concrete value, or get the box back unchanged.
    pub fn downcast<T: Packet>(self: Box<Self>) -> Result<Box<T>, Box<dyn Packet>> {
        if !self.is::<T>() {
            return Err(self);
        }
        match self.into_any().downcast::<T>() {
            Ok(packet) => Ok(packet),
            Err(_) => unreachable!("concrete type checked above"),
        }
    }
}

/// The runtime identity of a packet type, used as a registry key.
#[derive(Clone, Copy)]
pub struct PacketType {
    id: TypeId,
    name: &'static str,
}

impl PacketType {
    pub fn of<T: Packet>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for PacketType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PacketType {}

impl Hash for PacketType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Debug for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Turns the payload of one opcode into a packet value.
pub trait PacketDecoder: Send + Sync {
    fn decode(&self, buf: &mut ByteBuf) -> DecodeResult<Box<dyn Packet>>;
}

impl<F> PacketDecoder for F
where
    F: Fn(&mut ByteBuf) -> DecodeResult<Box<dyn Packet>> + Send + Sync,
{
    fn decode(&self, buf: &mut ByteBuf) -> DecodeResult<Box<dyn Packet>> {
        self(buf)
    }
}

/// Writes the payload of a packet. One encoder may serve several packet
/// types that share an opcode.
pub trait PacketEncoder: Send + Sync {
    fn encode(&self, packet: &dyn Packet, buf: &mut ByteBuf) -> EncodeResult<()>;
}

impl<F> PacketEncoder for F
where
    F: Fn(&dyn Packet, &mut ByteBuf) -> EncodeResult<()> + Send + Sync,
{
    fn encode(&self, packet: &dyn Packet, buf: &mut ByteBuf) -> EncodeResult<()> {
        self(packet, buf)
    }
}

/// Decodes `T` through its [`Decode`] impl.
pub struct TypedDecoder<T>(PhantomData<fn() -> T>);

impl<T> TypedDecoder<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypedDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Packet + Decode> PacketDecoder for TypedDecoder<T> {
    fn decode(&self, buf: &mut ByteBuf) -> DecodeResult<Box<dyn Packet>> {
        Ok(Box::new(T::decode(buf)?))
    }
}

/// Encodes `T` through its [`Encode`] impl; any other type is rejected.
pub struct TypedEncoder<T>(PhantomData<fn(&T)>);

impl<T> TypedEncoder<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypedEncoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Packet + Encode> PacketEncoder for TypedEncoder<T> {
    fn encode(&self, packet: &dyn Packet, buf: &mut ByteBuf) -> EncodeResult<()> {
        downcast_for::<T>(packet)?.encode(buf)
    }
}

/// Decodes `T` with a plain function instead of a [`Decode`] impl.
pub struct FnDecoder<T, F> {
    read: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> FnDecoder<T, F>
where
    F: Fn(&mut ByteBuf) -> DecodeResult<T>,
{
    pub fn new(read: F) -> Self {
        Self {
            read,
            _marker: PhantomData,
        }
    }
}

impl<T, F> PacketDecoder for FnDecoder<T, F>
where
    T: Packet,
    F: Fn(&mut ByteBuf) -> DecodeResult<T> + Send + Sync,
{
    fn decode(&self, buf: &mut ByteBuf) -> DecodeResult<Box<dyn Packet>> {
        Ok(Box::new((self.read)(buf)?))
    }
}

/// Encodes `T` with a plain function instead of an [`Encode`] impl.
pub struct FnEncoder<T, F> {
    write: F,
    _marker: PhantomData<fn(&T)>,
}

impl<T, F> FnEncoder<T, F>
where
    F: Fn(&T, &mut ByteBuf) -> EncodeResult<()>,
{
    pub fn new(write: F) -> Self {
        Self {
            write,
            _marker: PhantomData,
        }
    }
}

impl<T, F> PacketEncoder for FnEncoder<T, F>
where
    T: Packet,
    F: Fn(&T, &mut ByteBuf) -> EncodeResult<()> + Send + Sync,
{
    fn encode(&self, packet: &dyn Packet, buf: &mut ByteBuf) -> EncodeResult<()> {
        (self.write)(downcast_for::<T>(packet)?, buf)
    }
}

fn downcast_for<T: Packet>(packet: &dyn Packet) -> EncodeResult<&T> {
    packet
        .downcast_ref::<T>()
        .ok_or_else(|| EncodeError::WrongPacketType {
            expected: std::any::type_name::<T>(),
            actual: packet.type_name(),
        })
}
