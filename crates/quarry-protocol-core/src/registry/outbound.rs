use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use super::{opcode_index, Direction, OutboundProcessor};
use crate::buffer::ByteBuf;
use crate::codec::Encode;
use crate::error::{EncodeResult, ProtocolError, RegistryError};
use crate::packet::{FnEncoder, Packet, PacketEncoder, PacketType, TypedEncoder};

struct TypeSlot<C> {
    packet_type: PacketType,
    opcode: Option<i32>,
    processors: Vec<OutboundProcessor<C>>,
}

impl<C> TypeSlot<C> {
    fn new(packet_type: PacketType) -> Self {
        Self {
            packet_type,
            opcode: None,
            processors: Vec::new(),
        }
    }
}

/// Collects outbound registrations for one protocol state.
///
/// Several packet types may share one opcode and one encoder:
///
/// ```
/// # use quarry_protocol_core::{ByteBuf, Packet, PacketType, OutboundRegistry};
/// #[derive(Debug)]
/// struct Chat(String);
/// #[derive(Debug)]
/// struct ActionBar(String);
///
/// let mut builder = OutboundRegistry::<()>::builder();
/// builder
///     .bind()
///     .encoder(|packet: &dyn Packet, buf: &mut ByteBuf| {
///         let text = match (packet.downcast_ref::<Chat>(), packet.downcast_ref::<ActionBar>()) {
///             (Some(chat), _) => &chat.0,
///             (_, Some(bar)) => &bar.0,
///             _ => unreachable!(),
///         };
///         buf.write_string(text)
///     })
///     .accept_all([PacketType::of::<Chat>(), PacketType::of::<ActionBar>()]);
/// let registry = builder.build().unwrap();
/// assert_eq!(registry.opcode_of::<ActionBar>(), Some(0));
/// ```
pub struct OutboundBuilder<C> {
    encoders: Vec<Option<Arc<dyn PacketEncoder>>>,
    types: HashMap<TypeId, TypeSlot<C>>,
    errors: Vec<RegistryError>,
}

impl<C: 'static> OutboundBuilder<C> {
    pub fn new() -> Self {
        Self {
            encoders: Vec::new(),
            types: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn next_opcode(&self) -> i32 {
        self.encoders.len() as i32
    }

    /// Reserve the next opcode.
    pub fn bind(&mut self) -> OutboundOpcode<'_, C> {
        let opcode = self.next_opcode();
        self.encoders.push(None);
        OutboundOpcode {
            builder: self,
            opcode,
        }
    }

    /// Reserve the next opcode, asserting that it is `opcode`.
    pub fn bind_at(&mut self, opcode: i32) -> OutboundOpcode<'_, C> {
        let expected = self.next_opcode();
        if opcode != expected {
            self.errors.push(RegistryError::OpcodeOutOfOrder {
                direction: Direction::Outbound,
                requested: opcode,
                expected,
            });
        }
        self.bind()
    }

    /// Attach processors to a type regardless of which opcode it sends on.
    pub fn packet<T: Packet>(&mut self) -> OutboundPacket<'_, C, T> {
        self.types
            .entry(TypeId::of::<T>())
            .or_insert_with(|| TypeSlot::new(PacketType::of::<T>()));
        OutboundPacket {
            builder: self,
            _marker: PhantomData,
        }
    }

    pub fn build(self) -> Result<OutboundRegistry<C>, RegistryError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        Ok(OutboundRegistry {
            encoders: self.encoders,
            types: self.types,
        })
    }

    fn accept(&mut self, opcode: i32, packet_type: PacketType) {
        if self.encoders[opcode as usize].is_none() {
            self.errors.push(RegistryError::MissingEncoder {
                opcode,
                type_name: packet_type.name(),
            });
            return;
        }
        let slot = self
            .types
            .entry(packet_type.id())
            .or_insert_with(|| TypeSlot::new(packet_type));
        match slot.opcode {
            Some(first) if first != opcode => self.errors.push(RegistryError::TypeOnTwoOpcodes {
                direction: Direction::Outbound,
                type_name: packet_type.name(),
                first,
                second: opcode,
            }),
            _ => slot.opcode = Some(opcode),
        }
    }
}

impl<C: 'static> Default for OutboundBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on a freshly reserved outbound opcode.
pub struct OutboundOpcode<'a, C> {
    builder: &'a mut OutboundBuilder<C>,
    opcode: i32,
}

impl<C: 'static> OutboundOpcode<'_, C> {
    pub fn opcode(&self) -> i32 {
        self.opcode
    }

    /// Install the encoder every type accepted on this opcode shares.
    pub fn encoder(self, encoder: impl PacketEncoder + 'static) -> Self {
        let slot = &mut self.builder.encoders[self.opcode as usize];
        if slot.is_some() {
            self.builder.errors.push(RegistryError::DuplicateEncoder {
                opcode: self.opcode,
            });
        } else {
            *slot = Some(Arc::new(encoder));
        }
        self
    }

    /// Encode `T` through its [`Encode`] impl and accept it.
    pub fn encode<T: Packet + Encode>(self) -> Self {
        self.encoder(TypedEncoder::<T>::new()).accept::<T>()
    }

    pub fn encode_with<T, F>(self, write: F) -> Self
    where
        T: Packet,
        F: Fn(&T, &mut ByteBuf) -> EncodeResult<()> + Send + Sync + 'static,
    {
        self.encoder(FnEncoder::new(write)).accept::<T>()
    }

    /// Send `T` under this opcode. The encoder must already be installed.
    pub fn accept<T: Packet>(self) -> Self {
        self.builder.accept(self.opcode, PacketType::of::<T>());
        self
    }

    pub fn accept_all(self, types: impl IntoIterator<Item = PacketType>) -> Self {
        for packet_type in types {
            self.builder.accept(self.opcode, packet_type);
        }
        self
    }
}

/// Handle on one outbound packet type.
pub struct OutboundPacket<'a, C, T> {
    builder: &'a mut OutboundBuilder<C>,
    _marker: PhantomData<fn(&T)>,
}

impl<C: 'static, T: Packet> OutboundPacket<'_, C, T> {
    /// Append a processor that may rewrite the packet before it is encoded.
    ///
    /// Processors run in registration order before the encoder sees the
    /// packet. Their writes to the context and the packet are not undone
    /// if encoding then fails; only the output buffer is rolled back. Keep
    /// state a processor records safe to observe after an `Encode` error,
    /// or treat that error as fatal for the connection.
    pub fn processor<F>(self, processor: F) -> Self
    where
        F: Fn(&mut C, &mut T) + Send + Sync + 'static,
    {
        let slot = self
            .builder
            .types
            .entry(TypeId::of::<T>())
            .or_insert_with(|| TypeSlot::new(PacketType::of::<T>()));
        slot.processors
            .push(Box::new(move |ctx: &mut C, packet: &mut dyn Packet| {
                if let Some(packet) = packet.downcast_mut::<T>() {
                    processor(ctx, packet);
                }
            }));
        self
    }
}

/// Immutable type → (opcode, encoder) table for one state.
pub struct OutboundRegistry<C> {
    encoders: Vec<Option<Arc<dyn PacketEncoder>>>,
    types: HashMap<TypeId, TypeSlot<C>>,
}

impl<C: 'static> OutboundRegistry<C> {
    pub fn builder() -> OutboundBuilder<C> {
        OutboundBuilder::new()
    }

    pub fn empty() -> Self {
        Self {
            encoders: Vec::new(),
            types: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    pub fn opcode_of<T: Packet>(&self) -> Option<i32> {
        self.types.get(&TypeId::of::<T>())?.opcode
    }

    /// The encoder `T` is sent with. Types sharing an opcode share the
    /// same instance.
    pub fn encoder_of<T: Packet>(&self) -> Option<&Arc<dyn PacketEncoder>> {
        let opcode = self.opcode_of::<T>()?;
        self.encoders.get(opcode_index(opcode)?)?.as_ref()
    }

    /// Run the type's processors, then append its opcode and payload to
    /// `buf`. Returns the opcode written. On failure nothing is appended,
    /// but processor effects on `ctx` and `packet` remain.
    pub fn encode(&self, ctx: &mut C, packet: &mut dyn Packet, buf: &mut ByteBuf) -> Result<i32, ProtocolError> {
        let type_name = packet.type_name();
        let no_encoder = || ProtocolError::NoEncoder { type_name };
        let slot = self.types.get(&packet.packet_type().id()).ok_or_else(no_encoder)?;
        let opcode = slot.opcode.ok_or_else(no_encoder)?;
        let encoder = opcode_index(opcode)
            .and_then(|index| self.encoders.get(index))
            .and_then(Option::as_ref)
            .ok_or_else(no_encoder)?;

        for processor in &slot.processors {
            processor(ctx, &mut *packet);
        }

        let start = buf.writer_index();
        buf.write_var_int(opcode);
        if let Err(source) = encoder.encode(&*packet, buf) {
            buf.truncate(start);
            return Err(ProtocolError::Encode { type_name, source });
        }
        trace!(
            "Encoded {} as 0x{:02X} ({} bytes)",
            type_name,
            opcode,
            buf.writer_index() - start
        );
        Ok(opcode)
    }
}

impl<C> fmt::Debug for OutboundRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundRegistry")
            .field("opcodes", &self.encoders.len())
            .field(
                "types",
                &self.types.values().map(|slot| slot.packet_type).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EncodeError;

    #[derive(Debug)]
    struct KeepAlive(i64);

    impl Encode for KeepAlive {
        fn encode(&self, buf: &mut ByteBuf) -> EncodeResult<()> {
            buf.write_i64(self.0);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Title(String);

    #[derive(Debug)]
    struct Unregistered;

    #[test]
    fn test_encode_writes_opcode_and_payload() {
        let mut builder = OutboundRegistry::<()>::builder();
        builder.bind();
        builder.bind().encode::<KeepAlive>();
        let registry = builder.build().unwrap();

        let mut buf = ByteBuf::new();
        let opcode = registry.encode(&mut (), &mut KeepAlive(3), &mut buf).unwrap();
        assert_eq!(opcode, 1);
        assert_eq!(buf.readable(), &[1, 0, 0, 0, 0, 0, 0, 0, 3]);
    }

    #[test]
    fn test_processor_rewrites_before_encoding() {
        let mut builder = OutboundRegistry::<u32>::builder();
        builder
            .bind()
            .encode_with(|title: &Title, buf: &mut ByteBuf| buf.write_string(&title.0));
        builder.packet::<Title>().processor(|sent, title| {
            *sent += 1;
            title.0.push('!');
        });
        let registry = builder.build().unwrap();

        let mut sent = 0;
        let mut buf = ByteBuf::new();
        registry
            .encode(&mut sent, &mut Title("hey".into()), &mut buf)
            .unwrap();
        assert_eq!(sent, 1);
        assert_eq!(buf.read_var_int().unwrap(), 0);
        assert_eq!(buf.read_string(16).unwrap(), "hey!");
    }

    #[test]
    fn test_unregistered_type_is_fatal() {
        let registry = OutboundRegistry::<()>::empty();
        let mut buf = ByteBuf::new();
        let err = registry.encode(&mut (), &mut Unregistered, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::NoEncoder { .. }));
        assert!(err.is_fatal());
        assert_eq!(buf.writer_index(), 0);
    }

    #[test]
    fn test_failed_encode_appends_nothing() {
        let mut builder = OutboundRegistry::<()>::builder();
        builder
            .bind()
            .encode_with(|title: &Title, buf: &mut ByteBuf| buf.write_string_limited(&title.0, 2));
        let registry = builder.build().unwrap();

        let mut buf = ByteBuf::new();
        buf.write_u8(0xAB);
        let err = registry
            .encode(&mut (), &mut Title("too long".into()), &mut buf)
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Encode {
                source: EncodeError::StringTooLong { .. },
                ..
            }
        ));
        assert_eq!(buf.readable(), &[0xAB]);
    }

    #[test]
    fn test_processor_effects_remain_after_failed_encode() {
        let mut builder = OutboundRegistry::<Vec<String>>::builder();
        builder
            .bind()
            .encode_with(|title: &Title, buf: &mut ByteBuf| buf.write_string_limited(&title.0, 4));
        builder.packet::<Title>().processor(|seen, title| {
            seen.push(title.0.clone());
            title.0.push('!');
        });
        let registry = builder.build().unwrap();

        let mut seen = Vec::new();
        let mut title = Title("four".into());
        let mut buf = ByteBuf::new();
        let err = registry.encode(&mut seen, &mut title, &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::Encode { .. }));
        assert_eq!(buf.writer_index(), 0);
        assert_eq!(seen, vec!["four".to_string()]);
        assert_eq!(title.0, "four!");
    }

    #[test]
    fn test_build_errors() {
        let mut builder = OutboundRegistry::<()>::builder();
        builder.bind().accept::<Title>();
        assert!(matches!(
            builder.build().unwrap_err(),
            RegistryError::MissingEncoder { opcode: 0, .. }
        ));

        let mut builder = OutboundRegistry::<()>::builder();
        builder.bind().encode::<KeepAlive>().encode::<KeepAlive>();
        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::DuplicateEncoder { opcode: 0 }
        );

        let mut builder = OutboundRegistry::<()>::builder();
        builder.bind().encode::<KeepAlive>();
        builder.bind_at(3);
        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::OpcodeOutOfOrder {
                direction: Direction::Outbound,
                requested: 3,
                expected: 1,
            }
        );

        let mut builder = OutboundRegistry::<()>::builder();
        builder.bind().encode::<KeepAlive>();
        builder
            .bind()
            .encoder(TypedEncoder::<KeepAlive>::new())
            .accept::<KeepAlive>();
        assert!(matches!(
            builder.build().unwrap_err(),
            RegistryError::TypeOnTwoOpcodes { first: 0, second: 1, .. }
        ));
    }
}
