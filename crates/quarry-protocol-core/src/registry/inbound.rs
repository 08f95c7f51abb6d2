use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use anyhow::anyhow;
use tracing::{debug, trace};

use super::{opcode_index, Direction, Dispatch, Handler, InboundProcessor};
use crate::buffer::ByteBuf;
use crate::codec::Decode;
use crate::error::{DecodeError, DecodeResult, ProtocolError, RegistryError};
use crate::packet::{FnDecoder, Packet, PacketDecoder, PacketType, TypedDecoder};

struct TypeSlot<C> {
    packet_type: PacketType,
    opcode: Option<i32>,
    handler: Option<Handler<C>>,
    processors: Vec<InboundProcessor<C>>,
}

fn type_slot<C, T: Packet>(types: &mut HashMap<TypeId, TypeSlot<C>>) -> &mut TypeSlot<C> {
    types.entry(TypeId::of::<T>()).or_insert_with(|| TypeSlot {
        packet_type: PacketType::of::<T>(),
        opcode: None,
        handler: None,
        processors: Vec::new(),
    })
}

/// Collects inbound registrations for one protocol state.
///
/// ```
/// # use quarry_protocol_core::{ByteBuf, InboundRegistry};
/// #[derive(Debug)]
/// struct Ping(i64);
///
/// let mut builder = InboundRegistry::<Vec<i64>>::builder();
/// builder
///     .bind()
///     .decode_with(|buf: &mut ByteBuf| Ok(Ping(buf.read_i64()?)))
///     .packet::<Ping>()
///     .handler(|seen, ping| {
///         seen.push(ping.0);
///         Ok(())
///     });
/// let registry = builder.build().unwrap();
/// assert_eq!(registry.opcode_of::<Ping>(), Some(0));
/// ```
///
/// `build` consumes the builder, so it cannot be reused afterwards:
///
/// ```compile_fail
/// # use quarry_protocol_core::InboundRegistry;
/// let mut builder = InboundRegistry::<()>::builder();
/// let registry = builder.build().unwrap();
/// builder.bind();
/// ```
pub struct InboundBuilder<C> {
    decoders: Vec<Option<Box<dyn PacketDecoder>>>,
    types: HashMap<TypeId, TypeSlot<C>>,
    errors: Vec<RegistryError>,
}

impl<C: 'static> InboundBuilder<C> {
    pub fn new() -> Self {
        Self {
            decoders: Vec::new(),
            types: HashMap::new(),
            errors: Vec::new(),
        }
    }

    /// The opcode the next `bind()` will reserve.
    pub fn next_opcode(&self) -> i32 {
        self.decoders.len() as i32
    }

    /// Reserve the next opcode. Without a decoder it stays a placeholder
    /// that rejects anything sent to it.
    pub fn bind(&mut self) -> InboundOpcode<'_, C> {
        let opcode = self.next_opcode();
        self.decoders.push(None);
        InboundOpcode {
            builder: self,
            opcode,
        }
    }

    /// Reserve the next opcode, asserting that it is `opcode`.
    pub fn bind_at(&mut self, opcode: i32) -> InboundOpcode<'_, C> {
        let expected = self.next_opcode();
        if opcode != expected {
            self.errors.push(RegistryError::OpcodeOutOfOrder {
                direction: Direction::Inbound,
                requested: opcode,
                expected,
            });
        }
        self.bind()
    }

    /// Attach handlers or processors to a type without tying it to an opcode.
    pub fn packet<T: Packet>(&mut self) -> InboundPacket<'_, C, T> {
        type_slot::<C, T>(&mut self.types);
        InboundPacket {
            builder: self,
            opcode: None,
            _marker: PhantomData,
        }
    }

    /// Finish the table. Fails with the first mistake made while building.
    pub fn build(self) -> Result<InboundRegistry<C>, RegistryError> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        Ok(InboundRegistry {
            decoders: self.decoders,
            types: self.types,
        })
    }

    fn assign_opcode<T: Packet>(&mut self, opcode: i32) {
        let slot = type_slot::<C, T>(&mut self.types);
        match slot.opcode {
            Some(first) if first != opcode => self.errors.push(RegistryError::TypeOnTwoOpcodes {
                direction: Direction::Inbound,
                type_name: slot.packet_type.name(),
                first,
                second: opcode,
            }),
            _ => slot.opcode = Some(opcode),
        }
    }
}

impl<C: 'static> Default for InboundBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on a freshly reserved inbound opcode.
pub struct InboundOpcode<'a, C> {
    builder: &'a mut InboundBuilder<C>,
    opcode: i32,
}

impl<'a, C: 'static> InboundOpcode<'a, C> {
    pub fn opcode(&self) -> i32 {
        self.opcode
    }

    pub fn decoder(self, decoder: impl PacketDecoder + 'static) -> Self {
        let slot = &mut self.builder.decoders[self.opcode as usize];
        if slot.is_some() {
            self.builder.errors.push(RegistryError::DuplicateDecoder {
                opcode: self.opcode,
            });
        } else {
            *slot = Some(Box::new(decoder));
        }
        self
    }

    /// Decode this opcode as `T` through its [`Decode`] impl.
    pub fn decode<T: Packet + Decode>(self) -> Self {
        self.builder.assign_opcode::<T>(self.opcode);
        self.decoder(TypedDecoder::<T>::new())
    }

    pub fn decode_with<T, F>(self, read: F) -> Self
    where
        T: Packet,
        F: Fn(&mut ByteBuf) -> DecodeResult<T> + Send + Sync + 'static,
    {
        self.builder.assign_opcode::<T>(self.opcode);
        self.decoder(FnDecoder::new(read))
    }

    /// Associate `T` with this opcode and start configuring it.
    pub fn packet<T: Packet>(self) -> InboundPacket<'a, C, T> {
        self.builder.assign_opcode::<T>(self.opcode);
        InboundPacket {
            builder: self.builder,
            opcode: Some(self.opcode),
            _marker: PhantomData,
        }
    }
}

/// Handle on one inbound packet type.
pub struct InboundPacket<'a, C, T> {
    builder: &'a mut InboundBuilder<C>,
    opcode: Option<i32>,
    _marker: PhantomData<fn(&T)>,
}

impl<'a, C: 'static, T: Packet> InboundPacket<'a, C, T> {
    /// Set the single handler for `T`.
    pub fn handler<F>(self, handler: F) -> Self
    where
        F: Fn(&mut C, &T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let slot = type_slot::<C, T>(&mut self.builder.types);
        if slot.handler.is_some() {
            self.builder.errors.push(RegistryError::DuplicateHandler {
                type_name: slot.packet_type.name(),
            });
            return self;
        }
        slot.handler = Some(Box::new(move |ctx: &mut C, packet: &dyn Packet| {
            match packet.downcast_ref::<T>() {
                Some(packet) => handler(ctx, packet),
                None => Err(mismatch::<T>(packet)),
            }
        }));
        self
    }

    /// Append a processor. Processors run in registration order before the
    /// handler and may rewrite the packet.
    pub fn processor<F>(self, processor: F) -> Self
    where
        F: Fn(&mut C, &mut T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let slot = type_slot::<C, T>(&mut self.builder.types);
        slot.processors
            .push(Box::new(move |ctx: &mut C, packet: &mut dyn Packet| {
                let name = packet.type_name();
                match packet.downcast_mut::<T>() {
                    Some(packet) => processor(ctx, packet),
                    None => Err(anyhow!(
                        "processor for {} received {}",
                        std::any::type_name::<T>(),
                        name
                    )),
                }
            }));
        self
    }

    /// Configure another type under the same opcode, if any.
    pub fn packet<U: Packet>(self) -> InboundPacket<'a, C, U> {
        match self.opcode {
            Some(opcode) => self.builder.assign_opcode::<U>(opcode),
            None => {
                type_slot::<C, U>(&mut self.builder.types);
            }
        }
        InboundPacket {
            builder: self.builder,
            opcode: self.opcode,
            _marker: PhantomData,
        }
    }
}

fn mismatch<T>(packet: &dyn Packet) -> anyhow::Error {
    anyhow!(
        "handler for {} received {}",
        std::any::type_name::<T>(),
        packet.type_name()
    )
}

/// Immutable opcode → decoder and type → handler table for one state.
pub struct InboundRegistry<C> {
    decoders: Vec<Option<Box<dyn PacketDecoder>>>,
    types: HashMap<TypeId, TypeSlot<C>>,
}

impl<C: 'static> InboundRegistry<C> {
    pub fn builder() -> InboundBuilder<C> {
        InboundBuilder::new()
    }

    /// A table that knows no opcodes at all.
    pub fn empty() -> Self {
        Self {
            decoders: Vec::new(),
            types: HashMap::new(),
        }
    }

    /// Number of reserved opcodes, placeholders included.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn decoder(&self, opcode: i32) -> Option<&dyn PacketDecoder> {
        self.decoders.get(opcode_index(opcode)?)?.as_deref()
    }

    pub fn opcode_of<T: Packet>(&self) -> Option<i32> {
        self.types.get(&TypeId::of::<T>())?.opcode
    }

    pub fn has_handler<T: Packet>(&self) -> bool {
        self.types
            .get(&TypeId::of::<T>())
            .is_some_and(|slot| slot.handler.is_some())
    }

    /// Decode one payload. The whole readable region must be consumed;
    /// on failure the reader cursor is left where it was.
    pub fn decode(&self, opcode: i32, buf: &mut ByteBuf) -> Result<Box<dyn Packet>, ProtocolError> {
        let slot = opcode_index(opcode)
            .and_then(|index| self.decoders.get(index))
            .ok_or(ProtocolError::UnknownOpcode { opcode })?;
        let decoder = slot.as_ref().ok_or(ProtocolError::NoDecoder { opcode })?;
        let packet = buf
            .rewind_on_error(|buf| {
                let packet = decoder.decode(buf)?;
                if buf.is_readable() {
                    return Err(DecodeError::TrailingBytes {
                        what: packet.type_name(),
                        remaining: buf.readable_bytes(),
                    });
                }
                Ok(packet)
            })
            .map_err(|source| ProtocolError::Decode { opcode, source })?;
        trace!("Decoded 0x{:02X} as {}", opcode, packet.type_name());
        Ok(packet)
    }

    /// Run the processors and then the handler registered for the packet's
    /// type. A type without a handler is ignored.
    pub fn dispatch(&self, ctx: &mut C, packet: &mut dyn Packet) -> Result<Dispatch, ProtocolError> {
        let Some(slot) = self.types.get(&packet.packet_type().id()) else {
            debug!("No registration for {}, ignoring", packet.type_name());
            return Ok(Dispatch::Ignored);
        };
        let type_name = slot.packet_type.name();
        for processor in &slot.processors {
            processor(ctx, &mut *packet)
                .map_err(|reason| ProtocolError::Handler { type_name, reason })?;
        }
        match &slot.handler {
            Some(handler) => {
                handler(ctx, &*packet)
                    .map_err(|reason| ProtocolError::Handler { type_name, reason })?;
                Ok(Dispatch::Handled)
            }
            None => {
                debug!("No handler for {}, ignoring", type_name);
                Ok(Dispatch::Ignored)
            }
        }
    }

    /// Read the opcode prefix of a frame, then decode and dispatch the rest.
    pub fn read_and_dispatch(&self, ctx: &mut C, buf: &mut ByteBuf) -> Result<Dispatch, ProtocolError> {
        let opcode = buf.read_var_int().map_err(ProtocolError::Frame)?;
        let mut packet = self.decode(opcode, buf)?;
        self.dispatch(ctx, &mut *packet)
    }
}

impl<C> fmt::Debug for InboundRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundRegistry")
            .field("opcodes", &self.decoders.len())
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
    use crate::error::DecodeResult;

    #[derive(Debug, PartialEq)]
    struct Ping {
        value: i64,
    }

    impl Decode for Ping {
        fn decode(buf: &mut ByteBuf) -> DecodeResult<Self> {
            Ok(Ping {
                value: buf.read_i64()?,
            })
        }
    }

    #[derive(Debug)]
    struct Chat(String);

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    fn frame(opcode: i32, payload: &[u8]) -> ByteBuf {
        let mut buf = ByteBuf::new();
        buf.write_var_int(opcode);
        buf.write_bytes(payload);
        buf
    }

    #[test]
    fn test_opcodes_are_dense() {
        let mut builder = InboundRegistry::<Recorder>::builder();
        for expected in 0..5 {
            assert_eq!(builder.bind().opcode(), expected);
        }
        let registry = builder.build().unwrap();
        assert_eq!(registry.len(), 5);
        assert!((0..5).all(|op| registry.decoder(op).is_none()));
    }

    #[test]
    fn test_placeholder_opcode_is_rejected() {
        let mut builder = InboundRegistry::<Recorder>::builder();
        builder.bind();
        builder.bind().decode::<Ping>();
        let registry = builder.build().unwrap();

        let mut buf = ByteBuf::from_slice(&[1, 2, 3]);
        assert!(matches!(
            registry.decode(0, &mut buf),
            Err(ProtocolError::NoDecoder { opcode: 0 })
        ));
        assert!(matches!(
            registry.decode(7, &mut buf),
            Err(ProtocolError::UnknownOpcode { opcode: 7 })
        ));
        assert!(matches!(
            registry.decode(-1, &mut buf),
            Err(ProtocolError::UnknownOpcode { opcode: -1 })
        ));
        assert_eq!(registry.opcode_of::<Ping>(), Some(1));
    }

    #[test]
    fn test_processors_run_before_handler() {
        let mut builder = InboundRegistry::<Recorder>::builder();
        builder
            .bind()
            .decode_with(|buf: &mut ByteBuf| Ok(Chat(buf.read_string(64)?)))
            .packet::<Chat>()
            .processor(|ctx, chat| {
                ctx.seen.push(format!("first:{}", chat.0));
                chat.0 = chat.0.to_uppercase();
                Ok(())
            })
            .processor(|ctx, chat| {
                ctx.seen.push(format!("second:{}", chat.0));
                Ok(())
            })
            .handler(|ctx, chat| {
                ctx.seen.push(format!("handler:{}", chat.0));
                Ok(())
            });
        let registry = builder.build().unwrap();

        let mut payload = ByteBuf::new();
        payload.write_string("hi").unwrap();
        let mut buf = frame(0, payload.readable());
        let mut ctx = Recorder::default();
        assert_eq!(registry.read_and_dispatch(&mut ctx, &mut buf).unwrap(), Dispatch::Handled);
        assert_eq!(ctx.seen, ["first:hi", "second:HI", "handler:HI"]);
    }

    #[test]
    fn test_packet_without_handler_is_ignored() {
        let mut builder = InboundRegistry::<Recorder>::builder();
        builder.bind().decode::<Ping>();
        let registry = builder.build().unwrap();

        let mut buf = frame(0, &5i64.to_be_bytes());
        let mut ctx = Recorder::default();
        assert_eq!(registry.read_and_dispatch(&mut ctx, &mut buf).unwrap(), Dispatch::Ignored);
        assert!(!registry.has_handler::<Ping>());
    }

    #[test]
    fn test_handler_registered_outside_opcode() {
        let mut builder = InboundRegistry::<Recorder>::builder();
        builder.packet::<Ping>().handler(|ctx, ping| {
            ctx.seen.push(ping.value.to_string());
            Ok(())
        });
        builder.bind().decode::<Ping>();
        let registry = builder.build().unwrap();

        let mut ctx = Recorder::default();
        let mut buf = frame(0, &11i64.to_be_bytes());
        registry.read_and_dispatch(&mut ctx, &mut buf).unwrap();
        assert_eq!(ctx.seen, ["11"]);
        assert_eq!(registry.opcode_of::<Ping>(), Some(0));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut builder = InboundRegistry::<Recorder>::builder();
        builder.bind().decode::<Ping>();
        let registry = builder.build().unwrap();

        let mut buf = ByteBuf::from_slice(&[0, 0, 0, 0, 0, 0, 0, 1, 0xFF]);
        let err = registry.decode(0, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Decode {
                opcode: 0,
                source: DecodeError::TrailingBytes { remaining: 1, .. }
            }
        ));
        assert_eq!(buf.reader_index(), 0);
        assert_eq!(buf.readable_bytes(), 9);
    }

    #[test]
    fn test_failed_decode_leaves_cursor() {
        let mut builder = InboundRegistry::<Recorder>::builder();
        builder.bind().decode_with(|buf: &mut ByteBuf| {
            let first = buf.read_i32()?;
            let second = buf.read_i64()?;
            Ok(Ping {
                value: first as i64 + second,
            })
        });
        let registry = builder.build().unwrap();

        let mut buf = ByteBuf::from_slice(&[0, 0, 0, 1, 0, 0]);
        assert!(registry.decode(0, &mut buf).is_err());
        assert_eq!(buf.reader_index(), 0);
    }

    #[test]
    fn test_handler_error_is_reported() {
        let mut builder = InboundRegistry::<Recorder>::builder();
        builder
            .bind()
            .decode::<Ping>()
            .packet::<Ping>()
            .handler(|_, _| Err(anyhow!("boom")));
        let registry = builder.build().unwrap();

        let mut buf = frame(0, &1i64.to_be_bytes());
        let err = registry
            .read_and_dispatch(&mut Recorder::default(), &mut buf)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Handler { .. }));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_build_errors() {
        let mut builder = InboundRegistry::<Recorder>::builder();
        builder.bind_at(1);
        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::OpcodeOutOfOrder {
                direction: Direction::Inbound,
                requested: 1,
                expected: 0,
            }
        );

        let mut builder = InboundRegistry::<Recorder>::builder();
        builder.bind().decode::<Ping>();
        builder.bind().decode::<Ping>();
        assert!(matches!(
            builder.build().unwrap_err(),
            RegistryError::TypeOnTwoOpcodes { first: 0, second: 1, .. }
        ));

        let mut builder = InboundRegistry::<Recorder>::builder();
        builder.bind().decode::<Ping>().decode::<Ping>();
        assert_eq!(
            builder.build().unwrap_err(),
            RegistryError::DuplicateDecoder { opcode: 0 }
        );

        let mut builder = InboundRegistry::<Recorder>::builder();
        builder
            .packet::<Ping>()
            .handler(|_, _| Ok(()))
            .handler(|_, _| Ok(()));
        assert!(matches!(
            builder.build().unwrap_err(),
            RegistryError::DuplicateHandler { .. }
        ));
    }
}
