use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::error::RegistryError;
use crate::registry::{InboundBuilder, InboundRegistry, OutboundBuilder, OutboundRegistry};

/// Everything needed to speak one phase of the protocol: the inbound and
/// outbound tables. Cloning shares both tables.
pub struct Protocol<C> {
    inbound: Arc<InboundRegistry<C>>,
    outbound: Arc<OutboundRegistry<C>>,
}

impl<C: 'static> Protocol<C> {
    pub fn new(inbound: InboundRegistry<C>, outbound: OutboundRegistry<C>) -> Self {
        Self {
            inbound: Arc::new(inbound),
            outbound: Arc::new(outbound),
        }
    }

    /// A protocol that accepts and sends nothing.
    pub fn empty() -> Self {
        Self::new(InboundRegistry::empty(), OutboundRegistry::empty())
    }

    pub fn builder() -> ProtocolBuilder<C> {
        ProtocolBuilder {
            inbound: InboundBuilder::new(),
            outbound: OutboundBuilder::new(),
        }
    }

    pub fn inbound(&self) -> &InboundRegistry<C> {
        &self.inbound
    }

    pub fn outbound(&self) -> &OutboundRegistry<C> {
        &self.outbound
    }
}

impl<C> Clone for Protocol<C> {
    fn clone(&self) -> Self {
        Self {
            inbound: Arc::clone(&self.inbound),
            outbound: Arc::clone(&self.outbound),
        }
    }
}

impl<C> fmt::Debug for Protocol<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .finish()
    }
}

/// Assembles a [`Protocol`] from an inbound and an outbound pass.
///
/// ```
/// # use quarry_protocol_core::{ByteBuf, Protocol};
/// #[derive(Debug)]
/// struct Ping(i64);
///
/// let protocol = Protocol::<()>::builder()
///     .inbound(|b| {
///         b.bind().decode_with(|buf: &mut ByteBuf| Ok(Ping(buf.read_i64()?)));
///     })
///     .outbound(|b| {
///         b.bind().encode_with(|ping: &Ping, buf: &mut ByteBuf| {
///             buf.write_i64(ping.0);
///             Ok(())
///         });
///     })
///     .build()
///     .unwrap();
/// assert_eq!(protocol.inbound().len(), 1);
/// assert_eq!(protocol.outbound().opcode_of::<Ping>(), Some(0));
/// ```
pub struct ProtocolBuilder<C> {
    inbound: InboundBuilder<C>,
    outbound: OutboundBuilder<C>,
}

impl<C: 'static> ProtocolBuilder<C> {
    pub fn inbound(mut self, define: impl FnOnce(&mut InboundBuilder<C>)) -> Self {
        define(&mut self.inbound);
        self
    }

    pub fn outbound(mut self, define: impl FnOnce(&mut OutboundBuilder<C>)) -> Self {
        define(&mut self.outbound);
        self
    }

    pub fn build(self) -> Result<Protocol<C>, RegistryError> {
        Ok(Protocol::new(self.inbound.build()?, self.outbound.build()?))
    }
}

/// A protocol whose tables can be rebuilt while connections are live.
///
/// Readers take a snapshot with [`load`](Self::load) and keep using it; a
/// reload publishes a complete new table in one swap, so a snapshot is
/// never observed half-built.
pub struct ReloadableProtocol<C> {
    current: RwLock<Arc<Protocol<C>>>,
}

impl<C: 'static> ReloadableProtocol<C> {
    pub fn new(protocol: Protocol<C>) -> Self {
        Self {
            current: RwLock::new(Arc::new(protocol)),
        }
    }

    pub fn load(&self) -> Arc<Protocol<C>> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Publish `protocol`, returning the snapshot it replaced.
    pub fn replace(&self, protocol: Protocol<C>) -> Arc<Protocol<C>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(protocol))
    }

    /// Build and publish a new table. On error the current one stays live.
    pub fn rebuild(&self, builder: ProtocolBuilder<C>) -> Result<Arc<Protocol<C>>, RegistryError> {
        let protocol = builder.build()?;
        info!(
            "Reloaded protocol: {} inbound, {} outbound opcodes",
            protocol.inbound().len(),
            protocol.outbound().len()
        );
        Ok(self.replace(protocol))
    }
}
