//! Opcode and type tables for one protocol state.
//!
//! Both directions are built through a builder that hands out opcodes in
//! call order starting at 0. A finished registry is immutable and is shared
//! read-only between connections.

mod inbound;
mod outbound;

pub use inbound::{InboundBuilder, InboundOpcode, InboundPacket, InboundRegistry};
pub use outbound::{OutboundBuilder, OutboundOpcode, OutboundPacket, OutboundRegistry};

use std::fmt;

use crate::packet::Packet;

/// Which way a packet travels relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Inbound => "Inbound",
            Direction::Outbound => "Outbound",
        })
    }
}

/// Outcome of dispatching one inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A handler ran.
    Handled,
    /// No handler is registered for the packet's type.
    Ignored,
}

type Handler<C> = Box<dyn Fn(&mut C, &dyn Packet) -> anyhow::Result<()> + Send + Sync>;
type InboundProcessor<C> = Box<dyn Fn(&mut C, &mut dyn Packet) -> anyhow::Result<()> + Send + Sync>;
type OutboundProcessor<C> = Box<dyn Fn(&mut C, &mut dyn Packet) + Send + Sync>;

fn opcode_index(opcode: i32) -> Option<usize> {
    usize::try_from(opcode).ok()
}
