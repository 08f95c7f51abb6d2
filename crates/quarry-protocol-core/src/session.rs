use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::alloc::BufAllocator;
use crate::buffer::ByteBuf;
use crate::error::ProtocolError;
use crate::packet::Packet;
use crate::registry::Dispatch;
use crate::state::{ProtocolState, StateTable};

/// A change a handler asks the session to make once the current packet
/// has been fully handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Switch(ProtocolState),
    Close,
}

/// Requests handlers leave for the session: packets to send in reply and an
/// optional transition.
#[derive(Debug, Default)]
pub struct SessionControl {
    transition: Option<Transition>,
    outgoing: Vec<Box<dyn Packet>>,
}

impl SessionControl {
    /// Queue a reply. Replies are encoded under the state that handled the
    /// triggering packet, before any transition applies.
    pub fn send(&mut self, packet: impl Packet) {
        self.outgoing.push(Box::new(packet));
    }

    pub fn switch_to(&mut self, state: ProtocolState) {
        self.transition = Some(Transition::Switch(state));
    }

    pub fn close(&mut self) {
        self.transition = Some(Transition::Close);
    }

    pub fn pending_transition(&self) -> Option<Transition> {
        self.transition
    }

    pub fn take_transition(&mut self) -> Option<Transition> {
        self.transition.take()
    }

    pub fn take_outgoing(&mut self) -> Vec<Box<dyn Packet>> {
        std::mem::take(&mut self.outgoing)
    }
}

/// Handler context type that a [`ProtocolSession`] can drive.
pub trait SessionContext: 'static {
    fn control(&mut self) -> &mut SessionControl;
}

/// What one inbound frame produced.
#[derive(Debug)]
pub struct Received {
    pub dispatch: Dispatch,
    /// Encoded replies (opcode + payload), in the order handlers queued them.
    pub replies: Vec<ByteBuf>,
}

/// Per-connection protocol driver, independent of any transport.
///
/// Frames are handled strictly one at a time. A transition requested while
/// handling a frame applies after that frame's replies are encoded, so the
/// next frame is the first one decoded under the new state.
pub struct ProtocolSession<C> {
    states: Arc<StateTable<C>>,
    state: ProtocolState,
    allocator: Arc<dyn BufAllocator>,
    closed: bool,
}

impl<C: SessionContext> ProtocolSession<C> {
    pub fn new(states: Arc<StateTable<C>>, allocator: Arc<dyn BufAllocator>) -> Self {
        Self {
            states,
            state: ProtocolState::Handshake,
            allocator,
            closed: false,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if !self.closed {
            debug!("Closing session in state {}", self.state);
            self.closed = true;
        }
    }

    /// Decode and dispatch exactly one frame (opcode + payload). Any error
    /// closes the session.
    pub fn receive(&mut self, ctx: &mut C, frame: &mut ByteBuf) -> Result<Received, ProtocolError> {
        if self.closed {
            return Err(ProtocolError::Closed);
        }
        match self.handle(ctx, frame) {
            Ok(received) => Ok(received),
            Err(e) => {
                ctx.control().take_outgoing();
                ctx.control().take_transition();
                if e.is_fatal() {
                    error!("Fatal protocol error in state {}: {}", self.state, e);
                } else {
                    warn!("Protocol violation in state {}: {}", self.state, e);
                }
                self.closed = true;
                Err(e)
            }
        }
    }

    fn handle(&mut self, ctx: &mut C, frame: &mut ByteBuf) -> Result<Received, ProtocolError> {
        let inbound = self.states.get(self.state).inbound();
        let opcode = frame.read_var_int().map_err(ProtocolError::Frame)?;
        let mut packet = inbound.decode(opcode, frame)?;
        trace!(
            "Received 0x{:02X} as {} in state {}",
            opcode,
            packet.type_name(),
            self.state
        );
        let dispatch = inbound.dispatch(ctx, &mut *packet)?;

        let mut replies = Vec::new();
        for mut packet in ctx.control().take_outgoing() {
            replies.push(self.encode(ctx, &mut *packet)?);
        }

        match ctx.control().take_transition() {
            Some(Transition::Switch(next)) => {
                if !self.state.can_transition_to(next) {
                    return Err(ProtocolError::IllegalTransition {
                        from: self.state,
                        to: next,
                    });
                }
                debug!("Session state {} -> {}", self.state, next);
                self.state = next;
            }
            Some(Transition::Close) => self.close(),
            None => {}
        }
        Ok(Received { dispatch, replies })
    }

    /// Encode one outbound packet under the current state.
    ///
    /// Sending stays possible after [`close`](Self::close) so a final
    /// disconnect or response can still be flushed.
    pub fn send<P: Packet>(&mut self, ctx: &mut C, mut packet: P) -> Result<ByteBuf, ProtocolError> {
        self.send_dyn(ctx, &mut packet)
    }

    pub fn send_dyn(&mut self, ctx: &mut C, packet: &mut dyn Packet) -> Result<ByteBuf, ProtocolError> {
        self.encode(ctx, packet).inspect_err(|e| {
            if e.is_fatal() {
                error!("Failed to send in state {}: {}", self.state, e);
            }
        })
    }

    fn encode(&self, ctx: &mut C, packet: &mut dyn Packet) -> Result<ByteBuf, ProtocolError> {
        let mut buf = self.allocator.buffer();
        let opcode = self
            .states
            .get(self.state)
            .outbound()
            .encode(ctx, packet, &mut buf)?;
        trace!("Queued 0x{:02X} in state {}", opcode, self.state);
        Ok(buf)
    }
}
