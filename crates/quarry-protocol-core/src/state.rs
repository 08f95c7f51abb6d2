use std::fmt;

use crate::protocol::Protocol;

/// The phase a connection is in. Every connection starts in `Handshake`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Handshake,
    Status,
    Login,
    Play,
}

impl ProtocolState {
    pub const ALL: [ProtocolState; 4] = [
        ProtocolState::Handshake,
        ProtocolState::Status,
        ProtocolState::Login,
        ProtocolState::Play,
    ];

    /// Stable small integer for this state, used for dispatch and logging.
    pub fn id(self) -> u8 {
        match self {
            ProtocolState::Handshake => 0,
            ProtocolState::Status => 1,
            ProtocolState::Login => 2,
            ProtocolState::Play => 3,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Map the "next state" field of a handshake to the state it requests.
    pub fn from_handshake_intent(next: i32) -> Option<Self> {
        match next {
            1 => Some(ProtocolState::Status),
            2 => Some(ProtocolState::Login),
            _ => None,
        }
    }

    pub fn can_transition_to(self, next: ProtocolState) -> bool {
        matches!(
            (self, next),
            (ProtocolState::Handshake, ProtocolState::Status)
                | (ProtocolState::Handshake, ProtocolState::Login)
                | (ProtocolState::Login, ProtocolState::Play)
        )
    }

    /// A terminal state can only be left by closing the connection.
    pub fn is_terminal(self) -> bool {
        Self::ALL.iter().all(|&next| !self.can_transition_to(next))
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolState::Handshake => "handshake",
            ProtocolState::Status => "status",
            ProtocolState::Login => "login",
            ProtocolState::Play => "play",
        })
    }
}

/// Binds every [`ProtocolState`] to exactly one [`Protocol`].
pub struct StateTable<C> {
    protocols: [Protocol<C>; 4],
}

impl<C: 'static> StateTable<C> {
    pub fn new(
        handshake: Protocol<C>,
        status: Protocol<C>,
        login: Protocol<C>,
        play: Protocol<C>,
    ) -> Self {
        Self {
            protocols: [handshake, status, login, play],
        }
    }

    /// A table where every state speaks the empty protocol.
    pub fn empty() -> Self {
        Self::new(
            Protocol::empty(),
            Protocol::empty(),
            Protocol::empty(),
            Protocol::empty(),
        )
    }

    pub fn get(&self, state: ProtocolState) -> &Protocol<C> {
        &self.protocols[state.id() as usize]
    }

    /// Replace the protocol bound to one state.
    pub fn with(mut self, state: ProtocolState, protocol: Protocol<C>) -> Self {
        self.protocols[state.id() as usize] = protocol;
        self
    }
}

impl<C> Clone for StateTable<C> {
    fn clone(&self) -> Self {
        Self {
            protocols: self.protocols.clone(),
        }
    }
}

impl<C> fmt::Debug for StateTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(ProtocolState::ALL.iter().map(|&state| (state, &self.protocols[state.id() as usize])))
            .finish()
    }
}
