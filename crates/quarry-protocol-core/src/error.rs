use quarry_nbt::NbtError;
use quarry_types::IdentifierError;
use thiserror::Error;

use crate::registry::Direction;
use crate::state::ProtocolState;

/// Malformed or oversized input from the remote peer.
///
/// Variants name what was being read and carry only sizes and limits, never
/// peer-supplied text.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Not enough data reading {what}: needed {needed} bytes, {available} available")]
    NotEnoughData {
        what: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{what} longer than {max_groups} bytes")]
    VarIntTooLong { what: &'static str, max_groups: usize },
    #[error("{what} does not fit in {bits} bits")]
    VarIntOverflow { what: &'static str, bits: u32 },
    #[error("Negative length {len} for {what}")]
    NegativeLength { what: &'static str, len: i64 },
    #[error("{what} length {len} exceeds limit {max}")]
    TooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },
    #[error("Invalid UTF-8 in {what}")]
    InvalidUtf8 { what: &'static str },
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
    #[error("Invalid NBT: {0}")]
    Nbt(#[from] NbtError),
    #[error("Invalid {what}: {value}")]
    InvalidValue { what: &'static str, value: i64 },
    #[error("Index {index} out of bounds (writer index {writer_index})")]
    IndexOutOfBounds { index: usize, writer_index: usize },
    #[error("{remaining} unread bytes after decoding {what}")]
    TrailingBytes { what: &'static str, remaining: usize },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors on the write path. These are programmer errors: the value handed
/// to the encoder cannot be represented on the wire.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("String too long: {len} > {max}")]
    StringTooLong { len: usize, max: usize },
    #[error("{what} length {len} does not fit a length prefix")]
    LengthOverflow { what: &'static str, len: usize },
    #[error("VarInt {value} does not fit in {width} bytes")]
    VarIntTooWide { value: i64, width: usize },
    #[error("Write of {len} bytes at index {index} out of bounds (writer index {writer_index})")]
    IndexOutOfBounds {
        index: usize,
        len: usize,
        writer_index: usize,
    },
    #[error("Block position ({x}, {y}, {z}) outside the packable range")]
    BlockPosOutOfRange { x: i32, y: i32, z: i32 },
    #[error("Unrepresentable NBT: {0}")]
    Nbt(#[from] NbtError),
    #[error("Encoder for {expected} received {actual}")]
    WrongPacketType {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Mistakes in a registry definition, reported by `build()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{direction} opcode {requested} bound out of order, next opcode is {expected}")]
    OpcodeOutOfOrder {
        direction: Direction,
        requested: i32,
        expected: i32,
    },
    #[error("{direction} type {type_name} bound to opcodes {first} and {second}")]
    TypeOnTwoOpcodes {
        direction: Direction,
        type_name: &'static str,
        first: i32,
        second: i32,
    },
    #[error("Outbound opcode {opcode} accepts {type_name} before an encoder is installed")]
    MissingEncoder { opcode: i32, type_name: &'static str },
    #[error("Outbound opcode {opcode} already has an encoder")]
    DuplicateEncoder { opcode: i32 },
    #[error("Inbound opcode {opcode} already has a decoder")]
    DuplicateDecoder { opcode: i32 },
    #[error("{type_name} already has a handler")]
    DuplicateHandler { type_name: &'static str },
}

/// Runtime failures while decoding, dispatching or encoding packets.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed packet frame: {0}")]
    Frame(#[source] DecodeError),
    #[error("Unknown opcode 0x{opcode:02X}")]
    UnknownOpcode { opcode: i32 },
    #[error("Opcode 0x{opcode:02X} is reserved and has no decoder")]
    NoDecoder { opcode: i32 },
    #[error("Failed to decode opcode 0x{opcode:02X}: {source}")]
    Decode { opcode: i32, source: DecodeError },
    #[error("Handler for {type_name} failed: {reason:#}")]
    Handler {
        type_name: &'static str,
        reason: anyhow::Error,
    },
    #[error("No encoder registered for {type_name}")]
    NoEncoder { type_name: &'static str },
    #[error("Failed to encode {type_name}: {source}")]
    Encode {
        type_name: &'static str,
        source: EncodeError,
    },
    #[error("Illegal state transition {from} -> {to}")]
    IllegalTransition { from: ProtocolState, to: ProtocolState },
    #[error("Session is closed")]
    Closed,
}

impl ProtocolError {
    /// Fatal errors are bugs in the local catalogue or send path; the rest
    /// are caused by the peer and only end that connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::NoEncoder { .. } | ProtocolError::Encode { .. })
    }
}
