use thiserror::Error;

use crate::tag::TagType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NbtError {
    #[error("Unknown NBT tag id {0}")]
    UnknownTag(u8),
    #[error("NBT nesting deeper than {max}")]
    DepthExceeded { max: usize },
    #[error("NBT payload larger than {max} bytes")]
    SizeExceeded { max: usize },
    #[error("Negative NBT length {0}")]
    NegativeLength(i32),
    #[error("Not enough data: needed {needed} bytes, {available} available")]
    NotEnoughData { needed: usize, available: usize },
    #[error("Invalid UTF-8 in NBT string")]
    InvalidUtf8,
    #[error("NBT list of end tags with {0} elements")]
    NonEmptyEndList(i32),
    #[error("NBT root must be a compound, found tag {0}")]
    RootNotCompound(u8),
    #[error("NBT list of {expected} contains {found}")]
    MixedList { expected: TagType, found: TagType },
    #[error("NBT string of {0} bytes does not fit a u16 length")]
    StringTooLong(usize),
    #[error("NBT length {0} does not fit an i32")]
    LengthOverflow(usize),
}

pub type NbtResult<T> = Result<T, NbtError>;
