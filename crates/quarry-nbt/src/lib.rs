//! NBT trees: the value model, a validating writer, and a reader that
//! enforces depth and size ceilings on untrusted input.

mod error;
mod read;
mod tag;
mod value;
mod write;

pub use error::{NbtError, NbtResult};
pub use read::{read_named, read_network, NbtLimits};
pub use tag::TagType;
pub use value::NbtValue;
pub use write::{write_named, write_network};
