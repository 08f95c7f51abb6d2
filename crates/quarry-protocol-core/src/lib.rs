pub mod alloc;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod packet;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;

pub use alloc::{default_allocator, BufAllocator, PooledAllocator, UnpooledAllocator};
pub use buffer::*;
pub use codec::*;
pub use config::CodecLimits;
pub use connection::{Connection, ConnectionReader, ConnectionWriter};
pub use error::*;
pub use packet::*;
pub use protocol::*;
pub use registry::*;
pub use session::*;
pub use state::*;
