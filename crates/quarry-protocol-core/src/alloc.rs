use bytes::BytesMut;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::buffer::ByteBuf;

/// Initial capacity of a buffer obtained without an explicit size.
pub const DEFAULT_INITIAL_CAPACITY: usize = 256;
/// Size of each arena chunk a [`PooledAllocator`] carves buffers from.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Source of fresh, empty, writable buffers.
///
/// Every buffer returned owns its storage exclusively; no two live buffers
/// handed out by an allocator overlap.
pub trait BufAllocator: Send + Sync {
    fn heap_buffer_with_capacity(&self, capacity: usize) -> ByteBuf;

    fn direct_buffer_with_capacity(&self, capacity: usize) -> ByteBuf;

    /// Whether this allocator hands out direct buffers from `buffer()`.
    fn prefers_direct(&self) -> bool;

    fn is_pooled(&self) -> bool;

    fn buffer(&self) -> ByteBuf {
        self.buffer_with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    fn buffer_with_capacity(&self, capacity: usize) -> ByteBuf {
        if self.prefers_direct() {
            self.direct_buffer_with_capacity(capacity)
        } else {
            self.heap_buffer_with_capacity(capacity)
        }
    }

    fn heap_buffer(&self) -> ByteBuf {
        self.heap_buffer_with_capacity(DEFAULT_INITIAL_CAPACITY)
    }

    fn direct_buffer(&self) -> ByteBuf {
        self.direct_buffer_with_capacity(DEFAULT_INITIAL_CAPACITY)
    }
}

/// Allocates every buffer fresh from the global allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnpooledAllocator {
    prefer_direct: bool,
}

impl UnpooledAllocator {
    pub fn new(prefer_direct: bool) -> Self {
        Self { prefer_direct }
    }
}

impl BufAllocator for UnpooledAllocator {
    fn heap_buffer_with_capacity(&self, capacity: usize) -> ByteBuf {
        ByteBuf::from_parts(BytesMut::with_capacity(capacity), false)
    }

    fn direct_buffer_with_capacity(&self, capacity: usize) -> ByteBuf {
        ByteBuf::from_parts(BytesMut::with_capacity(capacity), true)
    }

    fn prefers_direct(&self) -> bool {
        self.prefer_direct
    }

    fn is_pooled(&self) -> bool {
        false
    }
}

/// Carves small buffers out of a shared arena chunk.
///
/// Each buffer is a disjoint split of the chunk, so writes never alias. A
/// chunk's memory is reclaimed for reuse once every buffer split from it has
/// been dropped; until then a new chunk is allocated when the current one
/// runs dry. Requests larger than half a chunk bypass the arena.
#[derive(Debug)]
pub struct PooledAllocator {
    arena: Mutex<BytesMut>,
    chunk_size: usize,
    prefer_direct: bool,
}

impl PooledAllocator {
    pub fn new(chunk_size: usize, prefer_direct: bool) -> Self {
        Self {
            arena: Mutex::new(BytesMut::with_capacity(chunk_size)),
            chunk_size,
            prefer_direct,
        }
    }

    fn carve(&self, capacity: usize, direct: bool) -> ByteBuf {
        if capacity == 0 || capacity > self.chunk_size / 2 {
            return ByteBuf::from_parts(BytesMut::with_capacity(capacity), direct);
        }
        let mut arena = self.arena.lock().unwrap_or_else(PoisonError::into_inner);
        if arena.capacity() < capacity {
            arena.reserve(self.chunk_size);
        }
        arena.resize(capacity, 0);
        let mut chunk = arena.split_to(capacity);
        chunk.clear();
        ByteBuf::from_parts(chunk, direct)
    }
}

impl Default for PooledAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, true)
    }
}

impl BufAllocator for PooledAllocator {
    fn heap_buffer_with_capacity(&self, capacity: usize) -> ByteBuf {
        self.carve(capacity, false)
    }

    fn direct_buffer_with_capacity(&self, capacity: usize) -> ByteBuf {
        self.carve(capacity, true)
    }

    fn prefers_direct(&self) -> bool {
        self.prefer_direct
    }

    fn is_pooled(&self) -> bool {
        true
    }
}

/// The process-wide pooled allocator used on the hot path.
pub fn default_allocator() -> Arc<PooledAllocator> {
    static DEFAULT: OnceLock<Arc<PooledAllocator>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Arc::new(PooledAllocator::default()))
        .clone()
}
