//! Fixed-block memory pools.
//!
//! Each session pre-allocates all of its transient buffers at create time:
//! frame buffers, MTU slice buffers, and send-batch permits. Acquire and
//! release are O(1) LIFO operations under a short critical section, so they
//! are safe to call from any producer thread. A [`Block`] returns itself to
//! the pool it came from when dropped, which is what keeps the
//! "memory goes back to its own pool" rule from ever being violated.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

struct PoolInner {
    free: Mutex<Vec<Box<[u8]>>>,
    block_size: usize,
}

/// A pool of `count` equally-sized byte blocks.
#[derive(Clone)]
pub struct BlockPool {
    inner: Arc<PoolInner>,
}

impl BlockPool {
    pub fn new(block_size: usize, count: usize) -> BlockPool {
        let free = (0..count)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();
        BlockPool {
            inner: Arc::new(PoolInner { free: Mutex::new(free), block_size }),
        }
    }

    /// Takes a block, or `None` when the pool is exhausted. Exhaustion is a
    /// recoverable condition; the originating operation reports it and the
    /// caller may retry once in-flight traffic drains.
    pub fn acquire(&self) -> Option<Block> {
        let buf = self.inner.free.lock().pop()?;
        Some(Block { buf: Some(buf), len: 0, pool: Arc::clone(&self.inner) })
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Free blocks currently available.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.inner.block_size)
            .field("available", &self.available())
            .finish()
    }
}

/// One block checked out of a [`BlockPool`].
///
/// Dereferences to the written prefix (`..len`); `bytes_mut` exposes the
/// whole capacity for packing. Dropping the block returns it to its pool.
pub struct Block {
    buf: Option<Box<[u8]>>,
    len: usize,
    pool: Arc<PoolInner>,
}

impl Block {
    /// Copies `data` to the start of the block and sets the written length.
    /// `data` must fit the block; every caller sizes its input against the
    /// owning pool first.
    pub fn write(&mut self, data: &[u8]) {
        let buf = self.buf.as_mut().unwrap();
        buf[..data.len()].copy_from_slice(data);
        self.len = data.len();
    }

    /// The full backing storage, independent of the written length.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().unwrap()
    }

    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity());
        self.len = len;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.as_ref().unwrap().len()
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf.as_ref().unwrap()[..self.len]
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.buf.as_mut().unwrap()[..len]
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.free.lock().push(buf);
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}
