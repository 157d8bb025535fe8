//! Buffer pooling across connections.
//!
//! Connections come and go far more often than buffers need to grow, so the
//! server keeps the read and write buffers of finished connections around
//! and hands them to the next accept. The pool is lock-free and unbounded in
//! the sense that it never blocks; when full, returned buffers are simply
//! dropped.

use bytes::BytesMut;
use crossbeam_queue::ArrayQueue;

use crate::bufio::{MAX_BUFFER_SIZE, MIN_CAPACITY};

const DEFAULT_POOL_SIZE: usize = 1024;

/// A pool of reusable `BytesMut` buffers.
///
/// Buffers keep their grown capacity while pooled, up to a ceiling: anything
/// that grew beyond [`MAX_BUFFER_SIZE`] is dropped on return so a single
/// oversize frame cannot pin memory for the lifetime of the process.
#[derive(Debug)]
pub struct BufferPool {
    buffers: ArrayQueue<BytesMut>,
    default_capacity: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_POOL_SIZE, MIN_CAPACITY)
    }

    pub fn with_config(pool_size: usize, buffer_capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(pool_size),
            default_capacity: buffer_capacity,
        }
    }

    /// Pops a recycled buffer, or allocates a fresh one.
    pub fn get(&self) -> BytesMut {
        self.buffers
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.default_capacity))
    }

    /// Clears `buf` and returns it to the pool. Oversize buffers and buffers
    /// beyond the pool's capacity are dropped.
    pub fn put(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() <= MAX_BUFFER_SIZE {
            let _ = self.buffers.push(buf);
        }
    }

    /// Number of buffers currently pooled.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}
