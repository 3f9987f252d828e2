//
// Copyright (c) 2023 ZettaScale Technology
//
// This program and the accompanying materials are made available under the
// terms of the Eclipse Public License 2.0 which is available at
// http://www.eclipse.org/legal/epl-2.0, or the Apache License, Version 2.0
// which is available at https://www.apache.org/licenses/LICENSE-2.0.
//
// SPDX-License-Identifier: EPL-2.0 OR Apache-2.0
//
// Contributors:
//   ZettaScale Zenoh Team, <zenoh@zettascale.tech>
//
//! Soft-bounded pool of reusable byte buffers.
//!
//! The bound only limits how many buffers are cached for reuse: `take`
//! always succeeds, allocating a fresh buffer when the pool is empty.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, Weak};

use zenoh_leaf_core::zlock;

struct PoolInner {
    buffers: Mutex<Vec<Vec<u8>>>,
    buf_capacity: usize,
    max_cached: usize,
}

#[derive(Clone)]
pub struct RecyclingBufferPool {
    inner: Arc<PoolInner>,
}

impl RecyclingBufferPool {
    pub fn new(max_cached: usize, buf_capacity: usize) -> Self {
        let mut buffers = Vec::with_capacity(max_cached);
        buffers.resize_with(max_cached, || Vec::with_capacity(buf_capacity));
        RecyclingBufferPool {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(buffers),
                buf_capacity,
                max_cached,
            }),
        }
    }

    pub fn take(&self) -> RecyclingBuffer {
        let buf = zlock!(self.inner.buffers)
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.inner.buf_capacity));
        RecyclingBuffer {
            buf,
            pool: Arc::downgrade(&self.inner),
        }
    }

    pub fn cached(&self) -> usize {
        zlock!(self.inner.buffers).len()
    }
}

/// A byte buffer that returns itself to its pool when dropped.
pub struct RecyclingBuffer {
    buf: Vec<u8>,
    pool: Weak<PoolInner>,
}

impl RecyclingBuffer {
    /// A buffer detached from any pool; dropped normally.
    pub fn detached(buf: Vec<u8>) -> Self {
        RecyclingBuffer {
            buf,
            pool: Weak::new(),
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl From<Vec<u8>> for RecyclingBuffer {
    fn from(buf: Vec<u8>) -> Self {
        RecyclingBuffer::detached(buf)
    }
}

impl Deref for RecyclingBuffer {
    type Target = Vec<u8>;

    #[inline]
    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for RecyclingBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Drop for RecyclingBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let mut buffers = zlock!(pool.buffers);
            if buffers.len() < pool.max_cached {
                let mut buf = std::mem::take(&mut self.buf);
                buf.clear();
                buffers.push(buf);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_recycled() {
        let pool = RecyclingBufferPool::new(2, 64);
        assert_eq!(pool.cached(), 2);
        let mut a = pool.take();
        a.extend_from_slice(b"payload");
        let b = pool.take();
        assert_eq!(pool.cached(), 0);
        drop(a);
        drop(b);
        assert_eq!(pool.cached(), 2);
        // Recycled buffers come back empty.
        assert!(pool.take().is_empty());
    }

    #[test]
    fn soft_bound_allows_extra_buffers() {
        let pool = RecyclingBufferPool::new(1, 16);
        let a = pool.take();
        let b = pool.take();
        drop(a);
        drop(b);
        assert_eq!(pool.cached(), 1);
    }

    #[test]
    fn detached_buffer_skips_the_pool() {
        let pool = RecyclingBufferPool::new(1, 16);
        let _ = pool.take();
        drop(RecyclingBuffer::detached(vec![1, 2, 3]));
        assert_eq!(pool.cached(), 0);
    }
}
