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
//! Reference-counting primitives with observable counts.
//!
//! [`ZRc`]/[`ZWeak`] follow the usual strong/weak discipline: the
//! allocation holds the payload plus two counters, the weak count carries
//! one extra unit representing all strong owners collectively, and the
//! payload is destroyed when the last strong owner goes away while the
//! allocation survives until the last weak owner does. Counts are capped
//! at `i32::MAX`; the checked constructors surface the overflow instead
//! of wrapping.
//!
//! [`SimpleRc`] only tracks a strong count and keeps the counter header
//! inline with the payload in a single allocation. It backs the immutable
//! arc-sliced byte buffers.

use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU32, Ordering};

use zenoh_leaf_core::{bail, ZError, ZResult};

const MAX_COUNT: u32 = i32::MAX as u32;

#[repr(C)]
struct Inner<T> {
    strong: AtomicU32,
    weak: AtomicU32,
    value: ManuallyDrop<T>,
}

/// A strong reference to a shared allocation.
pub struct ZRc<T> {
    ptr: NonNull<Inner<T>>,
    _marker: PhantomData<Inner<T>>,
}

/// A weak reference: keeps the allocation alive, not the payload.
pub struct ZWeak<T> {
    ptr: NonNull<Inner<T>>,
    _marker: PhantomData<Inner<T>>,
}

unsafe impl<T: Send + Sync> Send for ZRc<T> {}
unsafe impl<T: Send + Sync> Sync for ZRc<T> {}
unsafe impl<T: Send + Sync> Send for ZWeak<T> {}
unsafe impl<T: Send + Sync> Sync for ZWeak<T> {}

impl<T> ZRc<T> {
    pub fn new(value: T) -> Self {
        let inner = Box::new(Inner {
            strong: AtomicU32::new(1),
            // The extra unit stands for all strong owners collectively and
            // is released when the last strong reference drops.
            weak: AtomicU32::new(1),
            value: ManuallyDrop::new(value),
        });
        ZRc {
            ptr: NonNull::from(Box::leak(inner)),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn inner(&self) -> &Inner<T> {
        // SAFETY: the allocation outlives every strong and weak reference.
        unsafe { self.ptr.as_ref() }
    }

    /// Clone this strong reference, failing once the count reaches
    /// `i32::MAX`.
    pub fn try_clone(&self) -> ZResult<Self> {
        let prev = self.inner().strong.fetch_add(1, Ordering::Relaxed);
        if prev >= MAX_COUNT {
            self.inner().strong.fetch_sub(1, Ordering::Relaxed);
            bail!(ZError::Overflow);
        }
        Ok(ZRc {
            ptr: self.ptr,
            _marker: PhantomData,
        })
    }

    /// Create a weak reference, failing once the count reaches `i32::MAX`.
    pub fn downgrade(&self) -> ZResult<ZWeak<T>> {
        let prev = self.inner().weak.fetch_add(1, Ordering::Relaxed);
        if prev >= MAX_COUNT {
            self.inner().weak.fetch_sub(1, Ordering::Relaxed);
            bail!(ZError::Overflow);
        }
        Ok(ZWeak {
            ptr: self.ptr,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn strong_count(&self) -> u32 {
        self.inner().strong.load(Ordering::Acquire)
    }

    #[inline]
    pub fn weak_count(&self) -> u32 {
        self.inner().weak.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }
}

impl<T> Deref for ZRc<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner().value
    }
}

impl<T> Clone for ZRc<T> {
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(rc) => rc,
            // Same policy as the standard library on count overflow.
            Err(_) => std::process::abort(),
        }
    }
}

impl<T> Drop for ZRc<T> {
    fn drop(&mut self) {
        if self.inner().strong.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            // SAFETY: strong reached zero, nobody can access the payload
            // anymore; weak references only touch the counters.
            unsafe { ManuallyDrop::drop(&mut self.ptr.as_mut().value) };
            // Release the unit held collectively by the strong owners.
            drop_weak(self.ptr);
        }
    }
}

impl<T> ZWeak<T> {
    #[inline]
    fn inner(&self) -> &Inner<T> {
        // SAFETY: the allocation outlives every weak reference.
        unsafe { self.ptr.as_ref() }
    }

    /// Attempt to promote this weak reference into a strong one. Returns
    /// `None` if the payload is already gone or the strong count is
    /// saturated.
    pub fn upgrade(&self) -> Option<ZRc<T>> {
        let strong = &self.inner().strong;
        let mut prev = strong.load(Ordering::Relaxed);
        while prev != 0 && prev < MAX_COUNT {
            match strong.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(ZRc {
                        ptr: self.ptr,
                        _marker: PhantomData,
                    })
                }
                Err(now) => prev = now,
            }
        }
        None
    }

    pub fn try_clone(&self) -> ZResult<Self> {
        let prev = self.inner().weak.fetch_add(1, Ordering::Relaxed);
        if prev >= MAX_COUNT {
            self.inner().weak.fetch_sub(1, Ordering::Relaxed);
            bail!(ZError::Overflow);
        }
        Ok(ZWeak {
            ptr: self.ptr,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn strong_count(&self) -> u32 {
        self.inner().strong.load(Ordering::Acquire)
    }
}

impl<T> Clone for ZWeak<T> {
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(w) => w,
            Err(_) => std::process::abort(),
        }
    }
}

impl<T> Drop for ZWeak<T> {
    fn drop(&mut self) {
        drop_weak(self.ptr);
    }
}

fn drop_weak<T>(ptr: NonNull<Inner<T>>) {
    // SAFETY: callers hold one weak unit; the allocation is valid.
    let weak = unsafe { &ptr.as_ref().weak };
    if weak.fetch_sub(1, Ordering::Release) == 1 {
        fence(Ordering::Acquire);
        // SAFETY: both counts are zero, the payload has been destroyed by
        // the last strong owner; `ManuallyDrop` makes this drop a no-op on
        // the payload and only releases the allocation.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

#[repr(C)]
struct SimpleInner<T> {
    count: AtomicU32,
    value: T,
}

/// A strong-count-only shared allocation, counter header inline with the
/// payload.
pub struct SimpleRc<T> {
    ptr: NonNull<SimpleInner<T>>,
    _marker: PhantomData<SimpleInner<T>>,
}

unsafe impl<T: Send + Sync> Send for SimpleRc<T> {}
unsafe impl<T: Send + Sync> Sync for SimpleRc<T> {}

impl<T> SimpleRc<T> {
    pub fn new(value: T) -> Self {
        let inner = Box::new(SimpleInner {
            count: AtomicU32::new(1),
            value,
        });
        SimpleRc {
            ptr: NonNull::from(Box::leak(inner)),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn inner(&self) -> &SimpleInner<T> {
        // SAFETY: the allocation outlives every reference.
        unsafe { self.ptr.as_ref() }
    }

    pub fn try_clone(&self) -> ZResult<Self> {
        let prev = self.inner().count.fetch_add(1, Ordering::Relaxed);
        if prev >= MAX_COUNT {
            self.inner().count.fetch_sub(1, Ordering::Relaxed);
            bail!(ZError::Overflow);
        }
        Ok(SimpleRc {
            ptr: self.ptr,
            _marker: PhantomData,
        })
    }

    #[inline]
    pub fn strong_count(&self) -> u32 {
        self.inner().count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }
}

impl<T> Deref for SimpleRc<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.inner().value
    }
}

impl<T> Clone for SimpleRc<T> {
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(rc) => rc,
            Err(_) => std::process::abort(),
        }
    }
}

impl<T> Drop for SimpleRc<T> {
    fn drop(&mut self) {
        if self.inner().count.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            // SAFETY: last owner, nobody else can observe the allocation.
            drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
        }
    }
}
