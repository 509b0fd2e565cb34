//! Fixed-count, fixed-size reusable byte buffer pool (C2).
//!
//! A counting semaphore (approximated here with a `Condvar` over a free
//! count, since `std` has no semaphore) guards allocation: `alloc` blocks up
//! to a caller-specified timeout waiting for a free buffer, `release`
//! returns it to the pool. A buffer returned from `alloc` must be released
//! exactly once; double-release is a no-op guarded by `in_use`.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub struct Buffer {
    pub data: Vec<u8>,
    pub length: u16,
    pub tailroom: u16,
}

impl Buffer {
    fn new(capacity: u16) -> Self {
        Self { data: vec![0u8; capacity as usize], length: 0, tailroom: capacity }
    }

    /// Clear `length` without freeing the backing storage.
    pub fn reset(&mut self) {
        self.length = 0;
        self.tailroom = self.data.len() as u16;
    }
}

struct Slot {
    in_use: bool,
    buffer: Buffer,
}

struct Inner {
    slots: Vec<Slot>,
    free_count: usize,
}

/// A pool of `count` buffers of `size` bytes each.
pub struct BufferPool {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl BufferPool {
    pub fn new(count: u8, size: u16) -> Self {
        let slots = (0..count).map(|_| Slot { in_use: false, buffer: Buffer::new(size) }).collect();
        Self {
            inner: Mutex::new(Inner { slots, free_count: count as usize }),
            available: Condvar::new(),
        }
    }

    /// Allocate a buffer, blocking up to `timeout` for one to free up.
    /// Returns the slot index, or `None` on timeout.
    pub fn alloc(&self, timeout: Duration) -> Option<usize> {
        let mut inner = self.inner.lock().unwrap();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(idx) = inner.slots.iter().position(|s| !s.in_use) {
                inner.slots[idx].in_use = true;
                inner.slots[idx].buffer.reset();
                inner.free_count -= 1;
                return Some(idx);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, timeout_result) =
                self.available.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
            if timeout_result.timed_out() && !inner.slots.iter().any(|s| !s.in_use) {
                return None;
            }
        }
    }

    /// Release a previously allocated buffer. A double-release on an
    /// already-free slot is a no-op.
    pub fn release(&self, idx: usize) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.slots.get_mut(idx) {
            if slot.in_use {
                slot.in_use = false;
                inner.free_count += 1;
                self.available.notify_one();
            }
        }
    }

    pub fn with_buffer<R>(&self, idx: usize, f: impl FnOnce(&mut Buffer) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        let slot = inner.slots.get_mut(idx)?;
        if !slot.in_use {
            return None;
        }
        Some(f(&mut slot.buffer))
    }

    pub fn free_count(&self) -> usize {
        self.inner.lock().unwrap().free_count
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }
}
