//! Linear (bump) allocator over one contiguous region.
//!
//! Individual allocations are never freed; the whole region is returned to its backend
//! when the allocator is dropped.

use crate::backend::{MemoryBackend, Residency};
use crate::error::PoolResult;
use std::ptr::NonNull;
use std::sync::Arc;

/// Snapshot of one backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Base address of the region
    pub base: usize,
    /// Total capacity in bytes
    pub capacity: usize,
    /// Bytes consumed, including alignment padding
    pub used: usize,
    /// Where the region lives
    pub residency: Residency,
}

/// Bump allocator owning one backend region.
#[derive(Debug)]
pub struct BumpAllocator {
    base: NonNull<u8>,
    capacity: usize,
    cursor: usize,
    residency: Residency,
    backend: Arc<dyn MemoryBackend>,
}

// SAFETY: the region is exclusively owned and only handed out as addresses; the cursor is
// mutated through &mut self, which the pool guards with its mutex.
unsafe impl Send for BumpAllocator {}

impl BumpAllocator {
    /// Obtain a `capacity`-byte region of the given residency from `backend`.
    ///
    /// # Errors
    ///
    /// Propagates the backend's `AcceleratorUnavailable` or `BackingAllocation`.
    pub fn new(backend: Arc<dyn MemoryBackend>, capacity: usize, residency: Residency) -> PoolResult<Self> {
        let base = backend.allocate(capacity, residency)?;
        Ok(Self {
            base,
            capacity,
            cursor: 0,
            residency,
            backend,
        })
    }

    /// Carve `size` bytes whose address is a multiple of `alignment`.
    ///
    /// Returns `None` when the remaining space cannot hold the aligned request, or when
    /// `alignment` is not a non-zero power of two.
    pub fn allocate(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            return None;
        }

        let start = self.base.as_ptr() as usize;
        let current = start.checked_add(self.cursor)?;
        let aligned = current.checked_add(alignment - 1)? & !(alignment - 1);
        let offset = aligned - start;
        let end = offset.checked_add(size)?;
        if end > self.capacity {
            return None;
        }

        self.cursor = end;
        NonNull::new(self.base.as_ptr().wrapping_add(offset))
    }

    /// Total capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes consumed so far.
    #[must_use]
    pub fn used(&self) -> usize {
        self.cursor
    }

    /// Bytes still available before alignment padding.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.cursor
    }

    /// Where the region lives.
    #[must_use]
    pub fn residency(&self) -> Residency {
        self.residency
    }

    /// Base address of the region.
    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Whether `addr` falls inside the region.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base_addr() && addr - self.base_addr() < self.capacity
    }

    /// Snapshot for introspection.
    #[must_use]
    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            base: self.base_addr(),
            capacity: self.capacity,
            used: self.cursor,
            residency: self.residency,
        }
    }
}

impl Drop for BumpAllocator {
    fn drop(&mut self) {
        // SAFETY: base/capacity/residency are exactly what backend.allocate returned, and
        // the pool guarantees no outstanding users once buffers are dropped
        unsafe { self.backend.release(self.base, self.capacity, self.residency) };
    }
}
