//! Shared request queue layout.
//!
//! The queue is produced outside the pool (possibly by accelerator code) and only its
//! `tail` counter is part of the shared contract: the number of requests appended so
//! far, a `u32` at [`RequestQueue::TAIL_OFFSET`]. The pool never writes it.

use crate::accessor::CrossDomainReader;
use crate::backend::Residency;
use crate::error::PoolResult;
use std::mem::offset_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Request queue header shared with producers.
#[repr(C)]
#[derive(Debug, Default)]
pub struct RequestQueue {
    tail: AtomicU32,
}

impl RequestQueue {
    /// Byte offset of the `tail` counter within the shared layout.
    pub const TAIL_OFFSET: usize = offset_of!(RequestQueue, tail);

    /// Create an empty queue (`tail == 0`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of appended requests.
    #[must_use]
    pub fn tail(&self) -> u32 {
        self.tail.load(Ordering::Acquire)
    }

    /// Append one request, returning its index.
    pub fn push(&self) -> u32 {
        self.tail.fetch_add(1, Ordering::Release)
    }

    /// Append `count` requests at once, returning the new tail.
    pub fn publish(&self, count: u32) -> u32 {
        self.tail.fetch_add(count, Ordering::Release).wrapping_add(count)
    }

    /// Raise the tail to `tail`. Never lowers it.
    pub fn set_tail(&self, tail: u32) {
        self.tail.fetch_max(tail, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
enum Location {
    Host(Arc<RequestQueue>),
    Device(NonNull<RequestQueue>),
}

/// Handle to the queue a pool's daemon observes.
#[derive(Debug, Clone)]
pub struct QueueRef {
    location: Location,
}

// SAFETY: a device queue is never dereferenced on the host; its tail is only read through
// the backend's copy primitive. The caller of `QueueRef::device` vouches for its lifetime.
unsafe impl Send for QueueRef {}
unsafe impl Sync for QueueRef {}

impl QueueRef {
    /// Queue living in host memory.
    #[must_use]
    pub fn host(queue: Arc<RequestQueue>) -> Self {
        Self {
            location: Location::Host(queue),
        }
    }

    /// Queue living in accelerator memory.
    ///
    /// # Safety
    ///
    /// `queue` must point to a `RequestQueue` layout in device memory that stays allocated
    /// until the queue is replaced, cleared, or the pool is terminated.
    ///
    /// A pool remembers progress per queue address, so a different queue placed later at
    /// the same address resumes from the old one's `processed_tail`.
    #[must_use]
    pub unsafe fn device(queue: NonNull<RequestQueue>) -> Self {
        Self {
            location: Location::Device(queue),
        }
    }

    /// Where the queue lives.
    #[must_use]
    pub fn residency(&self) -> Residency {
        match self.location {
            Location::Host(_) => Residency::Host,
            Location::Device(_) => Residency::Device,
        }
    }

    /// Address of the `tail` counter.
    #[must_use]
    pub fn tail_addr(&self) -> *const u32 {
        match &self.location {
            Location::Host(queue) => queue.tail.as_ptr().cast_const(),
            Location::Device(ptr) => ptr
                .as_ptr()
                .cast::<u8>()
                .wrapping_add(RequestQueue::TAIL_OFFSET)
                .cast::<u32>()
                .cast_const(),
        }
    }

    /// Whether both handles refer to the same queue.
    #[must_use]
    pub fn same_queue(&self, other: &Self) -> bool {
        self.residency() == other.residency() && self.tail_addr() == other.tail_addr()
    }

    /// Observe the tail through `reader`.
    pub(crate) fn read_tail(&self, reader: &CrossDomainReader) -> PoolResult<u32> {
        // SAFETY: host queues are kept alive by the Arc; device queues per `QueueRef::device`
        unsafe { reader.read_scalar(self.tail_addr(), self.residency()) }
    }
}
