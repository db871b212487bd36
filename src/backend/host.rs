//! Host heap backend.

use super::{MemoryBackend, Residency};
use crate::error::{PoolError, PoolResult};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Backend serving host-resident regions from the global allocator.
///
/// Has no accelerator: device allocations and device-to-host copies fail with
/// `PoolError::AcceleratorUnavailable`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostBackend;

/// Host regions are page aligned, which satisfies `REGION_ALIGNMENT`.
const HOST_PAGE_ALIGNMENT: usize = 4096;

impl HostBackend {
    /// Create a host backend.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn layout(size: usize) -> PoolResult<Layout> {
        if size == 0 {
            return Err(Self::failure(size, "zero-sized region requested"));
        }
        Layout::from_size_align(size, HOST_PAGE_ALIGNMENT)
            .map_err(|e| Self::failure(size, &e.to_string()))
    }

    fn failure(size: usize, reason: &str) -> PoolError {
        PoolError::BackingAllocation {
            size,
            residency: Residency::Host,
            backend: "host".to_string(),
            reason: reason.to_string(),
        }
    }

    /// Allocate a zeroed host region; shared with the other backends for host residency.
    pub(crate) fn allocate_host(size: usize) -> PoolResult<NonNull<u8>> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| Self::failure(size, "global allocator returned null"))
    }

    /// Release a region obtained from [`allocate_host`](Self::allocate_host).
    ///
    /// # Safety
    ///
    /// `ptr` and `size` must come from a prior `allocate_host` call.
    pub(crate) unsafe fn release_host(ptr: NonNull<u8>, size: usize) {
        match Layout::from_size_align(size, HOST_PAGE_ALIGNMENT) {
            // SAFETY: same layout as the allocation, guaranteed by the caller
            Ok(layout) => unsafe { alloc::dealloc(ptr.as_ptr(), layout) },
            Err(e) => tracing::error!(size, error = %e, "Cannot rebuild layout; leaking host region"),
        }
    }
}

impl MemoryBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn supports(&self, residency: Residency) -> bool {
        residency == Residency::Host
    }

    fn allocate(&self, size: usize, residency: Residency) -> PoolResult<NonNull<u8>> {
        match residency {
            Residency::Host => Self::allocate_host(size),
            Residency::Device => Err(PoolError::AcceleratorUnavailable),
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize, residency: Residency) {
        debug_assert_eq!(residency, Residency::Host);
        // SAFETY: forwarded caller contract
        unsafe { Self::release_host(ptr, size) }
    }

    unsafe fn copy_to_host(&self, _dst: *mut u8, _src: *const u8, _len: usize) -> PoolResult<()> {
        Err(PoolError::AcceleratorUnavailable)
    }
}
