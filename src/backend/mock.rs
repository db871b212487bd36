//! Simulated accelerator backend.
//!
//! Device regions are carved from host RAM but are only reachable through the backend:
//! reads go through [`copy_to_host`](MemoryBackend::copy_to_host) and producer writes go
//! through [`MockDeviceBackend::write_device`], both serialized by one transfer lock the way
//! a real copy engine serializes DMA. This lets the daemon's accelerator path, and every
//! failure on it, run without hardware.

use super::host::HostBackend;
use super::{MemoryBackend, Residency};
use crate::accessor::Scalar;
use crate::error::{PoolError, PoolResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Accelerator simulated in host memory, with failure injection.
#[derive(Debug, Default)]
pub struct MockDeviceBackend {
    /// Live device regions: base address -> size
    device_regions: Mutex<BTreeMap<usize, usize>>,
    /// Live host regions (for leak checks)
    host_regions: AtomicUsize,
    /// Serializes simulated transfers against producer writes
    transfer_lock: Mutex<()>,
    fail_allocations: AtomicBool,
    fail_copies: AtomicBool,
    copies: AtomicUsize,
}

impl MockDeviceBackend {
    /// Create a mock accelerator with no live regions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `allocate` call fail (or succeed again).
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent device-to-host copy fail (or succeed again).
    pub fn set_fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }

    /// Number of successful device-to-host copies so far.
    #[must_use]
    pub fn copies_performed(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    /// Number of regions (host and device) not yet released.
    #[must_use]
    pub fn live_regions(&self) -> usize {
        self.device_regions.lock().len() + self.host_regions.load(Ordering::SeqCst)
    }

    /// Write a scalar into simulated device memory, as accelerator-side code would.
    ///
    /// # Errors
    ///
    /// `AcceleratorCopy` if `dst` does not lie inside a live device region.
    #[allow(clippy::not_unsafe_ptr_arg_deref)] // dst is range-checked against live regions
    pub fn write_device<T: Scalar>(&self, dst: *mut T, value: T) -> PoolResult<()> {
        let len = size_of::<T>();
        self.check_device_range(dst as usize, len)?;
        let _transfer = self.transfer_lock.lock();
        // SAFETY: range checked against a live region; writers and readers hold transfer_lock
        unsafe { dst.write_unaligned(value) };
        Ok(())
    }

    fn check_device_range(&self, addr: usize, len: usize) -> PoolResult<()> {
        let regions = self.device_regions.lock();
        let inside = regions
            .range(..=addr)
            .next_back()
            .is_some_and(|(&base, &size)| addr.checked_add(len).is_some_and(|end| end <= base + size));

        if inside {
            Ok(())
        } else {
            Err(PoolError::AcceleratorCopy {
                len,
                reason: format!("address {addr:#x} is not inside a live device region"),
            })
        }
    }
}

impl MemoryBackend for MockDeviceBackend {
    fn name(&self) -> &str {
        "mock-device"
    }

    fn supports(&self, _residency: Residency) -> bool {
        true
    }

    fn allocate(&self, size: usize, residency: Residency) -> PoolResult<NonNull<u8>> {
        if self.fail_allocations.load(Ordering::SeqCst) {
            return Err(PoolError::BackingAllocation {
                size,
                residency,
                backend: self.name().to_string(),
                reason: "injected allocation failure".to_string(),
            });
        }

        let ptr = HostBackend::allocate_host(size)?;
        match residency {
            Residency::Host => {
                self.host_regions.fetch_add(1, Ordering::SeqCst);
            }
            Residency::Device => {
                self.device_regions.lock().insert(ptr.as_ptr() as usize, size);
            }
        }
        Ok(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize, residency: Residency) {
        match residency {
            Residency::Host => {
                self.host_regions.fetch_sub(1, Ordering::SeqCst);
            }
            Residency::Device => {
                self.device_regions.lock().remove(&(ptr.as_ptr() as usize));
            }
        }
        // SAFETY: every region, host or device, came from allocate_host
        unsafe { HostBackend::release_host(ptr, size) }
    }

    unsafe fn copy_to_host(&self, dst: *mut u8, src: *const u8, len: usize) -> PoolResult<()> {
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(PoolError::AcceleratorCopy {
                len,
                reason: "injected copy failure".to_string(),
            });
        }

        self.check_device_range(src as usize, len)?;
        let _transfer = self.transfer_lock.lock();
        // SAFETY: src range checked, dst validity is the caller's contract
        unsafe { std::ptr::copy_nonoverlapping(src, dst, len) };
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_roundtrip_through_copy_engine() {
        let backend = MockDeviceBackend::new();
        let region = backend.allocate(64, Residency::Device).unwrap();
        let slot = region.as_ptr().cast::<u64>();

        backend.write_device(slot, 0xDEAD_BEEF_u64).unwrap();

        let mut out = 0u64;
        unsafe {
            backend
                .copy_to_host((&mut out as *mut u64).cast(), slot.cast(), 8)
                .unwrap();
        }
        assert_eq!(out, 0xDEAD_BEEF);
        assert_eq!(backend.copies_performed(), 1);

        unsafe { backend.release(region, 64, Residency::Device) };
        assert_eq!(backend.live_regions(), 0);
    }

    #[test]
    fn test_copy_outside_device_region_fails() {
        let backend = MockDeviceBackend::new();
        let host_value = 7u32;
        let mut out = 0u32;
        let err = unsafe {
            backend.copy_to_host(
                (&mut out as *mut u32).cast(),
                (&host_value as *const u32).cast(),
                4,
            )
        }
        .unwrap_err();
        assert!(matches!(err, PoolError::AcceleratorCopy { len: 4, .. }));
    }

    #[test]
    fn test_copy_straddling_region_end_fails() {
        let backend = MockDeviceBackend::new();
        let region = backend.allocate(16, Residency::Device).unwrap();
        let mut out = 0u64;
        let tail = region.as_ptr().wrapping_add(12);
        let err = unsafe { backend.copy_to_host((&mut out as *mut u64).cast(), tail, 8) };
        assert!(err.is_err());
        unsafe { backend.release(region, 16, Residency::Device) };
    }

    #[test]
    fn test_injected_failures() {
        let backend = MockDeviceBackend::new();
        backend.set_fail_allocations(true);
        assert!(backend.allocate(4096, Residency::Host).is_err());
        backend.set_fail_allocations(false);

        let region = backend.allocate(4096, Residency::Device).unwrap();
        backend.set_fail_copies(true);
        let mut out = 0u32;
        let err = unsafe { backend.copy_to_host((&mut out as *mut u32).cast(), region.as_ptr(), 4) };
        assert!(matches!(err, Err(PoolError::AcceleratorCopy { .. })));
        assert_eq!(backend.copies_performed(), 0);

        unsafe { backend.release(region, 4096, Residency::Device) };
    }
}
