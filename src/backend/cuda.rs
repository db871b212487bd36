//! CUDA runtime backend.
//!
//! Device buffers come from `cudaMalloc`; host buffers fall back to the host heap.
//! Tail observation uses a blocking `cudaMemcpy` (device-to-host), which is bounded
//! and does not wait on any kernel-side signal.

use super::host::HostBackend;
use super::{MemoryBackend, Residency};
use crate::error::{PoolError, PoolResult};
use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::ptr::{self, NonNull};

mod ffi {
    use super::{c_char, c_int, c_void};

    /// `cudaError_t`; 0 is success.
    pub type CudaError = c_int;

    pub const CUDA_SUCCESS: CudaError = 0;

    /// `cudaMemcpyDeviceToHost`
    pub const MEMCPY_DEVICE_TO_HOST: c_int = 2;

    #[link(name = "cudart")]
    extern "C" {
        pub fn cudaMalloc(dev_ptr: *mut *mut c_void, size: usize) -> CudaError;
        pub fn cudaFree(dev_ptr: *mut c_void) -> CudaError;
        pub fn cudaMemcpy(
            dst: *mut c_void,
            src: *const c_void,
            count: usize,
            kind: c_int,
        ) -> CudaError;
        pub fn cudaGetErrorString(error: CudaError) -> *const c_char;
    }
}

fn describe(code: ffi::CudaError) -> String {
    // SAFETY: cudaGetErrorString returns a static NUL-terminated string for any code
    let message = unsafe { ffi::cudaGetErrorString(code) };
    if message.is_null() {
        return format!("CUDA error {code}");
    }
    // SAFETY: non-null, static, NUL-terminated
    let text = unsafe { CStr::from_ptr(message) };
    format!("CUDA error {code}: {}", text.to_string_lossy())
}

/// Backend using the CUDA runtime for device-resident buffers.
#[derive(Debug, Default, Clone, Copy)]
pub struct CudaBackend;

impl CudaBackend {
    /// Create a CUDA backend on the current device.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MemoryBackend for CudaBackend {
    fn name(&self) -> &str {
        "cuda"
    }

    fn supports(&self, _residency: Residency) -> bool {
        true
    }

    fn allocate(&self, size: usize, residency: Residency) -> PoolResult<NonNull<u8>> {
        if residency == Residency::Host {
            return HostBackend::allocate_host(size);
        }

        let mut raw: *mut c_void = ptr::null_mut();
        // SAFETY: out-pointer is valid for writes
        let code = unsafe { ffi::cudaMalloc(&mut raw, size) };
        if code != ffi::CUDA_SUCCESS {
            return Err(PoolError::BackingAllocation {
                size,
                residency,
                backend: self.name().to_string(),
                reason: describe(code),
            });
        }

        NonNull::new(raw.cast::<u8>()).ok_or_else(|| PoolError::BackingAllocation {
            size,
            residency,
            backend: self.name().to_string(),
            reason: "cudaMalloc returned null".to_string(),
        })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize, residency: Residency) {
        match residency {
            // SAFETY: forwarded caller contract
            Residency::Host => unsafe { HostBackend::release_host(ptr, size) },
            Residency::Device => {
                // SAFETY: ptr came from cudaMalloc
                let code = unsafe { ffi::cudaFree(ptr.as_ptr().cast()) };
                if code != ffi::CUDA_SUCCESS {
                    tracing::error!(size, error = %describe(code), "cudaFree failed");
                }
            }
        }
    }

    unsafe fn copy_to_host(&self, dst: *mut u8, src: *const u8, len: usize) -> PoolResult<()> {
        // SAFETY: dst/src validity is the caller's contract
        let code = unsafe {
            ffi::cudaMemcpy(dst.cast(), src.cast(), len, ffi::MEMCPY_DEVICE_TO_HOST)
        };
        if code == ffi::CUDA_SUCCESS {
            Ok(())
        } else {
            Err(PoolError::AcceleratorCopy {
                len,
                reason: describe(code),
            })
        }
    }
}
