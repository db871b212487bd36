//! Cross-domain scalar reads.
//!
//! The daemon must observe counters that accelerator-side code may be mutating. Host
//! addresses are read directly with an acquire load; device addresses are copied into
//! host memory through the backend's synchronous copy primitive. A build without an
//! accelerator reports `PoolError::AcceleratorUnavailable` instead of guessing.

use crate::backend::{MemoryBackend, Residency};
use crate::error::{PoolError, PoolResult};
use std::fmt;
use std::mem::{size_of, MaybeUninit};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

mod sealed {
    pub trait Sealed {}
}

/// Fixed-width integer that can be read across execution domains.
///
/// Sealed: implemented for `u32`, `i32`, `u64`, `i64` and `usize`, the widths a shared
/// counter can have.
pub trait Scalar: Copy + Send + Sync + fmt::Debug + PartialOrd + sealed::Sealed + 'static {
    /// Acquire-load a value living in host memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, aligned, and valid for reads for the duration of the call.
    /// Concurrent writers must use atomic stores of the same width.
    #[doc(hidden)]
    unsafe fn load_host(ptr: *const Self) -> Self;
}

macro_rules! impl_scalar {
    ($($ty:ty => $atomic:ty),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Scalar for $ty {
                #[inline]
                unsafe fn load_host(ptr: *const Self) -> Self {
                    // SAFETY: caller guarantees alignment and validity; the atomic type has
                    // the same size and alignment as the integer
                    unsafe { <$atomic>::from_ptr(ptr.cast_mut()) }.load(Ordering::Acquire)
                }
            }
        )*
    };
}

impl_scalar! {
    u32 => AtomicU32,
    i32 => AtomicI32,
    u64 => AtomicU64,
    i64 => AtomicI64,
    usize => AtomicUsize,
}

/// Reads scalars from host or accelerator memory, selected by residency tag.
#[derive(Debug, Clone)]
pub struct CrossDomainReader {
    backend: Arc<dyn MemoryBackend>,
}

impl CrossDomainReader {
    /// Create a reader that performs device copies through `backend`.
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }

    /// Read the current value at `addr`.
    ///
    /// # Errors
    ///
    /// - `AcceleratorUnavailable` for a device address when the backend has no accelerator
    /// - `AcceleratorCopy` if the device-to-host transfer fails
    ///
    /// # Safety
    ///
    /// For `Residency::Host`, `addr` must satisfy [`Scalar::load_host`]. For
    /// `Residency::Device`, `addr` must be a device address readable for `size_of::<T>()`
    /// bytes.
    pub unsafe fn read_scalar<T: Scalar>(&self, addr: *const T, residency: Residency) -> PoolResult<T> {
        match residency {
            // SAFETY: forwarded caller contract
            Residency::Host => Ok(unsafe { T::load_host(addr) }),
            Residency::Device => {
                if !self.backend.supports(Residency::Device) {
                    return Err(PoolError::AcceleratorUnavailable);
                }

                let mut value = MaybeUninit::<T>::uninit();
                // SAFETY: value is valid for size_of::<T>() bytes of writes; addr per caller
                unsafe {
                    self.backend.copy_to_host(
                        value.as_mut_ptr().cast::<u8>(),
                        addr.cast::<u8>(),
                        size_of::<T>(),
                    )?;
                }
                // SAFETY: the copy succeeded and every bit pattern is a valid integer
                Ok(unsafe { value.assume_init() })
            }
        }
    }
}
