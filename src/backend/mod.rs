//! Backing memory providers.
//!
//! A [`MemoryBackend`] hands out contiguous regions for a given [`Residency`], releases
//! them when the pool is torn down, and performs the synchronous device-to-host copies
//! the daemon needs to observe accelerator-resident state.
//!
//! - [`HostBackend`]: host heap only; accelerator requests fail with
//!   `PoolError::AcceleratorUnavailable`
//! - `CudaBackend`: CUDA runtime (`cuda` feature)
//! - `MockDeviceBackend`: accelerator memory simulated in host RAM (`mock` feature)

use crate::error::PoolResult;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

pub mod host;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use host::HostBackend;

#[cfg(feature = "cuda")]
pub use cuda::CudaBackend;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockDeviceBackend;

/// Alignment guaranteed for the base of every region a backend returns.
///
/// Matches the `cudaMalloc` guarantee. Requests aligned to at most this value never need
/// padding at the start of a fresh buffer.
pub const REGION_ALIGNMENT: usize = 256;

/// Where a memory region lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    /// Directly addressable by the host
    Host,
    /// Addressable only by the accelerator
    Device,
}

impl fmt::Display for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Device => write!(f, "device"),
        }
    }
}

/// Provider of backing regions and of the accelerator copy primitive.
pub trait MemoryBackend: Send + Sync + fmt::Debug {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Whether regions of this residency can be provided (and, for `Device`, read back).
    fn supports(&self, residency: Residency) -> bool;

    /// Obtain a contiguous region of `size` bytes aligned to [`REGION_ALIGNMENT`].
    ///
    /// # Errors
    ///
    /// `AcceleratorUnavailable` if `residency` is unsupported, `BackingAllocation` if the
    /// provider cannot supply the region.
    fn allocate(&self, size: usize, residency: Residency) -> PoolResult<NonNull<u8>>;

    /// Return a region to the provider.
    ///
    /// # Safety
    ///
    /// `ptr`, `size` and `residency` must be exactly those of a region previously returned
    /// by [`allocate`](Self::allocate) on this backend, and the region must not be used
    /// afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize, residency: Residency);

    /// Synchronously copy `len` bytes from accelerator memory at `src` into host memory at `dst`.
    ///
    /// # Errors
    ///
    /// `AcceleratorUnavailable` if the backend has no accelerator, `AcceleratorCopy` if the
    /// transfer fails.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for `len` bytes of writes. `src` must be a device address readable
    /// for `len` bytes.
    unsafe fn copy_to_host(&self, dst: *mut u8, src: *const u8, len: usize) -> PoolResult<()>;
}

/// The backend matching the compiled feature set.
///
/// Returns the CUDA backend when built with `--features cuda`, the host backend otherwise.
#[must_use]
pub fn default_backend() -> Arc<dyn MemoryBackend> {
    #[cfg(feature = "cuda")]
    {
        Arc::new(CudaBackend::new())
    }

    #[cfg(not(feature = "cuda"))]
    {
        Arc::new(HostBackend::new())
    }
}

/// Whether accelerator support was compiled into this build.
#[must_use]
pub const fn accelerator_compiled() -> bool {
    cfg!(feature = "cuda")
}
