//! Error types for the memory pool.
//!
//! `PoolError` consolidates every failure the pool can report. The variants map onto
//! four classes:
//!
//! - **Caller misuse**: `InvalidAlignment`, `SizeOverflow`. The request itself is malformed.
//! - **Fatal out-of-memory**: `OutOfMemory`, `BackingAllocation`. Even a freshly created
//!   buffer cannot satisfy the request, or the backing provider cannot supply one at all.
//!   The pool never retries these.
//! - **Fatal capability mismatch**: `AcceleratorUnavailable`, `AcceleratorCopy`. Accelerator
//!   memory was requested or read without a working accelerator backend.
//! - **Daemon lifecycle**: `DaemonSpawn`, `DaemonPanicked`, `DaemonFailed`. Surfaced by
//!   `MemoryPool::terminate()` so that an abnormal daemon exit is distinguishable from a
//!   clean stop.
//!
//! Exhaustion of an individual buffer is not an error: the pool handles it internally by
//! growing, and `BumpAllocator::allocate` reports it as `None`.

use crate::config::ConfigError;
use crate::Residency;
use thiserror::Error;

/// Convenience alias for results using the pool error type.
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Errors reported by the memory pool, its backends and its daemon.
#[derive(Error, Debug)]
pub enum PoolError {
    /// Alignment was zero or not a power of two.
    #[error("Invalid alignment {alignment}: must be a non-zero power of two")]
    InvalidAlignment {
        /// Requested alignment
        alignment: usize,
    },

    /// The request cannot be represented in the address space.
    #[error("Allocation of {size} bytes with alignment {alignment} overflows the address space")]
    SizeOverflow {
        /// Requested size in bytes
        size: usize,
        /// Requested alignment
        alignment: usize,
    },

    /// A freshly created buffer could not satisfy the request.
    #[error(
        "Out of memory: a fresh {capacity}-byte buffer could not satisfy {size} bytes \
         (alignment {alignment})"
    )]
    OutOfMemory {
        /// Requested size in bytes
        size: usize,
        /// Requested alignment
        alignment: usize,
        /// Capacity of the buffer that was just created
        capacity: usize,
    },

    /// The backing memory provider could not supply a buffer.
    #[error("Backend '{backend}' failed to provide a {size}-byte {residency} buffer: {reason}")]
    BackingAllocation {
        /// Requested buffer size in bytes
        size: usize,
        /// Requested residency
        residency: Residency,
        /// Name of the backend that failed
        backend: String,
        /// Provider-specific failure description
        reason: String,
    },

    /// Accelerator memory was requested but no accelerator support is available.
    #[error("Accelerator support is not available in this build. Rebuild with --features cuda")]
    AcceleratorUnavailable,

    /// A synchronous device-to-host copy failed.
    #[error("Device-to-host copy of {len} bytes failed: {reason}")]
    AcceleratorCopy {
        /// Number of bytes requested
        len: usize,
        /// Provider-specific failure description
        reason: String,
    },

    /// The daemon thread could not be started.
    #[error("Failed to spawn pool daemon thread: {0}")]
    DaemonSpawn(#[source] std::io::Error),

    /// The daemon thread panicked.
    #[error("Pool daemon thread panicked")]
    DaemonPanicked,

    /// The daemon stopped without completing the termination handshake.
    #[error("Pool daemon exited abnormally: {0}")]
    DaemonFailed(String),

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PoolError::OutOfMemory {
            size: 4096,
            alignment: 16,
            capacity: 4096,
        };
        assert_eq!(
            err.to_string(),
            "Out of memory: a fresh 4096-byte buffer could not satisfy 4096 bytes (alignment 16)"
        );
    }

    #[test]
    fn test_capability_mismatch_is_distinct_from_oom() {
        let err = PoolError::AcceleratorUnavailable;
        assert!(err.to_string().contains("--features cuda"));
        assert!(!err.to_string().contains("Out of memory"));
    }

    #[test]
    fn test_backing_allocation_names_residency() {
        let err = PoolError::BackingAllocation {
            size: 1 << 20,
            residency: Residency::Device,
            backend: "host".into(),
            reason: "denied".into(),
        };
        assert!(err.to_string().contains("device"));
        assert!(err.to_string().contains("host"));
    }
}
