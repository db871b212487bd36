//! Growable memory pool for host and accelerator kernels.
//!
#![allow(unsafe_code)] // Raw regions, FFI and cross-domain reads; every block carries a SAFETY note
//! Kernels call [`MemoryPool::allocate`] directly. Independently, producer code (possibly
//! running on the accelerator) appends entries to a shared [`RequestQueue`] whose `tail`
//! counter a background daemon polls on a fixed timer.
//!
//! - [`MemoryPool`]: list of [`BumpAllocator`]s, newest first in line, grown on exhaustion
//! - [`CrossDomainReader`]: direct host reads, synchronous device-to-host copies otherwise
//! - [`MemoryBackend`]: backing memory provider ([`HostBackend`], `CudaBackend`,
//!   `MockDeviceBackend`)
//! - [`PoolConfig`]: figment-loaded configuration
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use unified_pool::{MemoryPool, PoolConfig, QueueRef, RequestQueue};
//!
//! # tokio_test::block_on(async {
//! let pool = MemoryPool::new(PoolConfig::default().with_default_buffer_size(1 << 20))?;
//!
//! let ptr = pool.allocate(64, 16)?;
//! assert_eq!(ptr.as_ptr() as usize % 16, 0);
//!
//! // Producer side appends three requests
//! let queue = Arc::new(RequestQueue::new());
//! pool.set_queue(QueueRef::host(queue.clone()));
//! let mut progress = pool.subscribe_progress();
//! queue.publish(3);
//!
//! progress.wait_for(|&done| done == 3).await?;
//! pool.terminate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

pub mod accessor;
pub mod backend;
pub mod bump;
pub mod config;
pub mod daemon;
pub mod error;
pub mod pool;
pub mod queue;

pub use accessor::{CrossDomainReader, Scalar};
pub use backend::{default_backend, HostBackend, MemoryBackend, Residency, REGION_ALIGNMENT};
pub use bump::{BufferInfo, BumpAllocator};
pub use config::{Arch, ConfigError, DrainPolicy, ExecutionContext, PoolConfig};
pub use daemon::DaemonStatus;
pub use error::{PoolError, PoolResult};
pub use pool::MemoryPool;
pub use queue::{QueueRef, RequestQueue};

#[cfg(feature = "cuda")]
pub use backend::CudaBackend;

#[cfg(any(test, feature = "mock"))]
pub use backend::MockDeviceBackend;
