//! Common test utilities for unified-pool integration tests
//!
//! - Deadline polling for state driven by the daemon thread
//! - Pool construction with test-sized buffers

#![allow(dead_code)] // Not every test binary uses every helper

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use unified_pool::{Arch, DrainPolicy, MemoryBackend, MemoryPool, PoolConfig};

/// Generous upper bound for daemon progress on loaded CI machines.
pub const DAEMON_DEADLINE: Duration = Duration::from_secs(5);

/// Poll `predicate` until it holds or `deadline` elapses. Returns whether it held.
pub fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    predicate()
}

/// Configuration with 1 MiB buffers and a 1 ms poll interval.
pub fn test_config() -> PoolConfig {
    PoolConfig::default()
        .with_default_buffer_size(1 << 20)
        .with_poll_interval(Duration::from_millis(1))
}

/// Pool over `backend` whose context is fixed to `arch`.
pub fn pool_on(backend: Arc<dyn MemoryBackend>, arch: Arch, drain: DrainPolicy) -> MemoryPool {
    let config = test_config().with_arch(arch).with_drain(drain);
    MemoryPool::with_backend(config.clone(), Arc::new(config), backend).expect("pool should start")
}
