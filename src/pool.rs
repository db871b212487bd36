//! Growable memory pool serving kernel allocation requests.
//!
//! The pool keeps an ordered list of [`BumpAllocator`]s, newest last. Requests go to the
//! newest buffer; when it is exhausted a new buffer of
//! `max(size + padding, default_buffer_size)` bytes is created with the residency of the
//! current execution target. Buffers are only released when the pool is dropped.
//!
//! Allocation, queue installation, termination and every daemon wake serialize on one
//! `parking_lot::Mutex` guarding [`PoolState`].

use crate::backend::{accelerator_compiled, default_backend, MemoryBackend, REGION_ALIGNMENT};
use crate::bump::{BufferInfo, BumpAllocator};
use crate::config::{ExecutionContext, PoolConfig};
use crate::daemon::{self, DaemonStatus};
use crate::error::{PoolError, PoolResult};
use crate::queue::QueueRef;
use parking_lot::Mutex;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// State guarded by the pool lock.
pub(crate) struct PoolState {
    pub(crate) buffers: Vec<BumpAllocator>,
    pub(crate) queue: Option<QueueRef>,
    pub(crate) processed_tail: u32,
    /// Progress of queues that were installed before and later swapped out or cleared
    pub(crate) retired: Vec<(QueueRef, u32)>,
    pub(crate) terminating: bool,
    pub(crate) status: DaemonStatus,
}

impl PoolState {
    pub(crate) fn new() -> Self {
        Self {
            buffers: Vec::new(),
            queue: None,
            processed_tail: 0,
            retired: Vec::new(),
            terminating: false,
            status: DaemonStatus::Running,
        }
    }

    /// Uninstall the current queue, remembering how far it was processed.
    fn retire_queue(&mut self) -> Option<u32> {
        let queue = self.queue.take()?;
        let processed = std::mem::take(&mut self.processed_tail);
        match self.retired.iter_mut().find(|(known, _)| known.same_queue(&queue)) {
            Some(entry) => entry.1 = processed,
            None => self.retired.push((queue, processed)),
        }
        Some(processed)
    }

    /// Progress previously recorded for `queue`, or 0 for a queue never seen.
    fn restore_progress(&mut self, queue: &QueueRef) -> u32 {
        self.retired
            .iter()
            .position(|(known, _)| known.same_queue(queue))
            .map_or(0, |index| self.retired.swap_remove(index).1)
    }
}

/// Everything the pool shares with its daemon.
pub(crate) struct Shared {
    pub(crate) state: Mutex<PoolState>,
    pub(crate) context: Arc<dyn ExecutionContext>,
    pub(crate) backend: Arc<dyn MemoryBackend>,
    pub(crate) config: PoolConfig,
    pub(crate) progress: watch::Sender<u32>,
}

/// Memory pool with a request-queue polling daemon.
///
/// Dropping the pool terminates the daemon and releases every buffer. Pointers returned by
/// [`allocate`](Self::allocate) must not be used after that.
pub struct MemoryPool {
    shared: Arc<Shared>,
    daemon: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryPool {
    /// Create a pool whose execution target is `config.arch`, backed by the default backend.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration is invalid, `DaemonSpawn` if the daemon cannot start.
    pub fn new(config: PoolConfig) -> PoolResult<Self> {
        let context: Arc<dyn ExecutionContext> = Arc::new(config.clone());
        Self::with_backend(config, context, default_backend())
    }

    /// Create a pool with an explicit execution context and backing memory provider.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration is invalid, `DaemonSpawn` if the daemon cannot start.
    pub fn with_backend(
        config: PoolConfig,
        context: Arc<dyn ExecutionContext>,
        backend: Arc<dyn MemoryBackend>,
    ) -> PoolResult<Self> {
        config.validate()?;

        let (progress, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState::new()),
            context,
            backend,
            config,
            progress,
        });

        let handle = daemon::spawn(shared.clone())?;

        info!(
            arch = %shared.context.arch(),
            backend = shared.backend.name(),
            accelerator_compiled = accelerator_compiled(),
            poll_interval = ?shared.config.poll_interval,
            "Memory pool created. Default buffer size per allocator = {} MB",
            shared.config.default_buffer_size / 1024 / 1024
        );

        Ok(Self {
            shared,
            daemon: Mutex::new(Some(handle)),
        })
    }

    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// Tries the newest buffer first and grows the pool when it is exhausted.
    ///
    /// # Errors
    ///
    /// - `InvalidAlignment` if `alignment` is zero or not a power of two
    /// - `SizeOverflow` if the padded request does not fit in `usize`
    /// - `AcceleratorUnavailable` / `BackingAllocation` if a new buffer cannot be obtained
    /// - `OutOfMemory` if a fresh buffer cannot satisfy the request
    pub fn allocate(&self, size: usize, alignment: usize) -> PoolResult<NonNull<u8>> {
        if !alignment.is_power_of_two() {
            return Err(PoolError::InvalidAlignment { alignment });
        }

        let mut state = self.shared.state.lock();

        if let Some(ptr) = state
            .buffers
            .last_mut()
            .and_then(|buffer| buffer.allocate(size, alignment))
        {
            return Ok(ptr);
        }

        // Regions are only guaranteed REGION_ALIGNMENT at their base
        let padding = alignment.saturating_sub(REGION_ALIGNMENT);
        let needed = size
            .checked_add(padding)
            .ok_or(PoolError::SizeOverflow { size, alignment })?;
        let capacity = needed.max(self.shared.config.default_buffer_size);
        let residency = self.shared.context.arch().residency();

        let mut buffer = BumpAllocator::new(self.shared.backend.clone(), capacity, residency)?;
        debug!(
            index = state.buffers.len(),
            capacity,
            %residency,
            size,
            alignment,
            "Creating new pool buffer"
        );

        let ptr = buffer.allocate(size, alignment).ok_or(PoolError::OutOfMemory {
            size,
            alignment,
            capacity,
        })?;
        state.buffers.push(buffer);
        Ok(ptr)
    }

    /// Install the queue the daemon observes, replacing any previous one.
    ///
    /// Progress is tracked per queue: swapping out a queue records its `processed_tail`,
    /// and reinstalling it later resumes from there, so no index is processed twice. A
    /// queue never installed before starts at 0. Requests still pending on a swapped-out
    /// queue wait until it is reinstalled.
    pub fn set_queue(&self, queue: QueueRef) {
        let mut state = self.shared.state.lock();
        if state.queue.as_ref().is_some_and(|current| current.same_queue(&queue)) {
            state.queue = Some(queue);
            return;
        }

        if let Some(previous) = state.retire_queue() {
            warn!(processed_tail = previous, "Replacing installed request queue");
        }
        state.processed_tail = state.restore_progress(&queue);
        state.queue = Some(queue);
        self.shared.progress.send_replace(state.processed_tail);
    }

    /// Uninstall the queue. The daemon keeps running idle and `processed_tail` reads 0
    /// until a queue is installed again.
    pub fn clear_queue(&self) {
        let mut state = self.shared.state.lock();
        if state.retire_queue().is_some() {
            self.shared.progress.send_replace(0);
        }
    }

    /// Receiver updated each time the daemon advances `processed_tail`.
    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<u32> {
        self.shared.progress.subscribe()
    }

    /// Number of queue requests processed so far.
    #[must_use]
    pub fn processed_tail(&self) -> u32 {
        self.shared.state.lock().processed_tail
    }

    /// Current daemon lifecycle state.
    #[must_use]
    pub fn daemon_status(&self) -> DaemonStatus {
        self.shared.state.lock().status.clone()
    }

    /// Whether the daemon stopped cleanly.
    #[must_use]
    pub fn killed(&self) -> bool {
        self.shared.state.lock().status == DaemonStatus::Stopped
    }

    /// Number of backing buffers.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.shared.state.lock().buffers.len()
    }

    /// Snapshot of every backing buffer, oldest first.
    #[must_use]
    pub fn buffers(&self) -> Vec<BufferInfo> {
        self.shared
            .state
            .lock()
            .buffers
            .iter()
            .map(BumpAllocator::info)
            .collect()
    }

    /// Configuration the pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Stop the daemon and wait for it to exit.
    ///
    /// Blocks for at most about one polling interval. Safe to call more than once: later
    /// calls do not join again and report the same outcome.
    ///
    /// # Errors
    ///
    /// - `DaemonPanicked` if the daemon thread panicked
    /// - `DaemonFailed` if the daemon exited on a fatal error instead of a clean stop
    pub fn terminate(&self) -> PoolResult<()> {
        let mut daemon = self.daemon.lock();

        {
            let mut state = self.shared.state.lock();
            state.terminating = true;
            if state.status == DaemonStatus::Running {
                state.status = DaemonStatus::TerminationRequested;
            }
        }

        if let Some(handle) = daemon.take() {
            if handle.join().is_err() {
                self.shared.state.lock().status =
                    DaemonStatus::Failed("daemon thread panicked".to_string());
                return Err(PoolError::DaemonPanicked);
            }
        }

        match self.daemon_status() {
            DaemonStatus::Stopped => Ok(()),
            DaemonStatus::Failed(reason) => Err(PoolError::DaemonFailed(reason)),
            other => Err(PoolError::DaemonFailed(format!(
                "daemon exited while {other}"
            ))),
        }
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("MemoryPool")
            .field("arch", &self.shared.context.arch())
            .field("backend", &self.shared.backend.name())
            .field("buffers", &state.buffers.len())
            .field("processed_tail", &state.processed_tail)
            .field("status", &state.status)
            .finish()
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        let running = self.daemon.lock().is_some();
        if running {
            if let Err(e) = self.terminate() {
                error!(error = %e, "Pool daemon did not stop cleanly");
            }
        }
    }
}
