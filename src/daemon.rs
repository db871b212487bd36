//! Request queue polling daemon.
//!
//! A single named thread wakes every `poll_interval`, takes the pool lock and inspects the
//! installed queue's tail through the [`CrossDomainReader`]. It never blocks on a signal
//! from the producer, which may be accelerator code with no way to wake the host.
//!
//! Lifecycle: `Running -> TerminationRequested -> Stopped`, or `Failed` when the queue
//! cannot be read.

use crate::accessor::CrossDomainReader;
use crate::config::DrainPolicy;
use crate::error::{PoolError, PoolResult};
use crate::pool::Shared;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Name of the daemon thread.
pub const DAEMON_THREAD_NAME: &str = "unified-pool-daemon";

/// Daemon lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    /// Polling the queue
    Running,
    /// Owner asked for shutdown; the daemon has not yet observed it
    TerminationRequested,
    /// Clean exit after observing the termination request
    Stopped,
    /// Exit after a fatal error (e.g. the queue tail could not be read)
    Failed(String),
}

impl DaemonStatus {
    /// Whether the daemon thread has left its loop.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::TerminationRequested => write!(f, "TerminationRequested"),
            Self::Stopped => write!(f, "Stopped"),
            Self::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

/// Outcome of one wake cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Continue,
    Stop,
}

/// Start the daemon thread for `shared`.
pub(crate) fn spawn(shared: Arc<Shared>) -> PoolResult<JoinHandle<()>> {
    let daemon = Daemon::new(shared);
    thread::Builder::new()
        .name(DAEMON_THREAD_NAME.to_string())
        .spawn(move || daemon.run())
        .map_err(PoolError::DaemonSpawn)
}

struct Daemon {
    shared: Arc<Shared>,
    reader: CrossDomainReader,
    interval: Duration,
    drain: DrainPolicy,
    /// Last backward tail already reported, to avoid logging it every wake
    reported_regression: Option<u32>,
}

impl Daemon {
    fn new(shared: Arc<Shared>) -> Self {
        let reader = CrossDomainReader::new(shared.backend.clone());
        let interval = shared.config.poll_interval;
        let drain = shared.config.drain;
        Self {
            shared,
            reader,
            interval,
            drain,
            reported_regression: None,
        }
    }

    fn run(mut self) {
        info!(interval = ?self.interval, drain = ?self.drain, "Pool daemon started");
        loop {
            thread::sleep(self.interval);
            if self.wake() == Wake::Stop {
                break;
            }
        }
    }

    fn wake(&mut self) -> Wake {
        let mut state = self.shared.state.lock();

        // Checked before the queue so an idle daemon still honors shutdown
        if state.terminating {
            state.status = DaemonStatus::Stopped;
            info!(processed_tail = state.processed_tail, "Pool daemon stopped");
            return Wake::Stop;
        }

        let Some(queue) = state.queue.as_ref() else {
            return Wake::Continue;
        };

        let tail = match queue.read_tail(&self.reader) {
            Ok(tail) => tail,
            Err(e) => {
                error!(error = %e, residency = %queue.residency(), "Failed to read request queue tail; daemon exiting");
                state.status = DaemonStatus::Failed(e.to_string());
                return Wake::Stop;
            }
        };

        let processed = state.processed_tail;
        if tail < processed {
            if self.reported_regression != Some(tail) {
                warn!(tail, processed_tail = processed, "Request queue tail moved backward; ignoring");
                self.reported_regression = Some(tail);
            }
            return Wake::Continue;
        }
        self.reported_regression = None;

        let pending = tail - processed;
        let batch = match self.drain {
            DrainPolicy::OnePerWake => pending.min(1),
            DrainPolicy::All => pending,
        };
        if batch == 0 {
            return Wake::Continue;
        }

        if batch == 1 {
            debug!("Processing memory request {}", processed);
        } else {
            debug!(count = batch, "Processing memory requests {}..{}", processed, processed + batch);
        }
        state.processed_tail = processed + batch;
        self.shared.progress.send_replace(state.processed_tail);

        Wake::Continue
    }
}
