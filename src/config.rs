//! Pool configuration using Figment
//!
//! Configuration is loaded from (in order of precedence, highest first):
//! 1. Environment variables prefixed with `UNIFIED_POOL_`
//! 2. A TOML file (default: `unified_pool.toml`)
//! 3. Built-in defaults
//!
//! ```text
//! UNIFIED_POOL_ARCH=cuda
//! UNIFIED_POOL_DEFAULT_BUFFER_SIZE=268435456
//! UNIFIED_POOL_POLL_INTERVAL=500us
//! UNIFIED_POOL_DRAIN=all
//! ```
//!
//! # Example
//!
//! ```no_run
//! use unified_pool::PoolConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PoolConfig::load_from("config/unified_pool.toml")?;
//!     println!("Arch: {}", config.arch);
//!     println!("Buffer size: {} MB", config.default_buffer_size / 1024 / 1024);
//!     Ok(())
//! }
//! ```

use crate::Residency;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default buffer size per allocator: 1 GiB.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 30;

/// Default daemon polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Longest accepted polling interval. Shutdown latency is bounded by one interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "UNIFIED_POOL_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or parsed.
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    /// The configuration parsed but holds invalid values.
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Execution target the kernels are compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    /// Kernels run on the host CPU
    #[default]
    Cpu,
    /// Kernels run on a CUDA accelerator
    Cuda,
}

impl Arch {
    /// Residency of buffers created while this target is active.
    #[must_use]
    pub fn residency(self) -> Residency {
        match self {
            Self::Cpu => Residency::Host,
            Self::Cuda => Residency::Device,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
        }
    }
}

/// How many pending requests the daemon handles per wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Advance `processed_tail` by at most one per wake
    #[default]
    OnePerWake,
    /// Handle every pending request in FIFO order before sleeping again
    All,
}

/// Read-only view of the program context the pool serves.
///
/// The pool asks for the target on every buffer creation, so implementations may
/// change it at runtime.
pub trait ExecutionContext: Send + Sync {
    /// Current execution target.
    fn arch(&self) -> Arch;
}

impl ExecutionContext for PoolConfig {
    fn arch(&self) -> Arch {
        self.arch
    }
}

impl ExecutionContext for RwLock<Arch> {
    fn arch(&self) -> Arch {
        *self.read()
    }
}

/// Memory pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Execution target used to pick buffer residency
    pub arch: Arch,
    /// Minimum capacity of each backing buffer, in bytes
    pub default_buffer_size: usize,
    /// Fixed daemon wake interval (humantime string, e.g. "1ms")
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Requests handled per daemon wake
    pub drain: DrainPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            arch: Arch::default(),
            default_buffer_size: DEFAULT_BUFFER_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain: DrainPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Load configuration from `unified_pool.toml` and environment variables.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if a source cannot be parsed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("unified_pool.toml")
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error: defaults and environment overrides still apply.
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file is malformed or validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Set the execution target.
    #[must_use]
    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    /// Set the default buffer size.
    #[must_use]
    pub fn with_default_buffer_size(mut self, bytes: usize) -> Self {
        self.default_buffer_size = bytes;
        self
    }

    /// Set the daemon polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the drain policy.
    #[must_use]
    pub fn with_drain(mut self, drain: DrainPolicy) -> Self {
        self.drain = drain;
        self
    }

    /// Validate configuration values.
    ///
    /// Checks:
    /// - `default_buffer_size` is non-zero
    /// - `poll_interval` is non-zero and at most one second
    ///
    /// # Errors
    ///
    /// Returns a ConfigError with a descriptive message for any validation failure.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "default_buffer_size must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval > MAX_POLL_INTERVAL {
            return Err(ConfigError::ValidationError(format!(
                "poll_interval {:?} exceeds the maximum of {:?}",
                self.poll_interval, MAX_POLL_INTERVAL
            )));
        }

        Ok(())
    }
}
