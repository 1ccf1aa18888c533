//! Reactor and executor configuration.
//!
//! The reactor is configured once, when the first [`ReactorHandle`] starts
//! it. Later acquisitions share the running instance and any configuration
//! they carry is ignored.
//!
//! | Option | Default | Environment override |
//! |--------|---------|----------------------|
//! | worker threads | logical CPU count | `RIPTIDE_WORKERS` |
//! | per-poll batch size | 16 | `RIPTIDE_POLL_BATCH` |
//! | poll timeout | infinite | (none; this core has no timers) |
//!
//! [`ReactorHandle`]: crate::reactor::ReactorHandle

use std::thread;

/// Environment variable overriding the executor worker count.
pub const ENV_WORKERS: &str = "RIPTIDE_WORKERS";

/// Environment variable overriding the per-poll event batch size.
pub const ENV_POLL_BATCH: &str = "RIPTIDE_POLL_BATCH";

const DEFAULT_POLL_BATCH: usize = 16;

/// Error raised when an environment override cannot be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The variable was set but was not a positive integer.
    #[error("invalid value for {var}: {value:?} (expected a positive integer)")]
    InvalidValue {
        /// The environment variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Resource configuration for the reactor and its executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Number of executor worker threads. `None` means the logical CPU count.
    pub worker_threads: Option<usize>,
    /// Maximum events drained per poll iteration.
    pub poll_batch: usize,
}

impl ReactorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            worker_threads: None,
            poll_batch: DEFAULT_POLL_BATCH,
        }
    }

    /// Sets the executor worker count.
    #[must_use]
    pub const fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = Some(count);
        self
    }

    /// Sets the per-poll event batch size.
    #[must_use]
    pub const fn poll_batch(mut self, batch: usize) -> Self {
        self.poll_batch = batch;
        self
    }

    /// Loads the configuration, applying any environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if an override variable is set
    /// to something that is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();
        if let Some(workers) = read_env_usize(ENV_WORKERS)? {
            config.worker_threads = Some(workers);
        }
        if let Some(batch) = read_env_usize(ENV_POLL_BATCH)? {
            config.poll_batch = batch;
        }
        Ok(config)
    }

    /// The effective worker count: the configured value, or the logical CPU
    /// count with a floor of one.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        })
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn read_env_usize(var: &'static str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => match value.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => Ok(Some(parsed)),
            _ => Err(ConfigError::InvalidValue { var, value }),
        },
        Err(_) => Ok(None),
    }
}
