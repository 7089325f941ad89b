// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Executor configuration.

use std::thread;

use thiserror::Error;

/// Environment variable overriding the worker count.
pub const WORKERS_ENV: &str = "RASK_WORKERS";
/// Environment variable overriding the worker thread name prefix.
pub const THREAD_NAME_ENV: &str = "RASK_THREAD_NAME";

const FALLBACK_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: expected a positive integer, got {value:?}")]
    InvalidWorkers { var: &'static str, value: String },
}

/// Settings for a green [`Scheduler`](crate::green::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads. Always at least 1.
    pub workers: usize,
    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(FALLBACK_WORKERS),
            thread_name: "rask-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Defaults overridden by `RASK_WORKERS` and `RASK_THREAD_NAME`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup(WORKERS_ENV) {
            config.workers = match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidWorkers {
                        var: WORKERS_ENV,
                        value,
                    })
                }
            };
        }
        if let Some(name) = lookup(THREAD_NAME_ENV) {
            if !name.is_empty() {
                config.thread_name = name;
            }
        }
        Ok(config)
    }
}
