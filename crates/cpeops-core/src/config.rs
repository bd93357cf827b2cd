// Copyright (C) 2026 Cpeops Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Cpeops Core configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// Number of dispatch workers
    pub workers: usize,
    /// Wall-clock budget for a single job execution
    pub job_timeout: Duration,
    /// How often a running job is checked for a pending cancellation
    pub cancel_poll_interval: Duration,
    /// How often a progress subscription re-reads the ledger
    pub stream_poll_interval: Duration,
    /// Maximum lifetime of a progress subscription
    pub stream_max_wait: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `CPEOPS_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `CPEOPS_WORKERS`: dispatch worker count (default: 4)
    /// - `CPEOPS_JOB_TIMEOUT_MS`: per-job execution budget (default: 60000)
    /// - `CPEOPS_CANCEL_POLL_MS`: cancellation poll interval (default: 500)
    /// - `CPEOPS_STREAM_POLL_MS`: progress stream poll interval (default: 500)
    /// - `CPEOPS_STREAM_MAX_WAIT_MS`: progress stream lifetime cap (default: 60000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("CPEOPS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("CPEOPS_DATABASE_URL"))?;

        let workers: usize = std::env::var("CPEOPS_WORKERS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("CPEOPS_WORKERS", "must be a positive integer"))?;
        if workers == 0 {
            return Err(ConfigError::Invalid(
                "CPEOPS_WORKERS",
                "must be a positive integer",
            ));
        }

        let job_timeout = duration_ms("CPEOPS_JOB_TIMEOUT_MS", 60_000)?;
        let cancel_poll_interval = duration_ms("CPEOPS_CANCEL_POLL_MS", 500)?;
        let stream_poll_interval = duration_ms("CPEOPS_STREAM_POLL_MS", 500)?;
        let stream_max_wait = duration_ms("CPEOPS_STREAM_MAX_WAIT_MS", 60_000)?;

        Ok(Self {
            database_url,
            workers,
            job_timeout,
            cancel_poll_interval,
            stream_poll_interval,
            stream_max_wait,
        })
    }
}

fn duration_ms(var: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms: u64 = std::env::var(var)
        .unwrap_or_else(|_| default_ms.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(var, "must be a duration in milliseconds"))?;
    if ms == 0 {
        return Err(ConfigError::Invalid(var, "must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
