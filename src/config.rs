//! Writer configuration schema.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const NANOS_PER_MILLI: i64 = 1_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("num_connections must be at least 1")]
    NoConnections,
    #[error("{field} must be non-zero")]
    ZeroDuration { field: &'static str },
    #[error("scan_batch_size must be at least 1")]
    ZeroBatchSize,
    #[error("invalid backoff duration: static table is empty")]
    EmptyBackoffTable,
}

/// Tuning knobs for a single message writer.
///
/// All durations are milliseconds in the serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Ticker period for queue scans.
    pub scan_interval_ms: u64,
    /// Minimum spacing between full scans.
    pub full_scan_interval_ms: u64,
    /// Max queue elements visited per lock acquisition.
    pub scan_batch_size: usize,
    /// Pending-ack table preallocation.
    pub initial_ack_map_size: usize,
    /// Poll period while `close` waits for the queue to drain.
    pub close_check_interval_ms: u64,
    /// Connection fan-out per consumer replica.
    pub num_connections: usize,
    /// Overall deadline for the forced-flush fan-out.
    pub forced_flush_timeout_ms: u64,
    /// Bypass cutoff/cutover admission checks.
    pub ignore_cutoff_cutover: bool,
    /// Upper bound on an encoded frame.
    pub max_frame_bytes: usize,
    pub retry: RetryConfig,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 200,
            full_scan_interval_ms: 10_000,
            scan_batch_size: 16,
            initial_ack_map_size: 64,
            close_check_interval_ms: 100,
            num_connections: 4,
            forced_flush_timeout_ms: 100,
            ignore_cutoff_cutover: false,
            max_frame_bytes: 16 * 1024 * 1024,
            retry: RetryConfig::default(),
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        if self.scan_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.scan_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "scan_interval_ms",
            });
        }
        if self.full_scan_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "full_scan_interval_ms",
            });
        }
        if self.close_check_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration {
                field: "close_check_interval_ms",
            });
        }
        if let RetryConfig::Static { backoff_ms } = &self.retry
            && backoff_ms.is_empty()
        {
            return Err(ConfigError::EmptyBackoffTable);
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn full_scan_interval_nanos(&self) -> i64 {
        self.full_scan_interval_ms as i64 * NANOS_PER_MILLI
    }

    pub fn close_check_interval(&self) -> Duration {
        Duration::from_millis(self.close_check_interval_ms)
    }

    pub fn forced_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.forced_flush_timeout_ms)
    }
}

/// Backoff schedule applied between send attempts of one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum RetryConfig {
    Exponential {
        initial_backoff_ms: u64,
        backoff_factor: f64,
        max_backoff_ms: u64,
        jitter: bool,
    },
    Static {
        backoff_ms: Vec<u64>,
    },
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::Exponential {
            initial_backoff_ms: 100,
            backoff_factor: 2.0,
            max_backoff_ms: 30_000,
            jitter: true,
        }
    }
}
