//! Retry backoff policies.

use rand::Rng;
use thiserror::Error;

use crate::config::RetryConfig;

const NANOS_PER_MICRO: i64 = 1_000;
const NANOS_PER_MILLI: i64 = 1_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("invalid backoff duration: static table is empty")]
    EmptyBackoffTable,
}

impl From<RetryError> for crate::config::ConfigError {
    fn from(_: RetryError) -> Self {
        crate::config::ConfigError::EmptyBackoffTable
    }
}

/// Pure mapping from send-attempt count to the next backoff.
///
/// Policies keep no state between calls, so the scan worker can invoke
/// them without synchronization.
#[derive(Clone, Debug)]
pub enum RetryPolicy {
    Exponential {
        initial_nanos: i64,
        factor: f64,
        max_nanos: i64,
        jitter: bool,
    },
    Static {
        backoffs: Vec<i64>,
    },
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Result<Self, RetryError> {
        match config {
            RetryConfig::Exponential {
                initial_backoff_ms,
                backoff_factor,
                max_backoff_ms,
                jitter,
            } => Ok(RetryPolicy::Exponential {
                initial_nanos: *initial_backoff_ms as i64 * NANOS_PER_MILLI,
                factor: *backoff_factor,
                max_nanos: *max_backoff_ms as i64 * NANOS_PER_MILLI,
                jitter: *jitter,
            }),
            RetryConfig::Static { backoff_ms } => {
                if backoff_ms.is_empty() {
                    return Err(RetryError::EmptyBackoffTable);
                }
                Ok(RetryPolicy::Static {
                    backoffs: backoff_ms
                        .iter()
                        .map(|ms| *ms as i64 * NANOS_PER_MILLI)
                        .collect(),
                })
            }
        }
    }

    /// Backoff before the next attempt after `write_times` sends. The
    /// scan increments the counter first, so the first retry sees
    /// `write_times == 1` and gets exactly the initial backoff.
    pub fn next_backoff_nanos(&self, write_times: u32) -> i64 {
        match self {
            RetryPolicy::Exponential {
                initial_nanos,
                factor,
                max_nanos,
                jitter,
            } => {
                let mut backoff = *initial_nanos;
                if write_times >= 1 {
                    backoff = (*initial_nanos as f64 * factor.powi(write_times as i32 - 1)) as i64;
                }
                // Jitter at microsecond granularity, uniform in
                // [backoff/2, backoff). The window guard also catches
                // overflow from the exponentiation above.
                let half_micros = (backoff / 2) / NANOS_PER_MICRO;
                if *jitter && backoff >= 2 && half_micros >= 1 && half_micros < u32::MAX as i64 {
                    let jitter_micros = rand::rng().random_range(0..half_micros);
                    backoff = (half_micros + jitter_micros) * NANOS_PER_MICRO;
                }
                backoff.min(*max_nanos)
            }
            RetryPolicy::Static { backoffs } => {
                let attempt = write_times.saturating_sub(1) as usize;
                backoffs[attempt.min(backoffs.len() - 1)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential(initial_ms: u64, factor: f64, max_ms: u64, jitter: bool) -> RetryPolicy {
        RetryPolicy::from_config(&RetryConfig::Exponential {
            initial_backoff_ms: initial_ms,
            backoff_factor: factor,
            max_backoff_ms: max_ms,
            jitter,
        })
        .unwrap()
    }

    #[test]
    fn first_retry_uses_initial_backoff() {
        let policy = exponential(10, 2.0, 1_000, false);
        assert_eq!(policy.next_backoff_nanos(0), 10 * NANOS_PER_MILLI);
        assert_eq!(policy.next_backoff_nanos(1), 10 * NANOS_PER_MILLI);
        assert_eq!(policy.next_backoff_nanos(2), 20 * NANOS_PER_MILLI);
        assert_eq!(policy.next_backoff_nanos(3), 40 * NANOS_PER_MILLI);
    }

    #[test]
    fn backoff_is_monotonic_without_jitter_until_clamped() {
        let policy = exponential(10, 2.0, 100, false);
        let mut prev = 0;
        for write_times in 1..=12 {
            let backoff = policy.next_backoff_nanos(write_times);
            assert!(backoff >= prev, "backoff regressed at attempt {write_times}");
            assert!(backoff <= 100 * NANOS_PER_MILLI);
            prev = backoff;
        }
        assert_eq!(prev, 100 * NANOS_PER_MILLI);
    }

    #[test]
    fn jitter_stays_within_half_open_window() {
        let policy = exponential(100, 2.0, 60_000, true);
        let base = 100 * NANOS_PER_MILLI;
        for _ in 0..200 {
            let backoff = policy.next_backoff_nanos(1);
            assert!(backoff >= base / 2, "jittered backoff below half base");
            assert!(backoff < base, "jittered backoff at or above base");
        }
    }

    #[test]
    fn tiny_backoff_skips_jitter() {
        // Below a microsecond there is no jitter window to draw from.
        let policy = RetryPolicy::Exponential {
            initial_nanos: 2,
            factor: 2.0,
            max_nanos: 1_000,
            jitter: true,
        };
        assert_eq!(policy.next_backoff_nanos(1), 2);
    }

    #[test]
    fn static_table_clamps_to_last_entry() {
        let policy = RetryPolicy::from_config(&RetryConfig::Static {
            backoff_ms: vec![5, 10, 30],
        })
        .unwrap();
        assert_eq!(policy.next_backoff_nanos(1), 5 * NANOS_PER_MILLI);
        assert_eq!(policy.next_backoff_nanos(2), 10 * NANOS_PER_MILLI);
        assert_eq!(policy.next_backoff_nanos(3), 30 * NANOS_PER_MILLI);
        assert_eq!(policy.next_backoff_nanos(100), 30 * NANOS_PER_MILLI);
    }

    #[test]
    fn empty_static_table_is_a_construction_error() {
        let err = RetryPolicy::from_config(&RetryConfig::Static {
            backoff_ms: Vec::new(),
        })
        .unwrap_err();
        assert_eq!(err, RetryError::EmptyBackoffTable);
    }
}
