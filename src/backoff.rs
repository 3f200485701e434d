use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Wait applied between attempts when no backoff is configured explicitly.
pub const DEFAULT_MIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Strategy mapping a retry index to the wait before that retry.
///
/// Index `0` is the first attempt and never waits. Every variant returns
/// [`Duration::ZERO`] for indices `<= 0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same wait before every retry.
    Constant { timeout: Duration },
    /// `min(max_timeout, min_timeout * factor^retry)`.
    Exponential {
        min_timeout: Duration,
        max_timeout: Duration,
        factor: f64,
    },
    /// Uniform draw from `[min_timeout, min_timeout * factor^retry]`,
    /// clamped to `[min_timeout, max_timeout]`.
    Jitter {
        min_timeout: Duration,
        max_timeout: Duration,
        factor: f64,
    },
}

impl Backoff {
    pub fn constant(timeout: Duration) -> Self {
        Self::Constant { timeout }
    }

    pub fn exponential(min_timeout: Duration, max_timeout: Duration, factor: f64) -> Self {
        Self::Exponential {
            min_timeout,
            max_timeout,
            factor,
        }
    }

    pub fn jitter(min_timeout: Duration, max_timeout: Duration, factor: f64) -> Self {
        Self::Jitter {
            min_timeout,
            max_timeout,
            factor,
        }
    }

    /// Returns how long to wait once attempt `retry` has failed. Attempts
    /// count from `0`, so the first retry is issued without waiting.
    pub fn next_interval(&self, retry: i64) -> Duration {
        if retry <= 0 {
            return Duration::ZERO;
        }

        match *self {
            Self::Constant { timeout } => timeout,
            Self::Exponential {
                min_timeout,
                max_timeout,
                factor,
            } => {
                let grown = grow(min_timeout, factor, retry);
                if grown >= max_timeout.as_secs_f64() {
                    max_timeout
                } else {
                    secs_or(grown, max_timeout)
                }
            }
            Self::Jitter {
                min_timeout,
                max_timeout,
                factor,
            } => {
                let low = min_timeout.as_secs_f64();
                let high = grow(min_timeout, factor, retry);
                let drawn = if high.is_finite() && high > low {
                    secs_or(rand::thread_rng().gen_range(low..=high), max_timeout)
                } else if high.is_finite() {
                    min_timeout
                } else {
                    max_timeout
                };

                if drawn < min_timeout {
                    min_timeout
                } else if drawn > max_timeout {
                    max_timeout
                } else {
                    drawn
                }
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::constant(DEFAULT_MIN_TIMEOUT)
    }
}

// Seconds as f64; saturates to +inf on overflow.
fn grow(min_timeout: Duration, factor: f64, retry: i64) -> f64 {
    let exp = i32::try_from(retry).unwrap_or(i32::MAX);
    min_timeout.as_secs_f64() * factor.powi(exp)
}

fn secs_or(secs: f64, fallback: Duration) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}
