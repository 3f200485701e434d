//! `rebound-http` is an async HTTP request executor with retries.
//!
//! Each call to [`ReboundClient::execute`] issues a [`Request`] through a
//! `reqwest` transport and, when the [`RetryPolicy`] asks for it:
//! - drains the discarded response so the connection can be reused
//! - waits according to the configured [`Backoff`]
//! - rewinds the request body and tries again
//!
//! Attempts can be routed through an external [`CircuitBreaker`] and
//! recorded into Prometheus via [`PrometheusMetrics`].

mod backoff;
mod breaker;
mod client;
mod error;
mod metrics;
mod options;
mod policy;
mod request;

pub use backoff::{Backoff, DEFAULT_MIN_TIMEOUT};
pub use breaker::{BreakerRejection, CallStatus, CircuitBreaker, CommandConfig, Fallback};
pub use client::{ReboundClient, RESPONSE_READ_LIMIT};
pub use error::ReboundError;
pub use metrics::{status_class, Metrics, PrometheusMetrics};
pub use options::{ClientOptions, MetricsOptions, DEFAULT_METRICS_NAMESPACE};
pub use policy::{default_retry_policy, Outcome, RetryDecision, RetryPolicy};
pub use request::{ReplayableBody, Request};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, ReboundError>;
