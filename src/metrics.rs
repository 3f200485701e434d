//! Per-attempt request metrics.
//!
//! Collectors are registered once per `(namespace, subsystem)` pair. A second
//! [`PrometheusMetrics::register`] under the same names fails with
//! [`ReboundError::MetricsRegistration`]; [`PrometheusMetrics::shared`] is the
//! guarded entry point that hands out the existing collectors instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

use crate::{MetricsOptions, ReboundError, Result};

/// Sink for the outcome of each attempt.
///
/// `status` is `0` when the attempt produced no response. Implementations
/// must not fail or block the calling request beyond the recording itself.
pub trait Metrics: Send + Sync {
    fn record(&self, started: Instant, status: u16, error: Option<&ReboundError>);
}

/// Prometheus-backed [`Metrics`].
#[derive(Clone, Debug)]
pub struct PrometheusMetrics {
    request_count: CounterVec,
    request_latency: HistogramVec,
    status_code: CounterVec,
}

static SHARED: OnceLock<Mutex<HashMap<MetricsOptions, Arc<PrometheusMetrics>>>> = OnceLock::new();

impl PrometheusMetrics {
    /// Creates the collectors and registers them with `registry`.
    pub fn register(registry: &Registry, options: &MetricsOptions) -> Result<Self> {
        let metrics = Self::build(options).map_err(ReboundError::MetricsRegistration)?;

        registry
            .register(Box::new(metrics.request_count.clone()))
            .map_err(ReboundError::MetricsRegistration)?;
        if let Err(err) = registry.register(Box::new(metrics.request_latency.clone())) {
            let _ = registry.unregister(Box::new(metrics.request_count.clone()));
            return Err(ReboundError::MetricsRegistration(err));
        }
        if let Err(err) = registry.register(Box::new(metrics.status_code.clone())) {
            let _ = registry.unregister(Box::new(metrics.request_count.clone()));
            let _ = registry.unregister(Box::new(metrics.request_latency.clone()));
            return Err(ReboundError::MetricsRegistration(err));
        }

        Ok(metrics)
    }

    /// Returns the process-wide collectors for `options`, registering them
    /// with the default registry on first use.
    pub fn shared(options: &MetricsOptions) -> Result<Arc<Self>> {
        let mut shared = SHARED
            .get_or_init(Default::default)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(metrics) = shared.get(options) {
            return Ok(Arc::clone(metrics));
        }

        let metrics = Arc::new(Self::register(prometheus::default_registry(), options)?);
        shared.insert(options.clone(), Arc::clone(&metrics));
        tracing::debug!(
            namespace = %options.namespace,
            subsystem = %options.subsystem,
            "registered request metrics"
        );
        Ok(metrics)
    }

    fn build(options: &MetricsOptions) -> prometheus::Result<Self> {
        let request_count = CounterVec::new(
            Opts::new("request_count", "Number of requests issued.")
                .namespace(options.namespace.as_str())
                .subsystem(options.subsystem.as_str()),
            &["error"],
        )?;
        let request_latency = HistogramVec::new(
            HistogramOpts::new("request_latency", "Total duration of requests in seconds.")
                .namespace(options.namespace.as_str())
                .subsystem(options.subsystem.as_str()),
            &["error"],
        )?;
        let status_code = CounterVec::new(
            Opts::new("status_code", "Count of different response status codes.")
                .namespace(options.namespace.as_str())
                .subsystem(options.subsystem.as_str()),
            &["status_code"],
        )?;

        Ok(Self {
            request_count,
            request_latency,
            status_code,
        })
    }
}

impl Metrics for PrometheusMetrics {
    fn record(&self, started: Instant, status: u16, error: Option<&ReboundError>) {
        let error = error.map_or("none", ReboundError::kind);
        let class = status_class(status);

        self.request_count.with_label_values(&[error]).inc();
        self.request_latency
            .with_label_values(&[error])
            .observe(started.elapsed().as_secs_f64());
        self.status_code.with_label_values(&[class.as_str()]).inc();
    }
}

/// Buckets a status code by its hundreds digit: `404` → `"4xx"`, `0` → `"0xx"`.
pub fn status_class(status: u16) -> String {
    format!("{}xx", status / 100)
}
