use crate::{Backoff, ReboundError, Result, RetryPolicy};

/// Namespace used for metric names when none is configured.
pub const DEFAULT_METRICS_NAMESPACE: &str = "rebound";

/// Configures timeout, retry and metrics behavior.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    ///
    /// A call issues at most `max_retries + 1` attempts, with or without a
    /// circuit breaker.
    pub max_retries: usize,
    /// Wait between attempts.
    pub backoff: Backoff,
    /// Decides which outcomes are retried.
    pub retry_policy: RetryPolicy,
    /// Prometheus metrics; disabled when `None`.
    pub metrics: Option<MetricsOptions>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 100,
            max_retries: 1,
            backoff: Backoff::default(),
            retry_policy: RetryPolicy::default(),
            metrics: None,
        }
    }
}

impl ClientOptions {
    /// Reads overrides from environment variables.
    ///
    /// - `REBOUND_TIMEOUT_MS` — per-attempt timeout
    /// - `REBOUND_MAX_RETRIES` — retries after the first attempt
    /// - `REBOUND_METRICS_NAMESPACE` — enables metrics under this namespace
    ///
    /// Unset variables keep their defaults; unparsable values are an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();

        if let Some(raw) = lookup("REBOUND_TIMEOUT_MS") {
            options.timeout_ms = parse_number("REBOUND_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("REBOUND_MAX_RETRIES") {
            options.max_retries = parse_number("REBOUND_MAX_RETRIES", &raw)?;
        }
        if let Some(namespace) = lookup("REBOUND_METRICS_NAMESPACE") {
            let namespace = namespace.trim();
            if namespace.is_empty() {
                return Err(ReboundError::Construction(
                    "REBOUND_METRICS_NAMESPACE is set but empty".to_owned(),
                ));
            }
            options.metrics = Some(MetricsOptions::new(namespace));
        }

        Ok(options)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| ReboundError::Construction(format!("{key} must be a number, got '{raw}'")))
}

/// Names under which request metrics are registered.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MetricsOptions {
    pub namespace: String,
    pub subsystem: String,
}

impl MetricsOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            subsystem: String::new(),
        }
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = subsystem.into();
        self
    }
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{ClientOptions, MetricsOptions};
    use crate::{Backoff, ReboundError};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let options = ClientOptions::default();
        assert_eq!(options.timeout_ms, 100);
        assert_eq!(options.max_retries, 1);
        assert_eq!(options.backoff, Backoff::default());
        assert!(options.metrics.is_none());
    }

    #[test]
    fn env_overrides_are_applied() {
        let options = ClientOptions::from_lookup(lookup(&[
            ("REBOUND_TIMEOUT_MS", "250"),
            ("REBOUND_MAX_RETRIES", " 4 "),
            ("REBOUND_METRICS_NAMESPACE", "checkout"),
        ]))
        .expect("must parse options");

        assert_eq!(options.timeout_ms, 250);
        assert_eq!(options.max_retries, 4);
        assert_eq!(options.metrics, Some(MetricsOptions::new("checkout")));
    }

    #[test]
    fn missing_env_keeps_defaults() {
        let options = ClientOptions::from_lookup(lookup(&[])).expect("must parse options");
        assert_eq!(options.max_retries, 1);
        assert!(options.metrics.is_none());
    }

    #[test]
    fn malformed_env_is_rejected() {
        let err = ClientOptions::from_lookup(lookup(&[("REBOUND_MAX_RETRIES", "many")]))
            .expect_err("must reject value");
        assert!(matches!(err, ReboundError::Construction(ref msg) if msg.contains("REBOUND_MAX_RETRIES")));

        let err = ClientOptions::from_lookup(lookup(&[("REBOUND_METRICS_NAMESPACE", " ")]))
            .expect_err("must reject empty namespace");
        assert!(matches!(err, ReboundError::Construction(_)));
    }
}
