use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    breaker::{BreakerAdapter, CircuitBreaker, CommandConfig, Fallback},
    ClientOptions, Metrics, Outcome, PrometheusMetrics, ReboundError, ReplayableBody, Request,
    Result, RetryDecision,
};

/// Bytes read from a discarded response so its connection can be reused.
pub const RESPONSE_READ_LIMIT: usize = 4096;

#[derive(Clone)]
/// HTTP client that retries failed attempts with backoff.
///
/// Holds no per-call state; a single instance can serve concurrent calls.
pub struct ReboundClient {
    http: reqwest::Client,
    options: ClientOptions,
    metrics: Option<Arc<dyn Metrics>>,
    breaker: Option<BreakerAdapter>,
    fallback: Option<Fallback>,
}

impl fmt::Debug for ReboundClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReboundClient")
            .field("options", &self.options)
            .field("metrics", &self.metrics.is_some())
            .field("breaker", &self.breaker)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl Default for ReboundClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReboundClient {
    /// Creates a client over a default `reqwest` transport.
    pub fn new() -> Self {
        Self::with_transport(reqwest::Client::new())
    }

    /// Creates a client over an existing transport, e.g. one with a custom
    /// connection pool, proxy or TLS setup.
    pub fn with_transport(http: reqwest::Client) -> Self {
        Self {
            http,
            options: ClientOptions::default(),
            metrics: None,
            breaker: None,
            fallback: None,
        }
    }

    /// Applies timeout, retry and metrics options.
    ///
    /// With `options.metrics` set, the Prometheus collectors for that
    /// namespace are registered here, once per process.
    pub fn with_options(mut self, options: ClientOptions) -> Result<Self> {
        if let Some(metrics) = &options.metrics {
            self.metrics = Some(PrometheusMetrics::shared(metrics)?);
        }
        self.options = options;
        Ok(self)
    }

    /// Records every attempt into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs each attempt through `breaker` under the command in `config`.
    pub fn with_circuit_breaker(
        mut self,
        breaker: Arc<dyn CircuitBreaker>,
        config: CommandConfig,
    ) -> Self {
        self.breaker = Some(BreakerAdapter::new(breaker, config));
        self
    }

    /// Maps the error of attempts the circuit breaker refused to run.
    pub fn with_fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn(ReboundError) -> ReboundError + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.execute(Request::new("GET", url, None)?).await
    }

    pub async fn head(&self, url: &str) -> Result<reqwest::Response> {
        self.execute(Request::new("HEAD", url, None)?).await
    }

    /// Sends `body` with the given `Content-Type`.
    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<ReplayableBody>,
    ) -> Result<reqwest::Response> {
        let request = Request::new("POST", url, Some(body.into()))?
            .with_header(header::CONTENT_TYPE.as_str(), content_type)?;
        self.execute(request).await
    }

    /// Sends `pairs` as an `application/x-www-form-urlencoded` body.
    pub async fn post_form<I, K, V>(&self, url: &str, pairs: I) -> Result<reqwest::Response>
    where
        I: IntoIterator,
        I::Item: std::borrow::Borrow<(K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        self.post(url, "application/x-www-form-urlencoded", encoded)
            .await
    }

    /// Sends `request`, retrying per the configured policy.
    ///
    /// Non-retryable outcomes, 4xx responses included, are returned as they
    /// are. When the retry budget runs out on a retryable outcome the call
    /// fails with [`ReboundError::Exhausted`].
    pub async fn execute(&self, request: Request) -> Result<reqwest::Response> {
        self.execute_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Like [`ReboundClient::execute`], but gives up with
    /// [`ReboundError::Cancelled`] as soon as `cancel` fires, whether an
    /// attempt is in flight, a discarded body is being drained or a backoff
    /// is pending.
    pub async fn execute_with_cancellation(
        &self,
        mut request: Request,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let timeout = Duration::from_millis(self.options.timeout_ms);
        let mut attempt = 0usize;

        loop {
            if attempt > 0 {
                request.rewind()?;
            }
            let transport = request.build_attempt(&self.http, timeout)?;
            let started = Instant::now();

            let (outcome, decision) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReboundError::Cancelled),
                done = self.attempt(transport) => done,
            };

            if let Some(err) = outcome.error() {
                tracing::warn!(
                    method = %request.method(),
                    url = %request.url(),
                    attempt,
                    error = %err,
                    "request attempt failed"
                );
            }
            if let Some(metrics) = &self.metrics {
                metrics.record(started, outcome.status(), outcome.error());
            }

            if !decision.retry {
                return match (decision.error, outcome) {
                    (Some(err), _) => Err(err),
                    (None, Outcome::Response(response)) => Ok(response),
                    (None, Outcome::Failed(err)) => Err(err),
                };
            }

            if let Outcome::Response(response) = outcome {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ReboundError::Cancelled),
                    _ = drain_body(response) => {}
                }
            }

            if attempt >= self.options.max_retries {
                let attempts = attempt + 1;
                tracing::warn!(
                    method = %request.method(),
                    url = %request.url(),
                    attempts,
                    "giving up on request"
                );
                return Err(ReboundError::Exhausted {
                    method: request.method().to_string(),
                    url: request.url().to_string(),
                    attempts,
                });
            }

            let wait = self.wait_before(attempt);
            attempt += 1;
            tracing::debug!(
                method = %request.method(),
                url = %request.url(),
                wait_ms = wait.as_millis() as u64,
                remaining = self.options.max_retries - attempt,
                "retrying request"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ReboundError::Cancelled),
                _ = sleep(wait) => {}
            }
        }
    }

    async fn attempt(&self, transport: reqwest::RequestBuilder) -> (Outcome, RetryDecision) {
        let policy = &self.options.retry_policy;
        match &self.breaker {
            Some(adapter) => {
                adapter
                    .run(send(transport), policy, self.fallback.as_ref())
                    .await
            }
            None => {
                let outcome = send(transport).await;
                let decision = policy.check(&outcome);
                (outcome, decision)
            }
        }
    }

    /// Wait after attempt number `attempt` failed; the first attempt is `0`.
    fn wait_before(&self, attempt: usize) -> Duration {
        let index = i64::try_from(attempt).unwrap_or(i64::MAX);
        self.options.backoff.next_interval(index)
    }
}

async fn send(transport: reqwest::RequestBuilder) -> Outcome {
    match transport.send().await {
        Ok(response) => Outcome::Response(response),
        Err(err) => Outcome::Failed(ReboundError::Transport(err)),
    }
}

/// Reads and discards up to [`RESPONSE_READ_LIMIT`] bytes, then drops the
/// response. Read failures are only logged.
async fn drain_body(mut response: reqwest::Response) {
    let mut drained = 0usize;
    while drained < RESPONSE_READ_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => drained += chunk.len(),
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "error reading response body");
                break;
            }
        }
    }
}
