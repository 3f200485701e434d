/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ReboundError {
    /// Malformed method, URL or body while building a request.
    #[error("invalid request: {0}")]
    Construction(String),
    /// The request body could not be seeked back to its start before a
    /// retry, or could not be read for replay.
    #[error("failed to seek body: {0}")]
    BodyRewind(#[source] std::io::Error),
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// Retry budget consumed while the last outcome was still retryable.
    #[error("{method} {url} giving up after {attempts} attempts")]
    Exhausted {
        method: String,
        url: String,
        /// Total number of attempts issued, including the first one.
        attempts: usize,
    },
    /// The circuit breaker refused to run the attempt.
    #[error("circuit open for command '{command}': {reason}")]
    CircuitOpen { command: String, reason: String },
    /// Failure produced by a retry policy in place of the natural outcome.
    #[error("retry policy rejected response: {0}")]
    Policy(String),
    /// The call was cancelled through its cancellation token.
    #[error("request cancelled")]
    Cancelled,
    /// Metric collectors could not be registered.
    #[error("metrics registration failed: {0}")]
    MetricsRegistration(#[source] prometheus::Error),
}

impl ReboundError {
    /// Low-cardinality label describing the error, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Construction(_) => "construction",
            Self::BodyRewind(_) => "body_rewind",
            Self::Transport(err) if err.is_timeout() => "timeout",
            Self::Transport(err) if err.is_connect() => "connect",
            Self::Transport(_) => "transport",
            Self::Exhausted { .. } => "exhausted",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Policy(_) => "policy",
            Self::Cancelled => "cancelled",
            Self::MetricsRegistration(_) => "metrics",
        }
    }

    /// Returns `true` for the synthesized retry exhaustion failure.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::ReboundError;

    #[test]
    fn exhausted_message_names_method_url_and_attempts() {
        let err = ReboundError::Exhausted {
            method: "PUT".to_owned(),
            url: "http://127.0.0.1:8080/items".to_owned(),
            attempts: 6,
        };
        assert_eq!(
            err.to_string(),
            "PUT http://127.0.0.1:8080/items giving up after 6 attempts"
        );
        assert!(err.is_exhausted());
        assert_eq!(err.kind(), "exhausted");
    }

    #[test]
    fn rewind_error_is_distinct_from_exhaustion() {
        let err = ReboundError::BodyRewind(std::io::Error::other("closed"));
        assert!(!err.is_exhausted());
        assert_eq!(err.kind(), "body_rewind");
        assert!(err.to_string().starts_with("failed to seek body"));
    }
}
