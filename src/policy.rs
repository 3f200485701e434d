use std::fmt;
use std::sync::Arc;

use crate::ReboundError;

/// Result of one transport call.
#[derive(Debug)]
pub enum Outcome {
    /// The server answered, whatever the status.
    Response(reqwest::Response),
    /// No usable response was produced.
    Failed(ReboundError),
}

impl Outcome {
    /// Status code of the response, or `0` when the attempt failed.
    pub fn status(&self) -> u16 {
        match self {
            Self::Response(response) => response.status().as_u16(),
            Self::Failed(_) => 0,
        }
    }

    pub fn error(&self) -> Option<&ReboundError> {
        match self {
            Self::Response(_) => None,
            Self::Failed(err) => Some(err),
        }
    }
}

/// Verdict of a [`RetryPolicy`] on one attempt.
///
/// `error`, when set, replaces the natural failure surfaced to the caller,
/// also when `retry` is `false`.
#[derive(Debug, Default)]
pub struct RetryDecision {
    pub retry: bool,
    pub error: Option<ReboundError>,
}

impl RetryDecision {
    pub fn retry() -> Self {
        Self {
            retry: true,
            error: None,
        }
    }

    pub fn stop() -> Self {
        Self::default()
    }

    pub fn stop_with(error: ReboundError) -> Self {
        Self {
            retry: false,
            error: Some(error),
        }
    }
}

/// Decides whether an attempt should be retried.
#[derive(Clone, Default)]
pub enum RetryPolicy {
    /// See [`default_retry_policy`].
    #[default]
    Default,
    /// Caller-supplied predicate.
    Custom(Arc<dyn Fn(&Outcome) -> RetryDecision + Send + Sync>),
}

impl RetryPolicy {
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&Outcome) -> RetryDecision + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(check))
    }

    pub fn check(&self, outcome: &Outcome) -> RetryDecision {
        match self {
            Self::Default => default_retry_policy(outcome),
            Self::Custom(check) => check(outcome),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("Default"),
            Self::Custom(_) => f.write_str("Custom(<function>)"),
        }
    }
}

/// Retries transport failures, status `0` and any status `>= 500`.
///
/// Everything else, 4xx included, is handed back to the caller as is.
pub fn default_retry_policy(outcome: &Outcome) -> RetryDecision {
    match outcome {
        Outcome::Failed(_) => RetryDecision::retry(),
        Outcome::Response(response) => {
            let status = response.status().as_u16();
            if status == 0 || status >= 500 {
                RetryDecision::retry()
            } else {
                RetryDecision::stop()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{default_retry_policy, Outcome, RetryDecision, RetryPolicy};
    use crate::ReboundError;

    fn response(status: u16) -> Outcome {
        let response = http::Response::builder()
            .status(status)
            .body(Vec::<u8>::new())
            .expect("must build response");
        Outcome::Response(reqwest::Response::from(response))
    }

    #[test]
    fn retries_server_errors() {
        for status in [500, 502, 503, 599, 999] {
            assert!(default_retry_policy(&response(status)).retry, "{status}");
        }
    }

    #[test]
    fn stops_on_success_and_client_errors() {
        for status in [200, 204, 301, 400, 404, 429] {
            let decision = default_retry_policy(&response(status));
            assert!(!decision.retry, "{status}");
            assert!(decision.error.is_none());
        }
    }

    #[test]
    fn retries_failed_attempts() {
        let outcome = Outcome::Failed(ReboundError::CircuitOpen {
            command: "users".to_owned(),
            reason: "open".to_owned(),
        });
        assert!(default_retry_policy(&outcome).retry);
        assert_eq!(outcome.status(), 0);
        assert!(outcome.error().is_some());
    }

    #[test]
    fn custom_policy_can_override_error_on_stop() {
        let policy = RetryPolicy::custom(|outcome| {
            if outcome.status() == 409 {
                RetryDecision::stop_with(ReboundError::Policy("conflict".to_owned()))
            } else {
                RetryDecision::stop()
            }
        });

        let decision = policy.check(&response(409));
        assert!(!decision.retry);
        assert!(matches!(decision.error, Some(ReboundError::Policy(ref msg)) if msg == "conflict"));
        assert!(policy.check(&response(200)).error.is_none());
        assert_eq!(format!("{policy:?}"), "Custom(<function>)");
    }
}
