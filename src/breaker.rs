//! Circuit-breaker boundary.
//!
//! The breaker state machine lives outside this crate. A [`CircuitBreaker`]
//! implementation receives one attempt at a time, keyed by command name, and
//! either runs it or rejects it. The retry loop stays in the client.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{Outcome, ReboundError, Result, RetryDecision, RetryPolicy};

/// Limits for one breaker command. JSON keys follow the field names.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub command_name: String,
    /// Attempt timeout enforced by the breaker, in milliseconds.
    pub timeout: u64,
    pub max_concurrent_requests: u32,
    /// Minimum number of calls in a window before the breaker may trip.
    pub request_volume_threshold: u32,
    /// Time the circuit stays open before probing again, in milliseconds.
    pub sleep_window: u64,
    pub error_percent_threshold: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command_name: "default".to_owned(),
            timeout: 1_000,
            max_concurrent_requests: 10,
            request_volume_threshold: 20,
            sleep_window: 5_000,
            error_percent_threshold: 50,
        }
    }
}

impl CommandConfig {
    pub fn new(command_name: impl Into<String>) -> Self {
        Self {
            command_name: command_name.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| ReboundError::Construction(format!("invalid command config: {err}")))
    }
}

/// Health of one protected call, as reported to the breaker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallStatus {
    Success,
    Failure,
}

/// Reason a breaker refused to run a call (open circuit, saturation, timeout).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BreakerRejection {
    pub reason: String,
}

impl BreakerRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// External circuit breaker.
pub trait CircuitBreaker: Send + Sync {
    /// Registers limits for a command. Called once when the client is built.
    fn configure(&self, config: &CommandConfig);

    /// Runs `call` under `command` unless the breaker vetoes it.
    ///
    /// `Ok(())` means `call` ran to completion.
    fn execute<'a>(
        &'a self,
        command: &'a str,
        call: BoxFuture<'a, CallStatus>,
    ) -> BoxFuture<'a, std::result::Result<(), BreakerRejection>>;
}

/// Maps a [`ReboundError::CircuitOpen`] to the failure returned for a vetoed attempt.
pub type Fallback = Arc<dyn Fn(ReboundError) -> ReboundError + Send + Sync>;

#[derive(Clone)]
pub(crate) struct BreakerAdapter {
    breaker: Arc<dyn CircuitBreaker>,
    config: CommandConfig,
}

impl fmt::Debug for BreakerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerAdapter")
            .field("config", &self.config)
            .finish()
    }
}

impl BreakerAdapter {
    pub(crate) fn new(breaker: Arc<dyn CircuitBreaker>, config: CommandConfig) -> Self {
        breaker.configure(&config);
        Self { breaker, config }
    }

    /// Runs one attempt through the breaker.
    ///
    /// A retryable outcome is reported as [`CallStatus::Failure`]. When the
    /// breaker rejects the call, the attempt fails with the fallback's error.
    pub(crate) async fn run<F>(
        &self,
        attempt: F,
        policy: &RetryPolicy,
        fallback: Option<&Fallback>,
    ) -> (Outcome, RetryDecision)
    where
        F: Future<Output = Outcome> + Send,
    {
        let mut slot: Option<(Outcome, RetryDecision)> = None;
        let verdict = {
            let slot = &mut slot;
            let call = async move {
                let outcome = attempt.await;
                let decision = policy.check(&outcome);
                let status = if decision.retry {
                    CallStatus::Failure
                } else {
                    CallStatus::Success
                };
                *slot = Some((outcome, decision));
                status
            };
            self.breaker
                .execute(&self.config.command_name, Box::pin(call))
                .await
        };

        if let (Ok(()), Some(done)) = (&verdict, slot.take()) {
            return done;
        }

        let reason = match verdict {
            Err(rejection) => rejection.reason,
            Ok(()) => "call abandoned by breaker".to_owned(),
        };
        tracing::warn!(command = %self.config.command_name, %reason, "circuit breaker rejected attempt");

        let open = ReboundError::CircuitOpen {
            command: self.config.command_name.clone(),
            reason,
        };
        let error = match fallback {
            Some(fallback) => fallback(open),
            None => open,
        };
        let outcome = Outcome::Failed(error);
        let decision = policy.check(&outcome);
        (outcome, decision)
    }
}
