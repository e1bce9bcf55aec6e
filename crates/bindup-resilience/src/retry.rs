//! Retry executor.
//!
//! Wraps an arbitrary async operation with a fixed attempt budget. Attempts
//! run strictly one after another; the first success short-circuits. The
//! executor only catches, records and re-invokes. Waiting between attempts
//! is opt-in (`with_delay`) since most operations do their own waits.
//!
//! ```text
//! Attempting(1) ──ok──▶ Success
//!      │ err
//!      ▼
//! Attempting(2) ──ok──▶ Success
//!      │ err (budget spent)
//!      ▼
//!  Exhausted
//! ```

use crate::config::EngineConfig;
use crate::events::{EventSink, StepEvent};
use crate::result::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Event phase emitted by the executor
pub const PHASE: &str = "retry";

/// Outcome of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    /// Operation returned a value
    Success,
    /// Operation failed or timed out
    Failure,
}

/// One entry of the attempt log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt_number: u32,
    /// Operation label
    pub label: String,
    /// Attempt outcome
    pub outcome: AttemptOutcome,
    /// Error message of a failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Wall time spent in the attempt
    pub elapsed_ms: u64,
}

impl AttemptRecord {
    fn success(attempt_number: u32, label: &str, elapsed: Duration) -> Self {
        Self {
            attempt_number,
            label: label.to_string(),
            outcome: AttemptOutcome::Success,
            error_message: None,
            elapsed_ms: millis(elapsed),
        }
    }

    fn failure(attempt_number: u32, label: &str, message: String, elapsed: Duration) -> Self {
        Self {
            attempt_number,
            label: label.to_string(),
            outcome: AttemptOutcome::Failure,
            error_message: Some(message),
            elapsed_ms: millis(elapsed),
        }
    }

    /// Whether the attempt succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Retry state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryState {
    /// Running the given 1-based attempt
    Attempting(u32),
    /// An attempt succeeded
    Success,
    /// Every attempt failed
    Exhausted,
}

impl RetryState {
    /// Initial state
    #[must_use]
    pub const fn begin() -> Self {
        Self::Attempting(1)
    }

    /// Transition after a successful attempt
    #[must_use]
    pub const fn on_success(self) -> Self {
        match self {
            Self::Attempting(_) => Self::Success,
            other => other,
        }
    }

    /// Transition after a failed attempt
    #[must_use]
    pub const fn on_failure(self, max_attempts: u32) -> Self {
        match self {
            Self::Attempting(n) if n < max_attempts => Self::Attempting(n + 1),
            Self::Attempting(_) => Self::Exhausted,
            other => other,
        }
    }

    /// Whether no further attempts will run
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Exhausted)
    }
}

/// Full record of a retried run
#[derive(Debug)]
pub struct RetryReport<T, E> {
    /// Operation label
    pub label: String,
    /// Every attempt, in order
    pub attempts: Vec<AttemptRecord>,
    /// Final value, or the last error
    pub outcome: Result<T, E>,
}

impl<T, E> RetryReport<T, E> {
    /// Terminal state of the run
    #[must_use]
    pub fn state(&self) -> RetryState {
        if self.outcome.is_ok() {
            RetryState::Success
        } else {
            RetryState::Exhausted
        }
    }

    /// Number of attempts made
    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts.len()).unwrap_or(u32::MAX)
    }

    /// Convert into the caller-facing result
    pub fn into_result(self) -> Result<T, RetryExhausted<E>> {
        match self.outcome {
            Ok(value) => Ok(value),
            Err(last_error) => Err(RetryExhausted {
                label: self.label,
                attempts: self.attempts,
                last_error,
            }),
        }
    }
}

/// Raised when every attempt failed; wraps the last error unchanged
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Operation label
    pub label: String,
    /// Every attempt, in order
    pub attempts: Vec<AttemptRecord>,
    /// Error of the final attempt
    pub last_error: E,
}

impl<E: Display> RetryExhausted<E> {
    /// Message of the final attempt
    #[must_use]
    pub fn last_message(&self) -> String {
        self.last_error.to_string()
    }
}

impl<E> RetryExhausted<E> {
    /// Recover the last error
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: Display> Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} attempts: {}",
            self.label,
            self.attempts.len(),
            self.last_error
        )
    }
}

impl<E> std::error::Error for RetryExhausted<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

impl From<RetryExhausted<EngineError>> for EngineError {
    fn from(err: RetryExhausted<EngineError>) -> Self {
        Self::RetryExhausted {
            attempts: u32::try_from(err.attempts.len()).unwrap_or(u32::MAX),
            message: err.last_error.to_string(),
            label: err.label,
        }
    }
}

/// Sequential retry runner
#[derive(Clone)]
pub struct RetryExecutor {
    default_max_attempts: u32,
    delay: Duration,
    attempt_timeout: Option<Duration>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("default_max_attempts", &self.default_max_attempts)
            .field("delay", &self.delay)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Executor with the default budget, no delay and no attempt timeout
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            default_max_attempts: crate::config::DEFAULT_MAX_ATTEMPTS,
            delay: Duration::ZERO,
            attempt_timeout: None,
            sink,
        }
    }

    /// Executor configured from engine settings
    #[must_use]
    pub fn from_config(config: &EngineConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            default_max_attempts: config.default_max_attempts,
            delay: config.retry_delay(),
            attempt_timeout: config.attempt_timeout(),
            sink,
        }
    }

    /// Pause between attempts
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cap each attempt; an elapsed cap counts as a failed attempt
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Budget used when the caller passes none
    #[must_use]
    pub const fn default_max_attempts(&self) -> u32 {
        self.default_max_attempts
    }

    /// Run `operation` up to `max_attempts` times (at least once)
    /// and return the full report.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        max_attempts: Option<u32>,
        mut operation: F,
    ) -> RetryReport<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + From<EngineError>,
    {
        let max_attempts = max_attempts.unwrap_or(self.default_max_attempts).max(1);
        let mut attempts = Vec::new();
        let mut state = RetryState::begin();

        self.sink
            .emit(StepEvent::start(PHASE, label).with_detail(format!("budget {max_attempts}")));

        loop {
            let attempt = match state {
                RetryState::Attempting(n) => n,
                RetryState::Success | RetryState::Exhausted => max_attempts,
            };
            let started = Instant::now();
            let result = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(E::from(EngineError::timeout(limit))),
                },
                None => operation().await,
            };
            let elapsed = started.elapsed();

            match result {
                Ok(value) => {
                    attempts.push(AttemptRecord::success(attempt, label, elapsed));
                    tracing::info!(label, attempt, "operation succeeded");
                    self.sink.emit(
                        StepEvent::success(PHASE, label)
                            .with_detail(format!("attempt {attempt}/{max_attempts}")),
                    );
                    return RetryReport {
                        label: label.to_string(),
                        attempts,
                        outcome: Ok(value),
                    };
                }
                Err(err) => {
                    let message = err.to_string();
                    attempts.push(AttemptRecord::failure(attempt, label, message.clone(), elapsed));
                    state = state.on_failure(max_attempts);

                    if state == RetryState::Exhausted {
                        tracing::warn!(label, attempt, error = %message, "retry budget exhausted");
                        self.sink.emit(
                            StepEvent::error(PHASE, label).with_detail(format!(
                                "failed after {max_attempts} attempts: {message}"
                            )),
                        );
                        return RetryReport {
                            label: label.to_string(),
                            attempts,
                            outcome: Err(err),
                        };
                    }

                    tracing::debug!(label, attempt, error = %message, "attempt failed, retrying");
                    self.sink.emit(
                        StepEvent::warning(PHASE, label)
                            .with_detail(format!("attempt {attempt}/{max_attempts}: {message}")),
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }

    /// Run `operation` with retries, returning the value or the
    /// exhaustion error carrying the last failure.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        label: &str,
        max_attempts: Option<u32>,
        operation: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + From<EngineError>,
    {
        self.run(label, max_attempts, operation).await.into_result()
    }
}
