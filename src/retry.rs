//! Retry policy for send attempts.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries); `None` means unbounded.
//! - Only [`Attempt::RetryAfter`] and [`Attempt::Transient`] are retried. Everything else
//!   returns on first occurrence.
//! - A rate-limit outcome waits exactly the duration it carries. A transient failure waits the
//!   fixed fallback delay.
//! - On exhaustion the last outcome propagates: the last response for a rate limit, the last
//!   error for a transient failure.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use restgate::retry::{Attempt, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .fallback_delay(Duration::from_millis(10))
//!     .build()
//!     .unwrap();
//! let result = policy
//!     .execute(|attempt| async move {
//!         if attempt < 2 {
//!             Attempt::RetryAfter { wait: Duration::from_millis(5), last: attempt }
//!         } else {
//!             Attempt::Complete(attempt)
//!         }
//!     })
//!     .await;
//! assert_eq!(result.unwrap(), 2);
//! # });
//! ```

use crate::error::RestError;
use crate::telemetry::{emit_best_effort, DispatchEvent, NullSink, TelemetrySink};
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Result of one attempt, as seen by the retry layer.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Done; return `T`.
    Complete(T),
    /// Rate limited; retry after `wait`, or return `last` when out of attempts.
    RetryAfter { wait: Duration, last: T },
    /// A transport failure that may succeed on retry.
    Transient(RestError),
    /// A failure that retrying cannot fix.
    Failed(RestError),
}

/// Retry policy with an attempt bound, a fallback delay, and a telemetry sink.
#[derive(Clone)]
pub struct RetryPolicy<S = NullSink> {
    max_attempts: Option<NonZeroUsize>,
    fallback_delay: Duration,
    sink: S,
}

impl<S> std::fmt::Debug for RetryPolicy<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("fallback_delay", &self.fallback_delay)
            .field("sink", &"<sink>")
            .finish()
    }
}

impl RetryPolicy<NullSink> {
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder<NullSink> {
        RetryPolicyBuilder::new()
    }
}

impl<S> RetryPolicy<S>
where
    S: TelemetrySink,
{
    pub fn max_attempts(&self) -> Option<usize> {
        self.max_attempts.map(NonZeroUsize::get)
    }

    pub fn fallback_delay(&self) -> Duration {
        self.fallback_delay
    }

    fn exhausted(&self, attempts: usize) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max.get())
    }

    /// Run `operation` until it completes, fails, or the attempt budget runs out.
    ///
    /// `operation` receives the zero-based attempt number.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, RestError>
    where
        Fut: Future<Output = Attempt<T>>,
        Op: FnMut(usize) -> Fut,
    {
        let mut attempt = 0;
        loop {
            let outcome = operation(attempt).await;
            attempt += 1;

            let delay = match outcome {
                Attempt::Complete(value) => return Ok(value),
                Attempt::Failed(err) => return Err(err),
                Attempt::RetryAfter { wait, last } => {
                    if self.exhausted(attempt) {
                        self.give_up(attempt).await;
                        return Ok(last);
                    }
                    wait
                }
                Attempt::Transient(err) => {
                    if self.exhausted(attempt) {
                        self.give_up(attempt).await;
                        return Err(err);
                    }
                    tracing::debug!(attempt, error = %err, "transient failure, retrying");
                    self.fallback_delay
                }
            };

            tracing::debug!(attempt, delay = ?delay, "retry scheduled");
            emit_best_effort(self.sink.clone(), DispatchEvent::RetryScheduled { attempt, delay }).await;
            tokio::time::sleep(delay).await;
        }
    }

    async fn give_up(&self, attempts: usize) {
        tracing::debug!(attempts, "retry budget exhausted");
        emit_best_effort(self.sink.clone(), DispatchEvent::RetryExhausted { attempts }).await;
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder<S> {
    max_attempts: Option<usize>,
    fallback_delay: Duration,
    sink: S,
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    InvalidMaxAttempts(usize),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidMaxAttempts(n) => {
                write!(f, "max_attempts must be > 0 (got {})", n)
            }
        }
    }
}

impl std::error::Error for BuildError {}

impl RetryPolicyBuilder<NullSink> {
    /// Unbounded attempts, one second fallback delay, no telemetry.
    pub fn new() -> Self {
        Self { max_attempts: None, fallback_delay: Duration::from_secs(1), sink: NullSink }
    }
}

impl Default for RetryPolicyBuilder<NullSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> RetryPolicyBuilder<S>
where
    S: TelemetrySink,
{
    /// Set total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Retry for as long as outcomes stay retryable.
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Delay used when a retryable outcome carries no wait of its own.
    pub fn fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    /// Send retry events to `sink`.
    pub fn sink<S2>(self, sink: S2) -> RetryPolicyBuilder<S2>
    where
        S2: TelemetrySink,
    {
        RetryPolicyBuilder { max_attempts: self.max_attempts, fallback_delay: self.fallback_delay, sink }
    }

    /// Build the retry policy, validating inputs.
    pub fn build(self) -> Result<RetryPolicy<S>, BuildError> {
        let max_attempts = match self.max_attempts {
            None => None,
            Some(n) => Some(NonZeroUsize::new(n).ok_or(BuildError::InvalidMaxAttempts(n))?),
        };
        Ok(RetryPolicy { max_attempts, fallback_delay: self.fallback_delay, sink: self.sink })
    }
}
