//! Bounded retry with linear backoff.
//!
//! Two ways in:
//! - [`run`] for operations that only need shared borrows (queries, polls)
//! - [`RetryExecutor`] driven by hand in a loop, for submissions that need
//!   `&mut SignerSession` on every attempt
//!
//! Either way the operation runs at most `max_attempts` times and the delay
//! before attempt `n + 1` is `base_delay + (n - 1) * increment`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::errors::{ErrorClass, NetworkError, RetryError};

/// Decides whether an error is worth another attempt.
pub type Classifier<E> = fn(&E) -> ErrorClass;

/// Trusts the tag the network adapter put on the error.
pub fn classify_network(err: &NetworkError) -> ErrorClass {
    err.class()
}

#[derive(Debug, Clone)]
pub struct RetryPolicy<E = NetworkError> {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub increment: Duration,
    pub classifier: Classifier<E>,
}

impl RetryPolicy<NetworkError> {
    pub fn new(max_attempts: u32, base_delay: Duration, increment: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            increment,
            classifier: classify_network,
        }
    }

    /// Policy with no waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }
}

impl Default for RetryPolicy<NetworkError> {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(20), Duration::from_secs(20))
    }
}

impl<E> RetryPolicy<E> {
    pub fn with_classifier<F>(self, classifier: Classifier<F>) -> RetryPolicy<F> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            increment: self.increment,
            classifier,
        }
    }

    /// Delay to wait after the `failed_attempts`-th failure (1-based).
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let steps = failed_attempts.saturating_sub(1);
        self.base_delay
            .saturating_add(self.increment.saturating_mul(steps))
    }

    fn budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A successful value plus how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Tracks one retried operation.
///
/// ```ignore
/// let mut retry = RetryExecutor::new("declare BTCVault", &policy);
/// let handle = loop {
///     match network.declare(session, &artifact, hash).await {
///         Ok(handle) => break handle,
///         Err(err) => retry.on_failure(err).await?,
///     }
/// };
/// ```
pub struct RetryExecutor<'p, E = NetworkError> {
    label: String,
    policy: &'p RetryPolicy<E>,
    attempt: u32,
}

impl<'p, E: Display> RetryExecutor<'p, E> {
    pub fn new(label: impl Into<String>, policy: &'p RetryPolicy<E>) -> Self {
        Self {
            label: label.into(),
            policy,
            attempt: 1,
        }
    }

    /// Number of the attempt currently in flight, starting at 1.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Record a failed attempt.
    ///
    /// Returns `Ok(())` after the backoff delay when another attempt is
    /// allowed. Permanent errors and an exhausted budget come back as `Err`
    /// immediately, without sleeping.
    pub async fn on_failure(&mut self, err: E) -> Result<(), RetryError<E>> {
        if (self.policy.classifier)(&err) == ErrorClass::Permanent {
            tracing::debug!(op = %self.label, attempt = self.attempt, error = %err, "permanent failure");
            return Err(RetryError::Permanent(err));
        }

        if self.attempt >= self.policy.budget() {
            tracing::warn!(
                op = %self.label,
                attempts = self.attempt,
                error = %err,
                "retry budget exhausted"
            );
            return Err(RetryError::Exhausted {
                attempts: self.attempt,
                last: err,
            });
        }

        let delay = self.policy.delay_after(self.attempt);
        tracing::warn!(
            op = %self.label,
            attempt = self.attempt,
            max_attempts = self.policy.budget(),
            delay_secs = delay.as_secs_f64(),
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
        self.attempt += 1;
        Ok(())
    }
}

/// Run `operation` until it succeeds, fails permanently, or the budget runs out.
pub async fn run<T, E, F, Fut>(
    label: &str,
    policy: &RetryPolicy<E>,
    mut operation: F,
) -> Result<Retried<T>, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retry = RetryExecutor::new(label, policy);
    loop {
        match operation().await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: retry.attempts(),
                });
            }
            Err(err) => retry.on_failure(err).await?,
        }
    }
}
