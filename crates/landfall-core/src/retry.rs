//! Bounded retry for eventually-consistent operations.
//!
//! Every wait in a deployment (a resource becoming ready, a rollout
//! finishing, an endpoint answering) goes through [`retry_until`]: a fixed
//! attempt budget with a fixed delay between attempts. An attempt that does
//! not succeed yet is never fatal on its own; only running out of budget is.
//! Errors that say retrying cannot help (see [`Transient`]) end the loop
//! immediately.

use std::fmt::{self, Debug, Display};
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Attempt count and fixed inter-attempt delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryBudget {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn total_wait(&self) -> Duration {
        self.delay * self.max_attempts.saturating_sub(1)
    }
}

/// Classifies an error as worth another attempt or not.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for std::io::Error {
    fn is_transient(&self) -> bool {
        true
    }
}

/// What the last unsuccessful attempt produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed<T> {
    Value(T),
    Error(String),
}

impl<T: Debug> Display for Observed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observed::Value(v) => write!(f, "{v:?}"),
            Observed::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// The attempt budget ran out before the success condition held.
#[derive(Debug, Clone)]
pub struct RetriesExhausted<T> {
    pub operation: String,
    pub attempts: u32,
    pub last: Observed<T>,
}

impl<T: Debug> Display for RetriesExhausted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} did not succeed within {} attempts (last observed: {})",
            self.operation, self.attempts, self.last
        )
    }
}

impl<T: Debug> std::error::Error for RetriesExhausted<T> {}

/// Outcome of a failed [`retry_until`].
#[derive(Debug)]
pub enum RetryError<T, E> {
    Exhausted(RetriesExhausted<T>),
    /// A non-transient error stopped the loop early.
    Fatal(E),
}

impl<T: Debug, E: Display> Display for RetryError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted(e) => Display::fmt(e, f),
            RetryError::Fatal(e) => Display::fmt(e, f),
        }
    }
}

impl<T: Debug, E: Debug + Display> std::error::Error for RetryError<T, E> {}

/// Run `op` until `accept` passes on its output, at most
/// `budget.max_attempts` times, sleeping `budget.delay` between attempts.
///
/// A budget of zero still makes a single attempt. There is no sleep after
/// the final attempt.
pub async fn retry_until<T, E, F, Fut, P>(
    budget: &RetryBudget,
    operation: &str,
    mut op: F,
    mut accept: P,
) -> Result<T, RetryError<T, E>>
where
    T: Debug,
    E: Transient + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&T) -> bool,
{
    let max_attempts = budget.max_attempts.max(1);
    let mut last = Observed::Error("no attempt made".to_string());

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) if accept(&value) => {
                debug!(%operation, attempt, "condition met");
                return Ok(value);
            }
            Ok(value) => {
                debug!(%operation, attempt, max_attempts, observed = ?value, "condition not met yet");
                last = Observed::Value(value);
            }
            Err(e) if !e.is_transient() => {
                warn!(%operation, attempt, error = %e, "non-transient failure, not retrying");
                return Err(RetryError::Fatal(e));
            }
            Err(e) => {
                debug!(%operation, attempt, max_attempts, error = %e, "attempt failed");
                last = Observed::Error(e.to_string());
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(budget.delay).await;
        }
    }

    warn!(%operation, attempts = max_attempts, last = %last, "retry budget exhausted");
    Err(RetryError::Exhausted(RetriesExhausted {
        operation: operation.to_string(),
        attempts: max_attempts,
        last,
    }))
}

/// Retry until `op` returns `Ok(true)`.
pub async fn wait_for<E, F, Fut>(
    budget: &RetryBudget,
    operation: &str,
    op: F,
) -> Result<bool, RetryError<bool, E>>
where
    E: Transient + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    retry_until(budget, operation, op, |ready| *ready).await
}
