//! Retry policies with fixed or exponential backoff

use crate::action::{Action, ActionReport};
use crate::error::ActionError;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// How long to wait between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay after every failed attempt
    Fixed(Duration),

    /// Delay doubles after each failed attempt, starting from `base`
    Exponential { base: Duration },
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base } => {
                let exponent = (attempt as u32).saturating_sub(1);
                let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
                base.saturating_mul(factor)
            }
        }
    }
}

/// Retries a failing action up to a fixed number of attempts
///
/// Each attempt is a full re-run: setup tears the tracer down and rebuilds
/// it, so attempts do not see each other's events. Every attempt gets the
/// full verification budget. All attempt errors are collected into the
/// final [`ActionError::RetryExhausted`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
}

impl RetryPolicy {
    /// A policy of `max_attempts` total attempts (at least one)
    pub fn new(max_attempts: usize, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run the action until it succeeds or the attempts are exhausted
    #[instrument(skip(self, action, timeout), fields(action = %action.name(), max_attempts = self.max_attempts))]
    pub async fn run(
        &self,
        action: &mut Action,
        timeout: Duration,
    ) -> Result<ActionReport, ActionError> {
        let mut errors = Vec::new();
        for attempt in 1..=self.max_attempts {
            match action.execute(timeout).await {
                Ok(report) => {
                    info!(attempt, "Action succeeded");
                    return Ok(report);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "Attempt failed");
                    errors.push(err);
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff.delay_after(attempt)).await;
            }
        }
        Err(ActionError::RetryExhausted {
            action: action.name().to_string(),
            attempts: self.max_attempts,
            errors,
        })
    }

    /// Retry an arbitrary fallible operation under this policy
    ///
    /// The operation is named for the final error only; it is responsible
    /// for its own cleanup between attempts.
    pub async fn run_with<T, F, Fut>(
        &self,
        name: &str,
        mut operation: F,
    ) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ActionError>>,
    {
        let mut errors = Vec::new();
        for attempt in 1..=self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(operation = name, attempt, error = %err, "Attempt failed");
                    errors.push(err);
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff.delay_after(attempt)).await;
            }
        }
        Err(ActionError::RetryExhausted {
            action: name.to_string(),
            attempts: self.max_attempts,
            errors,
        })
    }
}
