// ==============================================================================
// retry.rs - Bounded Retry with Backoff
// ==============================================================================
// Description: Retry policy shared by database startup and chunk commits
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Startup connectivity: 5 attempts, 5 seconds apart
pub const STARTUP_ATTEMPTS: u32 = 5;
pub const STARTUP_DELAY: Duration = Duration::from_secs(5);

/// Time source for retry delays; tests substitute a recording clock
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after every failure, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1)
    pub max_attempts: u32,
    pub backoff: Backoff,
}

#[derive(Error, Debug)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryError<E: Debug + Display> {
    pub operation: String,
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn startup() -> Self {
        Self::fixed(STARTUP_ATTEMPTS, STARTUP_DELAY)
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { initial, max },
        }
    }

    /// Single attempt, no retry
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay after the given (1-based) failed attempt
    pub fn delay_before_retry(&self, failed_attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let shift = failed_attempt.saturating_sub(1).min(16);
                initial.saturating_mul(1u32 << shift).min(max)
            }
        }
    }

    /// Run `attempt` until it succeeds or the policy is exhausted
    ///
    /// The closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(
        &self,
        clock: &dyn Clock,
        operation: &str,
        mut attempt: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Debug + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut number = 1;

        loop {
            match attempt(number).await {
                Ok(value) => return Ok(value),
                Err(e) if number < max_attempts => {
                    let delay = self.delay_before_retry(number);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        operation, number, max_attempts, e, delay
                    );
                    clock.sleep(delay).await;
                    number += 1;
                }
                Err(e) => {
                    return Err(RetryError {
                        operation: operation.to_string(),
                        attempts: number,
                        last_error: e,
                    })
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
