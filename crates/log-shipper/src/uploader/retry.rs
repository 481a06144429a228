// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded retries for part uploads.

use std::future::Future;
use std::time::Duration;

use crate::constants::DEFAULT_PART_MAX_ATTEMPTS;

/// How many times a call is attempted and how long to wait in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts, back to back.
    Immediate(u64),
    /// Up to `n` attempts, waiting `ms` milliseconds between attempts.
    LinearBackoff(u64, u64),
    /// Up to `n` attempts, waiting `base_ms * 2^(attempt - 1)` milliseconds
    /// after each failed attempt.
    ExponentialBackoff(u64, u64),
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Immediate(DEFAULT_PART_MAX_ATTEMPTS)
    }
}

impl RetryStrategy {
    /// Builds a strategy from the configured attempt count and backoff. A
    /// zero backoff means immediate retries.
    #[must_use]
    pub fn from_config(max_attempts: u64, backoff_ms: u64) -> Self {
        if backoff_ms == 0 {
            RetryStrategy::Immediate(max_attempts)
        } else {
            RetryStrategy::LinearBackoff(max_attempts, backoff_ms)
        }
    }

    /// Total attempts, never less than one.
    #[must_use]
    pub fn max_attempts(&self) -> u64 {
        let n = match self {
            RetryStrategy::Immediate(n)
            | RetryStrategy::LinearBackoff(n, _)
            | RetryStrategy::ExponentialBackoff(n, _) => *n,
        };
        n.max(1)
    }

    /// Delay after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u64) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, ms) => Duration::from_millis(*ms),
            RetryStrategy::ExponentialBackoff(_, base_ms) => {
                let shift = u32::try_from(attempt.saturating_sub(1).min(16)).unwrap_or(16);
                Duration::from_millis(base_ms.saturating_mul(1 << shift))
            }
        }
    }
}

/// Returned when every attempt failed. Carries the last error.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u64,
    pub error: E,
}

/// Runs `op` until it succeeds or the strategy runs out of attempts. `op`
/// receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(strategy: RetryStrategy, mut op: F) -> Result<T, Exhausted<E>>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = strategy.max_attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt >= max_attempts => {
                return Err(Exhausted {
                    attempts: attempt,
                    error,
                })
            }
            Err(_) => {
                let delay = strategy.delay_after(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
