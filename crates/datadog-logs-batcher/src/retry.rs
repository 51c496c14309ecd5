// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::constants;

/// How many times a failed submission is retried and how long to wait in between.
///
/// The retry count excludes the first attempt: `Immediate(5)` makes at most six
/// attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Retry right away.
    Immediate(usize),
    /// `(retries, delay_ms)`: the n-th retry waits `n * delay_ms`.
    LinearBackoff(usize, u64),
    /// The n-th retry waits `base_delay_ms * 2^(n-1)`, capped at `max_delay_ms`.
    ExponentialBackoff {
        retries: usize,
        base_delay_ms: u64,
        max_delay_ms: u64,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::exponential(constants::DEFAULT_RETRIES)
    }
}

impl RetryStrategy {
    /// Exponential backoff with the default base and cap.
    #[must_use]
    pub fn exponential(retries: usize) -> Self {
        RetryStrategy::ExponentialBackoff {
            retries,
            base_delay_ms: constants::DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: constants::DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }

    #[must_use]
    pub fn retries(&self) -> usize {
        match self {
            RetryStrategy::Immediate(retries)
            | RetryStrategy::LinearBackoff(retries, _)
            | RetryStrategy::ExponentialBackoff { retries, .. } => *retries,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.retries().saturating_add(1)
    }

    /// Wait before the given retry, counted from 1.
    #[must_use]
    pub fn delay(&self, retry: usize) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                let retry = u64::try_from(retry).unwrap_or(u64::MAX);
                Duration::from_millis(delay_ms.saturating_mul(retry))
            }
            RetryStrategy::ExponentialBackoff {
                base_delay_ms,
                max_delay_ms,
                ..
            } => {
                let exponent = u32::try_from(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                let delay_ms = base_delay_ms.saturating_mul(2u64.saturating_pow(exponent));
                Duration::from_millis(delay_ms.min(*max_delay_ms))
            }
        }
    }
}
