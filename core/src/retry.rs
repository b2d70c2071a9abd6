//! Retry policy for transient failures.
//!
//! Backoff doubles from `min_backoff` per attempt and is clamped to
//! `max_backoff`. There is no jitter: the delay before retry `k` is a pure
//! function of `k`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::HttpResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero behaves like one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_min_backoff", with = "humantime_serde")]
    pub min_backoff: Duration,
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

fn default_max_attempts() -> u32 {
    6
}

fn default_min_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(4)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before the retry that follows failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self
            .min_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff);
        self.clamp(delay)
    }

    /// Delay before retrying after `response`, honouring a `Retry-After`
    /// header in seconds on 429 and 503.
    pub fn backoff_for(&self, attempt: u32, response: &HttpResponse) -> Duration {
        if matches!(response.status, 429 | 503) {
            if let Some(secs) = response
                .header("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok())
            {
                return self.clamp(Duration::from_secs(secs));
            }
        }
        self.backoff(attempt)
    }

    fn clamp(&self, delay: Duration) -> Duration {
        delay.max(self.min_backoff).min(self.max_backoff.max(self.min_backoff))
    }
}

/// 429 and 5xx (except 501 Not Implemented) are worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || ((500..600).contains(&status) && status != 501)
}
