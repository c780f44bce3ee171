//! Retry policy for provider fetches: which failures earn another attempt and
//! how long to wait before it.

use std::time::Duration;

use crate::FetchError;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed { delay: Duration },
    /// `base * factor^retry`, capped at `max`, optionally jittered by up to 50% either way.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(200),
            factor: 2.0,
            max: Duration::from_secs(3),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let seconds = (base.as_secs_f64() * factor.powi(exponent)).min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(seconds.max(0.0));
                if !jitter {
                    return delay;
                }

                let spread_ms = (delay.as_millis() / 2) as u64;
                let offset_ms = fastrand::u64(0..=spread_ms * 2);
                let jittered_ms = (delay.as_millis() as u64 + offset_ms).saturating_sub(spread_ms);
                Duration::from_millis(jittered_ms)
            }
        }
    }
}

/// When and how often a failed fetch is retried.
///
/// Total attempts per request are at most `max_retries + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub backoff: Backoff,
    pub retry_on_status: Vec<u16>,
    pub retry_on_timeout: bool,
    pub retry_on_connect: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            backoff: Backoff::default(),
            retry_on_status: vec![408, 429, 500, 502, 503, 504],
            retry_on_timeout: true,
            retry_on_connect: true,
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Statuses listed here are transient; any other non-2xx status is permanent.
    pub fn is_transient_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status) || (500..600).contains(&status)
    }

    /// Whether a request that has already made `attempts` attempts and failed with
    /// `error` should be tried again.
    pub fn should_retry(&self, error: &FetchError, attempts: u32) -> bool {
        if !self.enabled || attempts > self.max_retries {
            return false;
        }

        match error {
            FetchError::Timeout { .. } => self.retry_on_timeout,
            FetchError::Transient {
                status: Some(status),
                ..
            } => self.is_transient_status(*status),
            FetchError::Transient { status: None, .. } => self.retry_on_connect,
            FetchError::RateLimited { .. } => self.retry_on_status.contains(&429),
            FetchError::Permanent { .. } | FetchError::Cancelled => false,
        }
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff.delay(retry)
    }
}
