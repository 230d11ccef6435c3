//! Rate limiting using a sliding window log
//!
//! The limiter keeps the admission time of every permit granted within the
//! trailing window. A permit is granted only while fewer than `requests`
//! timestamps fall inside that window; otherwise the caller sleeps until the
//! oldest one ages out and then re-checks from scratch.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::http::error::NetworkError;
use crate::util::lock_unpoisoned;

/// Rate limiting configuration: `requests` permits per `interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum number of permits per window
    pub requests: usize,
    /// Length of the sliding window
    #[serde(rename = "interval_ms", with = "crate::util::duration_ms")]
    pub interval: Duration,
}

impl RateLimit {
    /// Create a new rate limit configuration
    pub fn new(requests: usize, interval: Duration) -> Self {
        Self { requests, interval }
    }

    pub fn per_second(requests: usize) -> Self {
        Self::new(requests, Duration::from_secs(1))
    }

    pub fn per_minute(requests: usize) -> Self {
        Self::new(requests, Duration::from_secs(60))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.requests == 0 {
            return Err("rate limit requests cannot be zero".to_string());
        }

        if self.interval.is_zero() {
            return Err("rate limit interval cannot be zero".to_string());
        }

        Ok(())
    }

    /// Bring an invalid configuration into range (at least 1 per 1ms)
    fn clamped(self) -> Self {
        Self {
            requests: self.requests.max(1),
            interval: self.interval.max(Duration::from_millis(1)),
        }
    }
}

/// Rate limit error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("cancelled while waiting for a rate limit permit")]
    Cancelled,
}

impl From<RateLimitError> for NetworkError {
    fn from(error: RateLimitError) -> Self {
        match error {
            RateLimitError::Cancelled => NetworkError::Cancelled,
        }
    }
}

/// Sliding window admission gate shared by every request of a client
#[derive(Debug)]
pub struct RateLimiter {
    limit: RateLimit,
    /// Admission timestamps inside the current window, oldest first
    log: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter; zero values are clamped to 1 request / 1ms
    pub fn new(limit: RateLimit) -> Self {
        let limit = limit.clamped();
        Self {
            limit,
            log: Mutex::new(VecDeque::with_capacity(limit.requests)),
        }
    }

    /// The effective (clamped) configuration
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Wait until a permit can be granted without exceeding the limit
    ///
    /// Cancelling `cancel` while waiting returns [`RateLimitError::Cancelled`]
    /// and leaves the log untouched.
    pub async fn acquire(&self, cancel: Option<&CancellationToken>) -> Result<(), RateLimitError> {
        loop {
            if cancel.is_some_and(|token| token.is_cancelled()) {
                return Err(RateLimitError::Cancelled);
            }

            let wait = match self.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };
            trace!(wait_ms = wait.as_millis() as u64, "waiting for rate limit permit");

            match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(RateLimitError::Cancelled),
                        _ = sleep(wait) => {}
                    }
                }
                None => sleep(wait).await,
            }
        }
    }

    /// Grant a permit now, or report how long until the oldest entry expires
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut log = lock_unpoisoned(&self.log);
        self.purge(&mut log, now);

        if log.len() < self.limit.requests {
            log.push_back(now);
            return Ok(());
        }

        match log.front() {
            Some(oldest) => Err(self.limit.interval - now.duration_since(*oldest)),
            None => Err(self.limit.interval),
        }
    }

    /// Permits that could be granted right now
    pub fn available_permits(&self) -> usize {
        let mut log = lock_unpoisoned(&self.log);
        self.purge(&mut log, Instant::now());
        self.limit.requests.saturating_sub(log.len())
    }

    fn purge(&self, log: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = log.front() {
            if now.duration_since(*oldest) >= self.limit.interval {
                log.pop_front();
            } else {
                break;
            }
        }
    }
}
