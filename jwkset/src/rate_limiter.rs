//! Rate limiting for refresh-on-unknown-key-ID
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::RateLimitError;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Rate limiter using token bucket algorithm
///
/// Tokens accrue continuously at one per `interval` up to `capacity`. A
/// waiter that cannot be served immediately reserves the next token and
/// sleeps until it is due; the reservation is handed back if the wait is
/// cancelled.
pub struct RateLimiter {
    /// Maximum number of tokens (burst capacity)
    capacity: u32,
    /// Time to accrue one token
    interval: Duration,
    state: Mutex<Bucket>,
}

struct Bucket {
    /// Available tokens; negative while reservations are outstanding
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Arguments
    /// * `interval` - Time needed to accrue one token
    /// * `capacity` - Maximum number of tokens (burst capacity)
    ///
    /// # Example
    /// ```
    /// use jwkset::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// // One refresh every five minutes
    /// let limiter = RateLimiter::every(Duration::from_secs(300), 1);
    /// ```
    pub fn every(interval: Duration, capacity: u32) -> Self {
        Self {
            capacity,
            interval,
            state: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if self.interval.is_zero() {
            bucket.tokens = self.capacity as f64;
        } else {
            let accrued = elapsed.as_secs_f64() / self.interval.as_secs_f64();
            bucket.tokens = (bucket.tokens + accrued).min(self.capacity as f64);
        }
        bucket.last_refill = now;
    }

    /// Try to acquire a token (non-blocking)
    /// Returns true if token was acquired, false if rate limit exceeded
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.state.lock().await;
        self.refill(&mut bucket, Instant::now());

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            debug!(remaining_tokens = bucket.tokens, "Token acquired");
            true
        } else {
            false
        }
    }

    /// Wait until a token is available
    ///
    /// Returns early with an error when `cancel` fires. If the token cannot
    /// become available within `max_wait` the call fails immediately
    /// without consuming anything.
    pub async fn wait(
        &self,
        cancel: &CancellationToken,
        max_wait: Option<Duration>,
    ) -> Result<(), RateLimitError> {
        if cancel.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }

        let now = Instant::now();
        let ready_at = {
            let mut bucket = self.state.lock().await;
            self.refill(&mut bucket, now);

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                return Ok(());
            }
            if self.capacity == 0 {
                return Err(RateLimitError::WouldExceedDeadline {
                    wait: Duration::MAX,
                });
            }

            // Saturates for intervals too large to represent
            let wait = Duration::try_from_secs_f64(
                self.interval.as_secs_f64() * (1.0 - bucket.tokens),
            )
            .unwrap_or(Duration::MAX);
            if let Some(max) = max_wait {
                if wait > max {
                    debug!(wait_ms = wait.as_millis() as u64, "Rate limit wait would exceed deadline");
                    return Err(RateLimitError::WouldExceedDeadline { wait });
                }
            }
            bucket.tokens -= 1.0;
            // `None` when the token is due beyond any representable instant
            now.checked_add(wait)
        };

        let ready = async {
            match ready_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                self.release().await;
                warn!("Rate limit wait cancelled");
                Err(RateLimitError::Cancelled)
            }
            _ = ready => Ok(()),
        }
    }

    /// Hand back a reserved token
    async fn release(&self) {
        let mut bucket = self.state.lock().await;
        bucket.tokens = (bucket.tokens + 1.0).min(self.capacity as f64);
    }

    /// Get current number of whole tokens available
    pub async fn available_tokens(&self) -> u32 {
        let mut bucket = self.state.lock().await;
        self.refill(&mut bucket, Instant::now());
        bucket.tokens.max(0.0).floor() as u32
    }
}
