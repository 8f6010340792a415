//! Process-wide rate limiting and retry for remote calls.
//!
//! One limiter governs all outbound calls in a workspace: bounded
//! concurrency, minimum spacing between request starts, and exponential
//! backoff with jitter on throttling or transport failure. Non-throttle 4xx
//! responses fail immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// Tunables for the [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests in flight at once
    pub max_in_flight: usize,
    /// Minimum spacing between request starts
    pub min_spacing: Duration,
    /// First backoff delay
    pub base_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
    /// Jitter fraction applied to each backoff delay (0.25 = ±25%)
    pub jitter: f64,
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// Per-attempt timeout
    pub attempt_timeout: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 3,
            min_spacing: Duration::from_millis(340),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            jitter: 0.25,
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Backoff delay for the given retry index (0 = delay before the second
/// attempt): `base * 2^attempt`, capped at `max`.
#[must_use]
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}

/// Per-workspace singleton governing all outbound remote calls.
pub struct RateLimiter {
    config: RateLimiterConfig,
    permits: Semaphore,
    next_start: Mutex<Instant>,
    jitter_seed: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter with the given tunables.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15)
            | 1;
        Self {
            permits: Semaphore::new(config.max_in_flight),
            next_start: Mutex::new(Instant::now()),
            jitter_seed: AtomicU64::new(seed),
            config,
        }
    }

    /// The configuration this limiter runs with.
    #[must_use]
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Execute `f` under the limiter: bounded concurrency, spaced start,
    /// per-attempt timeout, and retry with backoff on transient errors.
    ///
    /// Non-transient errors return immediately; a transient error on the
    /// last attempt surfaces as `RemoteExhausted`.
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        for attempt in 0..self.config.max_attempts {
            let outcome = {
                // Never hold a permit while sleeping in backoff.
                let _permit = self.permits.acquire().await.expect("limiter closed");
                self.wait_for_slot().await;

                match tokio::time::timeout(self.config.attempt_timeout, f()).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::RemoteTimeout(self.config.attempt_timeout)),
                }
            };

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt + 1 < self.config.max_attempts => {
                    let delay = self.jittered(backoff_delay(
                        self.config.base_delay,
                        self.config.max_delay,
                        attempt,
                    ));
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient remote error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(SyncError::RemoteExhausted {
                        attempts: self.config.max_attempts,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        unreachable!("max_attempts is at least 1")
    }

    /// Reserve the next start slot, sleeping until it arrives.
    async fn wait_for_slot(&self) {
        let start = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let start = (*next).max(now);
            *next = start + self.config.min_spacing;
            start
        };
        tokio::time::sleep_until(start).await;
    }

    /// Apply ±jitter to a delay. xorshift64 keeps this dependency-free.
    fn jittered(&self, delay: Duration) -> Duration {
        let mut s = self.jitter_seed.load(Ordering::Relaxed);
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.jitter_seed.store(s, Ordering::Relaxed);

        let unit = (s >> 11) as f64 / (1u64 << 53) as f64; // [0, 1)
        let factor = 1.0 + self.config.jitter * (2.0 * unit - 1.0);
        delay.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_backoff_schedule_doubles_to_cap() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(64);
        assert_eq!(backoff_delay(base, max, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, max, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, max, 5), Duration::from_secs(32));
        assert_eq!(backoff_delay(base, max, 6), Duration::from_secs(64));
        assert_eq!(backoff_delay(base, max, 20), Duration::from_secs(64));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        let base = Duration::from_secs(1);
        for _ in 0..1000 {
            let d = limiter.jittered(base);
            assert!(d >= Duration::from_millis(750), "jittered too low: {d:?}");
            assert!(d <= Duration::from_millis(1250), "jittered too high: {d:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_throttle_then_succeeds() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            min_spacing: Duration::ZERO,
            ..RateLimiterConfig::default()
        });
        let calls = AtomicU32::new(0);

        let result = limiter
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SyncError::RemoteStatus {
                            code: 429,
                            message: "slow down".into(),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_fails_immediately() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        let calls = AtomicU32::new(0);

        let err = limiter
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(SyncError::RemoteStatus {
                        code: 404,
                        message: "gone".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::RemoteStatus { code: 404, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_reports_attempts() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_attempts: 3,
            min_spacing: Duration::ZERO,
            ..RateLimiterConfig::default()
        });

        let err = limiter
            .run("test", || async {
                Err::<(), _>(SyncError::RemoteStatus {
                    code: 503,
                    message: "unavailable".into(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::RemoteExhausted { attempts: 3, .. }));
    }
}
