// src/exporter/retry.rs
//! Exponential backoff with jitter
//!
//! Retry state travels with the batch as an `ExportAttempt` (attempt count
//! and first-attempt instant); the policy itself is stateless, so delays can
//! be checked deterministically against any `Clock`.

use crate::encoding::EncodedBatch;
use crate::utils::config::RetryConfig;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total sends allowed per batch, including the first
    pub max_attempts: u32,

    pub initial_backoff: Duration,

    pub max_backoff: Duration,

    pub multiplier: f64,

    /// Budget measured from the first attempt
    pub max_elapsed: Duration,

    /// Equal jitter: each delay is drawn from the upper half of its backoff
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier.max(1.0),
            max_elapsed: Duration::from_millis(config.max_elapsed_ms),
            jitter: config.jitter,
        }
    }
}

/// What to do after a retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send again after this delay
    RetryAfter(Duration),

    /// Attempts or elapsed budget exhausted
    GiveUp,
}

impl RetryPolicy {
    /// Un-jittered delay after the `attempt`-th failed send (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay after the `attempt`-th failure, jittered, never shorter than a
    /// server-provided `retry_after`
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.backoff(attempt);
        let delay = if self.jitter && !base.is_zero() {
            let half = base / 2;
            let spread = (base - half).as_nanos() as u64;
            half + Duration::from_nanos(rand::thread_rng().gen_range(0..=spread))
        } else {
            base
        };

        match retry_after {
            Some(floor) => delay.max(floor),
            None => delay,
        }
    }

    /// Decide whether a batch that just failed retryably gets another send
    pub fn decide(
        &self,
        attempt: &ExportAttempt,
        now: Instant,
        retry_after: Option<Duration>,
    ) -> RetryDecision {
        if attempt.attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let delay = self.delay(attempt.attempts, retry_after);
        if attempt.elapsed(now) + delay > self.max_elapsed {
            return RetryDecision::GiveUp;
        }

        RetryDecision::RetryAfter(delay)
    }
}

/// A batch plus its retry state; dropped on terminal success or give-up
#[derive(Debug)]
pub struct ExportAttempt {
    pub batch: EncodedBatch,

    /// Sends started so far
    pub attempts: u32,

    pub first_attempt_at: Option<Instant>,
}

impl ExportAttempt {
    pub fn new(batch: EncodedBatch) -> Self {
        Self {
            batch,
            attempts: 0,
            first_attempt_at: None,
        }
    }

    /// Note the start of a send
    pub fn begin(&mut self, now: Instant) {
        self.attempts += 1;
        self.first_attempt_at.get_or_insert(now);
    }

    /// Time since the first send started
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.first_attempt_at
            .map(|first| now.saturating_duration_since(first))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(30),
            jitter,
        }
    }

    fn attempt() -> ExportAttempt {
        ExportAttempt::new(EncodedBatch {
            sequence: 0,
            record_count: 1,
            payload: Bytes::new(),
            coerced_fields: 0,
        })
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let p = policy(false);
        let delays: Vec<u64> = (1..=6).map(|n| p.backoff(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let p = policy(true);
        for attempt in 1..=4 {
            let base = p.backoff(attempt);
            for _ in 0..200 {
                let d = p.delay(attempt, None);
                assert!(d >= base / 2 && d <= base, "{:?} outside [{:?}, {:?}]", d, base / 2, base);
            }
        }
    }

    #[test]
    fn test_jittered_delays_never_decrease_below_cap() {
        let p = policy(true);
        for _ in 0..100 {
            let delays: Vec<Duration> = (1..=4).map(|n| p.delay(n, None)).collect();
            assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{:?}", delays);
        }
    }

    #[test]
    fn test_retry_after_is_a_floor() {
        let p = policy(false);
        assert_eq!(p.delay(1, Some(Duration::from_secs(2))), Duration::from_secs(2));
        assert_eq!(p.delay(3, Some(Duration::from_millis(10))), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let p = RetryPolicy {
            max_attempts: 3,
            ..policy(false)
        };
        let mut a = attempt();
        let now = Instant::now();

        a.begin(now);
        assert_eq!(p.decide(&a, now, None), RetryDecision::RetryAfter(Duration::from_millis(100)));
        a.begin(now);
        assert_eq!(p.decide(&a, now, None), RetryDecision::RetryAfter(Duration::from_millis(200)));
        a.begin(now);
        assert_eq!(p.decide(&a, now, None), RetryDecision::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_when_elapsed_budget_spent() {
        let p = RetryPolicy {
            max_elapsed: Duration::from_millis(250),
            ..policy(false)
        };
        let mut a = attempt();
        let start = Instant::now();
        a.begin(start);

        // 100ms delay fits in the budget
        assert!(matches!(p.decide(&a, start, None), RetryDecision::RetryAfter(_)));

        let later = start + Duration::from_millis(100);
        a.begin(later);
        // 100ms spent + 200ms delay exceeds 250ms
        assert_eq!(p.decide(&a, later, None), RetryDecision::GiveUp);
        assert_eq!(a.elapsed(later), Duration::from_millis(100));
    }

    #[test]
    fn test_from_config_clamps() {
        let config = RetryConfig {
            max_attempts: 0,
            multiplier: 0.5,
            ..RetryConfig::default()
        };
        let p = RetryPolicy::from(&config);
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.multiplier, 1.0);
    }
}
