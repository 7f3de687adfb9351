//! Request pacing.
//!
//! Three independent timing primitives: a process-wide minimum interval
//! between requests, a human-like think time drawn from a clamped normal
//! distribution, and the exponential backoff used between retry attempts.

use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use crate::config::{RateLimitSettings, RetrySettings};

/// Enforces a minimum interval of `1 / rate` seconds between requests.
///
/// Shared by every worker of a process; callers queue on the internal lock so
/// the interval holds globally.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 && requests_per_second.is_finite() {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self::with_interval(min_interval)
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until issuing a request respects the interval, then claim the slot.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Think time between page visits: normal(mean, std) clamped to [min, max].
#[derive(Debug, Clone, Copy)]
pub struct HumanDelay {
    mean: f64,
    std_dev: f64,
    min: f64,
    max: f64,
}

impl HumanDelay {
    pub fn new(mean: f64, std_dev: f64, min: f64, max: f64) -> Self {
        Self {
            mean,
            std_dev: std_dev.max(0.0),
            min: min.max(0.0),
            max: max.max(min.max(0.0)),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.delay_mean_secs,
            settings.delay_std_dev_secs,
            settings.delay_min_secs,
            settings.delay_max_secs,
        )
    }

    /// No waiting at all; used by dry runs and tests.
    pub fn none() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let value = self.mean + self.std_dev * standard_normal(rng);
        Duration::from_secs_f64(value.clamp(self.min, self.max))
    }

    pub async fn wait<R: Rng + ?Sized>(&self, rng: &mut R) {
        let delay = self.sample(rng);
        log::debug!("sleeping for {:.2}s", delay.as_secs_f64());
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

/// Box-Muller transform over two uniform draws.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Exponential backoff with jitter between retry attempts.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    multiplier: f64,
    min: Duration,
    max: Duration,
    jitter: Duration,
}

impl RetryBackoff {
    pub fn new(multiplier: f64, min: Duration, max: Duration) -> Self {
        Self {
            multiplier,
            min,
            max: max.max(min),
            jitter: Duration::ZERO,
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(
            settings.multiplier,
            Duration::from_secs_f64(settings.min_backoff_secs),
            Duration::from_secs_f64(settings.max_backoff_secs),
        )
        .with_jitter(Duration::from_secs_f64(settings.jitter_secs))
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self::new(0.0, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let raw = self.multiplier * 2f64.powi(exponent);
        let base = raw.clamp(self.min.as_secs_f64(), self.max.as_secs_f64());
        let jitter = if self.jitter.is_zero() {
            0.0
        } else {
            rng.gen_range(0.0..self.jitter.as_secs_f64())
        };
        Duration::from_secs_f64(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn backoff_grows_and_clamps() {
        let backoff = RetryBackoff::new(1.0, Duration::from_secs(2), Duration::from_secs(10));
        let mut rng = StdRng::seed_from_u64(9);
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| backoff.delay_for(attempt, &mut rng).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn backoff_jitter_stays_within_window() {
        let backoff = RetryBackoff::new(1.0, Duration::from_secs(2), Duration::from_secs(10))
            .with_jitter(Duration::from_millis(500));
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let delay = backoff.delay_for(1, &mut rng);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay < Duration::from_millis(2_500));
        }
    }

    #[test]
    fn human_delay_respects_bounds() {
        let delay = HumanDelay::new(4.0, 10.0, 2.0, 8.0);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let sample = delay.sample(&mut rng).as_secs_f64();
            assert!((2.0..=8.0).contains(&sample));
        }
    }

    #[test]
    fn human_delay_is_deterministic_for_a_seed() {
        let delay = HumanDelay::new(4.0, 1.5, 2.0, 8.0);
        let a = delay.sample(&mut StdRng::seed_from_u64(5));
        let b = delay.sample(&mut StdRng::seed_from_u64(5));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn rate_limiter_spaces_requests() {
        let limiter = RateLimiter::with_interval(Duration::from_millis(40));
        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn rate_limiter_derives_interval_from_rate() {
        assert_eq!(RateLimiter::new(0.5).min_interval(), Duration::from_secs(2));
        assert_eq!(RateLimiter::new(0.0).min_interval(), Duration::ZERO);
    }
}
