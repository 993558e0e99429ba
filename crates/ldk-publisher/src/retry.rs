//! Exponential backoff with additive jitter.

use rand::rngs::SmallRng;
use rand::Rng;
use std::time::Duration;

/// Backoff shape for publish retries.
///
/// For the n-th failure of a record (n >= 1):
///
/// ```text
/// delay(n) = initial_interval * multiplier^(n-1) + U(0, jitter)
/// ```
///
/// optionally clamped by `max_interval`.  The RNG is supplied by the caller
/// so scheduling is deterministic under test.
///
/// The retry *budget* is not part of the policy: each outbox row carries its
/// own `max_retries`, stamped when the row was staged.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    /// Upper bound of the uniform additive jitter.
    pub jitter: Duration,
    /// Optional ceiling applied after jitter.
    pub max_interval: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: Duration::from_secs(1),
            max_interval: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before the `new_retry_count`-th retry becomes claimable again.
    pub fn delay_for(&self, new_retry_count: i32, rng: &mut SmallRng) -> Duration {
        let exponent = (new_retry_count - 1).max(0);
        let base = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);

        let jitter_bound = self.jitter.as_secs_f64();
        let jitter = if jitter_bound > 0.0 {
            rng.gen_range(0.0..jitter_bound)
        } else {
            0.0
        };

        let mut delay = base + jitter;
        if let Some(cap) = self.max_interval {
            delay = delay.min(cap.as_secs_f64());
        }
        Duration::from_secs_f64(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    #[test]
    fn first_retry_within_initial_plus_jitter() {
        let policy = RetryPolicy::default();
        let mut rng = rng();
        for _ in 0..100 {
            let d = policy.delay_for(1, &mut rng);
            assert!(d >= Duration::from_secs(1), "{d:?}");
            assert!(d < Duration::from_secs(2), "{d:?}");
        }
    }

    #[test]
    fn base_doubles_per_retry() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let mut rng = rng();
        assert_eq!(policy.delay_for(1, &mut rng), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, &mut rng), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, &mut rng), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4, &mut rng), Duration::from_secs(8));
    }

    #[test]
    fn ceiling_clamps_late_retries() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            max_interval: Some(Duration::from_secs(5)),
            ..RetryPolicy::default()
        };
        let mut rng = rng();
        assert_eq!(policy.delay_for(10, &mut rng), Duration::from_secs(5));
    }

    #[test]
    fn same_seed_same_schedule() {
        let policy = RetryPolicy::default();
        let mut a = SmallRng::seed_from_u64(42);
        let mut b = SmallRng::seed_from_u64(42);
        for n in 1..6 {
            assert_eq!(policy.delay_for(n, &mut a), policy.delay_for(n, &mut b));
        }
    }
}
