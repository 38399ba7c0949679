//! Eviction noise.
//!
//! Sessions created or refreshed in the same burst would otherwise arm
//! timers that fire together and hit the store together. Each eviction delay
//! is shortened by a random amount drawn from a [`JitterSource`].

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of eviction noise.
pub trait JitterSource: Send + Sync {
    /// A duration in `[0, max)`; zero when `max` is zero.
    fn noise(&self, max: Duration) -> Duration;
}

/// Uniformly random noise from a seedable generator.
#[derive(Debug)]
pub struct RandomJitter {
    rng: Mutex<StdRng>,
}

impl RandomJitter {
    /// Generator seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic generator.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomJitter {
    fn default() -> Self {
        Self::new()
    }
}

impl JitterSource for RandomJitter {
    fn noise(&self, max: Duration) -> Duration {
        let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        if max_millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.lock().random_range(0..max_millis))
    }
}

/// Constant noise, clamped below `max`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedJitter(pub Duration);

impl FixedJitter {
    /// No noise at all.
    pub fn zero() -> Self {
        Self(Duration::ZERO)
    }
}

impl JitterSource for FixedJitter {
    fn noise(&self, max: Duration) -> Duration {
        if max.is_zero() {
            Duration::ZERO
        } else if self.0 >= max {
            max - Duration::from_millis(1).min(max)
        } else {
            self.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: Duration = Duration::from_secs(20 * 60);

    #[test]
    fn test_random_noise_in_range() {
        let jitter = RandomJitter::seeded(7);
        for _ in 0..1_000 {
            assert!(jitter.noise(MAX) < MAX);
        }
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = RandomJitter::seeded(42);
        let b = RandomJitter::seeded(42);
        let left: Vec<_> = (0..16).map(|_| a.noise(MAX)).collect();
        let right: Vec<_> = (0..16).map(|_| b.noise(MAX)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_zero_max_means_zero_noise() {
        assert_eq!(RandomJitter::new().noise(Duration::ZERO), Duration::ZERO);
        assert_eq!(
            FixedJitter(Duration::from_secs(5)).noise(Duration::ZERO),
            Duration::ZERO
        );
    }

    #[test]
    fn test_fixed_is_clamped_below_max() {
        let jitter = FixedJitter(Duration::from_secs(3600));
        assert_eq!(jitter.noise(MAX), MAX - Duration::from_millis(1));
        assert_eq!(FixedJitter::zero().noise(MAX), Duration::ZERO);
        assert_eq!(
            FixedJitter(Duration::from_secs(60)).noise(MAX),
            Duration::from_secs(60)
        );
    }
}
