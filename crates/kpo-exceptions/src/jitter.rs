// jitter.rs - Randomized requeue delays.
//
// Spreading re-reconciliation over a window keeps a fleet of sources from
// re-checking in lockstep after a restart.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_REQUEUE_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_JITTER_PERCENT: u8 = 10;

/// Draws delays uniformly from `base ± base * percent / 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterScheduler {
    base: Duration,
    max_jitter_percent: u8,
}

impl Default for JitterScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEUE_INTERVAL, DEFAULT_MAX_JITTER_PERCENT)
    }
}

impl JitterScheduler {
    /// Percentages above 100 are clamped to 100.
    pub fn new(base: Duration, max_jitter_percent: u8) -> Self {
        Self {
            base,
            max_jitter_percent: max_jitter_percent.min(100),
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max_jitter_percent(&self) -> u8 {
        self.max_jitter_percent
    }

    /// Inclusive lower and upper bound of every delay this scheduler returns.
    pub fn bounds(&self) -> (Duration, Duration) {
        let base = self.base.as_nanos();
        let spread = base * u128::from(self.max_jitter_percent) / 100;
        (nanos(base - spread), nanos(base + spread))
    }

    pub fn next_delay(&self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let (low, high) = self.bounds();
        if low == high {
            return low;
        }
        let low = low.as_nanos();
        let high = high.as_nanos();
        nanos(rng.gen_range(low..=high))
    }
}

/// Saturates at `Duration::MAX`.
fn nanos(n: u128) -> Duration {
    match u64::try_from(n / 1_000_000_000) {
        Ok(secs) => Duration::new(secs, (n % 1_000_000_000) as u32),
        Err(_) => Duration::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn default_window_is_270_to_330_seconds() {
        let scheduler = JitterScheduler::default();
        assert_eq!(
            scheduler.bounds(),
            (Duration::from_secs(270), Duration::from_secs(330))
        );

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let delay = scheduler.next_delay_with(&mut rng);
            assert!(delay >= Duration::from_secs(270), "{:?}", delay);
            assert!(delay <= Duration::from_secs(330), "{:?}", delay);
        }
    }

    #[test]
    fn delays_vary() {
        let scheduler = JitterScheduler::default();
        let mut rng = StdRng::seed_from_u64(42);
        let first = scheduler.next_delay_with(&mut rng);
        assert!((0..20).any(|_| scheduler.next_delay_with(&mut rng) != first));
    }

    #[test]
    fn zero_jitter_returns_base() {
        let scheduler = JitterScheduler::new(Duration::from_secs(60), 0);
        assert_eq!(scheduler.base(), Duration::from_secs(60));
        assert_eq!(scheduler.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn huge_intervals_saturate() {
        let scheduler = JitterScheduler::new(Duration::from_secs(u64::MAX), 10);
        let (low, high) = scheduler.bounds();
        assert_eq!(high, Duration::MAX);
        assert!(low < high);
        assert!(low > Duration::from_secs(u64::MAX / 2));

        let mut rng = StdRng::seed_from_u64(3);
        let delay = scheduler.next_delay_with(&mut rng);
        assert!(delay >= low);
    }

    #[test]
    fn percent_is_clamped() {
        let scheduler = JitterScheduler::new(Duration::from_secs(10), 250);
        assert_eq!(scheduler.max_jitter_percent(), 100);
        assert_eq!(scheduler.bounds(), (Duration::ZERO, Duration::from_secs(20)));
        let delay = scheduler.next_delay();
        assert!(delay <= Duration::from_secs(20));
    }
}
