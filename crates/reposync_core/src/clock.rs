//! Write-stamp clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A strictly increasing millisecond clock.
///
/// Each `tick` returns `max(wall clock, previous + 1)`, so two stamps taken
/// in the same process never tie. Object writes and GC epochs draw from the
/// same clock: an object written after an epoch was taken always carries a
/// larger stamp than the epoch.
#[derive(Debug, Default)]
pub struct HybridClock {
    last: AtomicU64,
}

impl HybridClock {
    /// Creates a clock starting at the current wall time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next stamp.
    pub fn tick(&self) -> u64 {
        let now = wall_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Ensures future stamps are above `stamp`.
    ///
    /// Used after reopening a store whose stamps may be ahead of the local
    /// wall clock.
    pub fn observe(&self, stamp: u64) {
        self.last.fetch_max(stamp, Ordering::AcqRel);
    }

    /// Returns the last stamp handed out.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_strictly_increase() {
        let clock = HybridClock::new();
        let mut prev = clock.tick();
        for _ in 0..10_000 {
            let next = clock.tick();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn observe_moves_clock_forward() {
        let clock = HybridClock::new();
        let far = wall_millis() + 60_000;
        clock.observe(far);
        assert!(clock.tick() > far);
    }

    #[test]
    fn concurrent_ticks_are_unique() {
        let clock = HybridClock::new();
        let mut stamps: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| s.spawn(|| (0..1000).map(|_| clock.tick()).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        let total = stamps.len();
        stamps.sort_unstable();
        stamps.dedup();
        assert_eq!(stamps.len(), total);
    }
}
