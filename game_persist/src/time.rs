use std::time::{Duration, Instant};

/// A fixed interval driven by the tick clock.
#[derive(Clone, Debug)]
pub struct Interval {
    /// Start of the current period. `None` until the first tick.
    last_update: Option<Instant>,
    timestep: Duration,
}

impl Interval {
    pub fn new(timestep: Duration) -> Self {
        Self {
            last_update: None,
            timestep,
        }
    }

    #[inline]
    pub fn timestep(&self) -> Duration {
        self.timestep
    }

    /// Returns `true` once per elapsed `timestep`.
    ///
    /// The first call only starts the interval. Missed periods are skipped instead of
    /// being reported in a burst.
    pub fn is_ready(&mut self, now: Instant) -> bool {
        let Some(last_update) = self.last_update else {
            self.last_update = Some(now);
            return false;
        };

        let elapsed = now.saturating_duration_since(last_update);
        if elapsed < self.timestep {
            return false;
        }

        let missed = elapsed.as_nanos() / self.timestep.as_nanos().max(1);
        if missed > 1 {
            self.last_update = Some(now);
        } else {
            self.last_update = Some(last_update + self.timestep);
        }

        true
    }

    pub fn reset(&mut self) {
        self.last_update = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::Interval;

    #[test]
    fn interval_is_ready() {
        let start = Instant::now();
        let mut interval = Interval::new(Duration::from_secs(5));

        assert!(!interval.is_ready(start));
        assert!(!interval.is_ready(start + Duration::from_millis(4999)));
        assert!(interval.is_ready(start + Duration::from_secs(5)));
        assert!(!interval.is_ready(start + Duration::from_secs(6)));
        assert!(interval.is_ready(start + Duration::from_secs(10)));
    }

    #[test]
    fn interval_skips_missed() {
        let start = Instant::now();
        let mut interval = Interval::new(Duration::from_secs(5));

        assert!(!interval.is_ready(start));
        assert!(interval.is_ready(start + Duration::from_secs(23)));
        assert!(!interval.is_ready(start + Duration::from_secs(24)));
        assert!(interval.is_ready(start + Duration::from_secs(28)));
    }
}
