use std::time::{Duration, Instant};

/// Monotonic seconds since the clock was created, used to stamp live frames
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    pub fn now_secs(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Period of a rate in Hz; `None` for non-positive rates
pub fn period(hz: f64) -> Option<Duration> {
    (hz.is_finite() && hz > 0.0).then(|| Duration::from_secs_f64(1.0 / hz))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = MonotonicClock::new();
        let a = clock.now_secs();
        let b = clock.now_secs();
        assert!(a >= 0.0);
        assert!(b >= a);
    }

    #[test]
    fn test_period() {
        assert_eq!(period(4.0), Some(Duration::from_millis(250)));
        assert_eq!(period(0.0), None);
        assert_eq!(period(-1.0), None);
    }
}
