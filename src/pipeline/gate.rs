//! Elapsed-time gate separating the ingest cadence from the estimation cadence

use crate::error::{PivError, Result};

/// Fires at most once per `interval` seconds of caller-supplied time.
///
/// Missed intervals are skipped, never queued.
#[derive(Debug, Clone)]
pub struct RateGate {
    interval: f64,
    last_fired: Option<f64>,
}

impl RateGate {
    pub fn new(interval: f64) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    /// Gate with `interval = 1 / hz`
    pub fn from_hz(hz: f64) -> Result<Self> {
        if !(hz.is_finite() && hz > 0.0) {
            return Err(PivError::InvalidConfiguration(format!(
                "gate rate must be positive, got {hz}"
            )));
        }
        Ok(Self::new(1.0 / hz))
    }

    pub fn should_fire(&mut self, now: f64) -> bool {
        let due = match self.last_fired {
            None => true,
            Some(last) => now - last >= self.interval,
        };
        if due {
            self.last_fired = Some(now);
        }
        due
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    pub fn last_fired(&self) -> Option<f64> {
        self.last_fired
    }

    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_call_fires() {
        let mut gate = RateGate::new(0.1);
        assert!(gate.should_fire(123.0));
        assert_eq!(gate.last_fired(), Some(123.0));
    }

    #[test]
    fn test_never_fires_twice_within_interval() {
        let mut gate = RateGate::new(0.1);
        let mut fired = Vec::new();
        // 240 Hz ticks for one second
        for i in 0..240 {
            let now = i as f64 / 240.0;
            if gate.should_fire(now) {
                fired.push(now);
            }
        }
        for pair in fired.windows(2) {
            assert!(pair[1] - pair[0] >= 0.1);
        }
        assert!(fired.len() >= 9 && fired.len() <= 10);
    }

    #[test]
    fn test_spacing_at_or_above_interval_always_fires() {
        let mut gate = RateGate::new(0.5);
        for i in 0..20 {
            assert!(gate.should_fire(i as f64 * 0.5));
        }
        let mut gate = RateGate::new(0.5);
        for i in 0..20 {
            assert!(gate.should_fire(i as f64 * 0.75));
        }
    }

    #[test]
    fn test_no_catch_up_after_stall() {
        let mut gate = RateGate::new(0.1);
        assert!(gate.should_fire(0.0));
        assert!(gate.should_fire(5.0));
        assert!(!gate.should_fire(5.05));
    }

    #[test]
    fn test_reset_and_from_hz() {
        let mut gate = RateGate::from_hz(10.0).unwrap();
        assert!((gate.interval() - 0.1).abs() < 1e-12);
        assert!(gate.should_fire(1.0));
        gate.reset();
        assert!(gate.should_fire(1.01));
        assert!(RateGate::from_hz(0.0).is_err());
        assert!(RateGate::from_hz(f64::NAN).is_err());
    }
}
