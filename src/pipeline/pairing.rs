//! Temporal pairing: newest frame plus the historical frame closest to a target age

use crate::pipeline::ringbuf::{Snapshot, TimedFrame};

/// Two buffered frames chosen for one estimation cycle
#[derive(Debug, Clone)]
pub struct FramePair {
    /// Historical frame
    pub first: TimedFrame,
    /// Most recent frame
    pub second: TimedFrame,
}

impl FramePair {
    /// Time separation between the two frames in seconds
    pub fn dt(&self) -> f64 {
        self.second.timestamp - self.first.timestamp
    }
}

/// Index of the entry (excluding the last) whose age relative to the last
/// timestamp is closest to `target_dt`. Ties resolve to the earliest index.
pub fn select_index(timestamps: &[f64], target_dt: f64) -> Option<usize> {
    let (&t_last, history) = timestamps.split_last()?;

    let mut best: Option<(usize, f64)> = None;
    for (i, &t) in history.iter().enumerate() {
        let err = ((t_last - t) - target_dt).abs();
        match best {
            Some((_, best_err)) if err >= best_err => {}
            _ => best = Some((i, err)),
        }
    }
    best.map(|(i, _)| i)
}

/// Pair the newest snapshot entry with the best-aged historical one.
///
/// Returns `None` when the snapshot holds fewer than two frames.
pub fn select(snapshot: &Snapshot, target_dt: f64) -> Option<FramePair> {
    let entries = snapshot.entries();
    let idx = select_index(&snapshot.timestamps(), target_dt)?;
    let second = entries.last()?.clone();

    Some(FramePair {
        first: entries[idx].clone(),
        second,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;

    fn snapshot_of(timestamps: &[f64]) -> Snapshot {
        Snapshot::from_entries(
            timestamps
                .iter()
                .enumerate()
                .map(|(i, &timestamp)| TimedFrame {
                    frame: Frame::filled(2, 2, i as u8),
                    timestamp,
                })
                .collect(),
        )
    }

    #[test]
    fn test_exact_match_selected() {
        assert_eq!(select_index(&[0.0, 0.1, 0.5, 1.0], 0.5), Some(2));

        let pair = select(&snapshot_of(&[0.0, 0.1, 0.5, 1.0]), 0.5).unwrap();
        assert_eq!(pair.first.timestamp, 0.5);
        assert_eq!(pair.second.timestamp, 1.0);
        assert_eq!(pair.first.frame.get(0, 0), 2);
        assert_eq!(pair.second.frame.get(0, 0), 3);
    }

    #[test]
    fn test_tie_prefers_earliest() {
        assert_eq!(select_index(&[0.0, 0.4, 0.6, 1.0], 0.5), Some(1));
    }

    #[test]
    fn test_fewer_than_two_frames() {
        assert_eq!(select_index(&[], 0.1), None);
        assert_eq!(select_index(&[3.0], 0.1), None);
        assert!(select(&snapshot_of(&[3.0]), 0.1).is_none());
    }

    #[test]
    fn test_two_frames_always_pair() {
        let pair = select(&snapshot_of(&[0.0, 0.004]), 10.0).unwrap();
        assert!((pair.dt() - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_target_longer_than_history_picks_oldest() {
        assert_eq!(select_index(&[0.0, 0.1, 0.2, 0.3], 5.0), Some(0));
    }

    #[test]
    fn test_zero_target_picks_newest_history() {
        assert_eq!(select_index(&[0.0, 0.1, 0.2, 0.3], 0.0), Some(2));
    }
}
