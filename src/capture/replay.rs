//! Replays a raw dump written by a previous session

use std::path::Path;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};

use crate::capture::frame::CapturedFrame;
use crate::export::read_raw_dump;
use crate::pipeline::TimedFrame;

pub struct ReplaySource {
    frames: std::vec::IntoIter<TimedFrame>,
    total: usize,
    sequence: u64,
    /// Sleep between frames according to the recorded timestamps
    realtime: bool,
    last_timestamp: Option<f64>,
}

impl ReplaySource {
    pub fn open(dir: &Path, realtime: bool) -> Result<Self> {
        let snapshot = read_raw_dump(dir)?;
        info!("Loaded {} recorded frames from {}", snapshot.len(), dir.display());
        let total = snapshot.len();
        Ok(Self {
            frames: snapshot.into_entries().into_iter(),
            total,
            sequence: 0,
            realtime,
            last_timestamp: None,
        })
    }

    pub fn describe(&self) -> String {
        format!("replay of {} frames", self.total)
    }

    pub async fn next_frame(&mut self) -> Option<CapturedFrame> {
        let TimedFrame { frame, timestamp } = self.frames.next()?;

        if self.realtime {
            if let Some(last) = self.last_timestamp {
                let gap = timestamp - last;
                if gap > 0.0 {
                    match Duration::try_from_secs_f64(gap) {
                        Ok(gap) => tokio::time::sleep(gap).await,
                        Err(_) => warn!(
                            "Replay gap of {} s before t={:.6} is too long, skipping",
                            gap, timestamp
                        ),
                    }
                }
            }
        } else {
            tokio::task::yield_now().await;
        }
        self.last_timestamp = Some(timestamp);

        let captured = CapturedFrame {
            frame,
            timestamp,
            sequence: self.sequence,
        };
        self.sequence += 1;
        Some(captured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Frame;
    use crate::export::write_raw_dump;
    use crate::pipeline::FrameRingBuffer;

    #[tokio::test]
    async fn test_replays_recorded_order() {
        let dir = std::env::temp_dir().join(format!("pivot-replay-{}", std::process::id()));
        let buffer = FrameRingBuffer::new(4).unwrap();
        for i in 0..4u8 {
            buffer.push(&Frame::filled(3, 3, i), f64::from(i) * 0.001).unwrap();
        }
        write_raw_dump(&buffer.snapshot().unwrap(), &dir).unwrap();

        let mut source = ReplaySource::open(&dir, true).unwrap();
        let mut seen = Vec::new();
        while let Some(captured) = source.next_frame().await {
            assert_eq!(captured.frame.get(1, 1), captured.sequence as u8);
            seen.push(captured.timestamp);
        }
        assert_eq!(seen, vec![0.0, 0.001, 0.002, 0.003]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_unrepresentable_gap_is_skipped() {
        let dir = std::env::temp_dir().join(format!("pivot-replay-gap-{}", std::process::id()));
        let buffer = FrameRingBuffer::new(2).unwrap();
        buffer.push(&Frame::filled(2, 2, 0), 0.0).unwrap();
        buffer.push(&Frame::filled(2, 2, 1), 1e300).unwrap();
        write_raw_dump(&buffer.snapshot().unwrap(), &dir).unwrap();

        let mut source = ReplaySource::open(&dir, true).unwrap();
        assert!(source.next_frame().await.is_some());
        let last = source.next_frame().await.unwrap();
        assert_eq!(last.timestamp, 1e300);
        assert!(source.next_frame().await.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
