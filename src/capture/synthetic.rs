//! Generated particle-like speckle moving at a constant velocity

use std::time::Duration;

use tokio::time::{self, Interval, MissedTickBehavior};

use crate::capture::frame::{CapturedFrame, Frame};
use crate::utils::{self, MonotonicClock};
use crate::SyntheticConfig;

/// Deterministic white-noise intensity for an integer pixel position
#[inline]
pub fn speckle(x: i64, y: i64, seed: u64) -> u8 {
    let mut h = (x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (y as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F)
        ^ seed.wrapping_mul(0x1656_67B1_9E37_79F9);
    h ^= h >> 29;
    h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h ^= h >> 32;
    (h & 0xff) as u8
}

/// Frames of a speckle field translated by `velocity` pixels per frame.
///
/// Offline, timestamps are `index / fps`. In realtime mode frames are paced
/// at `fps` and stamped from a monotonic clock, so they carry real jitter.
pub struct SyntheticSource {
    width: usize,
    height: usize,
    fps: f64,
    config: SyntheticConfig,
    frame_limit: Option<u64>,
    sequence: u64,
    realtime: Option<Realtime>,
}

struct Realtime {
    clock: MonotonicClock,
    ticker: Option<Interval>,
}

impl SyntheticSource {
    pub fn new(
        width: usize,
        height: usize,
        fps: f64,
        config: SyntheticConfig,
        frame_limit: Option<u64>,
        realtime: bool,
    ) -> Self {
        Self {
            width,
            height,
            fps,
            config,
            frame_limit,
            sequence: 0,
            realtime: realtime.then(|| Realtime {
                clock: MonotonicClock::new(),
                ticker: None,
            }),
        }
    }

    /// The `index`-th frame of the sequence
    pub fn frame_at(&self, index: u64) -> Frame {
        let ox = i64::from(self.config.velocity_x) * index as i64;
        let oy = i64::from(self.config.velocity_y) * index as i64;
        let seed = self.config.seed;
        Frame::from_fn(self.width, self.height, |x, y| {
            speckle(x as i64 - ox, y as i64 - oy, seed)
        })
    }

    pub fn describe(&self) -> String {
        format!(
            "synthetic {}x{} @ {} fps, velocity ({}, {}) px/frame",
            self.width, self.height, self.fps, self.config.velocity_x, self.config.velocity_y
        )
    }

    pub async fn next_frame(&mut self) -> Option<CapturedFrame> {
        if self.frame_limit.is_some_and(|limit| self.sequence >= limit) {
            return None;
        }

        let fps = self.fps;
        let timestamp = match self.realtime.as_mut() {
            Some(rt) => {
                let ticker = rt.ticker.get_or_insert_with(|| {
                    let period = utils::period(fps).unwrap_or(Duration::from_millis(1));
                    let mut ticker = time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    ticker
                });
                ticker.tick().await;
                rt.clock.now_secs()
            }
            None => {
                tokio::task::yield_now().await;
                self.sequence as f64 / fps
            }
        };

        let frame = self.frame_at(self.sequence);
        let captured = CapturedFrame {
            frame,
            timestamp,
            sequence: self.sequence,
        };
        self.sequence += 1;
        Some(captured)
    }
}
