//! Per-frame luminance statistics and a bounded history of recent readings

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use serde::{Deserialize, Serialize};

use crate::capture::Frame;
use crate::error::{PivError, Result};

/// Mean intensity and population variance of a frame or region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub mean: f64,
    pub variance: f64,
}

impl FrameStats {
    pub fn from_frame(frame: &Frame) -> Self {
        Self::accumulate(frame.rows())
    }

    /// Statistics of `width × height` pixels at `(x, y)`; `None` if the
    /// region is empty or leaves the frame.
    pub fn of_region(
        frame: &Frame,
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    ) -> Option<Self> {
        if width == 0 || height == 0 || x + width > frame.width() || y + height > frame.height() {
            return None;
        }
        Some(Self::accumulate(
            (y..y + height).map(|row| &frame.row(row)[x..x + width]),
        ))
    }

    /// Window of up to `size` pixels starting at the frame centre,
    /// clipped at the right and bottom edges.
    pub fn centre_window(frame: &Frame, size: usize) -> Option<Self> {
        let (x, y) = (frame.width() / 2, frame.height() / 2);
        let width = size.min(frame.width() - x);
        let height = size.min(frame.height() - y);
        Self::of_region(frame, x, y, width, height)
    }

    fn accumulate<'a>(rows: impl Iterator<Item = &'a [u8]>) -> Self {
        let (mut n, mut sum, mut sq) = (0u64, 0u64, 0u64);
        for row in rows {
            n += row.len() as u64;
            for &p in row {
                let p = u64::from(p);
                sum += p;
                sq += p * p;
            }
        }
        let n = n.max(1) as f64;
        let mean = sum as f64 / n;
        let variance = (sq as f64 / n - mean * mean).max(0.0);
        Self { mean, variance }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LuminanceReading {
    pub timestamp: f64,
    pub stats: FrameStats,
}

/// Aggregate over the readings currently held by a history
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LuminanceSummary {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Most recent luminance readings; older ones are overwritten
pub struct LuminanceHistory {
    readings: HeapRb<LuminanceReading>,
    latest: Option<LuminanceReading>,
    total: u64,
}

impl LuminanceHistory {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PivError::InvalidConfiguration(
                "history capacity must be positive".into(),
            ));
        }
        Ok(Self {
            readings: HeapRb::new(capacity),
            latest: None,
            total: 0,
        })
    }

    pub fn record(&mut self, timestamp: f64, stats: FrameStats) {
        let reading = LuminanceReading { timestamp, stats };
        self.readings.push_overwrite(reading);
        self.latest = Some(reading);
        self.total += 1;
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &LuminanceReading> {
        self.readings.iter()
    }

    pub fn len(&self) -> usize {
        self.readings.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.readings.capacity().get()
    }

    pub fn latest(&self) -> Option<LuminanceReading> {
        self.latest
    }

    /// Readings ever recorded, including overwritten ones
    pub fn total_recorded(&self) -> u64 {
        self.total
    }

    pub fn summary(&self) -> Option<LuminanceSummary> {
        let mut count = 0usize;
        let (mut sum, mut min, mut max) = (0.0, f64::INFINITY, f64::NEG_INFINITY);
        for reading in self.iter() {
            let mean = reading.stats.mean;
            count += 1;
            sum += mean;
            min = min.min(mean);
            max = max.max(mean);
        }
        (count > 0).then(|| LuminanceSummary {
            count,
            mean: sum / count as f64,
            min,
            max,
        })
    }
}
