//! Fixed-capacity timestamped ring buffer for the frame pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use tracing::debug;

use crate::capture::Frame;
use crate::error::{PivError, Result};
use crate::pipeline::pairing::{self, FramePair};

/// A frame together with the time it was captured
#[derive(Debug, Clone, PartialEq)]
pub struct TimedFrame {
    pub frame: Frame,
    pub timestamp: f64,
}

/// Chronologically ordered copy of the buffer contents (oldest first).
///
/// Frames are slices of one allocation that is not shared with the live
/// buffer, so later pushes never affect an existing snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: Vec<TimedFrame>,
}

impl Snapshot {
    pub(crate) fn from_entries(entries: Vec<TimedFrame>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TimedFrame] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimedFrame> {
        self.entries.iter()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.timestamp).collect()
    }

    pub fn latest(&self) -> Option<&TimedFrame> {
        self.entries.last()
    }

    /// `(height, width)` of the stored frames
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.entries.first().map(|e| e.frame.shape())
    }

    pub fn frame_pair(&self, target_dt: f64) -> Option<FramePair> {
        pairing::select(self, target_dt)
    }

    pub fn into_entries(self) -> Vec<TimedFrame> {
        self.entries
    }
}

/// Counters readable without taking the ring lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub frames_written: u64,
    pub frames_evicted: u64,
    pub snapshots_taken: u64,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_evicted: AtomicU64,
    snapshots_taken: AtomicU64,
}

struct RingState {
    /// `capacity * height * width` bytes, allocated on first push
    storage: Vec<u8>,
    timestamps: Vec<f64>,
    /// `(height, width)`, fixed by the first push
    shape: Option<(usize, usize)>,
    write_idx: usize,
    filled: bool,
}

impl RingState {
    fn len(&self, capacity: usize) -> usize {
        if self.filled {
            capacity
        } else {
            self.write_idx
        }
    }
}

/// Frame ring shared between the capture producer and the estimation consumer.
///
/// `push` and `snapshot` run inside the same critical section, so a snapshot
/// never sees a half-written slot across the wraparound boundary.
pub struct FrameRingBuffer {
    capacity: usize,
    state: Mutex<RingState>,

    /// Statistics
    stats: CachePadded<Stats>,
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PivError::InvalidConfiguration(
                "ring buffer capacity must be positive".into(),
            ));
        }

        Ok(Self {
            capacity,
            state: Mutex::new(RingState {
                storage: Vec::new(),
                timestamps: Vec::new(),
                shape: None,
                write_idx: 0,
                filled: false,
            }),
            stats: CachePadded::new(Stats::default()),
        })
    }

    // Every mutation leaves RingState consistent, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Producer: copy `frame` into the slot at the write cursor
    pub fn push(&self, frame: &Frame, timestamp: f64) -> Result<()> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(PivError::InvalidFrame(format!(
                "empty frame {}x{}",
                frame.width(),
                frame.height()
            )));
        }

        let evicted = {
            let mut state = self.lock();

            let (height, width) = match state.shape {
                Some(shape) if shape != frame.shape() => {
                    return Err(PivError::ShapeMismatch {
                        expected: shape,
                        actual: frame.shape(),
                    });
                }
                Some(shape) => shape,
                None => {
                    let shape = frame.shape();
                    state.storage = vec![0u8; self.capacity * shape.0 * shape.1];
                    state.timestamps = vec![0.0; self.capacity];
                    state.shape = Some(shape);
                    debug!(
                        "Ring buffer allocated: {} slots of {}x{}",
                        self.capacity, shape.1, shape.0
                    );
                    shape
                }
            };

            let idx = state.write_idx;
            let frame_len = height * width;
            let slot = &mut state.storage[idx * frame_len..(idx + 1) * frame_len];
            for (dst, src) in slot.chunks_exact_mut(width).zip(frame.rows()) {
                dst.copy_from_slice(src);
            }
            state.timestamps[idx] = timestamp;

            let evicted = state.filled;
            state.write_idx = (idx + 1) % self.capacity;
            if state.write_idx == 0 {
                state.filled = true;
            }
            evicted
        };

        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("piv_frames_pushed_total").increment(1);
        if evicted {
            self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("piv_frames_evicted_total").increment(1);
        }
        Ok(())
    }

    /// Consumer: chronological copy of the current contents.
    ///
    /// Returns `None` if nothing was ever pushed.
    pub fn snapshot(&self) -> Option<Snapshot> {
        let (blob, timestamps, height, width) = {
            let state = self.lock();
            let (height, width) = state.shape?;
            let len = state.len(self.capacity);
            if len == 0 {
                return None;
            }

            let frame_len = height * width;
            let mut blob = Vec::with_capacity(len * frame_len);
            let mut timestamps = Vec::with_capacity(len);
            if state.filled {
                let split = state.write_idx;
                blob.extend_from_slice(&state.storage[split * frame_len..]);
                blob.extend_from_slice(&state.storage[..split * frame_len]);
                timestamps.extend_from_slice(&state.timestamps[split..]);
                timestamps.extend_from_slice(&state.timestamps[..split]);
            } else {
                blob.extend_from_slice(&state.storage[..len * frame_len]);
                timestamps.extend_from_slice(&state.timestamps[..len]);
            }
            (blob, timestamps, height, width)
        };

        self.stats.snapshots_taken.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("piv_buffer_len").set(timestamps.len() as f64);

        let blob = Bytes::from(blob);
        let frame_len = height * width;
        let entries = timestamps
            .into_iter()
            .enumerate()
            .map(|(i, timestamp)| TimedFrame {
                frame: Frame::from_packed(
                    blob.slice(i * frame_len..(i + 1) * frame_len),
                    width,
                    height,
                ),
                timestamp,
            })
            .collect();
        Some(Snapshot::from_entries(entries))
    }

    /// Newest frame paired with the historical frame whose age best matches `target_dt`.
    ///
    /// Only the timestamps and the two selected slots are copied. Returns
    /// `None` while fewer than two frames are buffered.
    pub fn get_frame_pair(&self, target_dt: f64) -> Option<FramePair> {
        let state = self.lock();
        let (height, width) = state.shape?;
        let len = state.len(self.capacity);
        // chronological position -> physical slot
        let start = if state.filled { state.write_idx } else { 0 };
        let slot = |i: usize| (start + i) % self.capacity;

        let timestamps: Vec<f64> = (0..len).map(|i| state.timestamps[slot(i)]).collect();
        let first = pairing::select_index(&timestamps, target_dt)?;
        let second = len - 1;

        let frame_len = height * width;
        let copy = |i: usize| TimedFrame {
            frame: Frame::from_packed(
                Bytes::copy_from_slice(
                    &state.storage[slot(i) * frame_len..(slot(i) + 1) * frame_len],
                ),
                width,
                height,
            ),
            timestamp: timestamps[i],
        };
        Some(FramePair {
            first: copy(first),
            second: copy(second),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `(height, width)` once the first frame has been pushed
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.lock().shape
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            frames_written: self.stats.frames_written.load(Ordering::Relaxed),
            frames_evicted: self.stats.frames_evicted.load(Ordering::Relaxed),
            snapshots_taken: self.stats.snapshots_taken.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn frame(value: u8) -> Frame {
        Frame::filled(4, 3, value)
    }

    fn push_n(buffer: &FrameRingBuffer, n: usize) {
        for i in 0..n {
            buffer.push(&frame(i as u8), i as f64).unwrap();
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            FrameRingBuffer::new(0),
            Err(PivError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_empty_buffer_has_no_snapshot() {
        let buffer = FrameRingBuffer::new(4).unwrap();
        assert!(buffer.snapshot().is_none());
        assert!(buffer.get_frame_pair(0.1).is_none());
        assert!(buffer.is_empty());
        assert_eq!(buffer.shape(), None);
    }

    #[test]
    fn test_capacity_invariant() {
        for n in 1..12 {
            let buffer = FrameRingBuffer::new(5).unwrap();
            push_n(&buffer, n);

            let snapshot = buffer.snapshot().unwrap();
            let kept = n.min(5);
            assert_eq!(snapshot.len(), kept);

            let expected: Vec<f64> = ((n - kept)..n).map(|i| i as f64).collect();
            assert_eq!(snapshot.timestamps(), expected);
            for entry in snapshot.iter() {
                assert!(entry.frame.data().iter().all(|&p| p == entry.timestamp as u8));
            }
        }
    }

    #[test]
    fn test_wraparound_drops_oldest() {
        let capacity = 6;
        let buffer = FrameRingBuffer::new(capacity).unwrap();
        push_n(&buffer, capacity + 1);

        let timestamps = buffer.snapshot().unwrap().timestamps();
        assert!(!timestamps.contains(&0.0));
        assert_eq!(timestamps, (1..=capacity).map(|i| i as f64).collect::<Vec<_>>());

        let stats = buffer.stats();
        assert_eq!(stats.frames_written, 7);
        assert_eq!(stats.frames_evicted, 1);
    }

    #[test]
    fn test_shape_mismatch_keeps_buffer_intact() {
        let buffer = FrameRingBuffer::new(3).unwrap();
        buffer.push(&frame(1), 0.0).unwrap();

        let err = buffer.push(&Frame::filled(5, 3, 9), 1.0).unwrap_err();
        match err {
            PivError::ShapeMismatch { expected, actual } => {
                assert_eq!(expected, (3, 4));
                assert_eq!(actual, (3, 5));
            }
            other => panic!("unexpected error: {other}"),
        }

        buffer.push(&frame(2), 2.0).unwrap();
        assert_eq!(buffer.snapshot().unwrap().timestamps(), vec![0.0, 2.0]);
    }

    #[test]
    fn test_strided_frames_are_packed_on_push() {
        let buffer = FrameRingBuffer::new(2).unwrap();
        let strided = Frame::with_stride(vec![1, 2, 0, 3, 4, 0], 2, 2, 3).unwrap();
        buffer.push(&strided, 0.0).unwrap();

        let snapshot = buffer.snapshot().unwrap();
        let stored = &snapshot.entries()[0].frame;
        assert_eq!(stored.stride(), 2);
        assert_eq!(stored.data().as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_snapshot_is_independent_of_later_pushes() {
        let buffer = FrameRingBuffer::new(2).unwrap();
        push_n(&buffer, 2);
        let snapshot = buffer.snapshot().unwrap();

        push_n(&buffer, 4);
        assert_eq!(snapshot.timestamps(), vec![0.0, 1.0]);
        assert!(snapshot.entries()[0].frame.data().iter().all(|&p| p == 0));
    }

    #[test]
    fn test_empty_frame_rejected_without_side_effects() {
        let buffer = FrameRingBuffer::new(4).unwrap();
        assert!(matches!(
            buffer.push(&Frame::filled(0, 4, 7), 0.0),
            Err(PivError::InvalidFrame(_))
        ));
        assert!(matches!(
            buffer.push(&Frame::from_fn(4, 0, |_, _| 1), 0.0),
            Err(PivError::InvalidFrame(_))
        ));
        assert!(buffer.is_empty());
        assert_eq!(buffer.shape(), None);

        buffer.push(&frame(3), 1.0).unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_frame_pair_matches_snapshot_across_wraparound() {
        for n in [2, 5, 7, 13] {
            let buffer = FrameRingBuffer::new(5).unwrap();
            push_n(&buffer, n);

            for target in [0.0, 1.0, 2.5, 10.0] {
                let direct = buffer.get_frame_pair(target).unwrap();
                let via_snapshot = buffer.snapshot().unwrap().frame_pair(target).unwrap();
                assert_eq!(direct.first, via_snapshot.first, "n={n} target={target}");
                assert_eq!(direct.second, via_snapshot.second, "n={n} target={target}");
            }
        }
        let single = FrameRingBuffer::new(5).unwrap();
        push_n(&single, 1);
        assert!(single.get_frame_pair(0.0).is_none());
    }

    #[test]
    fn test_concurrent_push_and_snapshot_never_tear() {
        let buffer = Arc::new(FrameRingBuffer::new(16).unwrap());

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for i in 0..2_000u32 {
                    buffer.push(&frame((i % 251) as u8), i as f64).unwrap();
                }
            })
        };

        for _ in 0..200 {
            if let Some(snapshot) = buffer.snapshot() {
                let timestamps = snapshot.timestamps();
                for pair in timestamps.windows(2) {
                    assert_eq!(pair[1] - pair[0], 1.0);
                }
                for entry in snapshot.iter() {
                    let expected = (entry.timestamp as u32 % 251) as u8;
                    assert!(entry.frame.data().iter().all(|&p| p == expected));
                }
            }
        }

        producer.join().unwrap();
        assert_eq!(buffer.len(), 16);
    }
}
