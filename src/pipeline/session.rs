//! One capture session: ring buffer, estimation cadence and dispatch

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::capture::Frame;
use crate::error::Result;
use crate::pipeline::gate::RateGate;
use crate::pipeline::ringbuf::{FrameRingBuffer, Snapshot};
use crate::pipeline::worker::{DispatchOutcome, EstimationDispatcher};
use crate::stats::{FrameStats, LuminanceHistory};
use crate::PipelineConfig;

/// What happened to a frame handed to [`PivSession::ingest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Buffered; the gate did not fire
    Stored,
    /// Buffered and a frame pair was sent for estimation
    Dispatched,
    /// Gate fired while the previous estimation was still running
    SkippedBusy,
    /// Gate fired with fewer than two frames buffered
    SkippedNoPair,
    /// Gate fired but the worker is gone
    WorkerClosed,
}

/// Owns the state of one capture session.
///
/// Every frame is buffered at full rate; at most once per gate interval the
/// newest frame and the frame closest to `target_dt` before it are dispatched.
pub struct PivSession {
    buffer: Arc<FrameRingBuffer>,
    gate: RateGate,
    target_dt: f64,
    history: LuminanceHistory,
    dispatcher: EstimationDispatcher,
}

impl PivSession {
    pub fn new(config: &PipelineConfig, dispatcher: EstimationDispatcher) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buffer: Arc::new(FrameRingBuffer::new(config.ring_buffer_size)?),
            gate: RateGate::from_hz(config.viz_hz)?,
            target_dt: config.target_dt_sec,
            history: LuminanceHistory::new(config.history_size)?,
            dispatcher,
        })
    }

    /// Shared handle for readers such as the exporter
    pub fn buffer(&self) -> &Arc<FrameRingBuffer> {
        &self.buffer
    }

    pub fn history(&self) -> &LuminanceHistory {
        &self.history
    }

    pub fn target_dt(&self) -> f64 {
        self.target_dt
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.buffer.snapshot()
    }

    /// Buffer one frame and run the estimation gate.
    ///
    /// A frame rejected by the buffer (shape mismatch) leaves the session
    /// untouched and is reported to the caller.
    #[instrument(level = "trace", skip(self, frame))]
    pub fn ingest(&mut self, frame: &Frame, timestamp: f64) -> Result<IngestOutcome> {
        self.buffer.push(frame, timestamp)?;
        self.history.record(timestamp, FrameStats::from_frame(frame));

        if !self.gate.should_fire(timestamp) {
            return Ok(IngestOutcome::Stored);
        }

        if self.dispatcher.is_busy() {
            debug!("Estimation still running at t={:.6}, skipping cycle", timestamp);
            metrics::counter!("piv_estimations_skipped_total", "reason" => "busy").increment(1);
            return Ok(IngestOutcome::SkippedBusy);
        }

        let Some(pair) = self.buffer.get_frame_pair(self.target_dt) else {
            metrics::counter!("piv_estimations_skipped_total", "reason" => "no_pair").increment(1);
            return Ok(IngestOutcome::SkippedNoPair);
        };

        let dt = pair.dt();
        let outcome = match self.dispatcher.try_dispatch(pair) {
            DispatchOutcome::Dispatched => {
                metrics::histogram!("piv_pair_dt_ms").record(dt * 1000.0);
                IngestOutcome::Dispatched
            }
            DispatchOutcome::Busy => {
                metrics::counter!("piv_estimations_skipped_total", "reason" => "busy")
                    .increment(1);
                IngestOutcome::SkippedBusy
            }
            DispatchOutcome::Closed => {
                warn!("Estimation worker closed, frame pair discarded");
                IngestOutcome::WorkerClosed
            }
        };
        Ok(outcome)
    }
}
