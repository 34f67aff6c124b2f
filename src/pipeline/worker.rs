//! Background estimation worker fed by the ingest path

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::flow::{BlockMatcher, VectorField};
use crate::pipeline::pairing::FramePair;

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Work item handed from the ingest path to the worker
pub struct EstimationJob {
    pub pair: FramePair,
    pub dispatched_at: Instant,
}

/// Result of one estimation cycle
#[derive(Debug, Clone)]
pub struct FlowEstimate {
    pub sequence: u64,
    pub field: VectorField,
    pub t_first: f64,
    pub t_second: f64,
    pub dt: f64,
    /// Time spent in the block matcher
    pub compute_time: Duration,
    /// Dispatch to publication
    pub latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    /// An estimation is already in flight
    Busy,
    /// The worker has stopped
    Closed,
}

/// Producer-side handle; cheap to clone.
///
/// Holds the in-flight flag shared with the worker, which guarantees that
/// at most one estimation is queued or running at any time.
#[derive(Clone)]
pub struct EstimationDispatcher {
    jobs: Sender<EstimationJob>,
    in_flight: Arc<AtomicBool>,
}

impl EstimationDispatcher {
    pub(crate) fn channel() -> (Self, Receiver<EstimationJob>, Arc<AtomicBool>) {
        let (jobs, rx) = flume::bounded(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        (
            Self {
                jobs,
                in_flight: Arc::clone(&in_flight),
            },
            rx,
            in_flight,
        )
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn try_dispatch(&self, pair: FramePair) -> DispatchOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return DispatchOutcome::Busy;
        }

        let job = EstimationJob {
            pair,
            dispatched_at: Instant::now(),
        };
        match self.jobs.try_send(job) {
            Ok(()) => DispatchOutcome::Dispatched,
            Err(TrySendError::Full(_)) => {
                self.in_flight.store(false, Ordering::Release);
                DispatchOutcome::Busy
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.store(false, Ordering::Release);
                DispatchOutcome::Closed
            }
        }
    }
}

/// Dedicated thread running the block matcher off the ingest path
pub struct EstimationWorker {
    handle: Option<JoinHandle<()>>,
    dispatcher: EstimationDispatcher,
    latest: Arc<ArcSwapOption<FlowEstimate>>,
    completed: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
}

impl EstimationWorker {
    /// Start the worker. Finished estimates are published to `latest()` and,
    /// if given, offered to `results` without blocking (dropped when full).
    pub fn spawn(
        matcher: BlockMatcher,
        results: Option<Sender<Arc<FlowEstimate>>>,
    ) -> Result<Self> {
        let (dispatcher, jobs, in_flight) = EstimationDispatcher::channel();
        let latest = Arc::new(ArcSwapOption::empty());
        let completed = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let context = WorkerContext {
            matcher,
            jobs,
            results,
            in_flight,
            latest: Arc::clone(&latest),
            completed: Arc::clone(&completed),
            stop: Arc::clone(&stop),
        };
        let handle = thread::Builder::new()
            .name("piv-estimator".into())
            .spawn(move || context.run())?;

        Ok(Self {
            handle: Some(handle),
            dispatcher,
            latest,
            completed,
            stop,
        })
    }

    pub fn dispatcher(&self) -> EstimationDispatcher {
        self.dispatcher.clone()
    }

    /// Most recently published estimate
    pub fn latest(&self) -> Option<Arc<FlowEstimate>> {
        self.latest.load_full()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Finish any queued job, then stop and join the thread
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Estimation worker panicked");
            }
        }
    }
}

impl Drop for EstimationWorker {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

struct WorkerContext {
    matcher: BlockMatcher,
    jobs: Receiver<EstimationJob>,
    results: Option<Sender<Arc<FlowEstimate>>>,
    in_flight: Arc<AtomicBool>,
    latest: Arc<ArcSwapOption<FlowEstimate>>,
    completed: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
}

impl WorkerContext {
    fn run(self) {
        info!(
            "Estimation worker started: window {} px, margin {} px",
            self.matcher.config().window_size,
            self.matcher.config().search_margin
        );

        loop {
            match self.jobs.recv_timeout(SHUTDOWN_POLL) {
                Ok(job) => self.process(job),
                Err(RecvTimeoutError::Timeout) => {
                    if self.stop.load(Ordering::Acquire) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!(
            "Estimation worker stopped after {} estimates",
            self.completed.load(Ordering::Relaxed)
        );
    }

    fn process(&self, job: EstimationJob) {
        let EstimationJob {
            pair,
            dispatched_at,
        } = job;

        let start = Instant::now();
        let result = self.matcher.estimate(&pair.first.frame, &pair.second.frame);
        let compute_time = start.elapsed();

        match result {
            Ok(field) => {
                let sequence = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
                let estimate = Arc::new(FlowEstimate {
                    sequence,
                    field,
                    t_first: pair.first.timestamp,
                    t_second: pair.second.timestamp,
                    dt: pair.dt(),
                    compute_time,
                    latency: dispatched_at.elapsed(),
                });
                self.latest.store(Some(Arc::clone(&estimate)));

                metrics::counter!("piv_estimations_total").increment(1);
                metrics::histogram!("piv_estimation_time_us")
                    .record(compute_time.as_micros() as f64);

                if let Some(results) = &self.results {
                    if let Err(TrySendError::Full(_)) = results.try_send(estimate) {
                        debug!("Result queue full, dropping estimate {}", sequence);
                        metrics::counter!("piv_results_dropped_total").increment(1);
                    }
                }
            }
            Err(e) => {
                error!("Estimation failed: {}", e);
                metrics::counter!("piv_estimation_errors_total").increment(1);
            }
        }

        self.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::speckle;
    use crate::capture::Frame;
    use crate::pipeline::ringbuf::TimedFrame;
    use crate::MatcherConfig;

    fn pair(shift: i64) -> FramePair {
        let a = Frame::from_fn(64, 64, |x, y| speckle(x as i64, y as i64, 1));
        let b = Frame::from_fn(64, 64, |x, y| speckle(x as i64 - shift, y as i64, 1));
        FramePair {
            first: TimedFrame {
                frame: a,
                timestamp: 1.0,
            },
            second: TimedFrame {
                frame: b,
                timestamp: 1.5,
            },
        }
    }

    fn matcher() -> BlockMatcher {
        BlockMatcher::new(MatcherConfig {
            window_size: 32,
            search_margin: 4,
            ..MatcherConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_dispatch_is_exclusive_until_consumed() {
        let (dispatcher, jobs, in_flight) = EstimationDispatcher::channel();

        assert_eq!(dispatcher.try_dispatch(pair(0)), DispatchOutcome::Dispatched);
        assert!(dispatcher.is_busy());
        assert_eq!(dispatcher.try_dispatch(pair(0)), DispatchOutcome::Busy);

        let job = jobs.try_recv().unwrap();
        assert_eq!(job.pair.second.timestamp, 1.5);
        // still busy until the worker clears the flag
        assert_eq!(dispatcher.try_dispatch(pair(0)), DispatchOutcome::Busy);

        in_flight.store(false, Ordering::Release);
        assert_eq!(dispatcher.try_dispatch(pair(0)), DispatchOutcome::Dispatched);
    }

    #[test]
    fn test_dispatch_to_closed_worker() {
        let (dispatcher, jobs, _) = EstimationDispatcher::channel();
        drop(jobs);
        assert_eq!(dispatcher.try_dispatch(pair(0)), DispatchOutcome::Closed);
        assert!(!dispatcher.is_busy());
    }

    #[test]
    fn test_worker_publishes_estimate() {
        let (tx, rx) = flume::bounded(1);
        let worker = EstimationWorker::spawn(matcher(), Some(tx)).unwrap();

        assert_eq!(
            worker.dispatcher().try_dispatch(pair(3)),
            DispatchOutcome::Dispatched
        );
        let estimate = rx.recv_timeout(Duration::from_secs(10)).unwrap();

        assert_eq!(estimate.sequence, 1);
        assert_eq!(estimate.dt, 0.5);
        assert_eq!(estimate.field.len(), 4);
        // right-hand cells cannot reach the shifted position inside the frame
        assert!(estimate
            .field
            .iter()
            .all(|v| (v.dx == 3 && v.dy == 0) || v.center_x > 32));

        // flag is cleared after publication
        let deadline = Instant::now() + Duration::from_secs(10);
        while worker.dispatcher().is_busy() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!worker.dispatcher().is_busy());
        assert_eq!(worker.latest().unwrap().sequence, 1);
        assert_eq!(worker.completed(), 1);

        worker.shutdown();
    }
}
