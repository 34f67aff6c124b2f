pub mod gate;
pub mod pairing;
pub mod ringbuf;
pub mod session;
pub mod worker;

pub use gate::RateGate;
pub use pairing::FramePair;
pub use ringbuf::{FrameRingBuffer, RingStats, Snapshot, TimedFrame};
pub use session::{IngestOutcome, PivSession};
pub use worker::{DispatchOutcome, EstimationDispatcher, EstimationWorker, FlowEstimate};
