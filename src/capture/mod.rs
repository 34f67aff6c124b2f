pub mod decoder;
pub mod frame;
pub mod replay;
pub mod source;
pub mod synthetic;
#[cfg(feature = "v4l2-capture")]
pub mod v4l2;

pub use frame::{CapturedFrame, Frame, PixelFormat};
pub use source::FrameSource;
#[cfg(feature = "v4l2-capture")]
pub use v4l2::V4l2Capture;
