//! Frame sources feeding a capture session

use color_eyre::Result;
#[cfg(not(feature = "v4l2-capture"))]
use color_eyre::eyre::eyre;

use crate::capture::frame::CapturedFrame;
use crate::capture::replay::ReplaySource;
use crate::capture::synthetic::SyntheticSource;
#[cfg(feature = "v4l2-capture")]
use crate::capture::v4l2::{self, V4l2Capture};
use crate::{CaptureConfig, SourceKind};

pub enum FrameSource {
    Synthetic(SyntheticSource),
    Replay(ReplaySource),
    #[cfg(feature = "v4l2-capture")]
    V4l2(Box<V4l2Capture>),
}

impl FrameSource {
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        match config.source {
            SourceKind::Synthetic => Ok(Self::Synthetic(SyntheticSource::new(
                config.width as usize,
                config.height as usize,
                f64::from(config.fps),
                config.synthetic,
                config.frame_limit,
                config.realtime,
            ))),
            SourceKind::Replay => Ok(Self::Replay(ReplaySource::open(
                &config.replay_dir,
                config.realtime,
            )?)),
            #[cfg(feature = "v4l2-capture")]
            SourceKind::V4l2 => {
                let mut config = config.clone();
                if config.device.is_empty() {
                    config.device = v4l2::auto_detect_device(config.format)?;
                }
                let mut capture = V4l2Capture::new(config)?;
                capture.start_stream()?;
                Ok(Self::V4l2(Box::new(capture)))
            }
            #[cfg(not(feature = "v4l2-capture"))]
            SourceKind::V4l2 => Err(eyre!(
                "V4L2 capture requested but the crate was built without the v4l2-capture feature"
            )),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Synthetic(source) => source.describe(),
            Self::Replay(source) => source.describe(),
            #[cfg(feature = "v4l2-capture")]
            Self::V4l2(capture) => capture.describe(),
        }
    }

    /// Next frame, or `None` once a finite source is exhausted
    pub async fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        match self {
            Self::Synthetic(source) => Ok(source.next_frame().await),
            Self::Replay(source) => Ok(source.next_frame().await),
            #[cfg(feature = "v4l2-capture")]
            Self::V4l2(capture) => capture.capture_frame().await.map(Some),
        }
    }
}
