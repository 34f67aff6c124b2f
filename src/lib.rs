pub mod capture;
pub mod error;
pub mod export;
pub mod flow;
pub mod pipeline;
pub mod stats;
pub mod utils;

use std::path::{Path, PathBuf};

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::Frame;
pub use error::{PivError, Result};
pub use flow::{BlockMatcher, CorrelationMethod, DisplacementVector, VectorField};
pub use pipeline::{FramePair, FrameRingBuffer, PivSession, RateGate, Snapshot, TimedFrame};

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "pivot.toml";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub matcher: MatcherConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Generated moving speckle pattern
    Synthetic,
    /// Raw dump written by a previous session
    Replay,
    /// Live camera (needs the `v4l2-capture` feature)
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Stop after this many frames
    pub frame_limit: Option<u64>,
    /// Pace synthetic/replay sources at their nominal rate
    pub realtime: bool,
    pub replay_dir: PathBuf,
    pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Pattern motion in pixels per frame
    pub velocity_x: i32,
    pub velocity_y: i32,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ring_buffer_size: usize,
    /// Desired separation of the estimated frame pair, seconds
    pub target_dt_sec: f64,
    /// Estimation cadence
    pub viz_hz: f64,
    /// Rolling luminance readings kept per session
    pub history_size: usize,
    /// Finished estimates queued for consumers before dropping
    pub result_queue: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub window_size: usize,
    pub search_margin: usize,
    pub method: CorrelationMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Dump the buffered frames when the session ends
    pub enabled: bool,
    pub out_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            device: "/dev/video0".into(),
            width: 320,
            height: 240,
            fps: 240,
            format: PixelFormat::Yuyv4,
            buffer_count: 4,
            frame_limit: None,
            realtime: true,
            replay_dir: std::env::temp_dir().join("piv_capture"),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            velocity_x: 2,
            velocity_y: 1,
            seed: 0x5EED,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 480, // two seconds at 240 fps
            target_dt_sec: 1.0 / 240.0,
            viz_hz: 10.0,
            history_size: 120,
            result_queue: 4,
        }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            window_size: 64,
            search_margin: 12,
            method: CorrelationMethod::Normalized,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            out_dir: std::env::temp_dir().join("piv_capture"),
        }
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(PivError::InvalidConfiguration(
                "window_size must be positive".into(),
            ));
        }
        if self.search_margin == 0 {
            return Err(PivError::InvalidConfiguration(
                "search_margin must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ring_buffer_size == 0 {
            return Err(PivError::InvalidConfiguration(
                "ring_buffer_size must be positive".into(),
            ));
        }
        if !(self.target_dt_sec.is_finite() && self.target_dt_sec >= 0.0) {
            return Err(PivError::InvalidConfiguration(format!(
                "target_dt_sec must be a non-negative number, got {}",
                self.target_dt_sec
            )));
        }
        if !(self.viz_hz.is_finite() && self.viz_hz > 0.0) {
            return Err(PivError::InvalidConfiguration(format!(
                "viz_hz must be positive, got {}",
                self.viz_hz
            )));
        }
        if self.history_size == 0 || self.result_queue == 0 {
            return Err(PivError::InvalidConfiguration(
                "history_size and result_queue must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Layer an optional TOML file and `PIVOT__SECTION__KEY` environment
    /// variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("PIVOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 || self.capture.fps == 0 {
            return Err(PivError::InvalidConfiguration(format!(
                "capture geometry {}x{} @ {} fps is invalid",
                self.capture.width, self.capture.height, self.capture.fps
            )));
        }
        self.pipeline.validate()?;
        self.matcher.validate()
    }
}
