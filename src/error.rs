//! Error types for the buffering and estimation core

use thiserror::Error;

/// Errors surfaced by the ring buffer, the block matcher and configuration.
///
/// "No data" and "no pair" are not errors: `snapshot()` and
/// `get_frame_pair()` return `None` for them so callers can skip the cycle.
#[derive(Error, Debug)]
pub enum PivError {
    /// Frame dimensions disagree with the buffer's fixed shape or the paired frame.
    /// Shapes are `(height, width)`.
    #[error("frame shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Non-positive sizes, margins, capacities or rates
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Pixel buffer does not match the declared geometry
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PivError>;
