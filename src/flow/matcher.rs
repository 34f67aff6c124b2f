//! Grid block matching between two frames

use tracing::{instrument, trace};

use crate::capture::Frame;
use crate::error::{PivError, Result};
use crate::flow::correlation::{CorrelationMethod, IntegralImage, Template};
use crate::flow::field::{DisplacementVector, VectorField};
use crate::MatcherConfig;

/// Integer-pixel block matcher.
///
/// `frame_a` is cut into non-overlapping `window_size` squares starting at
/// the origin (a trailing partial row or column is dropped). Each square is
/// searched for in `frame_b` within `search_margin` pixels on every side of
/// its own footprint, clamped to the image.
#[derive(Debug, Clone)]
pub struct BlockMatcher {
    config: MatcherConfig,
}

impl BlockMatcher {
    pub fn new(config: MatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Displacement field from `frame_a` to `frame_b`, in row-major grid order
    #[instrument(level = "debug", skip_all, fields(width = frame_a.width(), height = frame_a.height()))]
    pub fn estimate(&self, frame_a: &Frame, frame_b: &Frame) -> Result<VectorField> {
        if frame_a.shape() != frame_b.shape() {
            return Err(PivError::ShapeMismatch {
                expected: frame_a.shape(),
                actual: frame_b.shape(),
            });
        }

        let ws = self.config.window_size;
        let (height, width) = frame_a.shape();
        let sums = IntegralImage::new(frame_b);

        let mut vectors = Vec::with_capacity((height / ws) * (width / ws));
        for y in (0..height.saturating_sub(ws) + 1).step_by(ws) {
            if y + ws > height {
                break;
            }
            for x in (0..width.saturating_sub(ws) + 1).step_by(ws) {
                if x + ws > width {
                    break;
                }
                match self.match_cell(frame_a, frame_b, &sums, x, y) {
                    Some(vector) => vectors.push(vector),
                    None => trace!("Skipping cell ({}, {}): degenerate search region", x, y),
                }
            }
        }

        Ok(VectorField::new(vectors))
    }

    fn match_cell(
        &self,
        frame_a: &Frame,
        frame_b: &Frame,
        sums: &IntegralImage,
        x: usize,
        y: usize,
    ) -> Option<DisplacementVector> {
        let ws = self.config.window_size;
        let margin = self.config.search_margin;
        let (height, width) = frame_b.shape();

        let x0 = x.saturating_sub(margin);
        let y0 = y.saturating_sub(margin);
        let x1 = (x + ws).saturating_add(margin).min(width);
        let y1 = (y + ws).saturating_add(margin).min(height);
        if x1 - x0 < ws || y1 - y0 < ws {
            return None;
        }

        let template = Template::extract(frame_a, x, y, ws);
        let method: CorrelationMethod = self.config.method;

        // Strict comparison keeps the first maximum in row-major order
        let mut best: Option<(f64, usize, usize)> = None;
        for by in y0..=y1 - ws {
            for bx in x0..=x1 - ws {
                let score = method.score(&template, frame_b, sums, bx, by);
                if best.map_or(true, |(s, _, _)| score > s) {
                    best = Some((score, bx, by));
                }
            }
        }

        let (_, bx, by) = best?;
        Some(DisplacementVector {
            center_x: x + ws / 2,
            center_y: y + ws / 2,
            dx: bx as i32 - x as i32,
            dy: by as i32 - y as i32,
        })
    }
}

/// One-shot estimate with the default correlation method
pub fn estimate(
    frame_a: &Frame,
    frame_b: &Frame,
    window_size: usize,
    search_margin: usize,
) -> Result<VectorField> {
    BlockMatcher::new(MatcherConfig {
        window_size,
        search_margin,
        ..MatcherConfig::default()
    })?
    .estimate(frame_a, frame_b)
}
