//! Normalized cross-correlation scores for window matching

use serde::{Deserialize, Serialize};

use crate::capture::Frame;

/// Similarity measure used to score candidate window positions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    /// `Σ(T·I) / sqrt(ΣT² · ΣI²)`; insensitive to exposure gain
    #[default]
    Normalized,
    /// Mean-subtracted NCC; insensitive to gain and offset
    ZeroMean,
}

/// Summed-area tables of intensities and squared intensities.
///
/// Tables are `(width + 1) × (height + 1)` with a zero first row and column.
pub(crate) struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(frame: &Frame) -> Self {
        let stride = frame.width() + 1;
        let rows = frame.height() + 1;
        let mut sum = vec![0u64; stride * rows];
        let mut sq = vec![0u64; stride * rows];

        for (y, row) in frame.rows().enumerate() {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for (x, &p) in row.iter().enumerate() {
                let p = u64::from(p);
                row_sum += p;
                row_sq += p * p;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq[idx] = sq[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq }
    }

    /// `(Σp, Σp²)` over the `size × size` window with top-left `(x, y)`
    #[inline]
    pub(crate) fn window_sums(&self, x: usize, y: usize, size: usize) -> (u64, u64) {
        let s = self.stride;
        let (a, b) = (y * s + x, y * s + x + size);
        let (c, d) = ((y + size) * s + x, (y + size) * s + x + size);
        (
            self.sum[d] + self.sum[a] - self.sum[b] - self.sum[c],
            self.sq[d] + self.sq[a] - self.sq[b] - self.sq[c],
        )
    }
}

/// Packed copy of an interrogation window from the first frame
pub(crate) struct Template {
    pixels: Vec<u8>,
    size: usize,
    sum: u64,
    sq: u64,
}

impl Template {
    pub(crate) fn extract(frame: &Frame, x: usize, y: usize, size: usize) -> Self {
        let mut pixels = Vec::with_capacity(size * size);
        for row in y..y + size {
            pixels.extend_from_slice(&frame.row(row)[x..x + size]);
        }
        let (sum, sq) = pixels.iter().fold((0u64, 0u64), |(s, q), &p| {
            let p = u64::from(p);
            (s + p, q + p * p)
        });
        Self {
            pixels,
            size,
            sum,
            sq,
        }
    }

    /// `Σ T·I` against the window of `target` with top-left `(x, y)`
    fn cross(&self, target: &Frame, x: usize, y: usize) -> u64 {
        self.pixels
            .chunks_exact(self.size)
            .enumerate()
            .map(|(r, t_row)| {
                let i_row = &target.row(y + r)[x..x + self.size];
                t_row
                    .iter()
                    .zip(i_row)
                    .map(|(&t, &i)| u64::from(t) * u64::from(i))
                    .sum::<u64>()
            })
            .sum()
    }
}

impl CorrelationMethod {
    /// Score of `template` placed at `(x, y)` in `target`; flat windows score 0.
    pub(crate) fn score(
        self,
        template: &Template,
        target: &Frame,
        sums: &IntegralImage,
        x: usize,
        y: usize,
    ) -> f64 {
        let cross = template.cross(target, x, y) as f64;
        let (i_sum, i_sq) = sums.window_sums(x, y, template.size);

        match self {
            CorrelationMethod::Normalized => {
                let denom = (template.sq as f64).sqrt() * (i_sq as f64).sqrt();
                if denom > 0.0 {
                    cross / denom
                } else {
                    0.0
                }
            }
            CorrelationMethod::ZeroMean => {
                let n = (template.size * template.size) as f64;
                let (t_sum, i_sum) = (template.sum as f64, i_sum as f64);
                let cov = cross - t_sum * i_sum / n;
                let var_t = template.sq as f64 - t_sum * t_sum / n;
                let var_i = i_sq as f64 - i_sum * i_sum / n;
                if var_t > 0.0 && var_i > 0.0 {
                    cov / (var_t.sqrt() * var_i.sqrt())
                } else {
                    0.0
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_sums_match_direct() {
        let frame = Frame::from_fn(7, 5, |x, y| (x * 13 + y * 7) as u8);
        let sums = IntegralImage::new(&frame);

        let (mut s, mut q) = (0u64, 0u64);
        for y in 1..4 {
            for x in 2..5 {
                let p = u64::from(frame.get(x, y));
                s += p;
                q += p * p;
            }
        }
        assert_eq!(sums.window_sums(2, 1, 3), (s, q));
    }

    #[test]
    fn test_self_correlation_is_one() {
        let frame = Frame::from_fn(8, 8, |x, y| ((x * 31 + y * 17) % 200) as u8 + 10);
        let sums = IntegralImage::new(&frame);
        let template = Template::extract(&frame, 2, 2, 4);

        for method in [CorrelationMethod::Normalized, CorrelationMethod::ZeroMean] {
            let score = method.score(&template, &frame, &sums, 2, 2);
            assert!((score - 1.0).abs() < 1e-9, "{method:?}: {score}");
        }
    }

    #[test]
    fn test_gain_invariance() {
        let a = Frame::from_fn(6, 6, |x, y| ((x * 37 + y * 11) % 100) as u8 + 20);
        let b = Frame::from_fn(6, 6, |x, y| a.get(x, y) * 2);
        let template = Template::extract(&a, 0, 0, 6);
        let score = CorrelationMethod::Normalized.score(&template, &b, &IntegralImage::new(&b), 0, 0);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_offset_invariance_zero_mean() {
        let a = Frame::from_fn(6, 6, |x, y| ((x * 37 + y * 11) % 100) as u8);
        let b = Frame::from_fn(6, 6, |x, y| a.get(x, y) + 50);
        let template = Template::extract(&a, 0, 0, 6);
        let score = CorrelationMethod::ZeroMean.score(&template, &b, &IntegralImage::new(&b), 0, 0);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_window_scores_zero() {
        let flat = Frame::filled(4, 4, 0);
        let template = Template::extract(&flat, 0, 0, 4);
        let sums = IntegralImage::new(&flat);
        assert_eq!(CorrelationMethod::Normalized.score(&template, &flat, &sums, 0, 0), 0.0);

        let grey = Frame::filled(4, 4, 90);
        let template = Template::extract(&grey, 0, 0, 4);
        let sums = IntegralImage::new(&grey);
        assert_eq!(CorrelationMethod::ZeroMean.score(&template, &grey, &sums, 0, 0), 0.0);
    }
}
