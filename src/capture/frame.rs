use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{PivError, Result};

/// 8-bit grayscale frame, row-major with an explicit stride.
///
/// Pixel data lives in `Bytes`, so clones share the same immutable storage.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    width: usize,
    height: usize,
    stride: usize,
}

impl Frame {
    /// Tightly packed frame (`stride == width`)
    pub fn new(data: impl Into<Bytes>, width: usize, height: usize) -> Result<Self> {
        Self::with_stride(data, width, height, width)
    }

    pub fn with_stride(
        data: impl Into<Bytes>,
        width: usize,
        height: usize,
        stride: usize,
    ) -> Result<Self> {
        let data = data.into();
        if width == 0 || height == 0 {
            return Err(PivError::InvalidFrame(format!(
                "empty frame {}x{}",
                width, height
            )));
        }
        if stride < width {
            return Err(PivError::InvalidFrame(format!(
                "stride {} shorter than width {}",
                stride, width
            )));
        }
        if data.len() != stride * height {
            return Err(PivError::InvalidFrame(format!(
                "expected {} bytes for {}x{} (stride {}), got {}",
                stride * height,
                width,
                height,
                stride,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    /// Build a packed frame by evaluating `f(x, y)` for every pixel.
    ///
    /// Zero dimensions are accepted here; the ring buffer rejects such frames.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            data: Bytes::from(data),
            width,
            height,
            stride: width,
        }
    }

    /// Caller guarantees `data.len() == width * height` and non-zero dimensions.
    pub(crate) fn from_packed(data: Bytes, width: usize, height: usize) -> Self {
        debug_assert_eq!(data.len(), width * height);
        Self {
            data,
            width,
            height,
            stride: width,
        }
    }

    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self::from_fn(width, height, |_, _| value)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// `(height, width)`
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Visible pixels of row `y` (stride padding excluded)
    #[inline]
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.stride + x]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }

    /// Raw backing storage, including any stride padding
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .finish_non_exhaustive()
    }
}

/// A frame as delivered by a source, with its capture timestamp
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: Frame,
    /// Monotonic capture time in seconds
    pub timestamp: f64,
    pub sequence: u64,
}

/// Pixel formats a live device may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Grey,
    Yuyv4,
    Mjpeg,
}
