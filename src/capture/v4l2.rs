//! Live V4L2 capture delivering grayscale frames

use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::decoder;
use crate::capture::frame::{CapturedFrame, PixelFormat};
use crate::utils::MonotonicClock;
use crate::CaptureConfig;

/// Memory-mapped V4L2 capture
pub struct V4l2Capture {
    device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    width: usize,
    height: usize,
    sequence: u64,
    clock: MonotonicClock,
}

fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Grey => FourCC::new(b"GREY"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
    }
}

impl V4l2Capture {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        info!("Initializing V4L2 capture: {}", config.device);

        let device = Device::with_path(&config.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(config.format);
        let fmt = device.set_format(&fmt)?;

        if fmt.fourcc != fourcc(config.format) {
            return Err(eyre!(
                "Device refused {:?}, negotiated {}",
                config.format,
                fmt.fourcc
            ));
        }
        if (fmt.width, fmt.height) != (config.width, config.height) {
            info!(
                "Device adjusted resolution to {}x{}",
                fmt.width, fmt.height
            );
        }

        Ok(Self {
            device: Box::new(device),
            stream: None,
            width: fmt.width as usize,
            height: fmt.height as usize,
            config,
            sequence: 0,
            clock: MonotonicClock::new(),
        })
    }

    /// Start streaming with memory-mapped buffers
    pub fn start_stream(&mut self) -> Result<()> {
        let stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.config.buffer_count)?;

        self.stream = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.config.buffer_count
        );
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!(
            "v4l2 {} {}x{} {:?}",
            self.config.device, self.width, self.height, self.config.format
        )
    }

    /// Dequeue one buffer and convert it to luma
    #[instrument(skip(self))]
    pub async fn capture_frame(&mut self) -> Result<CapturedFrame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| eyre!("Stream not started"))?;

        // Blocking dequeue
        let (buf, meta) = stream.next()?;
        let timestamp = self.clock.now_secs();
        let used = (meta.bytesused as usize).min(buf.len());
        let frame = decoder::decode_luma(&buf[..used], self.config.format, self.width, self.height)?;

        self.sequence += 1;
        Ok(CapturedFrame {
            frame,
            timestamp,
            sequence: self.sequence,
        })
    }
}

/// Find the first capture device offering `format`
pub fn auto_detect_device(format: PixelFormat) -> Result<String> {
    info!("Auto-detecting capture devices...");

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }
        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == fourcc(format)) {
                info!("Found {:?} device: {} - {}", format, path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(eyre!("No capture device offering {:?} found", format))
}
