//! V4L2 camera source with memory-mapped buffers

use std::time::Instant;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, instrument, trace};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::capture::{decoder, FrameSource, PixelFormat, RawFrame};
use crate::error::StreamError;
use crate::CaptureConfig;

/// Camera frame source backed by a V4L2 capture device
pub struct V4l2Camera {
    _device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
    frames: u64,
}

impl V4l2Camera {
    /// Open the device, negotiate the format and start streaming
    #[instrument(skip(config), fields(device = %config.device))]
    pub fn open(config: CaptureConfig) -> Result<Self> {
        info!("Initializing V4L2 capture");

        let device = Device::with_path(&config.device)?;

        // Query capabilities
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(eyre!("Device doesn't support video capture"));
        }

        // Set format
        let mut fmt = device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        };
        let fmt = device.set_format(&fmt)?;
        if fmt.width != config.width || fmt.height != config.height {
            info!(
                "Driver adjusted resolution to {}x{}",
                fmt.width, fmt.height
            );
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)?;
        info!("Capture stream started with {} buffers", config.buffer_count);

        let mut config = config;
        config.width = fmt.width;
        config.height = fmt.height;

        Ok(Self {
            _device: Box::new(device),
            stream: Some(stream),
            config,
            frames: 0,
        })
    }
}

impl FrameSource for V4l2Camera {
    fn next_frame(&mut self) -> crate::Result<RawFrame> {
        let start = Instant::now();

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| StreamError::Acquisition("stream closed".into()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| StreamError::Acquisition(e.to_string()))?;
        let used = (meta.bytesused as usize).min(buf.len());
        let used = if used == 0 { buf.len() } else { used };

        let frame = decoder::decode_frame(
            &buf[..used],
            self.config.format,
            self.config.width,
            self.config.height,
        )
        // A camera handing out undecodable buffers is a device fault.
        .map_err(|e| StreamError::Acquisition(e.to_string()))?;

        self.frames += 1;
        trace!(frame = self.frames, elapsed = ?start.elapsed(), "captured");
        Ok(frame)
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            info!(frames = self.frames, "Capture stream stopped");
        }
    }
}
