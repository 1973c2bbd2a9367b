use crate::capture::{FrameSource, RawFrame};
use crate::error::{Result, StreamError};

/// Synthetic source: a diagonal gradient that scrolls one pixel per frame.
///
/// With a frame limit it reports end-of-stream once the limit is reached,
/// which the sender treats like an exhausted camera.
pub struct TestPattern {
    width: u32,
    height: u32,
    channels: u8,
    limit: Option<u64>,
    produced: u64,
    closed: bool,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, channels: u8) -> Self {
        Self {
            width,
            height,
            channels,
            limit: None,
            produced: 0,
            closed: false,
        }
    }

    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl FrameSource for TestPattern {
    fn next_frame(&mut self) -> Result<RawFrame> {
        if self.closed {
            return Err(StreamError::Acquisition("source closed".into()));
        }
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Err(StreamError::Acquisition("end of stream".into()));
        }

        let shift = self.produced as u32;
        let channels = self.channels as usize;
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * channels);
        for y in 0..self.height {
            for x in 0..self.width {
                let v = ((x + y + shift) % 256) as u8;
                match channels {
                    1 => data.push(v),
                    _ => {
                        data.push(v);
                        data.push(v.wrapping_add(85));
                        data.push(v.wrapping_add(170));
                        data.extend(std::iter::repeat(255).take(channels.saturating_sub(3)));
                    }
                }
            }
        }

        self.produced += 1;
        Ok(RawFrame::new(data, self.width, self.height, self.channels))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
