//! Publisher-side frame encoder.

use std::time::Instant;

use bytes::Bytes;
use tracing::trace;

use crate::capture::RawFrame;
use crate::codec;
use crate::error::{Result, StreamError};
use crate::utils::unix_time_secs;
use crate::wire::WireEnvelope;

/// Turns raw frames into [`WireEnvelope`]s: JPEG compression plus
/// keyframe tagging at a fixed sequence interval.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    quality: u8,
    keyframe_interval: u64,
}

impl FrameEncoder {
    pub fn new(quality: u8, keyframe_interval: u64) -> Result<Self> {
        if keyframe_interval == 0 {
            return Err(StreamError::Config("keyframe_interval must be >= 1".into()));
        }
        if quality > 100 {
            return Err(StreamError::Config(format!(
                "compression_quality must be 0-100, got {quality}"
            )));
        }
        Ok(Self {
            quality,
            keyframe_interval,
        })
    }

    pub fn is_keyframe(&self, sequence: u64) -> bool {
        sequence % self.keyframe_interval == 0
    }

    /// Compress `frame` and wrap it with `sequence`.
    ///
    /// `sent_at` is read before compression starts, so receiver-side latency
    /// includes encode time.
    pub fn encode(&self, frame: &RawFrame, sequence: u64) -> Result<WireEnvelope> {
        let sent_at = unix_time_secs();
        let start = Instant::now();

        let payload = codec::encode_jpeg(frame, self.quality)?;

        let encode_time = start.elapsed();
        metrics::histogram!("encode_time_us").record(encode_time.as_micros() as f64);
        trace!(sequence, bytes = payload.len(), ?encode_time, "frame encoded");

        Ok(WireEnvelope {
            payload: Bytes::from(payload),
            width: frame.width,
            height: frame.height,
            channels: frame.channels,
            encoding: codec::JPEG.to_string(),
            sequence,
            sent_at,
            quality: codec::effective_quality(self.quality),
            is_keyframe: self.is_keyframe(sequence),
        })
    }
}
