//! Frame envelope and its wire representation.
//!
//! On the wire an envelope is a Protocol Buffers `VideoFrame` message:
//!
//! ```text
//! message VideoFrame {
//!   bytes  frame_data          = 1;
//!   uint32 width               = 2;
//!   uint32 height              = 3;
//!   uint32 channels            = 4;
//!   string encoding            = 5;
//!   uint64 frame_number        = 6;
//!   double timestamp           = 7;
//!   uint32 compression_quality = 8;
//!   bool   is_keyframe         = 9;
//! }
//! ```
//!
//! Protobuf has no 8-bit integers, so `channels` and `compression_quality`
//! travel as `uint32` and are range-checked on the way back in.

use bytes::Bytes;
use prost::Message;

use crate::error::{Result, StreamError};

/// One compressed frame plus its sequencing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct WireEnvelope {
    /// Compressed pixel data
    pub payload: Bytes,
    /// Pre-compression geometry
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Codec identifier, e.g. "jpg"
    pub encoding: String,
    /// Per-stream frame counter, starts at 1
    pub sequence: u64,
    /// Sender wall-clock seconds at encode start
    pub sent_at: f64,
    /// Compression quality used (0-100)
    pub quality: u8,
    pub is_keyframe: bool,
}

#[derive(Clone, PartialEq, Message)]
struct VideoFrame {
    #[prost(bytes = "bytes", tag = "1")]
    frame_data: Bytes,
    #[prost(uint32, tag = "2")]
    width: u32,
    #[prost(uint32, tag = "3")]
    height: u32,
    #[prost(uint32, tag = "4")]
    channels: u32,
    #[prost(string, tag = "5")]
    encoding: String,
    #[prost(uint64, tag = "6")]
    frame_number: u64,
    #[prost(double, tag = "7")]
    timestamp: f64,
    #[prost(uint32, tag = "8")]
    compression_quality: u32,
    #[prost(bool, tag = "9")]
    is_keyframe: bool,
}

impl WireEnvelope {
    /// Serialize to protobuf bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        VideoFrame {
            frame_data: self.payload.clone(),
            width: self.width,
            height: self.height,
            channels: self.channels as u32,
            encoding: self.encoding.clone(),
            frame_number: self.sequence,
            timestamp: self.sent_at,
            compression_quality: self.quality as u32,
            is_keyframe: self.is_keyframe,
        }
        .encode_to_vec()
    }

    /// Parse and validate protobuf bytes.
    ///
    /// Absent scalar fields decode as zero in protobuf, so "required" here
    /// means non-zero / non-empty.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let msg = VideoFrame::decode(data)?;

        if msg.frame_data.is_empty() {
            return Err(malformed("empty frame_data"));
        }
        if msg.width == 0 || msg.height == 0 {
            return Err(malformed(format!(
                "invalid geometry {}x{}",
                msg.width, msg.height
            )));
        }
        if msg.encoding.is_empty() {
            return Err(malformed("missing encoding"));
        }
        if msg.frame_number == 0 {
            return Err(malformed("missing frame_number"));
        }
        let channels = match msg.channels {
            c @ 1..=4 => c as u8,
            c => return Err(malformed(format!("channels out of range: {c}"))),
        };
        let quality = match msg.compression_quality {
            q @ 0..=100 => q as u8,
            q => return Err(malformed(format!("compression_quality out of range: {q}"))),
        };

        Ok(Self {
            payload: msg.frame_data,
            width: msg.width,
            height: msg.height,
            channels,
            encoding: msg.encoding,
            sequence: msg.frame_number,
            sent_at: msg.timestamp,
            quality,
            is_keyframe: msg.is_keyframe,
        })
    }
}

fn malformed(reason: impl Into<String>) -> StreamError {
    StreamError::MalformedEnvelope(reason.into())
}
