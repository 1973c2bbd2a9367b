//! JPEG compression for frame payloads.
//!
//! Encoding goes through the `image` crate's baseline encoder, decoding
//! through `jpeg-decoder`. Both are treated as opaque: output bytes are not
//! required to be deterministic across versions.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::capture::RawFrame;
use crate::error::{Result, StreamError};

/// Codec identifier carried in [`WireEnvelope::encoding`](crate::wire::WireEnvelope).
pub const JPEG: &str = "jpg";

/// Lowest quality the encoder accepts.
const MIN_QUALITY: u8 = 1;

/// Clamp a configured quality into the range the encoder accepts.
pub fn effective_quality(quality: u8) -> u8 {
    quality.clamp(MIN_QUALITY, 100)
}

/// Compress `frame` as JPEG at `quality` (0-100, 0 treated as 1).
pub fn encode_jpeg(frame: &RawFrame, quality: u8) -> Result<Vec<u8>> {
    if frame.data.is_empty() {
        return Err(StreamError::Compression("empty pixel buffer".into()));
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(StreamError::Compression(format!(
            "invalid geometry {}x{}",
            frame.width, frame.height
        )));
    }
    if frame.width > u16::MAX as u32 || frame.height > u16::MAX as u32 {
        return Err(StreamError::Compression(format!(
            "geometry {}x{} exceeds JPEG limits",
            frame.width, frame.height
        )));
    }
    let color = match frame.channels {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        n => {
            return Err(StreamError::Compression(format!(
                "unsupported channel count {n}"
            )))
        }
    };
    if frame.data.len() != frame.expected_len() {
        return Err(StreamError::Compression(format!(
            "buffer holds {} bytes, geometry needs {}",
            frame.data.len(),
            frame.expected_len()
        )));
    }

    let mut out = Vec::with_capacity(frame.data.len() / 8);
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, effective_quality(quality));
        encoder
            .encode(&frame.data, frame.width, frame.height, color)
            .map_err(|e| StreamError::Compression(e.to_string()))?;
    }
    Ok(out)
}

/// Decompress a JPEG payload into a gray or RGB frame.
pub fn decode_jpeg(data: &[u8]) -> Result<RawFrame> {
    if data.is_empty() {
        return Err(StreamError::Decode("empty payload".into()));
    }
    let mut decoder = jpeg_decoder::Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| StreamError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| StreamError::Decode("missing image header".into()))?;

    let channels = match info.pixel_format {
        jpeg_decoder::PixelFormat::L8 => 1,
        jpeg_decoder::PixelFormat::RGB24 => 3,
        other => {
            return Err(StreamError::Decode(format!(
                "unsupported pixel format {other:?}"
            )))
        }
    };

    Ok(RawFrame::new(
        pixels,
        info.width as u32,
        info.height as u32,
        channels,
    ))
}
