use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Uncompressed frame as produced by a frame source or the JPEG decoder.
///
/// Pixels are tightly packed, row-major, `channels` bytes per pixel
/// (1 = gray, 3 = RGB).
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Immutable pixel data - can be shared across threads without copying
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, channels: u8) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            channels,
        }
    }

    /// Byte length implied by the geometry.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    /// Expand to packed RGB24, the layout every display backend accepts.
    pub fn to_rgb24(&self) -> Vec<u8> {
        match self.channels {
            3 => self.data.to_vec(),
            1 => self.data.iter().flat_map(|&l| [l, l, l]).collect(),
            _ => self
                .data
                .chunks_exact(self.channels as usize)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        }
    }
}

/// Pixel formats a capture device may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Yuyv4,
    Mjpeg,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gray_expands_to_rgb() {
        let frame = RawFrame::new(vec![10u8, 20], 2, 1, 1);
        assert_eq!(frame.expected_len(), 2);
        assert_eq!(frame.to_rgb24(), vec![10, 10, 10, 20, 20, 20]);
    }

    #[test]
    fn rgba_drops_alpha() {
        let frame = RawFrame::new(vec![1u8, 2, 3, 255], 1, 1, 4);
        assert_eq!(frame.to_rgb24(), vec![1, 2, 3]);
    }
}
