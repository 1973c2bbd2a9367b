use crate::capture::{PixelFormat, RawFrame};
use crate::codec;
use crate::error::{Result, StreamError};

/// Turn a device buffer into a packed gray/RGB frame.
pub fn decode_frame(data: &[u8], format: PixelFormat, width: u32, height: u32) -> Result<RawFrame> {
    match format {
        PixelFormat::Mjpeg => codec::decode_jpeg(data),
        PixelFormat::Rgb24 => {
            // Already in RGB format
            let expected = width as usize * height as usize * 3;
            if data.len() < expected {
                return Err(StreamError::Acquisition(format!(
                    "short RGB buffer: {} < {expected}",
                    data.len()
                )));
            }
            Ok(RawFrame::new(data[..expected].to_vec(), width, height, 3))
        }
        PixelFormat::Yuyv4 => {
            let expected = width as usize * height as usize * 2;
            if data.len() < expected {
                return Err(StreamError::Acquisition(format!(
                    "short YUYV buffer: {} < {expected}",
                    data.len()
                )));
            }
            Ok(RawFrame::new(yuyv_to_rgb(&data[..expected]), width, height, 3))
        }
    }
}

/// BT.601 YUYV 4:2:2 to packed RGB24.
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for chunk in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}
