use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(feature = "camera")]
pub use device::{auto_detect_device, FoundDevice};

/// Wall-clock seconds since the Unix epoch, fractional.
///
/// Envelope timestamps use this on both ends so latency can be computed
/// across processes (and across hosts, if their clocks agree).
pub fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(feature = "camera")]
mod device {
    use color_eyre::{eyre::eyre, Result};
    use tracing::info;
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    use crate::capture::PixelFormat;

    // Detected capture device info
    #[derive(Debug, Clone)]
    pub struct FoundDevice {
        pub path: String,
        pub format: PixelFormat,
    }

    /// Auto-detect best capture device
    pub fn auto_detect_device() -> Result<FoundDevice> {
        use std::path::Path;

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
            if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
                continue;
            }
            // Prefer devices with MJPEG support
            if let Ok(formats) = dev.enum_formats() {
                for fmt in formats {
                    if fmt.fourcc == FourCC::new(b"MJPG") {
                        info!("Found MJPEG device: {} - {}", path, caps.card);
                        return Ok(FoundDevice {
                            path,
                            format: PixelFormat::Mjpeg,
                        });
                    } else if fmt.fourcc == FourCC::new(b"YUYV") {
                        info!("Found YUYV device: {} - {}", path, caps.card);
                        return Ok(FoundDevice {
                            path,
                            format: PixelFormat::Yuyv4,
                        });
                    }
                }
            }
        }

        Err(eyre!("No suitable capture device found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_monotone_enough() {
        let a = unix_time_secs();
        let b = unix_time_secs();
        assert!(a > 1_600_000_000.0);
        assert!(b >= a);
    }
}
