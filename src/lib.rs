pub mod capture;
pub mod codec;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod transport;
pub mod utils;
pub mod wire;

use std::path::Path;
use std::time::Duration;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use error::{Result, StreamError};
pub use wire::WireEnvelope;

/// Prefix for environment overrides, e.g. `FRAMECAST__STREAM__TOPIC`.
pub const ENV_PREFIX: &str = "FRAMECAST";

const DEFAULT_SEND_INTERVAL_SECS: f64 = 0.033; // ~30fps
const DEFAULT_TAKE_TIMEOUT_SECS: f64 = 0.1;

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub receiver: ReceiverConfig,
    pub transport: TransportConfig,
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
}

/// Publisher-side stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub topic: String,
    /// Every Nth sequence number is tagged as a keyframe (>= 1)
    pub keyframe_interval: u64,
    /// JPEG quality, 0-100
    pub compression_quality: u8,
    pub target_send_interval_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub bridge_take_timeout_secs: f64,
    /// Arrival timestamps kept for the FPS estimate (>= 2)
    pub fps_window_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One datagram per envelope
    Udp,
    /// In-process bus, only useful when both ends share a process
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Address the subscriber listens on. The publisher sends from an
    /// ephemeral port.
    pub bind: String,
    /// Where the publisher sends datagrams
    pub peer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub headless: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            topic: "video_frames".into(),
            keyframe_interval: 30,
            compression_quality: 80,
            target_send_interval_secs: DEFAULT_SEND_INTERVAL_SECS,
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bridge_take_timeout_secs: DEFAULT_TAKE_TIMEOUT_SECS,
            fps_window_size: pipeline::tracker::DEFAULT_FPS_WINDOW,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Udp,
            bind: "0.0.0.0:5600".into(),
            peer: "127.0.0.1:5600".into(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            title: "framecast".into(),
            width: 640,
            height: 480,
            headless: false,
        }
    }
}

impl StreamConfig {
    /// Falls back to the default for values [`Config::validate`] rejects.
    pub fn target_send_interval(&self) -> Duration {
        positive_secs(self.target_send_interval_secs)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_SEND_INTERVAL_SECS))
    }
}

impl ReceiverConfig {
    /// Falls back to the default for values [`Config::validate`] rejects.
    pub fn bridge_take_timeout(&self) -> Duration {
        positive_secs(self.bridge_take_timeout_secs)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TAKE_TIMEOUT_SECS))
    }
}

/// Upper bound for any configured interval or timeout.
const MAX_CONFIG_SECS: f64 = 3600.0;

/// `secs` as a `Duration` if it is positive, finite and at most an hour.
fn positive_secs(secs: f64) -> Option<Duration> {
    if !(secs > 0.0 && secs <= MAX_CONFIG_SECS) {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

impl Config {
    /// Defaults, then the optional TOML file, then `FRAMECAST__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Every section is `#[serde(default)]`, so missing keys keep their defaults.
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(StreamError::Config(msg)) };

        if self.stream.keyframe_interval < 1 {
            return invalid("stream.keyframe_interval must be >= 1".into());
        }
        if self.stream.compression_quality > 100 {
            return invalid(format!(
                "stream.compression_quality must be 0-100, got {}",
                self.stream.compression_quality
            ));
        }
        if positive_secs(self.stream.target_send_interval_secs).is_none() {
            return invalid(format!(
                "stream.target_send_interval_secs must be in (0, {MAX_CONFIG_SECS}], got {}",
                self.stream.target_send_interval_secs
            ));
        }
        if positive_secs(self.receiver.bridge_take_timeout_secs).is_none() {
            return invalid(format!(
                "receiver.bridge_take_timeout_secs must be in (0, {MAX_CONFIG_SECS}], got {}",
                self.receiver.bridge_take_timeout_secs
            ));
        }
        if self.receiver.fps_window_size < 2 {
            return invalid("receiver.fps_window_size must be >= 2".into());
        }
        if self.stream.topic.is_empty() || self.stream.topic.len() > u8::MAX as usize {
            return invalid("stream.topic must be 1-255 bytes".into());
        }
        Ok(())
    }
}
