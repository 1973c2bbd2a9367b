//! Display sinks for the receiver.

#[cfg(feature = "sdl-display")]
pub mod display;
pub mod headless;

#[cfg(feature = "sdl-display")]
pub use display::Sdl2Display;
pub use headless::HeadlessDisplay;

use std::fmt;

use crate::capture::RawFrame;
use crate::error::Result;
use crate::pipeline::tracker::HealthSnapshot;
use crate::wire::WireEnvelope;

/// Where decoded frames end up.
pub trait DisplaySink {
    fn show(&mut self, frame: &RawFrame, overlay: &Overlay) -> Result<()>;

    /// Whether the user asked to stop (window closed, quit key, ...).
    fn poll_quit_requested(&mut self) -> bool {
        false
    }

    fn close(&mut self) {}
}

impl<D: DisplaySink + ?Sized> DisplaySink for Box<D> {
    fn show(&mut self, frame: &RawFrame, overlay: &Overlay) -> Result<()> {
        (**self).show(frame, overlay)
    }

    fn poll_quit_requested(&mut self) -> bool {
        (**self).poll_quit_requested()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Telemetry drawn on top of each displayed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub frame_number: u64,
    pub fps: f64,
    pub latency_ms: f64,
    pub lost: u64,
    pub payload_bytes: usize,
    pub is_keyframe: bool,
}

impl Overlay {
    pub fn new(envelope: &WireEnvelope, health: &HealthSnapshot) -> Self {
        Self {
            frame_number: envelope.sequence,
            fps: health.fps,
            latency_ms: health.latency * 1000.0,
            lost: health.lost_total,
            payload_bytes: envelope.payload.len(),
            is_keyframe: envelope.is_keyframe,
        }
    }

    /// One entry per overlay row, keyframe marker last.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Frame: {}", self.frame_number),
            format!("FPS: {:.1}", self.fps),
            format!("Latency: {:.1} ms", self.latency_ms),
            format!("Lost: {}", self.lost),
            format!("Size: {} bytes", self.payload_bytes),
        ];
        if self.is_keyframe {
            lines.push("KEYFRAME".to_string());
        }
        lines
    }
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines().join(" | "))
    }
}
