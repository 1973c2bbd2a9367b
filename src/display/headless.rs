use tracing::{debug, info};

use crate::capture::RawFrame;
use crate::display::{DisplaySink, Overlay};
use crate::error::Result;

/// Display sink for machines without a screen: logs the overlay instead of
/// drawing it.
#[derive(Debug, Default)]
pub struct HeadlessDisplay {
    shown: u64,
}

impl HeadlessDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl DisplaySink for HeadlessDisplay {
    fn show(&mut self, frame: &RawFrame, overlay: &Overlay) -> Result<()> {
        self.shown += 1;
        debug!(
            width = frame.width,
            height = frame.height,
            channels = frame.channels,
            "{overlay}"
        );
        Ok(())
    }

    fn close(&mut self) {
        info!(frames = self.shown, "Headless display closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_shown_frames() {
        let mut display = HeadlessDisplay::new();
        let frame = RawFrame::new(vec![0u8; 4 * 2], 4, 2, 1);
        let overlay = Overlay {
            frame_number: 1,
            fps: 0.0,
            latency_ms: 1.5,
            lost: 0,
            payload_bytes: 120,
            is_keyframe: false,
        };

        display.show(&frame, &overlay).unwrap();
        display.show(&frame, &overlay).unwrap();
        assert_eq!(display.shown(), 2);
        assert!(!display.poll_quit_requested());
        display.close();
    }
}
