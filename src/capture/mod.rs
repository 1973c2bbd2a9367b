pub mod decoder;
pub mod frame;
pub mod pattern;
#[cfg(feature = "camera")]
pub mod v4l2;

pub use frame::PixelFormat;
pub use frame::RawFrame;
pub use pattern::TestPattern;
#[cfg(feature = "camera")]
pub use v4l2::V4l2Camera;

use crate::error::Result;

/// Producer of raw frames for the sender loop.
pub trait FrameSource {
    /// Block until the next frame is available.
    ///
    /// End-of-stream and device faults are reported as
    /// [`StreamError::Acquisition`](crate::StreamError::Acquisition).
    fn next_frame(&mut self) -> Result<RawFrame>;

    /// Release the device. Called once when the sender loop exits.
    fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<RawFrame> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
