mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use anyhow::Result;
use livematte::Frame;

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame as packed RGB
    fn capture_frame(&mut self) -> Result<Frame>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> (u32, u32);
}
