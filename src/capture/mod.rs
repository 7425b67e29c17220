pub mod decoder;
pub mod frame;
pub mod regions;
mod sys;
pub mod v4l2;

use std::time::Duration;

pub use decoder::CaptureFormat;
pub use frame::{Frame, FrameMetadata, LuminanceSource, PixelFormat};
pub use v4l2::V4l2Capture;

use crate::error::CaptureError;

/// Outcome of waiting on a capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A frame is likely waiting to be grabbed.
    Ready,
    TimedOut,
    /// A signal cut the wait short.
    Interrupted,
}

/// A started capture device, as seen by the capture worker.
pub trait FrameSource {
    /// Block up to `timeout` until a frame is likely ready.
    fn wait_ready(&mut self, timeout: Duration) -> Result<Readiness, CaptureError>;

    /// Take the next completed frame without blocking. `Ok(None)` when the
    /// device has nothing ready.
    fn grab_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Negotiated frames per second, when the source knows it.
    fn frame_rate(&self) -> Option<u32> {
        None
    }

    /// Stop streaming and release the device. Must be idempotent.
    fn shutdown(&mut self) -> Result<(), CaptureError>;
}
