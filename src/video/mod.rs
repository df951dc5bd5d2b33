//! Frame sources.
//!
//! A [`FrameSource`] produces one [`RawFrame`] per call and blocks until one is available. It has
//! no threading policy of its own; the [`CaptureLoop`] calls it from its background thread.
//!
//! [`CaptureLoop`]: crate::capture::CaptureLoop

pub mod still;
pub mod webcam;

use crate::image::RawFrame;
use crate::timer::Timer;

/// A blocking source of camera frames.
pub trait FrameSource {
    /// Captures the next frame.
    ///
    /// This may block for up to a frame interval. Returns `None` if no frame could be captured;
    /// such failures are expected to be transient and the caller will simply try again.
    fn try_read_frame(&mut self) -> Option<RawFrame>;

    /// Returns profiling timers for the stages of [`FrameSource::try_read_frame`].
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn try_read_frame(&mut self) -> Option<RawFrame> {
        (**self).try_read_frame()
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}
