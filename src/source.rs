//! Frame acquisition.

use crate::timer::Timer;

/// A single captured camera image.
pub type Frame = image::RgbImage;

/// A source of camera frames.
///
/// Implemented by [`Webcam`][crate::webcam::Webcam]; tests substitute deterministic fakes.
pub trait FrameSource {
    /// Returns the most recent frame, or [`None`] if no frame is available right now.
    ///
    /// [`None`] is a transient condition, not an error: callers are expected to simply poll again.
    /// Sources do not buffer frames, so frames that were not polled for are lost.
    fn next_frame(&mut self) -> Option<Frame>;

    /// Returns profiling timers for frame acquisition, to be logged alongside the stream's FPS.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn next_frame(&mut self) -> Option<Frame> {
        (**self).next_frame()
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Option<Frame> {
        (**self).next_frame()
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}
