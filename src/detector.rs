//! The hand detection capability consumed by the streaming loop.

use crate::hand::HandDetection;
use crate::palm::nms::NonMaxSuppression;
use crate::source::Frame;
use crate::timer::Timer;

/// Something that finds hands in a frame.
///
/// Implemented by [`MediaPipeHands`][crate::pipeline::MediaPipeHands]. From the caller's point of
/// view, every call is independent: no state is carried from one frame to the next.
pub trait HandDetector {
    /// Detects all hands in `frame`, returning at most the configured maximum number of hands.
    ///
    /// The order of the returned detections is significant and is preserved on the wire.
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandDetection>>;

    /// Returns profiling timers of the individual detection stages.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl<D: HandDetector + ?Sized> HandDetector for &mut D {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandDetection>> {
        (**self).detect(frame)
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}

impl<D: HandDetector + ?Sized> HandDetector for Box<D> {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandDetection>> {
        (**self).detect(frame)
    }

    fn timers(&self) -> Vec<&Timer> {
        (**self).timers()
    }
}

/// Detection parameters, fixed for the lifetime of a detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOptions {
    /// Maximum number of hands to report per frame.
    pub max_hands: usize,
    /// Palm detections with a lower confidence are ignored.
    pub min_detection_confidence: f32,
    /// Landmark results whose hand presence score falls below this value are discarded.
    pub min_presence: f32,
    /// Overlapping palm detections with at least this intersection-over-union are merged.
    pub nms_iou_threshold: f32,
}

impl DetectorOptions {
    pub const DEFAULT_MAX_HANDS: usize = 2;
    pub const DEFAULT_MIN_DETECTION_CONFIDENCE: f32 = 0.7;
    pub const DEFAULT_MIN_PRESENCE: f32 = 0.5;
    pub const DEFAULT_NMS_IOU_THRESHOLD: f32 = NonMaxSuppression::DEFAULT_IOU_THRESH;
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            max_hands: Self::DEFAULT_MAX_HANDS,
            min_detection_confidence: Self::DEFAULT_MIN_DETECTION_CONFIDENCE,
            min_presence: Self::DEFAULT_MIN_PRESENCE,
            nms_iou_threshold: Self::DEFAULT_NMS_IOU_THRESHOLD,
        }
    }
}
