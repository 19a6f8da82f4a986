//! Non-Maximum Suppression and Averaging.
//!
//! The palm detection network produces many overlapping detections for every palm. Instead of
//! keeping only the most confident one of each group, overlapping detections are replaced by their
//! confidence-weighted average, which reduces jitter between frames.

use crate::rect::Rect;

use super::{PalmDetection, NUM_KEYPOINTS};

/// Merges overlapping detections into one.
pub struct NonMaxSuppression {
    iou_thresh: f32,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a new non-maximum suppressor using [`Self::DEFAULT_IOU_THRESH`].
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
        }
    }

    /// Sets the intersection-over-union threshold to consider two detections as overlapping.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    /// Performs non-maximum suppression on `detections`.
    ///
    /// The result is ordered by descending confidence of the seed detection of each group.
    pub fn process(&self, mut detections: Vec<PalmDetection>) -> Vec<PalmDetection> {
        let mut out = Vec::new();

        // Sort by ascending confidence, process highest confidence first by starting at the back.
        detections.sort_unstable_by(|a, b| a.confidence.total_cmp(&b.confidence));

        while let Some(seed) = detections.pop() {
            let mut group = Vec::new();
            detections.retain(|other| {
                if seed.rect.iou(&other.rect) >= self.iou_thresh {
                    group.push(*other);
                    false
                } else {
                    true
                }
            });

            group.push(seed);
            out.push(average(seed.confidence, &group));
        }

        out
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the confidence-weighted average of `group`, keeping `confidence` as the result's
/// confidence.
fn average(confidence: f32, group: &[PalmDetection]) -> PalmDetection {
    let mut keypoints = [[0.0; 2]; NUM_KEYPOINTS];
    let (mut xc, mut yc, mut w, mut h) = (0.0, 0.0, 0.0, 0.0);
    let mut divisor = 0.0;
    for det in group {
        let factor = det.confidence;
        divisor += factor;
        for (acc, kp) in keypoints.iter_mut().zip(&det.keypoints) {
            acc[0] += kp[0] * factor;
            acc[1] += kp[1] * factor;
        }
        let center = det.rect.center();
        xc += center.x * factor;
        yc += center.y * factor;
        w += det.rect.width() * factor;
        h += det.rect.height() * factor;
    }

    for kp in &mut keypoints {
        kp[0] /= divisor;
        kp[1] /= divisor;
    }

    PalmDetection {
        confidence,
        rect: Rect::from_center(xc / divisor, yc / divisor, w / divisor, h / divisor),
        keypoints,
    }
}
