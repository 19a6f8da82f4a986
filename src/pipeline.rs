//! The MediaPipe-style two-stage hand detector.
//!
//! Every frame is processed independently: palms are detected in the whole frame, then the
//! landmark network is run on a region of interest derived from each palm. Nothing is tracked
//! across frames.

use std::path::Path;

use anyhow::Context;

use crate::detector::{DetectorOptions, HandDetector};
use crate::hand::HandDetection;
use crate::landmark::{hand_roi, Landmarker};
use crate::palm::{PalmDetection, PalmDetector};
use crate::source::Frame;
use crate::timer::Timer;

/// Detects hands using a palm detection network followed by a hand landmark network.
pub struct MediaPipeHands {
    palm: PalmDetector,
    landmarker: Landmarker,
    options: DetectorOptions,
}

impl MediaPipeHands {
    /// Loads both networks from disk.
    pub fn load(
        palm_model: &Path,
        landmark_model: &Path,
        options: DetectorOptions,
    ) -> anyhow::Result<Self> {
        let mut palm = PalmDetector::load(palm_model).context("failed to load palm detector")?;
        palm.set_threshold(options.min_detection_confidence);
        palm.set_nms_iou_thresh(options.nms_iou_threshold);
        let landmarker =
            Landmarker::load(landmark_model).context("failed to load hand landmarker")?;

        Ok(Self {
            palm,
            landmarker,
            options,
        })
    }
}

impl HandDetector for MediaPipeHands {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandDetection>> {
        let palms = self.palm.detect(frame)?;
        let palms = select_palms(palms, &self.options);

        let mut hands = Vec::with_capacity(palms.len());
        for palm in &palms {
            let roi = hand_roi(palm);
            let result = self.landmarker.estimate(frame, &roi)?;
            if result.presence() < self.options.min_presence {
                log::trace!(
                    "discarding hand at {:?}: presence {} < {}",
                    roi,
                    result.presence(),
                    self.options.min_presence,
                );
                continue;
            }

            let hand = result.to_detection(frame.width(), frame.height());
            if !hand.is_finite() {
                log::warn!("discarding hand with non-finite landmarks at {:?}", roi);
                continue;
            }
            hands.push(hand);
        }

        Ok(hands)
    }

    fn timers(&self) -> Vec<&Timer> {
        self.palm.timers().chain(self.landmarker.timers()).collect()
    }
}

/// Picks the palms to estimate landmarks for: those at or above the confidence threshold, most
/// confident first, at most `max_hands`.
fn select_palms(mut palms: Vec<PalmDetection>, options: &DetectorOptions) -> Vec<PalmDetection> {
    palms.retain(|palm| palm.confidence() >= options.min_detection_confidence);
    palms.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
    palms.truncate(options.max_hands);
    palms
}
