//! Palm detection.
//!
//! This runs the MediaPipe palm detection network on a whole frame. Palms are a lot easier to
//! detect than whole hands (they're roughly square and rigid), and their keypoints tell us the
//! orientation of the hand, which the landmark network needs.

pub mod nms;
pub mod ssd;

use std::path::Path;

use anyhow::bail;
use nalgebra::Vector2;

use crate::nn::{Cnn, CnnInputShape, Outputs};
use crate::rect::Rect;
use crate::source::Frame;
use crate::timer::Timer;

use self::nms::NonMaxSuppression;
use self::ssd::{Anchor, Anchors, LayerInfo};

/// Number of keypoints predicted for each palm.
pub const NUM_KEYPOINTS: usize = 7;

/// Values per anchor in the box regression output: box center and size, then 7 keypoints.
const BOX_PARAMS: usize = 4 + 2 * NUM_KEYPOINTS;

/// Output layers of the 192x192 palm detection networks (lite and full).
const LAYERS: &[LayerInfo] = &[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)];

/// A keypoint of a [`PalmDetection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

/// A detected palm, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PalmDetection {
    confidence: f32,
    rect: Rect,
    keypoints: [[f32; 2]; NUM_KEYPOINTS],
}

impl PalmDetection {
    pub fn new(confidence: f32, rect: Rect, keypoints: [[f32; 2]; NUM_KEYPOINTS]) -> Self {
        Self {
            confidence,
            rect,
            keypoints,
        }
    }

    /// Returns the detection confidence in range 0.0 to 1.0.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the axis-aligned bounding rectangle of the palm.
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn keypoint(&self, kp: Keypoint) -> [f32; 2] {
        self.keypoints[kp as usize]
    }

    /// Computes the clockwise rotation of the hand compared to an upright position.
    ///
    /// A rotation of 0° means that the fingers point up (towards negative Y).
    pub fn rotation_radians(&self) -> f32 {
        let [wx, wy] = self.keypoint(Keypoint::Wrist);
        let [fx, fy] = self.keypoint(Keypoint::MiddleFingerMcp);
        let dir = Vector2::new(fx - wx, fy - wy);
        dir.x.atan2(-dir.y)
    }

    fn map(&self, scale: f32, dx: f32, dy: f32) -> Self {
        let center = self.rect.center();
        Self {
            confidence: self.confidence,
            rect: Rect::from_center(
                center.x * scale + dx,
                center.y * scale + dy,
                self.rect.width() * scale,
                self.rect.height() * scale,
            ),
            keypoints: self.keypoints.map(|[x, y]| [x * scale + dx, y * scale + dy]),
        }
    }
}

/// Runs the palm detection network.
pub struct PalmDetector {
    cnn: Cnn,
    anchors: Anchors,
    thresh: f32,
    nms: NonMaxSuppression,
    t_infer: Timer,
    t_extract: Timer,
    t_nms: Timer,
}

impl PalmDetector {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    /// Loads a palm detection network (`palm_detection_lite.onnx` or `palm_detection_full.onnx`).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let cnn = Cnn::load(path, CnnInputShape::NCHW)?;
        if cnn.input_width() != cnn.input_height() {
            bail!(
                "palm detection network must take a square input, not {}x{}",
                cnn.input_width(),
                cnn.input_height(),
            );
        }

        Ok(Self {
            cnn,
            anchors: Anchors::calculate(LAYERS),
            thresh: Self::DEFAULT_THRESHOLD,
            nms: NonMaxSuppression::new(),
            t_infer: Timer::new("palm infer"),
            t_extract: Timer::new("palm extract"),
            t_nms: Timer::new("palm nms"),
        })
    }

    /// Sets the minimum confidence of detections.
    #[inline]
    pub fn set_threshold(&mut self, thresh: f32) {
        self.thresh = thresh;
    }

    /// Sets the intersection-over-union above which overlapping detections are merged.
    #[inline]
    pub fn set_nms_iou_thresh(&mut self, iou_thresh: f32) {
        self.nms.set_iou_thresh(iou_thresh);
    }

    /// Detects palms in `frame`, returning them ordered by descending confidence.
    ///
    /// The frame is letterboxed into the square network input, so the whole frame is searched.
    pub fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<PalmDetection>> {
        let (w, h) = frame.dimensions();
        let side = w.max(h) as f32;
        let input_size = self.cnn.input_width() as f32;
        let scale = side / input_size;

        // Offset of the letterbox square's top left corner; negative along the short side.
        let dx = (w as f32 - side) * 0.5;
        let dy = (h as f32 - side) * 0.5;

        let outputs = self.t_infer.time(|| {
            self.cnn.estimate(|x, y| {
                let sx = ((x as f32 + 0.5) * scale + dx).floor();
                let sy = ((y as f32 + 0.5) * scale + dy).floor();
                if sx < 0.0 || sy < 0.0 || sx >= w as f32 || sy >= h as f32 {
                    [0, 0, 0]
                } else {
                    frame.get_pixel(sx as u32, sy as u32).0
                }
            })
        })?;

        let raw = self
            .t_extract
            .time(|| extract(&self.anchors, input_size, &outputs, self.thresh))?;
        log::trace!("{} raw palm detections", raw.len());

        let detections = self.t_nms.time(|| self.nms.process(raw));

        Ok(detections
            .iter()
            .map(|det| det.map(scale, dx, dy))
            .collect())
    }

    /// Returns profiling timers for inference, output extraction, and NMS.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract, &self.t_nms].into_iter()
    }
}

/// Decodes all detections with a confidence of at least `thresh` from the network outputs.
///
/// Returned coordinates are in network input pixels.
fn extract(
    anchors: &Anchors,
    input_size: f32,
    outputs: &Outputs,
    thresh: f32,
) -> anyhow::Result<Vec<PalmDetection>> {
    let num_anchors = anchors.anchor_count();
    let (Some(boxes), Some(scores)) = (
        outputs.find(|shape| shape == [1, num_anchors, BOX_PARAMS]),
        outputs.find(|shape| shape == [1, num_anchors, 1]),
    ) else {
        bail!(
            "unexpected palm detection outputs (expected [1, {num_anchors}, {BOX_PARAMS}] and [1, {num_anchors}, 1]): {:?}",
            (0..outputs.len())
                .filter_map(|i| outputs.get(i))
                .map(|t| t.shape())
                .collect::<Vec<_>>(),
        );
    };

    let mut detections = Vec::new();
    for index in 0..num_anchors {
        let confidence = sigmoid(scores[[0, index, 0]]);
        if confidence < thresh {
            continue;
        }

        let mut params = [0.0; BOX_PARAMS];
        for (i, p) in params.iter_mut().enumerate() {
            *p = boxes[[0, index, i]];
        }
        detections.push(decode_box(&anchors[index], input_size, &params, confidence));
    }

    Ok(detections)
}

fn decode_box(
    anchor: &Anchor,
    input_size: f32,
    params: &[f32; BOX_PARAMS],
    confidence: f32,
) -> PalmDetection {
    let ax = anchor.x_center() * input_size;
    let ay = anchor.y_center() * input_size;

    let mut keypoints = [[0.0; 2]; NUM_KEYPOINTS];
    for (i, kp) in keypoints.iter_mut().enumerate() {
        *kp = [params[4 + i * 2] + ax, params[5 + i * 2] + ay];
    }

    PalmDetection {
        confidence,
        rect: Rect::from_center(params[0] + ax, params[1] + ay, params[2], params[3]),
        keypoints,
    }
}

/// Applies the standard sigmoid/logistic function to the input.
fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}
