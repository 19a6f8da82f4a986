//! Hand landmark prediction.

use std::path::Path;

use anyhow::bail;
use nalgebra::{Rotation2, Vector2};

use crate::hand::{HandDetection, Handedness, Landmark, NUM_LANDMARKS};
use crate::nn::{Cnn, CnnInputShape, Outputs};
use crate::palm::PalmDetection;
use crate::rect::{Rect, RotatedRect};
use crate::source::Frame;
use crate::timer::Timer;

/// The palm -> hand region of interest is this many times larger than the palm box.
const ROI_SCALE: f32 = 2.6;

/// The region of interest is shifted towards the fingers by this fraction of the palm box height.
const ROI_SHIFT: f32 = 0.5;

/// Computes the region of the frame containing the whole hand, given its detected palm.
///
/// The returned square is rotated so that the fingers point up inside of it, which is what the
/// landmark network expects.
pub fn hand_roi(palm: &PalmDetection) -> RotatedRect {
    let radians = palm.rotation_radians();
    let rect = palm.bounding_rect();
    let shift = Rotation2::new(radians) * Vector2::new(0.0, -ROI_SHIFT * rect.height());
    let center = rect.center() + shift;
    let side = rect.width().max(rect.height()) * ROI_SCALE;

    RotatedRect::new(Rect::from_center(center.x, center.y, side, side), radians)
}

/// Landmark results estimated by the hand landmark network, in frame pixel coordinates.
#[derive(Debug, Clone)]
pub struct LandmarkResult {
    /// 3D positions in frame pixels. Z uses the same scale as X.
    positions: [[f32; 3]; NUM_LANDMARKS],
    presence: f32,
    raw_handedness: f32,
}

impl LandmarkResult {
    /// Returns the network's confidence that the region of interest actually contains a hand.
    pub fn presence(&self) -> f32 {
        self.presence
    }

    /// Returns the estimated handedness of the hand in the image.
    ///
    /// This assumes that the camera image is passed in as-is, and the returned value should only be
    /// relied on when the `presence` is over some threshold.
    pub fn handedness(&self) -> Handedness {
        if self.raw_handedness > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    /// Converts the result to a [`HandDetection`] normalized to a frame of the given size.
    ///
    /// X and Z are divided by the frame width and Y by the frame height.
    pub fn to_detection(&self, frame_width: u32, frame_height: u32) -> HandDetection {
        let (w, h) = (frame_width as f32, frame_height as f32);
        let landmarks = self
            .positions
            .map(|[x, y, z]| Landmark::new(x / w, y / h, z / w));
        HandDetection::new(self.handedness(), landmarks)
    }
}

/// Runs the hand landmark network (`hand_landmark_lite.onnx` or `hand_landmark_full.onnx`).
pub struct Landmarker {
    cnn: Cnn,
    t_infer: Timer,
    t_extract: Timer,
}

impl Landmarker {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let cnn = Cnn::load(path, CnnInputShape::NCHW)?;
        if cnn.input_width() != cnn.input_height() {
            bail!(
                "hand landmark network must take a square input, not {}x{}",
                cnn.input_width(),
                cnn.input_height(),
            );
        }

        Ok(Self {
            cnn,
            t_infer: Timer::new("landmark infer"),
            t_extract: Timer::new("landmark extract"),
        })
    }

    /// Estimates hand landmarks in the region `roi` of `frame`.
    ///
    /// Parts of the region outside of the frame are treated as black.
    pub fn estimate(&self, frame: &Frame, roi: &RotatedRect) -> anyhow::Result<LandmarkResult> {
        let input_size = self.cnn.input_width() as f32;
        let (w, h) = frame.dimensions();
        let scale_x = roi.rect().width() / input_size;
        let scale_y = roi.rect().height() / input_size;

        let outputs = self.t_infer.time(|| {
            self.cnn.estimate(|x, y| {
                let [sx, sy] =
                    roi.transform_out((x as f32 + 0.5) * scale_x, (y as f32 + 0.5) * scale_y);
                let (sx, sy) = (sx.floor(), sy.floor());
                if sx < 0.0 || sy < 0.0 || sx >= w as f32 || sy >= h as f32 {
                    [0, 0, 0]
                } else {
                    frame.get_pixel(sx as u32, sy as u32).0
                }
            })
        })?;

        let mut result = self.t_extract.time(|| extract(&outputs))?;
        for pos in &mut result.positions {
            let [x, y, z] = *pos;
            let [fx, fy] = roi.transform_out(x * scale_x, y * scale_y);
            *pos = [fx, fy, z * scale_x];
        }

        Ok(result)
    }

    /// Returns profiling timers for inference and output extraction.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract].into_iter()
    }
}

/// Reads the network outputs: screen landmarks, hand presence, handedness (and world landmarks,
/// which are ignored).
///
/// Returned positions are in network input pixels.
fn extract(outputs: &Outputs) -> anyhow::Result<LandmarkResult> {
    let coords = NUM_LANDMARKS * 3;
    let (Some(screen_landmarks), Some(presence_flag), Some(handedness)) =
        (outputs.get(0), outputs.get(1), outputs.get(2))
    else {
        bail!(
            "hand landmark network has {} outputs, expected at least 3",
            outputs.len()
        );
    };

    if screen_landmarks.shape() != [1, coords]
        || presence_flag.shape() != [1, 1]
        || handedness.shape() != [1, 1]
    {
        bail!(
            "unexpected hand landmark output shapes {:?}, {:?}, {:?}",
            screen_landmarks.shape(),
            presence_flag.shape(),
            handedness.shape(),
        );
    }

    let mut positions = [[0.0; 3]; NUM_LANDMARKS];
    for (i, pos) in positions.iter_mut().enumerate() {
        for (c, coord) in pos.iter_mut().enumerate() {
            *coord = screen_landmarks[[0, i * 3 + c]];
        }
    }

    Ok(LandmarkResult {
        positions,
        presence: presence_flag[[0, 0]],
        raw_handedness: handedness[[0, 0]],
    })
}
