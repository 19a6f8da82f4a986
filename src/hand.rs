//! Hand detection results.
//!
//! A [`HandDetection`] is what a [`HandDetector`][crate::detector::HandDetector] produces for each
//! hand it finds in a frame: a [`Handedness`] label and exactly [`NUM_LANDMARKS`] [`Landmark`]s.

use serde::{Deserialize, Serialize};

/// The number of landmarks estimated for every hand.
pub const NUM_LANDMARKS: usize = 21;

/// A single 3D hand landmark.
///
/// `x` and `y` are normalized to the range 0.0 to 1.0 relative to the width and height of the
/// frame. `z` is a relative depth estimate (with the wrist at roughly 0.0, smaller values being
/// closer to the camera), scaled like `x`.
///
/// On the wire, a landmark is a 3-element JSON array `[x, y, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Returns whether all coordinates are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f32; 3]> for Landmark {
    #[inline]
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Landmark> for [f32; 3] {
    #[inline]
    fn from(lm: Landmark) -> Self {
        [lm.x, lm.y, lm.z]
    }
}

/// Whether a detected hand is a left or a right hand.
///
/// This is the handedness as reported by the landmark network for the image as captured. Mirrored
/// camera images will report mirrored handedness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handedness {
    Left,
    Right,
}

/// One detected hand in a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandDetection {
    label: Handedness,
    landmarks: [Landmark; NUM_LANDMARKS],
}

impl HandDetection {
    pub fn new(label: Handedness, landmarks: [Landmark; NUM_LANDMARKS]) -> Self {
        Self { label, landmarks }
    }

    #[inline]
    pub fn label(&self) -> Handedness {
        self.label
    }

    /// Returns the hand's landmarks, indexable by [`LandmarkIdx`].
    #[inline]
    pub fn landmarks(&self) -> &[Landmark; NUM_LANDMARKS] {
        &self.landmarks
    }

    #[inline]
    pub fn landmark(&self, idx: LandmarkIdx) -> Landmark {
        self.landmarks[idx as usize]
    }

    /// Returns whether every landmark coordinate is finite.
    pub fn is_finite(&self) -> bool {
        self.landmarks.iter().all(Landmark::is_finite)
    }
}

/// Names for the hand landmarks, in the order the landmark network outputs them.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}
