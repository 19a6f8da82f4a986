//! Command line configuration.

use std::path::PathBuf;

use anyhow::{bail, ensure};
use clap::Parser;

use crate::detector::DetectorOptions;
use crate::protocol::Schema;
use crate::webcam::{ParamPreference, WebcamOptions};

/// Streams hand landmarks detected in a webcam feed to a single TCP client, one JSON line per
/// frame.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// TCP port to listen on.
    #[arg(long, default_value_t = 5005)]
    pub port: u16,
    /// Wire format of the streamed lines.
    #[arg(long, value_enum, default_value_t = Schema::Labeled)]
    pub schema: Schema,
    /// Maximum number of hands reported per frame.
    #[arg(long, default_value_t = DetectorOptions::DEFAULT_MAX_HANDS)]
    pub max_hands: usize,
    /// Minimum palm detection confidence (0.0 to 1.0).
    #[arg(long, default_value_t = DetectorOptions::DEFAULT_MIN_DETECTION_CONFIDENCE)]
    pub min_detection_confidence: f32,
    /// Minimum hand presence score of the landmark network (0.0 to 1.0).
    #[arg(long, default_value_t = DetectorOptions::DEFAULT_MIN_PRESENCE)]
    pub min_presence: f32,
    /// Palm detections overlapping by at least this intersection-over-union are merged.
    #[arg(long, default_value_t = DetectorOptions::DEFAULT_NMS_IOU_THRESHOLD)]
    pub nms_iou_threshold: f32,
    /// Name of the webcam to open. Defaults to the first supported device.
    #[arg(long)]
    pub camera: Option<String>,
    /// Desired camera frame rate.
    #[arg(long, default_value_t = 30)]
    pub fps: u32,
    /// Desired minimum camera resolution, as `WIDTHxHEIGHT`.
    #[arg(long, value_parser = parse_resolution)]
    pub resolution: Option<(u32, u32)>,
    /// Whether to keep the frame rate or the resolution when the camera can't deliver both.
    #[arg(long, value_enum, default_value_t = ParamPreference::Framerate)]
    pub prefer: ParamPreference,
    /// Palm detection network.
    #[arg(long, default_value = "3rdparty/onnx/palm_detection_full.onnx")]
    pub palm_model: PathBuf,
    /// Hand landmark network.
    #[arg(long, default_value = "3rdparty/onnx/hand_landmark_full.onnx")]
    pub landmark_model: PathBuf,
}

impl Config {
    /// Checks the values that clap can't validate on its own.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.max_hands >= 1, "`--max-hands` must be at least 1");
        for (name, value) in [
            ("--min-detection-confidence", self.min_detection_confidence),
            ("--min-presence", self.min_presence),
            ("--nms-iou-threshold", self.nms_iou_threshold),
        ] {
            ensure!(
                (0.0..=1.0).contains(&value),
                "`{}` must be between 0.0 and 1.0, got {}",
                name,
                value,
            );
        }
        ensure!(self.fps > 0, "`--fps` must not be 0");
        Ok(())
    }

    /// Returns the address to listen on.
    pub fn addr(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            max_hands: self.max_hands,
            min_detection_confidence: self.min_detection_confidence,
            min_presence: self.min_presence,
            nms_iou_threshold: self.nms_iou_threshold,
        }
    }

    pub fn webcam_options(&self) -> WebcamOptions {
        let mut options = WebcamOptions::default().fps(self.fps).prefer(self.prefer);
        if let Some((width, height)) = self.resolution {
            options = options.resolution(width, height);
        }
        if let Some(name) = &self.camera {
            options = options.name(name);
        }
        options
    }
}

fn parse_resolution(s: &str) -> anyhow::Result<(u32, u32)> {
    let Some((w, h)) = s.split_once('x') else {
        bail!("expected `WIDTHxHEIGHT`, got '{}'", s);
    };
    Ok((w.trim().parse()?, h.trim().parse()?))
}
