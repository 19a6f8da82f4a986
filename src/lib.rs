//! Webcam hand landmark streaming.
//!
//! Frames are captured from a webcam, hands are detected in each frame, and the detected landmarks
//! are streamed to a single TCP client as newline-delimited JSON (see [`protocol`]).
//!
//! # Coordinates
//!
//! Landmark X and Y coordinates are normalized to the range 0.0 to 1.0 relative to the frame
//! width and height, with X pointing right and Y pointing *down*, as in the input image. Z is a
//! relative depth estimate using the same scale as X.
//!
//! # Environment Variables
//!
//! * `HANDCAST_WEBCAM_NAME`: Forces the device to use for [`Webcam`]s created without an explicit
//!   device name. If unset, the first device that supports a compatible image format will be used.
//! * `RUST_LOG`: Overrides the log levels set by [`init_logger!`], using [env_logger] syntax.
//!
//! [`Webcam`]: webcam::Webcam
//! [env_logger]: https://docs.rs/env_logger

use log::LevelFilter;

pub mod config;
pub mod detector;
pub mod hand;
pub mod landmark;
pub mod nn;
pub mod palm;
pub mod pipeline;
pub mod protocol;
pub mod rect;
pub mod server;
pub mod source;
pub mod timer;
pub mod webcam;

/// Initializes logging to *stderr*, enabling *debug* logs for `calling_crate` and this crate.
///
/// Prefer [`init_logger!`], which passes the name of the calling crate.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .filter(Some("tract_hir"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and handcast will log at *debug* level, `tract` at *warn* level, everything
/// else at *info* level. `RUST_LOG` takes precedence over all of these.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
