//! V4L2 webcam access.
//!
//! Currently, only V4L2 `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are
//! supported.

use std::{cmp::Reverse, env, io};

use anyhow::bail;
use clap::ValueEnum;
use image::ImageFormat;
use linuxvideo::{
    format::{FrameIntervals, FrameSizes, PixFormat, PixelFormat},
    stream::ReadStream,
    BufType, CapabilityFlags, Device, Fract,
};

use crate::source::{Frame, FrameSource};
use crate::timer::Timer;

/// Environment variable forcing the device used by [`Webcam`]s opened without an explicit name.
pub const ENV_VAR_WEBCAM_NAME: &str = "HANDCAST_WEBCAM_NAME";

/// Indicates whether to prefer a higher resolution or frame rate.
///
/// [`WebcamOptions`] default to [`ParamPreference::Resolution`], selecting the maximum resolution
/// at the desired frame rate. The `--prefer` command line flag defaults to
/// [`ParamPreference::Framerate`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ParamPreference {
    /// Prefer increased resolution over higher frame rates.
    #[default]
    Resolution,
    /// Prefer higher frame rate over higher image resolution.
    Framerate,
}

#[derive(Debug, Default, Clone, Copy)]
struct FramePrefs {
    resolution: Option<(u32, u32)>,
    fps: Option<u32>,
    pref: ParamPreference,
}

/// Format negotiation options.
#[derive(Debug, Default)]
pub struct WebcamOptions {
    name: Option<String>,
    frame: FramePrefs,
}

impl WebcamOptions {
    /// Sets the name of the webcam device to open.
    ///
    /// If no webcam with the given name can be found, opening the webcam will result in an error.
    #[inline]
    pub fn name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Sets the desired minimum image resolution.
    ///
    /// A lower resolution might be selected if the webcam cannot deliver the desired resolution.
    #[inline]
    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.frame.resolution = Some((width, height));
        self
    }

    /// Sets the desired frame rate.
    ///
    /// A lower frame rate might be selected if the webcam cannot deliver the desired frame rate.
    #[inline]
    pub fn fps(mut self, fps: u32) -> Self {
        self.frame.fps = Some(fps);
        self
    }

    /// Selects whether to prefer a higher resolution or frame rate.
    ///
    /// When the camera cannot deliver the desired frame rate and resolution, this controls which
    /// one will be maintained. When it can, this controls which parameter is maximized.
    #[inline]
    pub fn prefer(mut self, pref: ParamPreference) -> Self {
        self.frame.pref = pref;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameFormat {
    width: u32,
    height: u32,
    frame_interval: Fract,
}

impl FrameFormat {
    fn num_pixels(&self) -> u32 {
        self.width * self.height
    }

    fn fps(&self) -> f32 {
        1.0 / self.frame_interval.as_f32()
    }
}

fn negotiate_format(device: &Device, prefs: FramePrefs) -> anyhow::Result<(PixFormat, Fract)> {
    let mut pixel_format = None;
    for format in device.formats(BufType::VIDEO_CAPTURE) {
        let format = format?;
        let fourcc = format.pixel_format();
        if fourcc == PixelFormat::JPEG || fourcc == PixelFormat::MJPG {
            pixel_format = Some(fourcc);
            break;
        }
    }

    let Some(pixel_format) = pixel_format else {
        bail!("no supported pixel format found");
    };

    let mut formats = Vec::new();
    match device.frame_sizes(pixel_format)? {
        FrameSizes::Discrete(sizes) => {
            for size in sizes {
                let intervals =
                    match device.frame_intervals(pixel_format, size.width(), size.height())? {
                        FrameIntervals::Discrete(intervals) => intervals,
                        FrameIntervals::Stepwise(_) | FrameIntervals::Continuous(_) => {
                            bail!("stepwise or continuous frame rates are not supported")
                        }
                    };
                for rate in intervals {
                    formats.push(FrameFormat {
                        width: size.width(),
                        height: size.height(),
                        frame_interval: *rate.fract(),
                    });
                }
            }
        }
        FrameSizes::Stepwise(_) | FrameSizes::Continuous(_) => {
            bail!("stepwise or continuous resolutions are not supported");
        }
    }

    let Some(fmt) = negotiate(&formats, prefs) else {
        bail!("failed to negotiate a webcam format")
    };
    Ok((
        PixFormat::new(fmt.width, fmt.height, pixel_format),
        fmt.frame_interval,
    ))
}

/// Picks a format from `formats`, dropping preferences one at a time until one matches.
///
/// The preference that isn't [`FramePrefs::pref`] is dropped first.
fn negotiate(formats: &[FrameFormat], mut prefs: FramePrefs) -> Option<FrameFormat> {
    loop {
        if let Some(fmt) = negotiate_step(formats, prefs) {
            return Some(fmt);
        }

        log::debug!("failed to negotiate format with prefs {:?}", prefs);
        match prefs.pref {
            ParamPreference::Resolution => {
                if prefs.fps.take().is_none() && prefs.resolution.take().is_none() {
                    return None;
                }
            }
            ParamPreference::Framerate => {
                if prefs.resolution.take().is_none() && prefs.fps.take().is_none() {
                    return None;
                }
            }
        }
        log::debug!("retrying with new prefs {:?}", prefs);
    }
}

fn negotiate_step(formats: &[FrameFormat], prefs: FramePrefs) -> Option<FrameFormat> {
    let mut eligible = formats
        .iter()
        .filter(|fmt| {
            prefs
                .resolution
                .map_or(true, |(w, h)| fmt.width >= w && fmt.height >= h)
                && prefs.fps.map_or(true, |fps| fmt.fps().round() >= fps as f32)
        })
        .copied()
        .collect::<Vec<_>>();
    match prefs.pref {
        ParamPreference::Resolution => {
            eligible.sort_by_key(|fmt| (fmt.num_pixels(), Reverse(fmt.frame_interval)))
        }
        ParamPreference::Framerate => {
            eligible.sort_by_key(|fmt| (Reverse(fmt.frame_interval), fmt.num_pixels()))
        }
    }
    eligible.last().copied()
}

/// A webcam yielding a stream of RGB [`Frame`]s.
pub struct Webcam {
    stream: ReadStream,
    failures: ReadFailures,
    t_dequeue: Timer,
    t_decode: Timer,
}

impl Webcam {
    /// Opens the first supported webcam found.
    ///
    /// This function can block for a significant amount of time while the webcam initializes (on
    /// the order of hundreds of milliseconds).
    pub fn open(options: WebcamOptions) -> anyhow::Result<Self> {
        let name_from_env = env::var(ENV_VAR_WEBCAM_NAME).ok();
        if let Some(name) = &name_from_env {
            log::debug!(
                "webcam override: `{}` is set to '{}'",
                ENV_VAR_WEBCAM_NAME,
                name,
            );
        }
        let name = options.name.as_deref().or(name_from_env.as_deref());

        for res in linuxvideo::list()? {
            match res {
                Ok(dev) => match Self::open_impl(dev, name, options.frame) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e) => {
                        log::debug!("{}", e);
                    }
                },
                Err(e) => {
                    log::warn!("{}", e);
                }
            }
        }

        match name {
            Some(name) => bail!("no supported webcam device named '{}' found", name),
            None => bail!("no supported webcam device found"),
        }
    }

    fn open_impl(
        dev: Device,
        name: Option<&str>,
        prefs: FramePrefs,
    ) -> anyhow::Result<Option<Self>> {
        let caps = dev.capabilities()?;
        if let Some(name) = name {
            if caps.card() != name {
                return Ok(None);
            }
        }

        let cap_flags = caps.device_capabilities();
        let path = dev.path()?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            cap_flags,
        );

        if !cap_flags.contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let (pixfmt, fract) = negotiate_format(&dev, prefs)?;

        let capture = dev.video_capture(pixfmt)?;
        let format = capture.format();
        let actual = capture.set_frame_interval(fract)?;

        log::info!(
            "opened {} ({}), {}x{} @ {:.1}Hz",
            caps.card(),
            path.display(),
            format.width(),
            format.height(),
            1.0 / actual.as_f32(),
        );

        let stream = capture.into_stream()?;

        Ok(Some(Self {
            stream,
            failures: ReadFailures::default(),
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    /// Reads the next frame from the camera.
    ///
    /// If no frame is available, this method will block until one is. The outer error is a device
    /// error; the inner one means the frame data could not be decoded.
    pub fn read(&mut self) -> io::Result<Result<Frame, image::ImageError>> {
        let dequeue_guard = self.t_dequeue.start();
        let t_decode = &self.t_decode;
        self.stream.dequeue(|buf| {
            drop(dequeue_guard);
            Ok(t_decode.time(|| {
                image::load_from_memory_with_format(&buf, ImageFormat::Jpeg)
                    .map(|image| image.into_rgb8())
            }))
        })
    }
}

impl FrameSource for Webcam {
    fn next_frame(&mut self) -> Option<Frame> {
        let err = match self.read() {
            Ok(Ok(frame)) => {
                let failed = self.failures.reset();
                if failed > 1 {
                    log::info!("webcam recovered after {} failed reads", failed);
                }
                return Some(frame);
            }
            // Even good webcams produce the occasional corrupted MJPG frame, presumably due to USB
            // data corruption.
            Ok(Err(e)) => format!("webcam decode error: {}", e),
            Err(e) => format!("failed to dequeue webcam frame: {}", e),
        };

        if self.failures.record() {
            log::warn!("{}", err);
        } else {
            log::trace!("{}", err);
        }
        None
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_dequeue, &self.t_decode]
    }
}

/// Counts consecutive failed reads.
///
/// A camera that went away fails every read immediately, and the caller polls again right away.
/// Only the first failure of a streak is logged loudly.
#[derive(Debug, Default)]
struct ReadFailures {
    streak: u32,
}

impl ReadFailures {
    /// Records a failure, returning whether it starts a new streak.
    fn record(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        self.streak == 1
    }

    /// Ends the current streak, returning its length.
    fn reset(&mut self) -> u32 {
        std::mem::take(&mut self.streak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(width: u32, height: u32, fps: u32) -> FrameFormat {
        FrameFormat {
            width,
            height,
            frame_interval: Fract::new(1, fps),
        }
    }

    fn formats() -> Vec<FrameFormat> {
        vec![
            fmt(640, 480, 30),
            fmt(640, 480, 60),
            fmt(1280, 720, 30),
            fmt(1920, 1080, 15),
        ]
    }

    #[test]
    fn maximizes_resolution_at_fps() {
        let prefs = FramePrefs {
            fps: Some(30),
            ..Default::default()
        };
        assert_eq!(negotiate(&formats(), prefs), Some(fmt(1280, 720, 30)));
    }

    #[test]
    fn maximizes_fps_at_resolution() {
        let prefs = FramePrefs {
            resolution: Some((640, 480)),
            pref: ParamPreference::Framerate,
            ..Default::default()
        };
        assert_eq!(negotiate(&formats(), prefs), Some(fmt(640, 480, 60)));
    }

    #[test]
    fn relaxes_preferences() {
        // Nothing delivers 4K at 60 FPS; keeping the resolution preference drops the frame rate.
        let prefs = FramePrefs {
            resolution: Some((1920, 1080)),
            fps: Some(60),
            pref: ParamPreference::Resolution,
        };
        assert_eq!(negotiate(&formats(), prefs), Some(fmt(1920, 1080, 15)));

        let prefs = FramePrefs {
            pref: ParamPreference::Framerate,
            ..prefs
        };
        assert_eq!(negotiate(&formats(), prefs), Some(fmt(640, 480, 60)));
    }

    #[test]
    fn no_formats() {
        assert_eq!(negotiate(&[], FramePrefs::default()), None);
    }

    #[test]
    fn default_preference() {
        assert_eq!(
            WebcamOptions::default().frame.pref,
            ParamPreference::Resolution
        );
        let options = WebcamOptions::default().prefer(ParamPreference::Framerate);
        assert_eq!(options.frame.pref, ParamPreference::Framerate);
    }

    #[test]
    fn failure_streaks() {
        let mut failures = ReadFailures::default();
        assert_eq!(failures.reset(), 0);

        assert!(failures.record());
        for _ in 0..1000 {
            assert!(!failures.record());
        }
        assert_eq!(failures.reset(), 1001);

        assert!(failures.record());
        assert_eq!(failures.reset(), 1);
    }
}
