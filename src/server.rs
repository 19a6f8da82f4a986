//! Single-client TCP streaming.
//!
//! A stream goes through three states, each represented by its own type:
//!
//! - [`Server`]: listening for the one client this process will ever serve.
//! - [`Session`]: connected; frames are captured, analyzed and written to the client.
//! - [`SessionSummary`] / [`StreamError`]: closed. [`Session::run`] consumes the session, so the
//!   frame source and the connection are released by the time it returns.
//!
//! There is no way back from a closed session to a listening server. Reconnecting requires a new
//! process.

use std::{
    io::{self, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
};

use anyhow::Context;
use thiserror::Error;

use crate::detector::HandDetector;
use crate::protocol::{encode_line, Schema};
use crate::source::FrameSource;
use crate::timer::{FpsCounter, Timer};

/// A bound TCP listener waiting for its single client.
pub struct Server {
    listener: TcpListener,
}

impl Server {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).context("failed to bind TCP listener")?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Blocks until a client connects, and returns the connection.
    ///
    /// The listener is closed afterwards, so any further connection attempts are refused by the
    /// OS instead of waiting in the accept backlog.
    pub fn accept(self) -> anyhow::Result<TcpStream> {
        match self.listener.local_addr() {
            Ok(addr) => log::info!("waiting for connection on {}", addr),
            Err(_) => log::info!("waiting for connection"),
        }

        let (stream, peer) = self
            .listener
            .accept()
            .context("failed to accept connection")?;
        log::info!("connected to {}", peer);

        // Every line is a complete message; don't let Nagle hold it back.
        stream
            .set_nodelay(true)
            .context("failed to set TCP_NODELAY")?;

        Ok(stream)
    }
}

/// Unexpected failure that ended a [`Session`].
#[derive(Debug, Error)]
pub enum StreamError {
    /// Writing to the client failed for a reason other than the client going away.
    #[error("failed to write to client: {0}")]
    Write(#[source] io::Error),
}

/// Statistics of a session that ended because the client disconnected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Number of lines written to the client.
    pub frames_sent: u64,
    /// Number of frames dropped because detection or serialization failed.
    pub frames_skipped: u64,
}

/// A connected client being streamed to.
pub struct Session<S, D, W = TcpStream> {
    source: S,
    detector: D,
    writer: W,
    schema: Schema,
    t_detect: Timer,
    t_write: Timer,
}

impl<S: FrameSource, D: HandDetector, W: Write> Session<S, D, W> {
    pub fn new(source: S, detector: D, writer: W, schema: Schema) -> Self {
        Self {
            source,
            detector,
            writer,
            schema,
            t_detect: Timer::new("detect"),
            t_write: Timer::new("write"),
        }
    }

    /// Streams detections to the client until the connection fails.
    ///
    /// Returns `Ok` when the client disconnected, which is how a session normally ends.
    pub fn run(mut self) -> Result<SessionSummary, StreamError> {
        let mut summary = SessionSummary::default();
        let mut fps = FpsCounter::new("stream");
        log::debug!(
            "streaming {:?} lines (protocol v{})",
            self.schema,
            self.schema.version(),
        );

        loop {
            let Some(frame) = self.source.next_frame() else {
                continue;
            };

            let hands = match self.t_detect.time(|| self.detector.detect(&frame)) {
                Ok(hands) => hands,
                Err(e) => {
                    log::warn!("hand detection failed, skipping frame: {:#}", e);
                    summary.frames_skipped += 1;
                    continue;
                }
            };

            let line = match encode_line(&hands, self.schema) {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("failed to encode frame, skipping: {}", e);
                    summary.frames_skipped += 1;
                    continue;
                }
            };

            let res = self.t_write.time(|| {
                self.writer.write_all(&line)?;
                self.writer.flush()
            });
            match res {
                Ok(()) => {
                    log::trace!("sent {} hands", hands.len());
                    summary.frames_sent += 1;
                }
                Err(e) if is_disconnect(&e) => {
                    log::info!("connection lost: {}", e);
                    return Ok(summary);
                }
                Err(e) => {
                    log::error!("write error: {:?}", e);
                    return Err(StreamError::Write(e));
                }
            }

            fps.tick_with(self.stage_timers());
        }
    }

    /// Returns the profiling timers of every stage of the loop, in processing order.
    fn stage_timers(&self) -> Vec<&Timer> {
        let mut timers = self.source.timers();
        timers.push(&self.t_detect);
        timers.extend(self.detector.timers());
        timers.push(&self.t_write);
        timers
    }
}

/// Returns whether `e` means that the peer is gone.
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
    };

    use anyhow::anyhow;

    use super::*;
    use crate::hand::{HandDetection, Handedness, Landmark, NUM_LANDMARKS};
    use crate::protocol::{decode_line, Message};
    use crate::source::Frame;

    /// Yields a blank frame on every poll, except for every `gap`th poll which yields nothing.
    struct FakeSource {
        polls: Rc<Cell<usize>>,
        dropped: Rc<Cell<bool>>,
        gap: Option<usize>,
        t_capture: Timer,
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Option<Frame> {
            let _guard = self.t_capture.start();
            let n = self.polls.get() + 1;
            self.polls.set(n);
            match self.gap {
                Some(gap) if n % gap == 0 => None,
                _ => Some(Frame::new(4, 4)),
            }
        }

        fn timers(&self) -> Vec<&Timer> {
            vec![&self.t_capture]
        }
    }

    impl Drop for FakeSource {
        fn drop(&mut self) {
            self.dropped.set(true);
        }
    }

    /// Returns `hands` for every frame, except for every `fail_every`th frame which errors.
    struct FakeDetector {
        hands: Vec<HandDetection>,
        calls: usize,
        fail_every: Option<usize>,
        t_infer: Timer,
    }

    impl FakeDetector {
        fn new(hands: Vec<HandDetection>) -> Self {
            Self {
                hands,
                calls: 0,
                fail_every: None,
                t_infer: Timer::new("infer"),
            }
        }
    }

    impl HandDetector for FakeDetector {
        fn detect(&mut self, _: &Frame) -> anyhow::Result<Vec<HandDetection>> {
            let _guard = self.t_infer.start();
            self.calls += 1;
            match self.fail_every {
                Some(n) if self.calls % n == 0 => Err(anyhow!("inference failed")),
                _ => Ok(self.hands.clone()),
            }
        }

        fn timers(&self) -> Vec<&Timer> {
            vec![&self.t_infer]
        }
    }

    /// Accepts `accept` writes, then fails with `kind`.
    struct FakeConn {
        data: Rc<RefCell<Vec<u8>>>,
        closed: Rc<Cell<bool>>,
        accept: usize,
        kind: io::ErrorKind,
    }

    impl Drop for FakeConn {
        fn drop(&mut self) {
            self.closed.set(true);
        }
    }

    impl Write for FakeConn {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accept == 0 {
                return Err(io::Error::from(self.kind));
            }
            self.accept -= 1;
            self.data.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        polls: Rc<Cell<usize>>,
        source_dropped: Rc<Cell<bool>>,
        data: Rc<RefCell<Vec<u8>>>,
        conn_closed: Rc<Cell<bool>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                polls: Rc::default(),
                source_dropped: Rc::default(),
                data: Rc::default(),
                conn_closed: Rc::default(),
            }
        }

        fn source(&self, gap: Option<usize>) -> FakeSource {
            FakeSource {
                polls: self.polls.clone(),
                dropped: self.source_dropped.clone(),
                gap,
                t_capture: Timer::new("capture"),
            }
        }

        fn conn(&self, accept: usize, kind: io::ErrorKind) -> FakeConn {
            FakeConn {
                data: self.data.clone(),
                closed: self.conn_closed.clone(),
                accept,
                kind,
            }
        }

        fn lines(&self) -> Vec<String> {
            let data = String::from_utf8(self.data.borrow().clone()).unwrap();
            data.split_inclusive('\n').map(str::to_string).collect()
        }
    }

    fn right_hand() -> HandDetection {
        HandDetection::new(
            Handedness::Right,
            [Landmark::new(0.5, 0.5, 0.0); NUM_LANDMARKS],
        )
    }

    #[test]
    fn stops_after_disconnect() {
        let h = Harness::new();
        let session = Session::new(
            h.source(None),
            FakeDetector::new(vec![right_hand()]),
            h.conn(10, io::ErrorKind::BrokenPipe),
            Schema::Labeled,
        );

        let summary = session.run().unwrap();
        assert_eq!(
            summary,
            SessionSummary {
                frames_sent: 10,
                frames_skipped: 0,
            }
        );
        // The 11th frame was captured and failed to send; nothing after that.
        assert_eq!(h.polls.get(), 11);
        assert!(h.source_dropped.get());
        assert!(h.conn_closed.get());

        let lines = h.lines();
        assert_eq!(lines.len(), 10);
        for line in &lines {
            let msg = decode_line(line, Schema::Labeled).unwrap();
            assert_eq!(msg, Message::Labeled(vec![right_hand()]));
        }
    }

    #[test]
    fn unexpected_write_error() {
        let h = Harness::new();
        let session = Session::new(
            h.source(None),
            FakeDetector::new(Vec::new()),
            h.conn(3, io::ErrorKind::PermissionDenied),
            Schema::Flat,
        );

        match session.run() {
            Err(StreamError::Write(e)) => assert_eq!(e.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(h.source_dropped.get());
        assert!(h.conn_closed.get());
        assert_eq!(h.lines(), ["[]\n", "[]\n", "[]\n"]);
    }

    #[test]
    fn repolls_missing_frames() {
        let h = Harness::new();
        let session = Session::new(
            h.source(Some(2)),
            FakeDetector::new(Vec::new()),
            h.conn(5, io::ErrorKind::ConnectionReset),
            Schema::Labeled,
        );

        let summary = session.run().unwrap();
        assert_eq!(summary.frames_sent, 5);
        // Every other poll came back empty: 6 frames (5 sent, 1 failed) took 11 polls.
        assert_eq!(h.polls.get(), 11);
    }

    #[test]
    fn skips_failed_detections() {
        let h = Harness::new();
        let mut detector = FakeDetector::new(vec![right_hand(), right_hand()]);
        detector.fail_every = Some(3);
        let session = Session::new(
            h.source(None),
            &mut detector,
            h.conn(4, io::ErrorKind::BrokenPipe),
            Schema::Flat,
        );

        let summary = session.run().unwrap();
        assert_eq!(
            summary,
            SessionSummary {
                frames_sent: 4,
                frames_skipped: 2,
            }
        );
        assert_eq!(detector.calls, 7);
        for line in h.lines() {
            assert_eq!(
                decode_line(&line, Schema::Flat).unwrap().landmark_count(),
                2 * NUM_LANDMARKS
            );
        }
    }

    #[test]
    fn skips_unencodable_frames() {
        let h = Harness::new();
        let mut detector = NonFiniteDetector {
            bad: 3,
            hand: right_hand(),
        };
        let session = Session::new(
            h.source(None),
            &mut detector,
            h.conn(2, io::ErrorKind::BrokenPipe),
            Schema::Labeled,
        );

        let summary = session.run().unwrap();
        assert_eq!(
            summary,
            SessionSummary {
                frames_sent: 2,
                frames_skipped: 3,
            }
        );
        assert_eq!(h.lines().len(), 2);
    }

    /// Produces a hand with an infinite coordinate for the first `bad` frames.
    struct NonFiniteDetector {
        bad: usize,
        hand: HandDetection,
    }

    impl HandDetector for NonFiniteDetector {
        fn detect(&mut self, _: &Frame) -> anyhow::Result<Vec<HandDetection>> {
            if self.bad > 0 {
                self.bad -= 1;
                let mut lms = *self.hand.landmarks();
                lms[0].x = f32::INFINITY;
                return Ok(vec![HandDetection::new(self.hand.label(), lms)]);
            }
            Ok(vec![self.hand.clone()])
        }
    }

    #[test]
    fn collects_stage_timers() {
        let h = Harness::new();
        let mut source = h.source(None);
        let mut detector = FakeDetector::new(Vec::new());

        let session = Session::new(
            &mut source,
            &mut detector,
            h.conn(2, io::ErrorKind::BrokenPipe),
            Schema::Labeled,
        );
        let names = session
            .stage_timers()
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "capture: 0x0.0ms",
                "detect: 0x0.0ms",
                "infer: 0x0.0ms",
                "write: 0x0.0ms"
            ]
        );

        session.run().unwrap();
        assert!(source.t_capture.to_string().starts_with("capture: 3x"));
        assert!(detector.t_infer.to_string().starts_with("infer: 3x"));
    }

    #[test]
    fn disconnect_kinds() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::WriteZero,
        ] {
            assert!(is_disconnect(&io::Error::from(kind)), "{:?}", kind);
        }
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::Other)));
    }
}
