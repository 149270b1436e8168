#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use iris::capture::{ColorPayload, RawFrame};
use iris::{CaptureError, ColorDriver, Config, Frame, PixelFormat, StreamConfig};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// Counters shared between a test and the driver it handed to the service.
///
/// `live` counts drivers between a successful `start` and the end of `stop`;
/// `peak_live` is its high-water mark.
#[derive(Default)]
pub struct DriverLog {
    pub configures: AtomicUsize,
    pub starts: AtomicUsize,
    pub pulls: AtomicUsize,
    pub stops: AtomicUsize,
    pub live: AtomicUsize,
    pub peak_live: AtomicUsize,
}

impl DriverLog {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn peak_live(&self) -> usize {
        self.peak_live.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy)]
pub enum Behavior {
    /// Deliver `limit` frames (or forever), one per `interval`.
    Frames {
        limit: Option<usize>,
        interval: Duration,
    },
    /// Block on the first pull until stopped.
    Hang,
    /// Every other pull fails.
    Flaky { interval: Duration },
    /// Every other pull has no color data.
    Sparse { interval: Duration },
    /// Each pull blocks for `hold`, whether stopped or not.
    IgnoresStop { hold: Duration },
}

/// Fake camera: frame `n` is a solid image whose every byte is `n % 256`.
pub struct ScriptedDriver {
    behavior: Behavior,
    fail_start: bool,
    stop_delay: Duration,
    stopped: AtomicBool,
    log: Arc<DriverLog>,
}

impl ScriptedDriver {
    pub fn new(behavior: Behavior) -> (Self, Arc<DriverLog>) {
        let log = Arc::new(DriverLog::default());
        (Self::with_log(behavior, Arc::clone(&log)), log)
    }

    pub fn with_log(behavior: Behavior, log: Arc<DriverLog>) -> Self {
        Self {
            behavior,
            fail_start: false,
            stop_delay: Duration::ZERO,
            stopped: AtomicBool::new(false),
            log,
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// `stop` keeps the device for `delay` before releasing it.
    pub fn slow_stop(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    fn frame(tag: usize) -> RawFrame {
        let len = (WIDTH * HEIGHT * 3) as usize;
        RawFrame {
            color: Some(ColorPayload {
                width: WIDTH,
                height: HEIGHT,
                stride: 0,
                format: PixelFormat::Rgb24,
                data: Bytes::from(vec![(tag % 256) as u8; len]),
            }),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl ColorDriver for ScriptedDriver {
    fn configure(&mut self, config: &StreamConfig) -> Result<(), CaptureError> {
        assert_eq!((config.width, config.height), (WIDTH, HEIGHT));
        self.log.configures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.fail_start {
            return Err(CaptureError::Pipeline("camera not connected".into()));
        }
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        let live = self.log.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(())
    }

    fn blocking_pull(&self) -> Result<RawFrame, CaptureError> {
        if self.is_stopped() {
            return Err(CaptureError::Stopped);
        }
        let n = self.log.pulls.fetch_add(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Frames { limit, interval } => {
                thread::sleep(interval);
                match limit {
                    Some(limit) if n >= limit => Err(CaptureError::Timeout(0)),
                    _ => Ok(Self::frame(n)),
                }
            }
            Behavior::Hang => {
                while !self.is_stopped() {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(CaptureError::Stopped)
            }
            Behavior::Flaky { interval } => {
                thread::sleep(interval);
                if n % 2 == 1 {
                    Err(CaptureError::Io(std::io::Error::other("usb hiccup")))
                } else {
                    Ok(Self::frame(n))
                }
            }
            Behavior::Sparse { interval } => {
                thread::sleep(interval);
                if n % 2 == 1 {
                    Ok(RawFrame::default())
                } else {
                    Ok(Self::frame(n))
                }
            }
            Behavior::IgnoresStop { hold } => {
                thread::sleep(hold);
                Err(CaptureError::Timeout(hold.as_millis() as u64))
            }
        }
    }

    fn stop(&self) -> Result<(), CaptureError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.log.stops.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.stop_delay);
        self.log.live.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn frames_at_30fps(limit: Option<usize>) -> Behavior {
    Behavior::Frames {
        limit,
        interval: Duration::from_millis(33),
    }
}

/// Small stream, no warm-up, short backoff.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.stream = StreamConfig {
        width: WIDTH,
        height: HEIGHT,
        format: PixelFormat::Rgb24,
        fps: 30,
    };
    config.service.warmup_frames = 0;
    config.service.error_backoff_ms = 1;
    config
}

/// The driver tag of a frame, checking the buffer is whole and uniform.
pub fn tag_of(frame: &Frame) -> u8 {
    assert_eq!(frame.image.dimensions(), (WIDTH, HEIGHT));
    let raw = frame.image.as_raw();
    assert_eq!(raw.len(), (WIDTH * HEIGHT * 3) as usize);
    let first = raw[0];
    assert!(raw.iter().all(|&b| b == first), "torn frame");
    first
}
