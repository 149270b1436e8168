//! Latest-frame color stream service
//!
//! One background thread pulls frames from the driver and publishes them to
//! a [`LatestSlot`]. Any number of threads read the newest frame through
//! [`FrameStreamService::streaming_color_frame`], which waits at most the
//! configured read timeout and never fails.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::capture::{decoder, CaptureError, ColorDriver, Frame};
use crate::pipeline::{LatestSlot, SlotRead};
use crate::{Config, StreamConfig};

/// `error` of the synthetic frame served when no frame arrived in time.
pub const NO_FRAME_AVAILABLE: &str = "No frame available";
/// `error` of the synthetic frame served after the service was stopped.
pub const STREAM_STOPPED: &str = "Stream stopped";

const CAPTURE_THREAD_NAME: &str = "color-capture";

/// The hardware pipeline could not be brought up.
#[derive(Debug, Error)]
#[error("failed to initialize color stream: {source}")]
pub struct InitializationError {
    #[from]
    source: CaptureError,
}

impl InitializationError {
    pub fn capture_error(&self) -> &CaptureError {
        &self.source
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Running,
    /// `stop` is releasing the driver and joining the capture thread.
    Stopping,
    Stopped,
}

/// Owns a started color driver and the capture thread feeding the slot.
///
/// A stopped service stays stopped; build a new one to capture again.
pub struct FrameStreamService {
    driver: Arc<dyn ColorDriver>,
    slot: Arc<LatestSlot>,
    running: Arc<AtomicBool>,
    /// Set once teardown has finished.
    stopped: AtomicBool,
    /// Held for the whole of `stop`.
    teardown: Mutex<()>,
    /// Still `Some` after stop if the join timed out.
    worker: Mutex<Option<Worker>>,
    synthetic: CachePadded<AtomicUsize>,
    /// Zeroed image at nominal resolution, shared by all synthetic frames.
    blank: Arc<RgbImage>,
    stream: StreamConfig,
    read_timeout: Duration,
    stop_timeout: Duration,
}

impl FrameStreamService {
    /// Configure and start `driver`, then launch the capture thread.
    #[instrument(skip_all, fields(width = config.stream.width, height = config.stream.height, fps = config.stream.fps))]
    pub fn start<D>(mut driver: D, config: &Config) -> Result<Self, InitializationError>
    where
        D: ColorDriver + 'static,
    {
        let stream = config.stream;
        driver.configure(&stream)?;
        driver.start()?;

        let driver: Arc<dyn ColorDriver> = Arc::new(driver);
        let slot = Arc::new(LatestSlot::new());
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = flume::bounded::<()>(1);

        let producer = Producer {
            driver: Arc::clone(&driver),
            slot: Arc::clone(&slot),
            running: Arc::clone(&running),
            stream,
            warmup_frames: config.service.warmup_frames,
            error_backoff: config.service.error_backoff(),
            pin_core: config.capture.pin_core,
            _done: done_tx,
        };

        let spawned = thread::Builder::new()
            .name(CAPTURE_THREAD_NAME.into())
            .spawn(move || producer.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::Release);
                if let Err(stop_err) = driver.stop() {
                    warn!(error = %stop_err, "failed to release driver after spawn failure");
                }
                return Err(CaptureError::from(e).into());
            }
        };

        info!("Color stream running");

        Ok(Self {
            driver,
            slot,
            running,
            stopped: AtomicBool::new(false),
            teardown: Mutex::new(()),
            worker: Mutex::new(Some(Worker {
                handle,
                done: done_rx,
            })),
            synthetic: CachePadded::new(AtomicUsize::new(0)),
            blank: Arc::new(RgbImage::new(stream.width, stream.height)),
            stream,
            read_timeout: config.service.read_timeout(),
            stop_timeout: config.service.stop_timeout(),
        })
    }

    /// The newest frame, waiting up to the read timeout if none has arrived yet.
    ///
    /// Never fails: on timeout the result is a zeroed frame with `error` set
    /// to [`NO_FRAME_AVAILABLE`], after stop it carries [`STREAM_STOPPED`].
    pub fn streaming_color_frame(&self) -> Frame {
        let (reason, error) = match self.slot.wait_latest(self.read_timeout) {
            SlotRead::Frame(frame) => return Frame::clone(&frame),
            SlotRead::Empty => {
                debug!(timeout = ?self.read_timeout, "no frame within read timeout");
                ("timeout", NO_FRAME_AVAILABLE)
            }
            SlotRead::Closed => ("stopped", STREAM_STOPPED),
        };
        self.synthetic.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("synthetic_frames", "reason" => reason).increment(1);
        Frame::synthetic(Arc::clone(&self.blank), error)
    }

    /// Stop capturing and release the hardware. Idempotent.
    ///
    /// Returns once teardown is complete, also for callers that lost the race
    /// to a concurrent `stop`. The capture thread is joined for at most
    /// `stop_timeout`; a thread stuck inside the driver past that is left
    /// detached and [`is_released`](Self::is_released) stays false until it
    /// exits.
    pub fn stop(&self) {
        let _teardown = self.teardown.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Stopping color stream");

        self.slot.close();

        if let Err(e) = self.driver.stop() {
            warn!(error = %e, "driver stop failed");
        }

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(live) = worker.take() {
            *worker = live.join(self.stop_timeout).err();
        }
        drop(worker);

        self.stopped.store(true, Ordering::Release);
    }

    pub fn state(&self) -> ServiceState {
        if self.running.load(Ordering::Acquire) {
            ServiceState::Running
        } else if self.stopped.load(Ordering::Acquire) {
            ServiceState::Stopped
        } else {
            ServiceState::Stopping
        }
    }

    /// Stopped, and no capture thread still holds the driver.
    pub fn is_released(&self) -> bool {
        if self.state() != ServiceState::Stopped {
            return false;
        }
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        match worker.take() {
            Some(detached) if !detached.has_exited() => {
                *worker = Some(detached);
                false
            }
            Some(exited) => {
                exited.reap();
                true
            }
            None => true,
        }
    }

    pub fn stream_config(&self) -> &StreamConfig {
        &self.stream
    }

    /// Slot statistics: (published, replaced, reads)
    pub fn stats(&self) -> (usize, usize, usize) {
        self.slot.stats()
    }

    /// Number of synthetic frames served, for timeouts and after stop.
    pub fn synthetic_frames(&self) -> usize {
        self.synthetic.load(Ordering::Relaxed)
    }
}

impl Drop for FrameStreamService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Stops the wrapped service when dropped, whichever way the holder exits.
pub struct StopOnDrop(Arc<FrameStreamService>);

impl StopOnDrop {
    pub fn new(service: Arc<FrameStreamService>) -> Self {
        Self(service)
    }
}

impl Deref for StopOnDrop {
    type Target = FrameStreamService;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.stop();
    }
}

struct Worker {
    handle: JoinHandle<()>,
    /// Disconnects when the capture thread exits.
    done: flume::Receiver<()>,
}

impl Worker {
    /// Wait up to `timeout` for the capture thread. Hands the worker back if
    /// it is still inside the driver.
    fn join(self, timeout: Duration) -> Result<(), Worker> {
        match self.done.recv_timeout(timeout) {
            Err(flume::RecvTimeoutError::Timeout) => {
                warn!(?timeout, "capture thread still inside the driver, detaching it");
                Err(self)
            }
            _ => {
                self.reap();
                Ok(())
            }
        }
    }

    fn has_exited(&self) -> bool {
        self.done.is_disconnected()
    }

    fn reap(self) {
        if self.handle.join().is_err() {
            warn!("capture thread panicked");
        }
    }
}

/// Capture loop state, moved onto the capture thread.
struct Producer {
    driver: Arc<dyn ColorDriver>,
    slot: Arc<LatestSlot>,
    running: Arc<AtomicBool>,
    stream: StreamConfig,
    warmup_frames: u32,
    error_backoff: Duration,
    pin_core: Option<usize>,
    /// Declared last so it drops after `driver`.
    _done: flume::Sender<()>,
}

impl Producer {
    fn run(self) {
        if let Some(id) = self.pin_core {
            if !core_affinity::set_for_current(core_affinity::CoreId { id }) {
                warn!(core = id, "could not pin capture thread");
            }
        }

        self.warm_up();

        let mut sequence = 0u64;
        let mut last_publish = Instant::now();
        while self.is_running() {
            let raw = match self.driver.blocking_pull() {
                Ok(raw) => raw,
                Err(_) if !self.is_running() => break,
                Err(e) => {
                    self.transient(&e);
                    continue;
                }
            };

            let Some(payload) = raw.color else {
                metrics::counter!("empty_pulls").increment(1);
                continue;
            };

            match decoder::to_rgb(&payload, &self.stream) {
                Ok(image) => {
                    sequence += 1;
                    self.slot.publish(Frame::captured(image, sequence));

                    metrics::counter!("frames_captured").increment(1);
                    metrics::histogram!("capture_interval_us")
                        .record(last_publish.elapsed().as_micros() as f64);
                    last_publish = Instant::now();
                }
                Err(e) => self.transient(&e),
            }
        }

        debug!(frames = sequence, "capture loop exited");
    }

    /// Pull and drop the first frames while auto-exposure settles.
    fn warm_up(&self) {
        for n in 0..self.warmup_frames {
            if !self.is_running() {
                return;
            }
            if let Err(e) = self.driver.blocking_pull() {
                debug!(error = %e, frame = n, "warm-up pull failed");
            }
        }
        debug!(frames = self.warmup_frames, "warm-up complete");
    }

    fn transient(&self, error: &CaptureError) {
        if !self.is_running() {
            return;
        }
        warn!(error = %error, "transient capture failure");
        metrics::counter!("capture_errors").increment(1);
        thread::sleep(self.error_backoff);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}
