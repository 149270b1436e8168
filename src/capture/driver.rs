//! Hardware driver seam for the color stream.

use thiserror::Error;

use super::frame::{PixelFormat, RawFrame};
use crate::StreamConfig;

/// Errors raised by a color driver.
///
/// During capture every variant is transient; during configure/start they
/// become an [`InitializationError`](crate::InitializationError).
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("device i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("device does not support video capture")]
    NotCaptureDevice,
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("device cannot deliver {width}x{height}")]
    UnsupportedResolution { width: u32, height: u32 },
    #[error("stream not started")]
    NotStarted,
    #[error("no frame within {0} ms")]
    Timeout(u64),
    #[error("stream stopped")]
    Stopped,
    #[error("previous capture thread still holds the device")]
    Busy,
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("pipeline error: {0}")]
    Pipeline(String),
}

/// A color camera driver.
///
/// `configure` and `start` run once on the constructing thread with exclusive
/// access. Afterwards the driver is shared between the capture thread
/// (`blocking_pull`) and whoever stops the service (`stop`), so those two take
/// `&self` and must be internally synchronized. `stop` must unblock, or
/// bound, a pull that is in progress.
pub trait ColorDriver: Send + Sync {
    /// Request the color stream at the given resolution, format and rate.
    fn configure(&mut self, config: &StreamConfig) -> Result<(), CaptureError>;

    fn start(&mut self) -> Result<(), CaptureError>;

    /// Block for the next frame. May take up to one frame interval.
    fn blocking_pull(&self) -> Result<RawFrame, CaptureError>;

    fn stop(&self) -> Result<(), CaptureError>;
}

impl<D: ColorDriver + ?Sized> ColorDriver for Box<D> {
    fn configure(&mut self, config: &StreamConfig) -> Result<(), CaptureError> {
        (**self).configure(config)
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        (**self).start()
    }

    fn blocking_pull(&self) -> Result<RawFrame, CaptureError> {
        (**self).blocking_pull()
    }

    fn stop(&self) -> Result<(), CaptureError> {
        (**self).stop()
    }
}
