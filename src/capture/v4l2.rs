//! V4L2 color driver with memory-mapped streaming

use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::{CaptureStream, Stream as _};
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::driver::{CaptureError, ColorDriver};
use super::frame::{ColorPayload, PixelFormat, RawFrame};
use crate::{CaptureConfig, StreamConfig};

pub(crate) fn fourcc(format: PixelFormat) -> FourCC {
    match format {
        PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        PixelFormat::Bgr24 => FourCC::new(b"BGR3"),
        PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
        PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
    }
}

/// Negotiated layout, read back from the device after `set_format`.
#[derive(Debug, Clone, Copy)]
struct Negotiated {
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

/// V4L2 capture device
///
/// The mmap stream lives behind a mutex: the capture thread holds it for one
/// dequeue (bounded by `pull_timeout_ms`), `stop` takes it to tear the stream
/// down.
pub struct V4l2Capture {
    device: Device,
    capture: CaptureConfig,
    negotiated: Option<Negotiated>,
    stream: Mutex<Option<MmapStream<'static>>>,
}

impl V4l2Capture {
    /// Open the device and check it can capture video.
    #[instrument(skip(capture), fields(device = %capture.device))]
    pub fn open(capture: CaptureConfig) -> Result<Self, CaptureError> {
        let device = Device::with_path(&capture.device)?;

        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::NotCaptureDevice);
        }

        Ok(Self {
            device,
            capture,
            negotiated: None,
            stream: Mutex::new(None),
        })
    }

    fn lock_stream(&self) -> std::sync::MutexGuard<'_, Option<MmapStream<'static>>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ColorDriver for V4l2Capture {
    fn configure(&mut self, config: &StreamConfig) -> Result<(), CaptureError> {
        let mut fmt = self.device.format()?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = fourcc(config.format);

        let applied = self.device.set_format(&fmt)?;
        if applied.fourcc != fmt.fourcc {
            return Err(CaptureError::UnsupportedFormat(config.format));
        }
        if applied.width != config.width || applied.height != config.height {
            return Err(CaptureError::UnsupportedResolution {
                width: config.width,
                height: config.height,
            });
        }

        if let Err(e) = self.device.set_params(&Parameters::with_fps(config.fps)) {
            warn!(error = %e, fps = config.fps, "could not set frame rate");
        }

        self.negotiated = Some(Negotiated {
            width: applied.width,
            height: applied.height,
            stride: applied.stride,
            format: config.format,
        });
        debug!(?applied, "format negotiated");
        Ok(())
    }

    #[instrument(skip(self))]
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.negotiated.is_none() {
            return Err(CaptureError::NotStarted);
        }

        let mut stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.capture.buffer_count)?;
        stream.set_timeout(Duration::from_millis(self.capture.pull_timeout_ms));

        // The first dequeue queues every buffer and issues STREAMON, so a
        // broken device fails here, not on the capture thread.
        if let Err(e) = stream.next() {
            return Err(match e.kind() {
                io::ErrorKind::TimedOut => CaptureError::Timeout(self.capture.pull_timeout_ms),
                _ => e.into(),
            });
        }

        *self.lock_stream() = Some(stream);
        info!(
            "Capture stream started with {} buffers",
            self.capture.buffer_count
        );
        Ok(())
    }

    fn blocking_pull(&self) -> Result<RawFrame, CaptureError> {
        let layout = self.negotiated.ok_or(CaptureError::NotStarted)?;

        let mut guard = self.lock_stream();
        let stream = guard.as_mut().ok_or(CaptureError::Stopped)?;

        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(CaptureError::Timeout(self.capture.pull_timeout_ms))
            }
            Err(e) => return Err(e.into()),
        };

        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Ok(RawFrame::default());
        }

        Ok(RawFrame {
            color: Some(ColorPayload {
                width: layout.width,
                height: layout.height,
                stride: if layout.format == PixelFormat::Mjpeg {
                    0
                } else {
                    layout.stride
                },
                format: layout.format,
                data: Bytes::copy_from_slice(&buf[..used]),
            }),
        })
    }

    fn stop(&self) -> Result<(), CaptureError> {
        // STREAMOFF here; buffers are unmapped when the stream drops.
        if let Some(mut stream) = self.lock_stream().take() {
            stream.stop()?;
            info!("Capture stream stopped");
        }
        Ok(())
    }
}
