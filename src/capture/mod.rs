pub mod decoder;
pub mod driver;
pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod v4l2;

pub use driver::{CaptureError, ColorDriver};
pub use frame::{ColorPayload, Frame, PixelFormat, RawFrame};
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstCapture;
pub use v4l2::V4l2Capture;
