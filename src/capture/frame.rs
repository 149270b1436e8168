use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// One captured color image plus an optional error annotation.
///
/// Frames sourced from hardware never carry an `error`. Synthetic frames
/// always carry one, together with a zeroed image of the nominal resolution.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Immutable RGB8 buffer - can be shared across threads without copying
    pub image: Arc<RgbImage>,

    pub error: Option<String>,

    /// Producer-assigned, starts at 1. Synthetic frames use 0.
    pub sequence: u64,

    pub captured_at: Instant,
}

impl Frame {
    pub(crate) fn captured(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            error: None,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub(crate) fn synthetic(blank: Arc<RgbImage>, error: &str) -> Self {
        Self {
            image: blank,
            error: Some(error.to_owned()),
            sequence: 0,
            captured_at: Instant::now(),
        }
    }
}

/// Raw driver output for one pull.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// `None` when the pull produced no usable color data.
    pub color: Option<ColorPayload>,
}

/// Undecoded color plane as delivered by the driver
#[derive(Debug, Clone)]
pub struct ColorPayload {
    pub width: u32,
    pub height: u32,
    /// Bytes per row for packed formats, 0 when tightly packed.
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}
