use image::RgbImage;
use zune_jpeg::JpegDecoder;

use super::driver::CaptureError;
use super::frame::{ColorPayload, PixelFormat};
use crate::StreamConfig;

/// Convert a driver payload into an RGB8 image of the configured resolution.
pub fn to_rgb(payload: &ColorPayload, expected: &StreamConfig) -> Result<RgbImage, CaptureError> {
    if payload.width != expected.width || payload.height != expected.height {
        return Err(CaptureError::Decode(format!(
            "payload is {}x{}, stream is {}x{}",
            payload.width, payload.height, expected.width, expected.height
        )));
    }

    let (width, height) = (payload.width as usize, payload.height as usize);
    let pixels = match payload.format {
        PixelFormat::Rgb24 => pack_rows(payload, width * 3, height)?,
        PixelFormat::Bgr24 => {
            let mut rgb = pack_rows(payload, width * 3, height)?;
            for px in rgb.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            rgb
        }
        PixelFormat::Yuyv4 => yuyv_to_rgb(&pack_rows(payload, width * 2, height)?),
        PixelFormat::Mjpeg => {
            let mut decoder = JpegDecoder::new(&payload.data[..]);
            decoder
                .decode()
                .map_err(|e| CaptureError::Decode(format!("mjpeg: {:?}", e)))?
        }
    };

    if pixels.len() != width * height * 3 {
        return Err(CaptureError::Decode(format!(
            "decoded {} bytes, expected {}",
            pixels.len(),
            width * height * 3
        )));
    }

    RgbImage::from_raw(payload.width, payload.height, pixels)
        .ok_or_else(|| CaptureError::Decode("buffer does not match image shape".into()))
}

/// Drop per-row padding so rows are exactly `row_bytes` long.
fn pack_rows(payload: &ColorPayload, row_bytes: usize, rows: usize) -> Result<Vec<u8>, CaptureError> {
    let stride = match payload.stride as usize {
        0 => row_bytes,
        s if s < row_bytes => {
            return Err(CaptureError::Decode(format!(
                "stride {} shorter than row of {} bytes",
                s, row_bytes
            )))
        }
        s => s,
    };

    // the last row may omit its padding
    let needed = stride * rows.saturating_sub(1) + row_bytes;
    if payload.data.len() < needed {
        return Err(CaptureError::Decode(format!(
            "payload has {} bytes, expected at least {}",
            payload.data.len(),
            needed
        )));
    }

    if stride == row_bytes {
        return Ok(payload.data[..row_bytes * rows].to_vec());
    }

    let mut packed = Vec::with_capacity(row_bytes * rows);
    for row in payload.data.chunks(stride).take(rows) {
        packed.extend_from_slice(&row[..row_bytes]);
    }
    Ok(packed)
}

/// BT.601 limited-range YUYV (YUY2) to RGB24.
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);
    for quad in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (i32::from(y) - 16);
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(c + 409 * e),
        clamp(c - 100 * d - 208 * e),
        clamp(c + 516 * d),
    ]
}
