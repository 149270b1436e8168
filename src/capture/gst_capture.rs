//! GStreamer color driver: `v4l2src ! decode ! videoconvert ! appsink`, RGB out

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use super::driver::{CaptureError, ColorDriver};
use super::frame::{ColorPayload, PixelFormat, RawFrame};
use crate::{CaptureConfig, StreamConfig};

/// GStreamer-based capture with hardware decode when available
///
/// Pipeline and appsink are thread-safe GObjects, so pull and stop need no
/// extra locking. Setting the pipeline to `Null` makes a pending pull return.
pub struct GstCapture {
    capture: CaptureConfig,
    pipeline: Option<gst::Pipeline>,
    appsink: Option<gst_app::AppSink>,
}

impl GstCapture {
    pub fn new(capture: CaptureConfig) -> Result<Self, CaptureError> {
        gst::init().map_err(|e| CaptureError::Pipeline(format!("gstreamer init: {}", e)))?;
        Ok(Self {
            capture,
            pipeline: None,
            appsink: None,
        })
    }

    /// Build the launch string for the requested source format.
    fn pipeline_string(&self, config: &StreamConfig) -> Result<String, CaptureError> {
        let device = &self.capture.device;
        let (width, height, fps) = (config.width, config.height, config.fps);

        let source = match config.format {
            PixelFormat::Mjpeg => format!(
                "image/jpeg,width={},height={},framerate={}/1 ! {}",
                width,
                height,
                fps,
                Self::detect_jpeg_decoder()
            ),
            PixelFormat::Yuyv4 => format!(
                "video/x-raw,format=YUY2,width={},height={},framerate={}/1",
                width, height, fps
            ),
            PixelFormat::Rgb24 => format!(
                "video/x-raw,format=RGB,width={},height={},framerate={}/1",
                width, height, fps
            ),
            PixelFormat::Bgr24 => format!(
                "video/x-raw,format=BGR,width={},height={},framerate={}/1",
                width, height, fps
            ),
        };

        Ok(format!(
            "v4l2src device={} name=source ! {} ! \
             queue max-size-buffers=2 max-size-time=0 max-size-bytes=0 ! \
             videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink",
            device, source
        ))
    }

    /// Detect best available JPEG decoder (hardware > software)
    fn detect_jpeg_decoder() -> &'static str {
        let decoders = ["nvjpegdec", "vaapijpegdec", "v4l2jpegdec", "jpegdec"];

        for decoder in decoders {
            if gst::ElementFactory::find(decoder).is_some() {
                debug!(decoder, "jpeg decoder selected");
                return decoder;
            }
        }

        warn!("No hardware JPEG decoder found, using software decoder");
        "jpegdec"
    }
}

impl ColorDriver for GstCapture {
    fn configure(&mut self, config: &StreamConfig) -> Result<(), CaptureError> {
        let launch = self.pipeline_string(config)?;
        info!("Pipeline: {}", launch);

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| CaptureError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Pipeline("launch string is not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| CaptureError::Pipeline("appsink element missing".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::Pipeline("appsink has wrong type".into()))?;

        // Only the newest buffer matters.
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_property("sync", false);

        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    #[instrument(skip(self))]
    fn start(&mut self) -> Result<(), CaptureError> {
        let pipeline = self.pipeline.as_ref().ok_or(CaptureError::NotStarted)?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::Pipeline(format!("failed to start pipeline: {:?}", e)))?;

        let (state_change, _, _) = pipeline.state(Some(gst::ClockTime::from_seconds(5)));
        match state_change {
            Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::Async) => {
                info!("Pipeline started");
                Ok(())
            }
            other => {
                let _ = pipeline.set_state(gst::State::Null);
                Err(CaptureError::Pipeline(format!(
                    "pipeline did not reach Playing: {:?}",
                    other
                )))
            }
        }
    }

    fn blocking_pull(&self) -> Result<RawFrame, CaptureError> {
        let appsink = self.appsink.as_ref().ok_or(CaptureError::NotStarted)?;

        let timeout = gst::ClockTime::from_mseconds(self.capture.pull_timeout_ms);
        let Some(sample) = appsink.try_pull_sample(timeout) else {
            if appsink.is_eos() {
                return Err(CaptureError::Stopped);
            }
            return Err(CaptureError::Timeout(self.capture.pull_timeout_ms));
        };

        let Some(buffer) = sample.buffer() else {
            return Ok(RawFrame::default());
        };
        let caps = sample
            .caps()
            .ok_or_else(|| CaptureError::Pipeline("sample has no caps".into()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| CaptureError::Pipeline("caps are not raw video".into()))?;

        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::Pipeline("failed to map buffer".into()))?;

        Ok(RawFrame {
            color: Some(ColorPayload {
                width: info.width(),
                height: info.height(),
                stride: info.stride()[0] as u32,
                format: PixelFormat::Rgb24, // Output is always RGB after conversion
                data: Bytes::copy_from_slice(map.as_slice()),
            }),
        })
    }

    fn stop(&self) -> Result<(), CaptureError> {
        if let Some(pipeline) = &self.pipeline {
            info!("Stopping GStreamer pipeline");
            pipeline
                .set_state(gst::State::Null)
                .map_err(|e| CaptureError::Pipeline(format!("failed to stop pipeline: {:?}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_pipeline_converts_to_rgb() {
        let capture = GstCapture {
            capture: CaptureConfig::default(),
            pipeline: None,
            appsink: None,
        };
        let stream = StreamConfig {
            format: PixelFormat::Yuyv4,
            ..StreamConfig::default()
        };
        let launch = capture.pipeline_string(&stream).unwrap();
        assert!(launch.starts_with("v4l2src device=/dev/video0"));
        assert!(launch.contains("format=YUY2,width=1280,height=720,framerate=30/1"));
        assert!(launch.ends_with("video/x-raw,format=RGB ! appsink name=appsink"));
    }
}
