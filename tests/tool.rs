mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use color_eyre::{eyre::eyre, Result};
use common::*;
use image::RgbImage;
use iris::tool::{capture_and_analyze, ImageAnalyzer};
use iris::FrameStreamService;

#[derive(Default)]
struct Describer {
    calls: AtomicUsize,
    fail: bool,
}

impl ImageAnalyzer for Describer {
    fn analyze(&self, image: &RgbImage, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(eyre!("vision endpoint unreachable"));
        }
        let (w, h) = image.dimensions();
        Ok(format!("{}: {}x{} image", prompt, w, h))
    }
}

#[test]
fn live_frame_is_forwarded_to_analyzer() {
    let (driver, _log) = ScriptedDriver::new(frames_at_30fps(None));
    let service = FrameStreamService::start(driver, &test_config()).unwrap();
    let analyzer = Describer::default();

    let answer = capture_and_analyze(&service, &analyzer, "what is on the desk");

    assert_eq!(answer, "what is on the desk: 64x48 image");
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn placeholder_frame_never_reaches_analyzer() {
    let (driver, _log) = ScriptedDriver::new(Behavior::Hang);
    let service = FrameStreamService::start(driver, &test_config()).unwrap();
    let analyzer = Describer::default();

    let answer = capture_and_analyze(&service, &analyzer, "describe");

    assert_eq!(answer, "Error capturing frame: No frame available");
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn stopped_stream_reports_failure() {
    let (driver, _log) = ScriptedDriver::new(frames_at_30fps(None));
    let service = FrameStreamService::start(driver, &test_config()).unwrap();
    service.stop();

    let answer = capture_and_analyze(&service, &Describer::default(), "describe");
    assert_eq!(answer, "Error capturing frame: Stream stopped");
}

#[test]
fn analyzer_failure_is_reported_as_text() {
    let (driver, _log) = ScriptedDriver::new(frames_at_30fps(None));
    let service = FrameStreamService::start(driver, &test_config()).unwrap();
    let analyzer = Describer {
        fail: true,
        ..Describer::default()
    };

    let answer = capture_and_analyze(&service, &analyzer, "describe");
    assert_eq!(answer, "Error analyzing image: vision endpoint unreachable");
}
