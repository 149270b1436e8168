//! Capture-and-analyze entry point for agent tools.

use color_eyre::Result;
use image::RgbImage;
use tracing::{instrument, warn};

use crate::FrameStreamService;

/// Something that can answer a prompt about an image, e.g. a vision model client.
pub trait ImageAnalyzer {
    fn analyze(&self, image: &RgbImage, prompt: &str) -> Result<String>;
}

/// Grab the newest frame and hand it to `analyzer`.
///
/// Always returns text for the agent: the analysis, or a readable failure.
/// Placeholder frames are reported as failures and never reach the analyzer.
#[instrument(skip(service, analyzer))]
pub fn capture_and_analyze(
    service: &FrameStreamService,
    analyzer: &dyn ImageAnalyzer,
    prompt: &str,
) -> String {
    let frame = service.streaming_color_frame();

    if let Some(error) = frame.error {
        warn!(%error, "no frame to analyze");
        return format!("Error capturing frame: {}", error);
    }

    match analyzer.analyze(&frame.image, prompt) {
        Ok(answer) => answer,
        Err(e) => format!("Error analyzing image: {}", e),
    }
}
