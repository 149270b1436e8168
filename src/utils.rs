use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device};

use crate::capture::{v4l2::fourcc, PixelFormat};

/// Find the first capture device that offers `format`.
pub fn auto_detect_device(format: PixelFormat) -> Result<String> {
    info!(?format, "Auto-detecting capture devices...");
    let wanted = fourcc(format);

    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            debug!(%path, "not a capture device");
            continue;
        }

        if let Ok(formats) = dev.enum_formats() {
            if formats.iter().any(|fmt| fmt.fourcc == wanted) {
                info!("Found {} device: {} - {}", wanted, path, caps.card);
                return Ok(path);
            }
        }
    }

    Err(eyre!("No capture device offering {:?} found", format))
}
