//! Iris: live camera view backed by the latest-frame color stream

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use iris::display::Sdl2Display;
use iris::stream::StopOnDrop;
use iris::{utils, CaptureError, ColorDriver, Config, StreamRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("iris=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Iris launching...");

    // Load configuration: first argument, then IRIS_CONFIG
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| env::var_os("IRIS_CONFIG").map(PathBuf::from));
    let mut config = Config::load(config_path.as_deref())?;

    if config.capture.device.is_empty() {
        config.capture.device = utils::auto_detect_device(config.stream.format)?;
    }
    info!("Using capture device: {}", config.capture.device);

    let registry = StreamRegistry::new(config.clone(), open_driver);
    let stream = StopOnDrop::new(registry.get_instance()?);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received");
                shutdown.store(true, Ordering::Release);
            }
        });
    }

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut display = Sdl2Display::new(&sdl_context, &config.display)?;
    display.run(&sdl_context, stream, &shutdown)?;

    info!("Iris shutting down");
    Ok(())
}

#[cfg(not(feature = "gstreamer-pipeline"))]
fn open_driver(config: &Config) -> std::result::Result<Box<dyn ColorDriver>, CaptureError> {
    Ok(Box::new(iris::capture::V4l2Capture::open(
        config.capture.clone(),
    )?))
}

#[cfg(feature = "gstreamer-pipeline")]
fn open_driver(config: &Config) -> std::result::Result<Box<dyn ColorDriver>, CaptureError> {
    Ok(Box::new(iris::capture::GstCapture::new(
        config.capture.clone(),
    )?))
}
