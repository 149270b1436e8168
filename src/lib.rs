pub mod capture;
pub mod display;
pub mod pipeline;
pub mod stream;
pub mod tool;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{CaptureError, ColorDriver, Frame, PixelFormat};
pub use stream::{FrameStreamService, InitializationError, ServiceState, StreamRegistry};

/// Prefix for environment overrides, e.g. `IRIS__STREAM__FPS=15`.
const ENV_PREFIX: &str = "IRIS";

/// System configuration
///
/// Loaded once at startup; the stream shape is fixed for the lifetime of a
/// running service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub stream: StreamConfig,
    pub service: ServiceConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device node; empty means auto-detect.
    pub device: String,
    pub buffer_count: u32,
    /// Upper bound on a single hardware pull.
    pub pull_timeout_ms: u64,
    /// Pin the capture thread to this core.
    pub pin_core: Option<usize>,
}

/// Color stream shape requested from the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub warmup_frames: u32,
    pub read_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub error_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            buffer_count: 4,
            pull_timeout_ms: 500,
            pin_core: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            format: PixelFormat::Rgb24,
            fps: 30,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            warmup_frames: 5,
            read_timeout_ms: 1000,
            stop_timeout_ms: 2000,
            error_backoff_ms: 10,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            poll_interval_ms: 10,
        }
    }
}

impl ServiceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `IRIS__*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}
