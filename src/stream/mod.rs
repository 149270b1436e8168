pub mod registry;
pub mod service;

pub use registry::StreamRegistry;
pub use service::{
    FrameStreamService, InitializationError, ServiceState, StopOnDrop, NO_FRAME_AVAILABLE,
    STREAM_STOPPED,
};
