//! Construct-or-reuse owner of the process's color stream.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use super::service::{FrameStreamService, InitializationError, ServiceState};
use crate::capture::{CaptureError, ColorDriver};
use crate::Config;

type DriverFactory = dyn Fn(&Config) -> Result<Box<dyn ColorDriver>, CaptureError> + Send + Sync;

/// Hands out the one running [`FrameStreamService`].
///
/// Build one registry at the top of the application and pass it by reference.
/// The first [`get_instance`](Self::get_instance) opens and starts the
/// hardware; later calls return the same service while it is running.
/// Concurrent first calls serialize on an internal lock, so the driver is
/// started once. After a stop, the next call brings up a fresh service, but
/// only once the old one has released the driver.
pub struct StreamRegistry {
    config: Config,
    factory: Box<DriverFactory>,
    current: Mutex<Option<Arc<FrameStreamService>>>,
}

impl StreamRegistry {
    pub fn new<F>(config: Config, factory: F) -> Self
    where
        F: Fn(&Config) -> Result<Box<dyn ColorDriver>, CaptureError> + Send + Sync + 'static,
    {
        Self {
            config,
            factory: Box::new(factory),
            current: Mutex::new(None),
        }
    }

    pub fn get_instance(&self) -> Result<Arc<FrameStreamService>, InitializationError> {
        let mut current = self.lock();

        if let Some(service) = current.as_ref() {
            if service.state() == ServiceState::Running {
                return Ok(Arc::clone(service));
            }
            // waits out a teardown already in flight elsewhere
            service.stop();
            if !service.is_released() {
                warn!("previous capture thread has not exited yet");
                return Err(CaptureError::Busy.into());
            }
            debug!("previous color stream was stopped, re-initializing");
            current.take();
        }

        let driver = (self.factory)(&self.config)?;
        let service = Arc::new(FrameStreamService::start(driver, &self.config)?);
        *current = Some(Arc::clone(&service));
        info!("Color stream instance created");
        Ok(service)
    }

    pub fn state(&self) -> ServiceState {
        match self.lock().as_ref() {
            Some(service) => service.state(),
            None => ServiceState::Uninitialized,
        }
    }

    /// Stop the current instance, if any.
    ///
    /// Holds the registry lock until teardown completes, so no new instance
    /// can start while the old one still owns the device.
    pub fn stop(&self) {
        if let Some(service) = self.lock().as_ref() {
            service.stop();
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<FrameStreamService>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
