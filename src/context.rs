use crate::config::Config;
use crate::device::Device;
use crate::driver::Driver;
use crate::event_loop::{EventLoop, Logger, Routes, SharedLogger};
use crate::types::LogLevel;
use crate::{FreenectError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Set while a context exists in this process.
static CONTEXT_ACTIVE: AtomicBool = AtomicBool::new(false);

/// The library context.
///
/// At most one exists per process. It owns the driver, the event loop thread
/// and one [`Device`] handle per unit enumerated at initialization. Dropping
/// it (or calling [`shutdown`](Freenect::shutdown)) stops all streams, joins
/// the event loop and closes the driver.
pub struct Freenect {
    driver: Arc<dyn Driver>,
    logger: SharedLogger,
    devices: Vec<Device>,
    event_loop: Option<EventLoop>,
    released: bool,
}

impl Freenect {
    /// Initialize with default settings.
    pub fn initialize(driver: impl Driver + 'static) -> Result<Freenect> {
        Self::with_config(driver, Config::default())
    }

    /// Initialize with explicit settings.
    ///
    /// Fails with [`AlreadyInitialized`](FreenectError::AlreadyInitialized)
    /// while another context is alive; that context is unaffected.
    pub fn with_config(driver: impl Driver + 'static, config: Config) -> Result<Freenect> {
        if CONTEXT_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(FreenectError::AlreadyInitialized);
        }

        let driver: Arc<dyn Driver> = Arc::new(driver);
        match Self::build(Arc::clone(&driver), config) {
            Ok(context) => Ok(context),
            Err(e) => {
                if let Err(code) = driver.shutdown() {
                    log::warn!("Driver shutdown after failed init returned {}", code);
                }
                CONTEXT_ACTIVE.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    fn build(driver: Arc<dyn Driver>, config: Config) -> Result<Freenect> {
        driver.select_subdevices(config.subdevices);
        let count = driver.device_count().map_err(FreenectError::Driver)?;

        let routes = Arc::new(Routes::default());
        let logger: SharedLogger = Arc::new(RwLock::new(None));
        let devices = (0..count)
            .map(|index| Device::new(index, Arc::clone(&driver), Arc::clone(&routes)))
            .collect();

        let event_loop = EventLoop::start(
            Arc::clone(&driver),
            routes,
            Arc::clone(&logger),
            config.poll_timeout,
        )?;

        log::info!(
            "Freenect initialized: {} device(s), subdevices {:?}",
            count,
            config.subdevices
        );

        Ok(Freenect {
            driver,
            logger,
            devices,
            event_loop: Some(event_loop),
            released: false,
        })
    }

    /// Number of devices enumerated at initialization.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }

    pub fn device(&mut self, index: usize) -> Result<&mut Device> {
        let count = self.devices.len();
        self.devices
            .get_mut(index)
            .ok_or(FreenectError::DeviceIndex { index, count })
    }

    /// Receive the driver's diagnostic messages. Replaces any previous logger.
    pub fn set_logger<F>(&self, logger: F)
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        let logger: Logger = Box::new(logger);
        *self.logger.write().unwrap_or_else(PoisonError::into_inner) = Some(logger);
    }

    /// Drop the registered logger; driver messages are discarded afterwards.
    pub fn clear_logger(&self) {
        *self.logger.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Maximum verbosity of driver messages.
    pub fn set_log_level(&self, level: LogLevel) {
        self.driver.set_log_level(level);
    }

    /// Whether the event loop is still servicing the driver. It stops for good
    /// if a poll fails or a frame handoff is found to be corrupt.
    pub fn is_event_loop_running(&self) -> bool {
        self.event_loop.as_ref().is_some_and(EventLoop::is_running)
    }

    /// Tear down the context. Equivalent to dropping it, but reports the
    /// driver's shutdown result.
    pub fn shutdown(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        for device in self.devices.iter_mut() {
            device.stop_streams();
        }
        if let Some(mut event_loop) = self.event_loop.take() {
            event_loop.stop();
        }
        for device in self.devices.iter_mut() {
            if let Err(e) = device.close() {
                log::warn!("Failed to close device {}: {}", device.index(), e);
            }
        }

        let result = self.driver.shutdown().map_err(FreenectError::Driver);
        CONTEXT_ACTIVE.store(false, Ordering::Release);
        log::info!("Freenect shut down");
        result
    }
}

impl Drop for Freenect {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            log::warn!("Freenect shutdown failed: {}", e);
        }
    }
}

impl std::fmt::Debug for Freenect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Freenect")
            .field("devices", &self.devices)
            .field("event_loop_running", &self.is_event_loop_running())
            .finish()
    }
}
