use crate::driver::{Driver, DriverEvent};
use crate::buffer::BufferId;
use crate::stream::{lock_channel, Depth, Modality, SharedChannel, Video};
use crate::types::{LogLevel, NativeDevice};
use crate::{FreenectError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// Callback for messages emitted by the device driver.
pub type Logger = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

pub(crate) type SharedLogger = Arc<RwLock<Option<Logger>>>;

/// Routes frame completions to the channel configured for each device.
#[derive(Default)]
pub(crate) struct Routes {
    video: Mutex<HashMap<NativeDevice, SharedChannel<Video>>>,
    depth: Mutex<HashMap<NativeDevice, SharedChannel<Depth>>>,
}

fn lock_table<M: Modality>(
    table: &Mutex<HashMap<NativeDevice, SharedChannel<M>>>,
) -> MutexGuard<'_, HashMap<NativeDevice, SharedChannel<M>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Routes {
    pub(crate) fn route_video(&self, device: NativeDevice, channel: SharedChannel<Video>) {
        lock_table(&self.video).insert(device, channel);
    }

    pub(crate) fn route_depth(&self, device: NativeDevice, channel: SharedChannel<Depth>) {
        lock_table(&self.depth).insert(device, channel);
    }

    pub(crate) fn unroute_video(&self, device: NativeDevice) {
        lock_table(&self.video).remove(&device);
    }

    pub(crate) fn unroute_depth(&self, device: NativeDevice) {
        lock_table(&self.depth).remove(&device);
    }

    pub(crate) fn unroute_device(&self, device: NativeDevice) {
        self.unroute_video(device);
        self.unroute_depth(device);
    }

    fn video(&self, device: NativeDevice) -> Option<SharedChannel<Video>> {
        lock_table(&self.video).get(&device).cloned()
    }

    fn depth(&self, device: NativeDevice) -> Option<SharedChannel<Depth>> {
        lock_table(&self.depth).get(&device).cloned()
    }
}

/// Background thread servicing driver events.
///
/// Polls the driver with a short timeout and dispatches each event in order:
/// log messages to the registered logger, frame completions to the routed
/// channel. Exits when stopped or when a poll fails.
pub(crate) struct EventLoop {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl EventLoop {
    pub(crate) fn start(
        driver: Arc<dyn Driver>,
        routes: Arc<Routes>,
        logger: SharedLogger,
        poll_timeout: Duration,
    ) -> Result<EventLoop> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();

        let thread = std::thread::Builder::new()
            .name("freenect-events".into())
            .spawn(move || {
                event_loop(driver.as_ref(), &routes, &logger, &stop_clone, poll_timeout);
            })
            .map_err(|e| FreenectError::EventLoop(format!("Failed to spawn event thread: {}", e)))?;

        Ok(EventLoop {
            stop_flag,
            thread: Some(thread),
        })
    }

    /// Whether the thread is still polling.
    pub(crate) fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signal the thread and wait for it to exit.
    pub(crate) fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Event loop thread panicked");
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn event_loop(
    driver: &dyn Driver,
    routes: &Routes,
    logger: &SharedLogger,
    stop_flag: &AtomicBool,
    poll_timeout: Duration,
) {
    log::info!("Event loop started");

    loop {
        if stop_flag.load(Ordering::Acquire) {
            log::info!("Event loop stopping (stop flag set)");
            break;
        }

        let events = match driver.process_events(poll_timeout) {
            Ok(events) => events,
            Err(code) => {
                log::warn!("Event processing failed with code {}, event loop exiting", code);
                break;
            }
        };

        for event in events {
            dispatch(driver, routes, logger, event);
        }

        std::thread::yield_now();
    }
}

fn dispatch(driver: &dyn Driver, routes: &Routes, logger: &SharedLogger, event: DriverEvent) {
    match event {
        DriverEvent::Log { level, message } => {
            let logger = logger.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(logger) = logger.as_ref() {
                logger(level, &message);
            }
        }
        DriverEvent::VideoFrame {
            device,
            buffer,
            timestamp,
        } => deliver(driver, routes.video(device), device, buffer, timestamp),
        DriverEvent::DepthFrame {
            device,
            buffer,
            timestamp,
        } => deliver(driver, routes.depth(device), device, buffer, timestamp),
        DriverEvent::MotorChanged { device } => {
            log::trace!("Motor state changed on {:?}", device);
        }
    }
}

fn deliver<M: Modality>(
    driver: &dyn Driver,
    channel: Option<SharedChannel<M>>,
    device: NativeDevice,
    buffer: BufferId,
    timestamp: u32,
) {
    let Some(channel) = channel else {
        log::debug!("Dropping {} frame for unrouted device {:?}", M::NAME, device);
        return;
    };

    let result = lock_channel(&channel).deliver(driver, buffer, timestamp);
    match result {
        Ok(()) => {}
        Err(FreenectError::Driver(code)) => {
            log::error!("Failed to reinstall {} buffer on {:?}: {}", M::NAME, device, code);
        }
        Err(e) => {
            log::error!("{} delivery on {:?} failed: {}", M::NAME, device, e);
            panic!("frame buffer handoff broken: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDriver;
    use std::time::Instant;

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_logs_reach_registered_logger() {
        let sim = SimulatedDriver::builder().build();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let logger: Logger = Box::new(move |level, msg| {
            sink.lock().unwrap().push((level, msg.to_string()));
        });

        let mut lp = EventLoop::start(
            Arc::new(sim.clone()),
            Arc::new(Routes::default()),
            Arc::new(RwLock::new(Some(logger))),
            Duration::from_millis(5),
        )
        .unwrap();

        sim.emit_log(LogLevel::Error, "sensor overheated");
        assert!(wait_until(|| !seen.lock().unwrap().is_empty()));
        lp.stop();

        assert_eq!(
            seen.lock().unwrap()[0],
            (LogLevel::Error, "sensor overheated".to_string())
        );
    }

    #[test]
    fn test_poll_failure_ends_loop() {
        let sim = SimulatedDriver::builder().build();
        let lp = EventLoop::start(
            Arc::new(sim.clone()),
            Arc::new(Routes::default()),
            Arc::new(RwLock::new(None)),
            Duration::from_millis(5),
        )
        .unwrap();
        assert!(lp.is_running());

        sim.fail_polls(-1);
        assert!(wait_until(|| !lp.is_running()));
    }

    #[test]
    fn test_unrouted_frames_are_dropped() {
        let sim = SimulatedDriver::builder().build();
        let lp = EventLoop::start(
            Arc::new(sim.clone()),
            Arc::new(Routes::default()),
            Arc::new(RwLock::new(None)),
            Duration::from_millis(5),
        )
        .unwrap();

        let stray: crate::FrameBuffer<u8> = crate::FrameBuffer::new(4);
        sim.inject_event(DriverEvent::VideoFrame {
            device: NativeDevice(7),
            buffer: stray.id(),
            timestamp: 0,
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(lp.is_running());
    }
}
