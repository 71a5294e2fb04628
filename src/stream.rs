//! Stream channels: one outstanding frame buffer per modality.
//!
//! A channel owns the buffer the driver is currently writing into. When the
//! driver reports the transfer complete, the event loop hands that buffer to
//! the consumer, then asks the producer for the next destination. A producer
//! returning `None` keeps the current buffer installed and the driver
//! overwrites it in place.

use crate::buffer::{BufferId, FrameBuffer, Sample};
use crate::driver::{Driver, DriverResult};
use crate::mode::FrameMode;
use crate::types::{DepthFormat, NativeDevice, Resolution, VideoFormat};
use crate::{FreenectError, Result};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Supplies the next destination buffer, given the frame size in samples.
/// `None` reuses the buffer already installed.
pub type Producer<S> = Box<dyn FnMut(usize) -> Option<FrameBuffer<S>> + Send>;

/// Receives each filled buffer and its camera timestamp.
pub type Consumer<S> = Box<dyn FnMut(&FrameBuffer<S>, u32) + Send>;

/// One of the two camera streams. Ties the sample type and format enum to
/// the matching driver calls.
pub trait Modality: Send + 'static {
    type Sample: Sample;
    type Format: Copy + fmt::Debug + Send + 'static;

    const NAME: &'static str;

    fn find_mode(driver: &dyn Driver, resolution: Resolution, format: Self::Format)
        -> Option<FrameMode>;

    fn set_mode(driver: &dyn Driver, device: NativeDevice, mode: FrameMode) -> DriverResult<()>;

    fn set_buffer(
        driver: &dyn Driver,
        device: NativeDevice,
        buffer: FrameBuffer<Self::Sample>,
    ) -> DriverResult<()>;

    fn start(driver: &dyn Driver, device: NativeDevice) -> DriverResult<()>;

    fn stop(driver: &dyn Driver, device: NativeDevice) -> DriverResult<()>;
}

/// RGB/IR camera stream, 8-bit samples.
pub enum Video {}

/// Depth camera stream, 16-bit samples.
pub enum Depth {}

impl Modality for Video {
    type Sample = u8;
    type Format = VideoFormat;

    const NAME: &'static str = "video";

    fn find_mode(driver: &dyn Driver, resolution: Resolution, format: VideoFormat) -> Option<FrameMode> {
        driver.find_video_mode(resolution, format)
    }

    fn set_mode(driver: &dyn Driver, device: NativeDevice, mode: FrameMode) -> DriverResult<()> {
        driver.set_video_mode(device, mode)
    }

    fn set_buffer(driver: &dyn Driver, device: NativeDevice, buffer: FrameBuffer<u8>) -> DriverResult<()> {
        driver.set_video_buffer(device, buffer)
    }

    fn start(driver: &dyn Driver, device: NativeDevice) -> DriverResult<()> {
        driver.start_video(device)
    }

    fn stop(driver: &dyn Driver, device: NativeDevice) -> DriverResult<()> {
        driver.stop_video(device)
    }
}

impl Modality for Depth {
    type Sample = u16;
    type Format = DepthFormat;

    const NAME: &'static str = "depth";

    fn find_mode(driver: &dyn Driver, resolution: Resolution, format: DepthFormat) -> Option<FrameMode> {
        driver.find_depth_mode(resolution, format)
    }

    fn set_mode(driver: &dyn Driver, device: NativeDevice, mode: FrameMode) -> DriverResult<()> {
        driver.set_depth_mode(device, mode)
    }

    fn set_buffer(driver: &dyn Driver, device: NativeDevice, buffer: FrameBuffer<u16>) -> DriverResult<()> {
        driver.set_depth_buffer(device, buffer)
    }

    fn start(driver: &dyn Driver, device: NativeDevice) -> DriverResult<()> {
        driver.start_depth(device)
    }

    fn stop(driver: &dyn Driver, device: NativeDevice) -> DriverResult<()> {
        driver.stop_depth(device)
    }
}

/// Requested stream settings plus the producer/consumer pair.
///
/// ```
/// use freenect::{FrameBuffer, Resolution, VideoConfig, VideoFormat};
///
/// let mut buffer: Option<FrameBuffer<u8>> = None;
/// let config = VideoConfig::new(Resolution::Medium, VideoFormat::Rgb)
///     .producer(move |samples| {
///         if buffer.is_some() {
///             return None;
///         }
///         let b = FrameBuffer::new(samples);
///         buffer = Some(b.clone());
///         Some(b)
///     })
///     .consumer(|frame, timestamp| println!("{} samples at {}", frame.len(), timestamp));
/// # drop(config);
/// ```
pub struct StreamConfig<M: Modality> {
    resolution: Resolution,
    format: M::Format,
    producer: Option<Producer<M::Sample>>,
    consumer: Option<Consumer<M::Sample>>,
}

pub type VideoConfig = StreamConfig<Video>;
pub type DepthConfig = StreamConfig<Depth>;

impl<M: Modality> StreamConfig<M> {
    pub fn new(resolution: Resolution, format: M::Format) -> Self {
        Self {
            resolution,
            format,
            producer: None,
            consumer: None,
        }
    }

    pub fn producer<F>(mut self, producer: F) -> Self
    where
        F: FnMut(usize) -> Option<FrameBuffer<M::Sample>> + Send + 'static,
    {
        self.producer = Some(Box::new(producer));
        self
    }

    pub fn consumer<F>(mut self, consumer: F) -> Self
    where
        F: FnMut(&FrameBuffer<M::Sample>, u32) + Send + 'static,
    {
        self.consumer = Some(Box::new(consumer));
        self
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn format(&self) -> M::Format {
        self.format
    }
}

/// Result of a start/stop request. The no-op variants are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
}

impl Transition {
    /// Whether the request changed the stream state.
    pub fn changed(self) -> bool {
        matches!(self, Transition::Started | Transition::Stopped)
    }
}

/// Channel state shared between the application handle and the event loop.
pub(crate) struct ChannelCore<M: Modality> {
    device: NativeDevice,
    mode: FrameMode,
    samples: usize,
    running: bool,
    producer: Producer<M::Sample>,
    consumer: Consumer<M::Sample>,
    outstanding: Option<FrameBuffer<M::Sample>>,
    delivered: u64,
    _modality: PhantomData<M>,
}

pub(crate) type SharedChannel<M> = Arc<Mutex<ChannelCore<M>>>;

pub(crate) fn lock_channel<M: Modality>(channel: &SharedChannel<M>) -> MutexGuard<'_, ChannelCore<M>> {
    channel.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M: Modality> ChannelCore<M> {
    /// Validate the callbacks, negotiate a mode and commit it to the device.
    ///
    /// Nothing reaches the driver when a callback is missing, and the device
    /// keeps its previous mode when negotiation fails.
    pub(crate) fn configure(
        driver: &dyn Driver,
        device: NativeDevice,
        config: StreamConfig<M>,
    ) -> Result<ChannelCore<M>> {
        let StreamConfig {
            resolution,
            format,
            producer,
            consumer,
        } = config;

        let producer = producer.ok_or(FreenectError::InvalidArgument("missing frame producer"))?;
        let consumer = consumer.ok_or(FreenectError::InvalidArgument("missing frame consumer"))?;

        let mode = M::find_mode(driver, resolution, format).ok_or_else(|| {
            FreenectError::UnsupportedMode {
                stream: M::NAME,
                resolution,
                format: format!("{:?}", format),
            }
        })?;

        M::set_mode(driver, device, mode).map_err(|code| FreenectError::DeviceRejectedMode {
            stream: M::NAME,
            code,
        })?;

        let samples = mode.samples(std::mem::size_of::<M::Sample>());
        log::debug!(
            "Configured {} mode {}x{} ({} samples per frame)",
            M::NAME,
            mode.width,
            mode.height,
            samples
        );

        Ok(ChannelCore {
            device,
            mode,
            samples,
            running: false,
            producer,
            consumer,
            outstanding: None,
            delivered: 0,
            _modality: PhantomData,
        })
    }

    pub(crate) fn start(&mut self, driver: &dyn Driver) -> Result<Transition> {
        if self.running {
            return Ok(Transition::AlreadyRunning);
        }

        // A restart reinstalls the buffer left over from the previous run. It
        // was never delivered, so the producer is not asked for another one.
        let buffer = match &self.outstanding {
            Some(buffer) => buffer.clone(),
            None => (self.producer)(self.samples).ok_or(FreenectError::InvalidArgument(
                "producer supplied no initial buffer",
            ))?,
        };
        self.check_size(&buffer)?;

        M::set_buffer(driver, self.device, buffer.clone()).map_err(|code| {
            log::warn!("Failed to set {} buffer: {}", M::NAME, code);
            FreenectError::Driver(code)
        })?;

        M::start(driver, self.device).map_err(|code| {
            log::warn!("Failed to start {} stream: {}", M::NAME, code);
            FreenectError::Driver(code)
        })?;

        self.outstanding = Some(buffer);
        self.running = true;

        log::info!("{} stream started", M::NAME);
        Ok(Transition::Started)
    }

    pub(crate) fn stop(&mut self, driver: &dyn Driver) -> Result<Transition> {
        if !self.running {
            return Ok(Transition::NotRunning);
        }

        M::stop(driver, self.device).map_err(FreenectError::Driver)?;
        self.running = false;

        log::info!("{} stream stopped", M::NAME);
        Ok(Transition::Stopped)
    }

    /// Hand a completed transfer to the consumer and install the next buffer.
    ///
    /// An error here means the buffer bookkeeping can no longer be trusted;
    /// the event loop treats it as fatal.
    pub(crate) fn deliver(
        &mut self,
        driver: &dyn Driver,
        filled: BufferId,
        timestamp: u32,
    ) -> Result<()> {
        let current = match &self.outstanding {
            Some(buffer) if buffer.id() == filled => buffer.clone(),
            Some(buffer) => {
                return Err(FreenectError::ProtocolViolation(format!(
                    "driver filled {} buffer {:?} but {:?} is outstanding",
                    M::NAME,
                    filled,
                    buffer.id()
                )))
            }
            None => {
                return Err(FreenectError::ProtocolViolation(format!(
                    "driver filled {} buffer {:?} with none outstanding",
                    M::NAME,
                    filled
                )))
            }
        };

        (self.consumer)(&current, timestamp);
        self.delivered += 1;

        if let Some(next) = (self.producer)(self.samples) {
            self.check_size(&next)?;
            M::set_buffer(driver, self.device, next.clone()).map_err(|code| {
                log::error!("Failed to set {} buffer: {}", M::NAME, code);
                FreenectError::Driver(code)
            })?;
            self.outstanding = Some(next);
        }

        Ok(())
    }

    fn check_size(&self, buffer: &FrameBuffer<M::Sample>) -> Result<()> {
        if buffer.len() != self.samples {
            return Err(FreenectError::ProtocolViolation(format!(
                "producer returned a {} buffer of {} samples, mode needs {}",
                M::NAME,
                buffer.len(),
                self.samples
            )));
        }
        Ok(())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    #[cfg(test)]
    pub(crate) fn outstanding_id(&self) -> Option<BufferId> {
        self.outstanding.as_ref().map(FrameBuffer::id)
    }
}

/// Application handle to a configured stream on an open device.
pub struct StreamChannel<M: Modality> {
    shared: SharedChannel<M>,
    driver: Arc<dyn Driver>,
    mode: FrameMode,
}

pub type VideoChannel = StreamChannel<Video>;
pub type DepthChannel = StreamChannel<Depth>;

impl<M: Modality> StreamChannel<M> {
    pub(crate) fn new(core: ChannelCore<M>, driver: Arc<dyn Driver>) -> Self {
        let mode = core.mode;
        Self {
            shared: Arc::new(Mutex::new(core)),
            driver,
            mode,
        }
    }

    pub(crate) fn shared(&self) -> SharedChannel<M> {
        Arc::clone(&self.shared)
    }

    /// Install the first buffer and start acquisition.
    ///
    /// Returns [`Transition::AlreadyRunning`] without touching the device if
    /// the stream is already running.
    pub fn start(&mut self) -> Result<Transition> {
        lock_channel(&self.shared).start(self.driver.as_ref())
    }

    /// Halt acquisition. A later [`start`](Self::start) resumes delivery.
    pub fn stop(&mut self) -> Result<Transition> {
        lock_channel(&self.shared).stop(self.driver.as_ref())
    }

    pub fn is_running(&self) -> bool {
        lock_channel(&self.shared).is_running()
    }

    /// The mode committed at configure time.
    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Frame size in samples; every produced buffer must have this length.
    pub fn frame_samples(&self) -> usize {
        self.mode.samples(std::mem::size_of::<M::Sample>())
    }

    /// Number of frames handed to the consumer so far.
    pub fn frames_delivered(&self) -> u64 {
        lock_channel(&self.shared).delivered
    }
}

impl<M: Modality> fmt::Debug for StreamChannel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel")
            .field("stream", &M::NAME)
            .field("mode", &self.mode)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCalls, SimFault, SimulatedDriver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open_sim() -> (SimulatedDriver, NativeDevice) {
        let sim = SimulatedDriver::builder().devices(1).build();
        let native = sim.open_device(0).unwrap();
        (sim, native)
    }

    fn single_buffer_config(swap: bool) -> (VideoConfig, Arc<Mutex<Vec<BufferId>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut buffer: Option<FrameBuffer<u8>> = None;
        let config = VideoConfig::new(Resolution::Medium, VideoFormat::Rgb)
            .producer(move |samples| {
                if let Some(existing) = &buffer {
                    return if swap { Some(existing.clone()) } else { None };
                }
                let fresh = FrameBuffer::new(samples);
                buffer = Some(fresh.clone());
                Some(fresh)
            })
            .consumer(move |frame, _| seen_clone.lock().unwrap().push(frame.id()));
        (config, seen)
    }

    #[test]
    fn test_missing_callbacks_touch_nothing() {
        let (sim, native) = open_sim();
        let config = VideoConfig::new(Resolution::Medium, VideoFormat::Rgb).consumer(|_, _| {});
        let err = ChannelCore::configure(&sim, native, config).err().unwrap();
        assert!(matches!(err, FreenectError::InvalidArgument(_)));
        assert_eq!(sim.calls(), SimCalls::default());
    }

    #[test]
    fn test_unsupported_mode_keeps_previous_mode() {
        let (sim, native) = open_sim();
        let (config, _) = single_buffer_config(false);
        ChannelCore::configure(&sim, native, config).unwrap();
        let before = sim.video_mode(0);

        let config = VideoConfig::new(Resolution::High, VideoFormat::YuvRaw)
            .producer(|n| Some(FrameBuffer::new(n)))
            .consumer(|_, _| {});
        let err = ChannelCore::configure(&sim, native, config).err().unwrap();
        assert!(matches!(err, FreenectError::UnsupportedMode { stream: "video", .. }));
        assert_eq!(sim.video_mode(0), before);
    }

    #[test]
    fn test_rejected_mode() {
        let (sim, native) = open_sim();
        sim.inject_fault(SimFault::SetVideoMode(-9));
        let (config, _) = single_buffer_config(false);
        let err = ChannelCore::configure(&sim, native, config).err().unwrap();
        assert!(matches!(
            err,
            FreenectError::DeviceRejectedMode { code: -9, .. }
        ));
    }

    #[test]
    fn test_reuse_signal_skips_reinstall() {
        let (sim, native) = open_sim();
        let (config, seen) = single_buffer_config(false);
        let mut core = ChannelCore::configure(&sim, native, config).unwrap();
        assert_eq!(core.start(&sim).unwrap(), Transition::Started);
        assert_eq!(sim.calls().set_video_buffer, 1);

        let id = core.outstanding_id().unwrap();
        for ts in 0..5 {
            core.deliver(&sim, id, ts).unwrap();
        }
        assert_eq!(sim.calls().set_video_buffer, 1);
        assert!(seen.lock().unwrap().iter().all(|seen_id| *seen_id == id));
    }

    #[test]
    fn test_swap_signal_reinstalls_same_buffer() {
        let (sim, native) = open_sim();
        let (config, _) = single_buffer_config(true);
        let mut core = ChannelCore::configure(&sim, native, config).unwrap();
        core.start(&sim).unwrap();
        let id = core.outstanding_id().unwrap();
        for ts in 0..3 {
            core.deliver(&sim, id, ts).unwrap();
        }
        assert_eq!(sim.calls().set_video_buffer, 4);
        assert_eq!(core.outstanding_id(), Some(id));
    }

    #[test]
    fn test_identity_mismatch_is_protocol_violation() {
        let (sim, native) = open_sim();
        let (config, seen) = single_buffer_config(false);
        let mut core = ChannelCore::configure(&sim, native, config).unwrap();
        core.start(&sim).unwrap();

        let stranger: FrameBuffer<u8> = FrameBuffer::new(4);
        let err = core.deliver(&sim, stranger.id(), 0).err().unwrap();
        assert!(matches!(err, FreenectError::ProtocolViolation(_)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_wrong_size_producer_is_protocol_violation() {
        let (sim, native) = open_sim();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let config = VideoConfig::new(Resolution::Medium, VideoFormat::Bayer)
            .producer(move |samples| {
                // Correct size first, then one sample short.
                let n = calls_clone.fetch_add(1, Ordering::SeqCst);
                Some(FrameBuffer::new(if n == 0 { samples } else { samples - 1 }))
            })
            .consumer(|_, _| {});
        let mut core = ChannelCore::configure(&sim, native, config).unwrap();
        core.start(&sim).unwrap();

        let id = core.outstanding_id().unwrap();
        let err = core.deliver(&sim, id, 0).err().unwrap();
        assert!(matches!(err, FreenectError::ProtocolViolation(_)));
    }

    #[test]
    fn test_stop_then_start_resumes() {
        let (sim, native) = open_sim();
        let (config, _) = single_buffer_config(false);
        let mut core = ChannelCore::configure(&sim, native, config).unwrap();

        assert_eq!(core.stop(&sim).unwrap(), Transition::NotRunning);
        assert_eq!(core.start(&sim).unwrap(), Transition::Started);
        assert_eq!(core.start(&sim).unwrap(), Transition::AlreadyRunning);
        assert_eq!(core.stop(&sim).unwrap(), Transition::Stopped);
        assert!(!core.is_running());

        // The buffer from the first run is reinstalled.
        let id = core.outstanding_id();
        assert_eq!(core.start(&sim).unwrap(), Transition::Started);
        assert_eq!(core.outstanding_id(), id);
        assert_eq!(sim.calls().start_video, 2);
    }

    #[test]
    fn test_start_without_any_buffer() {
        let (sim, native) = open_sim();
        let config = VideoConfig::new(Resolution::Medium, VideoFormat::Rgb)
            .producer(|_| None)
            .consumer(|_, _| {});
        let mut core = ChannelCore::configure(&sim, native, config).unwrap();
        assert!(matches!(
            core.start(&sim),
            Err(FreenectError::InvalidArgument(_))
        ));
        assert_eq!(sim.calls().set_video_buffer, 0);
    }

    #[test]
    fn test_start_failure_leaves_channel_stopped() {
        let (sim, native) = open_sim();
        let (config, _) = single_buffer_config(true);
        let mut core = ChannelCore::configure(&sim, native, config).unwrap();

        sim.inject_fault(SimFault::SetVideoBuffer(-3));
        assert!(matches!(core.start(&sim), Err(FreenectError::Driver(-3))));
        assert!(!core.is_running());

        sim.inject_fault(SimFault::StartVideo(-7));
        assert!(matches!(core.start(&sim), Err(FreenectError::Driver(-7))));
        assert!(!core.is_running());

        assert_eq!(core.start(&sim).unwrap(), Transition::Started);
    }

    #[test]
    fn test_restart_reinstalls_outstanding_buffer() {
        let (sim, native) = open_sim();
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        let config = DepthConfig::new(Resolution::Medium, DepthFormat::D11Bit)
            .producer(move |samples| {
                counter.fetch_add(1, Ordering::SeqCst);
                Some(FrameBuffer::new(samples))
            })
            .consumer(|_, _| {});
        let mut core = ChannelCore::configure(&sim, native, config).unwrap();
        core.start(&sim).unwrap();
        let first = core.outstanding_id().unwrap();

        for _ in 0..3 {
            assert_eq!(core.stop(&sim).unwrap(), Transition::Stopped);
            assert_eq!(core.start(&sim).unwrap(), Transition::Started);
            assert_eq!(core.outstanding_id(), Some(first));
        }
        assert_eq!(produced.load(Ordering::SeqCst), 1);
        assert_eq!(sim.calls().set_depth_buffer, 4);

        // Deliveries still take the next buffer from the producer.
        core.deliver(&sim, first, 0).unwrap();
        assert_eq!(produced.load(Ordering::SeqCst), 2);
        assert_ne!(core.outstanding_id(), Some(first));
    }
}
