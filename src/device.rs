use crate::driver::Driver;
use crate::event_loop::Routes;
use crate::stream::{ChannelCore, DepthChannel, DepthConfig, VideoChannel, VideoConfig};
use crate::tilt::Tilt;
use crate::types::{Led, NativeDevice};
use crate::{FreenectError, Result};
use std::sync::Arc;

/// One enumerated Kinect.
///
/// Handles are created by the library context for every unit found at
/// initialization and keep their index for the context's lifetime. A handle
/// starts closed; [`open`](Device::open) claims the hardware and
/// [`close`](Device::close) releases it again.
pub struct Device {
    index: usize,
    driver: Arc<dyn Driver>,
    routes: Arc<Routes>,
    native: Option<NativeDevice>,
    video: Option<VideoChannel>,
    depth: Option<DepthChannel>,
    tilt: Option<Tilt>,
}

impl Device {
    pub(crate) fn new(index: usize, driver: Arc<dyn Driver>, routes: Arc<Routes>) -> Self {
        Self {
            index,
            driver,
            routes,
            native: None,
            video: None,
            depth: None,
            tilt: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_open(&self) -> bool {
        self.native.is_some()
    }

    /// Driver handle of the opened unit.
    pub fn native(&self) -> Option<NativeDevice> {
        self.native
    }

    /// Claim the hardware. Opening an already open device is a no-op.
    pub fn open(&mut self) -> Result<()> {
        if self.native.is_some() {
            return Ok(());
        }
        let native = self
            .driver
            .open_device(self.index)
            .map_err(FreenectError::Driver)?;
        log::info!("Opened device {} as {:?}", self.index, native);
        self.native = Some(native);
        Ok(())
    }

    /// Stop and drop both channels, drop the tilt controller and release the
    /// hardware. The handle can be opened again afterwards.
    pub fn close(&mut self) -> Result<()> {
        let Some(native) = self.native else {
            return Ok(());
        };

        self.discard_video();
        self.discard_depth();
        self.routes.unroute_device(native);
        self.tilt = None;
        self.native = None;

        self.driver
            .close_device(native)
            .map_err(FreenectError::Driver)?;
        log::info!("Closed device {}", self.index);
        Ok(())
    }

    fn require_open(&self) -> Result<NativeDevice> {
        self.native.ok_or(FreenectError::DeviceNotOpen(self.index))
    }

    /// Negotiate and commit a video mode and create the video channel.
    ///
    /// The channel is not started. Fails with
    /// [`ChannelConfigured`](FreenectError::ChannelConfigured) if a video
    /// channel already exists; discard it first to change modes.
    pub fn configure_video(&mut self, config: VideoConfig) -> Result<&mut VideoChannel> {
        let native = self.require_open()?;
        if self.video.is_some() {
            return Err(FreenectError::ChannelConfigured("video"));
        }

        let core = ChannelCore::configure(self.driver.as_ref(), native, config)?;
        let channel = VideoChannel::new(core, Arc::clone(&self.driver));
        self.routes.route_video(native, channel.shared());
        Ok(self.video.insert(channel))
    }

    /// Depth counterpart of [`configure_video`](Device::configure_video).
    pub fn configure_depth(&mut self, config: DepthConfig) -> Result<&mut DepthChannel> {
        let native = self.require_open()?;
        if self.depth.is_some() {
            return Err(FreenectError::ChannelConfigured("depth"));
        }

        let core = ChannelCore::configure(self.driver.as_ref(), native, config)?;
        let channel = DepthChannel::new(core, Arc::clone(&self.driver));
        self.routes.route_depth(native, channel.shared());
        Ok(self.depth.insert(channel))
    }

    pub fn video(&mut self) -> Option<&mut VideoChannel> {
        self.video.as_mut()
    }

    pub fn depth(&mut self) -> Option<&mut DepthChannel> {
        self.depth.as_mut()
    }

    /// Stop the video channel if it is running and forget it. Frames still in
    /// flight for it are dropped.
    pub fn discard_video(&mut self) {
        if let Some(mut channel) = self.video.take() {
            if let Err(e) = channel.stop() {
                log::warn!("Failed to stop video on device {}: {}", self.index, e);
            }
            if let Some(native) = self.native {
                self.routes.unroute_video(native);
            }
        }
    }

    pub fn discard_depth(&mut self) {
        if let Some(mut channel) = self.depth.take() {
            if let Err(e) = channel.stop() {
                log::warn!("Failed to stop depth on device {}: {}", self.index, e);
            }
            if let Some(native) = self.native {
                self.routes.unroute_depth(native);
            }
        }
    }

    /// Stop whichever channels are running, keeping them configured.
    pub(crate) fn stop_streams(&mut self) {
        for (name, result) in [
            ("video", self.video.as_mut().map(|c| c.stop())),
            ("depth", self.depth.as_mut().map(|c| c.stop())),
        ] {
            if let Some(Err(e)) = result {
                log::warn!("Failed to stop {} on device {}: {}", name, self.index, e);
            }
        }
    }

    /// The tilt controller, created on first use and refreshed on every call.
    pub fn tilt(&mut self) -> Result<&mut Tilt> {
        let native = self.require_open()?;
        let driver = &self.driver;
        let tilt = self
            .tilt
            .get_or_insert_with(|| Tilt::new(Arc::clone(driver), native));
        tilt.refresh()?;
        Ok(tilt)
    }

    pub fn set_led(&mut self, led: Led) -> Result<()> {
        let native = self.require_open()?;
        self.driver
            .set_led(native, led)
            .map_err(FreenectError::Driver)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index)
            .field("native", &self.native)
            .field("video", &self.video)
            .field("depth", &self.depth)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDriver;
    use crate::types::{Resolution, VideoFormat};
    use crate::FrameBuffer;

    fn device(sim: &SimulatedDriver) -> Device {
        Device::new(0, Arc::new(sim.clone()), Arc::new(Routes::default()))
    }

    fn rgb_config() -> VideoConfig {
        VideoConfig::new(Resolution::Medium, VideoFormat::Rgb)
            .producer(|samples| Some(FrameBuffer::new(samples)))
            .consumer(|_, _| {})
    }

    #[test]
    fn test_closed_device_rejects_operations() {
        let sim = SimulatedDriver::builder().build();
        let mut dev = device(&sim);
        assert!(matches!(
            dev.configure_video(rgb_config()),
            Err(FreenectError::DeviceNotOpen(0))
        ));
        assert!(matches!(dev.tilt(), Err(FreenectError::DeviceNotOpen(0))));
        assert!(matches!(dev.set_led(Led::Red), Err(FreenectError::DeviceNotOpen(0))));
    }

    #[test]
    fn test_reconfigure_requires_discard() {
        let sim = SimulatedDriver::builder().build();
        let mut dev = device(&sim);
        dev.open().unwrap();
        dev.configure_video(rgb_config()).unwrap();
        assert!(matches!(
            dev.configure_video(rgb_config()),
            Err(FreenectError::ChannelConfigured("video"))
        ));

        dev.discard_video();
        assert!(dev.video().is_none());
        dev.configure_video(rgb_config()).unwrap();
        assert_eq!(sim.calls().set_video_mode, 2);
    }

    #[test]
    fn test_close_stops_streams_and_allows_reopen() {
        let sim = SimulatedDriver::builder().build();
        let mut dev = device(&sim);
        dev.open().unwrap();
        let channel = dev.configure_video(rgb_config()).unwrap();
        assert!(channel.start().unwrap().changed());
        assert!(sim.is_video_streaming(0));

        dev.close().unwrap();
        assert!(!dev.is_open());
        assert!(dev.video().is_none());
        assert_eq!(sim.calls().stop_video, 1);
        assert!(sim.native_device(0).is_none());

        dev.open().unwrap();
        assert!(dev.is_open());
    }

    #[test]
    fn test_tilt_is_refreshed_on_each_access() {
        let sim = SimulatedDriver::builder().build();
        let mut dev = device(&sim);
        dev.open().unwrap();
        dev.tilt().unwrap();
        dev.tilt().unwrap();
        assert_eq!(sim.calls().tilt_reads, 2);
    }

    #[test]
    fn test_led() {
        let sim = SimulatedDriver::builder().build();
        let mut dev = device(&sim);
        dev.open().unwrap();
        dev.set_led(Led::BlinkRedYellow).unwrap();
        assert_eq!(sim.led(0), Some(Led::BlinkRedYellow));
    }
}
