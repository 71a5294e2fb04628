//! The device driver seam.
//!
//! Everything below the stream channels (enumeration, mode commit, transfer
//! control, motor access and the event queue) goes through [`Driver`]. The
//! crate ships two implementations: [`SimulatedDriver`](crate::sim::SimulatedDriver)
//! and [`UsbDriver`](crate::usb::UsbDriver).

use crate::buffer::{BufferId, FrameBuffer};
use crate::mode::{self, FrameMode};
use crate::types::{
    DepthFormat, Led, LogLevel, NativeDevice, RawTiltState, Resolution, Subdevices, VideoFormat,
};
use std::time::Duration;

/// Driver-level result. Errors are opaque non-zero codes.
pub type DriverResult<T> = std::result::Result<T, i32>;

/// Something that happened on the device since the last poll.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Diagnostic message from the driver.
    Log { level: LogLevel, message: String },
    /// The installed video buffer has been filled.
    VideoFrame {
        device: NativeDevice,
        buffer: BufferId,
        timestamp: u32,
    },
    /// The installed depth buffer has been filled.
    DepthFrame {
        device: NativeDevice,
        buffer: BufferId,
        timestamp: u32,
    },
    /// The motor reported a new state. Telemetry is only read on refresh.
    MotorChanged { device: NativeDevice },
}

/// Low-level access to one driver context.
///
/// Implementations are shared between the application thread and the event
/// loop thread, so every method takes `&self`.
pub trait Driver: Send + Sync {
    /// Restrict which sub-devices `open_device` claims.
    fn select_subdevices(&self, subdevices: Subdevices);

    fn device_count(&self) -> DriverResult<usize>;

    fn open_device(&self, index: usize) -> DriverResult<NativeDevice>;

    fn close_device(&self, device: NativeDevice) -> DriverResult<()>;

    fn set_log_level(&self, level: LogLevel);

    fn find_video_mode(&self, resolution: Resolution, format: VideoFormat) -> Option<FrameMode> {
        mode::find_video_mode(resolution, format)
    }

    fn find_depth_mode(&self, resolution: Resolution, format: DepthFormat) -> Option<FrameMode> {
        mode::find_depth_mode(resolution, format)
    }

    fn set_video_mode(&self, device: NativeDevice, mode: FrameMode) -> DriverResult<()>;

    fn set_depth_mode(&self, device: NativeDevice, mode: FrameMode) -> DriverResult<()>;

    /// Install the destination for the next video transfer. The driver keeps
    /// the handle until another buffer is installed.
    fn set_video_buffer(&self, device: NativeDevice, buffer: FrameBuffer<u8>) -> DriverResult<()>;

    fn set_depth_buffer(&self, device: NativeDevice, buffer: FrameBuffer<u16>)
        -> DriverResult<()>;

    fn start_video(&self, device: NativeDevice) -> DriverResult<()>;

    fn stop_video(&self, device: NativeDevice) -> DriverResult<()>;

    fn start_depth(&self, device: NativeDevice) -> DriverResult<()>;

    fn stop_depth(&self, device: NativeDevice) -> DriverResult<()>;

    /// Request fresh motor state and return it.
    fn update_tilt_state(&self, device: NativeDevice) -> DriverResult<RawTiltState>;

    fn set_tilt_degrees(&self, device: NativeDevice, degrees: f64) -> DriverResult<()>;

    fn set_led(&self, device: NativeDevice, led: Led) -> DriverResult<()>;

    /// Service pending hardware events, waiting at most `timeout`.
    ///
    /// An `Err` is fatal for the context: the event loop stops polling.
    fn process_events(&self, timeout: Duration) -> DriverResult<Vec<DriverEvent>>;

    /// Tear down the driver context. No other call is made afterwards.
    fn shutdown(&self) -> DriverResult<()>;
}
