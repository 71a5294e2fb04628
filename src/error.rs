use crate::types::Resolution;

/// Errors that can occur when driving a Kinect through this crate.
#[derive(Debug, thiserror::Error)]
pub enum FreenectError {
    #[error("A freenect context is already initialized in this process")]
    AlreadyInitialized,

    /// Opaque non-zero code from the driver layer, propagated verbatim.
    #[error("Driver error code {0}")]
    Driver(i32),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("No {stream} mode for {resolution:?} / {format}")]
    UnsupportedMode {
        stream: &'static str,
        resolution: Resolution,
        format: String,
    },

    #[error("Device rejected {stream} mode (driver code {code})")]
    DeviceRejectedMode { stream: &'static str, code: i32 },

    /// Buffer identity or size mismatch in the frame handoff.
    #[error("Frame buffer protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("{0} channel already configured; discard it before reconfiguring")]
    ChannelConfigured(&'static str),

    #[error("Device {0} is not open")]
    DeviceNotOpen(usize),

    #[error("No device at index {index} ({count} enumerated)")]
    DeviceIndex { index: usize, count: usize },

    #[error("Event loop: {0}")]
    EventLoop(String),
}

impl FreenectError {
    /// The raw driver code carried by this error, if any.
    pub fn driver_code(&self) -> Option<i32> {
        match self {
            FreenectError::Driver(code) => Some(*code),
            FreenectError::DeviceRejectedMode { code, .. } => Some(*code),
            _ => None,
        }
    }
}
