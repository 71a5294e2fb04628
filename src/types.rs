/// Verbosity of messages emitted by the device driver.
///
/// Ordered from least to most verbose, so `level <= threshold` selects the
/// messages a threshold admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Fatal = 0,
    Error = 1,
    Warning = 2,
    Notice = 3,
    Info = 4,
    Debug = 5,
    Spew = 6,
    Flood = 7,
}

impl LogLevel {
    /// Map onto the `log` facade so device messages can be forwarded.
    pub fn to_log_level(self) -> log::Level {
        match self {
            LogLevel::Fatal | LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Notice | LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Spew | LogLevel::Flood => log::Level::Trace,
        }
    }
}

/// Sensor resolution class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// 320x240, not offered by any Kinect mode.
    Low = 0,
    /// 640x480 (640x488 for IR).
    Medium = 1,
    /// 1280x1024.
    High = 2,
}

/// Pixel layout of the video (RGB/IR) camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoFormat {
    /// Decompressed RGB, 3 bytes per pixel.
    Rgb = 0,
    /// Raw Bayer pattern, 1 byte per pixel.
    Bayer = 1,
    Ir8Bit = 2,
    /// 10-bit IR unpacked into 16-bit little-endian words.
    Ir10Bit = 3,
    Ir10BitPacked = 4,
    /// YUV converted to RGB by the driver.
    YuvRgb = 5,
    /// UYVY, 2 bytes per pixel.
    YuvRaw = 6,
}

/// Sample layout of the depth camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    D11Bit = 0,
    D10Bit = 1,
    D11BitPacked = 2,
    D10BitPacked = 3,
    /// Depth registered to the RGB camera, in millimetres.
    Registered = 4,
    /// Unregistered depth in millimetres.
    Mm = 5,
}

/// Front panel LED states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Led {
    Off = 0,
    Green = 1,
    Red = 2,
    Yellow = 3,
    BlinkGreen = 4,
    BlinkRedYellow = 6,
}

/// Motor status as last reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TiltStatus {
    #[default]
    Stopped = 0x00,
    /// The motor hit a physical limit before reaching its target.
    AtLimit = 0x01,
    Moving = 0x04,
}

impl TiltStatus {
    /// Decode the status byte of the motor report. Unknown codes are treated
    /// as moving, since that is the only non-terminal state.
    pub fn from_code(code: u8) -> TiltStatus {
        match code {
            0x00 => TiltStatus::Stopped,
            0x01 => TiltStatus::AtLimit,
            _ => TiltStatus::Moving,
        }
    }
}

bitflags::bitflags! {
    /// Kinect sub-devices a context claims on open.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Subdevices: u32 {
        const MOTOR  = 1 << 0;
        const CAMERA = 1 << 1;
        const AUDIO  = 1 << 2;
    }
}

/// Opaque per-context identifier for an opened device, assigned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeDevice(pub u32);

/// Motor report exactly as the device encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawTiltState {
    /// Accelerometer counts [x, y, z]; 819 counts per g.
    pub accelerometer: [i16; 3],
    /// Tilt angle in half degrees. `-128` means the angle is unknown.
    pub tilt_angle: i8,
    pub tilt_status: u8,
}

/// Snapshot of motor/orientation state in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TiltState {
    /// Tilt angle in degrees.
    pub angle: f64,
    pub status: TiltStatus,
    /// Acceleration [x, y, z] in m/s².
    pub acceleration: [f64; 3],
}

/// Identification of a Kinect found on the USB bus.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub bus_number: u8,
    pub address: u8,
    pub product_id: u16,
    /// Sub-devices of the same unit seen on the bus.
    pub subdevices: Subdevices,
}
