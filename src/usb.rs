//! Kinect access over libusb (rusb).
//!
//! The motor sub-device is driven with vendor control transfers on endpoint
//! zero. Camera streaming needs isochronous transfers, which rusb does not
//! expose, so stream start reports `LIBUSB_ERROR_NOT_SUPPORTED`.

use crate::buffer::FrameBuffer;
use crate::driver::{Driver, DriverEvent, DriverResult};
use crate::mode::FrameMode;
use crate::protocol::{self, VID};
use crate::types::{DeviceInfo, Led, LogLevel, NativeDevice, RawTiltState, Subdevices};
use crate::Result;
use rusb::{DeviceHandle, GlobalContext, UsbContext};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);
const MOTOR_INTERFACE: u8 = 0;

/// libusb's numeric code for an error, as surfaced through [`Driver`].
pub fn libusb_code(error: rusb::Error) -> i32 {
    match error {
        rusb::Error::Io => -1,
        rusb::Error::InvalidParam => -2,
        rusb::Error::Access => -3,
        rusb::Error::NoDevice => -4,
        rusb::Error::NotFound => -5,
        rusb::Error::Busy => -6,
        rusb::Error::Timeout => -7,
        rusb::Error::Overflow => -8,
        rusb::Error::Pipe => -9,
        rusb::Error::Interrupted => -10,
        rusb::Error::NoMem => -11,
        rusb::Error::NotSupported => -12,
        _ => -99,
    }
}

fn subdevice_kind(product_id: u16) -> Option<Subdevices> {
    match product_id {
        protocol::PID_NUI_CAMERA | protocol::PID_K4W_CAMERA => Some(Subdevices::CAMERA),
        protocol::PID_NUI_MOTOR => Some(Subdevices::MOTOR),
        protocol::PID_NUI_AUDIO | protocol::PID_K4W_AUDIO => Some(Subdevices::AUDIO),
        _ => None,
    }
}

/// A Kinect sub-device found on the bus.
struct Found {
    device: rusb::Device<GlobalContext>,
    kind: Subdevices,
    product_id: u16,
    /// Bus plus the port path of the Kinect's internal hub; sub-devices of
    /// one unit share it.
    hub: (u8, Vec<u8>),
}

fn scan_bus() -> Result<Vec<Found>> {
    let mut found = Vec::new();
    for device in rusb::devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                log::debug!(
                    "Skipping device {}:{}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                continue;
            }
        };
        if desc.vendor_id() != VID {
            continue;
        }
        let Some(kind) = subdevice_kind(desc.product_id()) else {
            continue;
        };

        let mut ports = device.port_numbers().unwrap_or_default();
        ports.pop();
        found.push(Found {
            hub: (device.bus_number(), ports),
            device,
            kind,
            product_id: desc.product_id(),
        });
    }
    Ok(found)
}

/// One physical Kinect: its sub-devices grouped by parent hub.
struct Unit {
    info: DeviceInfo,
    motor: Option<rusb::Device<GlobalContext>>,
}

/// Group sub-devices into units. A unit is anchored on its camera, or on
/// its motor for units whose camera did not enumerate.
fn group_units(found: Vec<Found>) -> Vec<Unit> {
    let mut units = Vec::new();

    let mut anchors: Vec<&Found> = found.iter().filter(|f| f.kind == Subdevices::CAMERA).collect();
    anchors.extend(found.iter().filter(|f| {
        f.kind == Subdevices::MOTOR
            && !found
                .iter()
                .any(|c| c.kind == Subdevices::CAMERA && c.hub == f.hub)
    }));

    for anchor in anchors {
        let siblings = found.iter().filter(|f| f.hub == anchor.hub);
        let mut unit = Unit {
            info: DeviceInfo {
                bus_number: anchor.device.bus_number(),
                address: anchor.device.address(),
                product_id: anchor.product_id,
                subdevices: Subdevices::empty(),
            },
            motor: None,
        };
        for sibling in siblings {
            unit.info.subdevices |= sibling.kind;
            if sibling.kind == Subdevices::MOTOR && unit.motor.is_none() {
                unit.motor = Some(sibling.device.clone());
            }
        }
        units.push(unit);
    }
    units
}

/// List connected Kinect units.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    Ok(group_units(scan_bus()?)
        .into_iter()
        .map(|unit| unit.info)
        .collect())
}

/// Control-transfer access to the tilt motor.
pub struct MotorTransport {
    handle: DeviceHandle<GlobalContext>,
}

impl MotorTransport {
    /// Open the motor and claim its interface, detaching a kernel driver if
    /// one is bound.
    pub fn open(device: &rusb::Device<GlobalContext>) -> rusb::Result<Self> {
        let handle = device.open()?;

        match handle.detach_kernel_driver(MOTOR_INTERFACE) {
            Ok(_) => log::info!("Detached kernel driver from motor"),
            Err(rusb::Error::NotFound) | Err(rusb::Error::NotSupported) => {}
            Err(e) => log::warn!("Detach: {} (continuing)", e),
        }
        handle.claim_interface(MOTOR_INTERFACE)?;

        Ok(Self { handle })
    }

    pub fn set_tilt(&self, degrees: f64) -> rusb::Result<()> {
        self.handle.write_control(
            protocol::REQUEST_TYPE_OUT,
            protocol::REQ_SET_TILT,
            protocol::encode_tilt_degrees(degrees),
            0,
            &[],
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }

    pub fn set_led(&self, led: Led) -> rusb::Result<()> {
        self.handle.write_control(
            protocol::REQUEST_TYPE_OUT,
            protocol::REQ_SET_LED,
            led as u16,
            0,
            &[],
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }

    /// Read and decode the motor state report.
    pub fn read_state(&self) -> rusb::Result<RawTiltState> {
        let mut report = [0u8; protocol::STATE_REPORT_SIZE];
        let len = self.handle.read_control(
            protocol::REQUEST_TYPE_IN,
            protocol::REQ_GET_STATE,
            0,
            0,
            &mut report,
            CONTROL_TIMEOUT,
        )?;
        protocol::parse_motor_state(&report[..len]).ok_or_else(|| {
            log::warn!("Motor state report too short ({} bytes)", len);
            rusb::Error::Io
        })
    }
}

impl Drop for MotorTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(MOTOR_INTERFACE);
    }
}

struct OpenUnit {
    native: NativeDevice,
    index: usize,
    motor: Option<MotorTransport>,
}

struct UsbState {
    units: Vec<Unit>,
    open: Vec<OpenUnit>,
    next_native: u32,
    subdevices: Subdevices,
    log_level: LogLevel,
    pending: VecDeque<DriverEvent>,
}

impl UsbState {
    fn log(&mut self, level: LogLevel, message: String) {
        if level <= self.log_level {
            self.pending.push_back(DriverEvent::Log { level, message });
        }
    }

    fn open_unit(&self, device: NativeDevice) -> DriverResult<&OpenUnit> {
        self.open
            .iter()
            .find(|u| u.native == device)
            .ok_or(libusb_code(rusb::Error::NoDevice))
    }

    fn motor(&self, device: NativeDevice) -> DriverResult<&MotorTransport> {
        self.open_unit(device)?
            .motor
            .as_ref()
            .ok_or(libusb_code(rusb::Error::NoDevice))
    }
}

/// [`Driver`] for real hardware.
pub struct UsbDriver {
    state: Mutex<UsbState>,
}

impl UsbDriver {
    /// Scan the bus for Kinect units.
    pub fn new() -> Result<UsbDriver> {
        let units = group_units(scan_bus()?);
        log::info!("Found {} Kinect unit(s) on the bus", units.len());
        Ok(UsbDriver {
            state: Mutex::new(UsbState {
                units,
                open: Vec::new(),
                next_native: 1,
                subdevices: Subdevices::MOTOR | Subdevices::CAMERA,
                log_level: LogLevel::Warning,
                pending: VecDeque::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, UsbState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Driver for UsbDriver {
    fn select_subdevices(&self, subdevices: Subdevices) {
        self.state().subdevices = subdevices;
    }

    fn device_count(&self) -> DriverResult<usize> {
        Ok(self.state().units.len())
    }

    fn open_device(&self, index: usize) -> DriverResult<NativeDevice> {
        let mut state = self.state();
        let unit = state
            .units
            .get(index)
            .ok_or(libusb_code(rusb::Error::NotFound))?;
        if state.open.iter().any(|u| u.index == index) {
            return Err(libusb_code(rusb::Error::Busy));
        }

        let motor = match (&unit.motor, state.subdevices.contains(Subdevices::MOTOR)) {
            (Some(device), true) => Some(MotorTransport::open(device).map_err(libusb_code)?),
            (None, true) => {
                log::warn!("Device {} has no motor sub-device", index);
                None
            }
            (_, false) => None,
        };

        let native = NativeDevice(state.next_native);
        state.next_native += 1;
        state.open.push(OpenUnit {
            native,
            index,
            motor,
        });
        state.log(LogLevel::Info, format!("Opened Kinect {} as {:?}", index, native));
        Ok(native)
    }

    fn close_device(&self, device: NativeDevice) -> DriverResult<()> {
        let mut state = self.state();
        let pos = state
            .open
            .iter()
            .position(|u| u.native == device)
            .ok_or(libusb_code(rusb::Error::NoDevice))?;
        state.open.remove(pos);
        Ok(())
    }

    fn set_log_level(&self, level: LogLevel) {
        self.state().log_level = level;
    }

    fn set_video_mode(&self, device: NativeDevice, _mode: FrameMode) -> DriverResult<()> {
        self.state().open_unit(device).map(|_| ())
    }

    fn set_depth_mode(&self, device: NativeDevice, _mode: FrameMode) -> DriverResult<()> {
        self.state().open_unit(device).map(|_| ())
    }

    fn set_video_buffer(&self, device: NativeDevice, _buffer: FrameBuffer<u8>) -> DriverResult<()> {
        self.state().open_unit(device).map(|_| ())
    }

    fn set_depth_buffer(&self, device: NativeDevice, _buffer: FrameBuffer<u16>) -> DriverResult<()> {
        self.state().open_unit(device).map(|_| ())
    }

    fn start_video(&self, _device: NativeDevice) -> DriverResult<()> {
        Err(libusb_code(rusb::Error::NotSupported))
    }

    fn stop_video(&self, _device: NativeDevice) -> DriverResult<()> {
        Ok(())
    }

    fn start_depth(&self, _device: NativeDevice) -> DriverResult<()> {
        Err(libusb_code(rusb::Error::NotSupported))
    }

    fn stop_depth(&self, _device: NativeDevice) -> DriverResult<()> {
        Ok(())
    }

    fn update_tilt_state(&self, device: NativeDevice) -> DriverResult<RawTiltState> {
        self.state()
            .motor(device)?
            .read_state()
            .map_err(libusb_code)
    }

    fn set_tilt_degrees(&self, device: NativeDevice, degrees: f64) -> DriverResult<()> {
        self.state()
            .motor(device)?
            .set_tilt(degrees)
            .map_err(libusb_code)
    }

    fn set_led(&self, device: NativeDevice, led: Led) -> DriverResult<()> {
        self.state().motor(device)?.set_led(led).map_err(libusb_code)
    }

    fn process_events(&self, timeout: Duration) -> DriverResult<Vec<DriverEvent>> {
        GlobalContext::default()
            .handle_events(Some(timeout))
            .map_err(libusb_code)?;
        Ok(self.state().pending.drain(..).collect())
    }

    fn shutdown(&self) -> DriverResult<()> {
        let mut state = self.state();
        state.open.clear();
        state.units.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_libusb_codes() {
        assert_eq!(libusb_code(rusb::Error::Io), -1);
        assert_eq!(libusb_code(rusb::Error::NoDevice), -4);
        assert_eq!(libusb_code(rusb::Error::NotSupported), -12);
        assert_eq!(libusb_code(rusb::Error::Other), -99);
    }

    #[test]
    fn test_subdevice_kinds() {
        assert_eq!(subdevice_kind(protocol::PID_NUI_MOTOR), Some(Subdevices::MOTOR));
        assert_eq!(subdevice_kind(protocol::PID_K4W_CAMERA), Some(Subdevices::CAMERA));
        assert_eq!(subdevice_kind(protocol::PID_K4W_AUDIO), Some(Subdevices::AUDIO));
        assert_eq!(subdevice_kind(0x1234), None);
    }
}
