//! In-process Kinect simulation.
//!
//! [`SimulatedDriver`] behaves like a driver context with a fixed number of
//! attached units. Streams are paced from the mode frame rate (or a fixed
//! interval), installed buffers are filled with a frame counter pattern, and
//! the motor travels toward its target at a finite speed. Inspection and
//! fault-injection hooks let tests observe exactly which driver calls a code
//! path made.

use crate::buffer::{BufferId, FrameBuffer};
use crate::driver::{Driver, DriverEvent, DriverResult};
use crate::mode::FrameMode;
use crate::protocol;
use crate::types::{Led, LogLevel, NativeDevice, RawTiltState, Subdevices, TiltStatus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

// libusb-style error codes returned by the simulation.
pub const ERR_INVALID_PARAM: i32 = -2;
pub const ERR_NO_DEVICE: i32 = -4;
pub const ERR_BUSY: i32 = -6;
pub const ERR_IO: i32 = -1;

/// Mechanical travel limit of the tilt motor, in degrees.
pub const TILT_LIMIT_DEGREES: f64 = 27.0;

/// Per-call counters for the stream and motor paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCalls {
    pub set_video_mode: u32,
    pub set_depth_mode: u32,
    pub set_video_buffer: u32,
    pub set_depth_buffer: u32,
    pub start_video: u32,
    pub stop_video: u32,
    pub start_depth: u32,
    pub stop_depth: u32,
    pub tilt_reads: u32,
    pub set_tilt: u32,
}

/// One-shot failure for the next matching driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    SetVideoMode(i32),
    SetDepthMode(i32),
    SetVideoBuffer(i32),
    SetDepthBuffer(i32),
    StartVideo(i32),
    StartDepth(i32),
}

pub struct SimulatedDriverBuilder {
    devices: usize,
    frame_interval: Option<Duration>,
    motor_speed: f64,
}

impl SimulatedDriverBuilder {
    /// Number of attached units.
    pub fn devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    /// Fixed delay between frames, overriding the mode frame rate.
    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Motor travel speed in degrees per second.
    pub fn motor_speed(mut self, degrees_per_second: f64) -> Self {
        self.motor_speed = degrees_per_second;
        self
    }

    pub fn build(self) -> SimulatedDriver {
        let now = Instant::now();
        SimulatedDriver {
            inner: Arc::new(Mutex::new(SimState {
                units: (0..self.devices).map(|_| SimUnit::new(now)).collect(),
                next_native: 1,
                subdevices: Subdevices::all(),
                log_level: LogLevel::Warning,
                frame_interval: self.frame_interval,
                motor_speed: self.motor_speed,
                pending: VecDeque::new(),
                faults: Vec::new(),
                poll_failure: None,
                calls: SimCalls::default(),
                shut_down: false,
            })),
            epoch: now,
        }
    }
}

/// Simulated driver context. Clones share the same simulated hardware.
#[derive(Clone)]
pub struct SimulatedDriver {
    inner: Arc<Mutex<SimState>>,
    epoch: Instant,
}

struct SimState {
    units: Vec<SimUnit>,
    next_native: u32,
    subdevices: Subdevices,
    log_level: LogLevel,
    frame_interval: Option<Duration>,
    motor_speed: f64,
    pending: VecDeque<DriverEvent>,
    faults: Vec<SimFault>,
    poll_failure: Option<i32>,
    calls: SimCalls,
    shut_down: bool,
}

struct SimUnit {
    native: Option<NativeDevice>,
    video: SimStream<u8>,
    depth: SimStream<u16>,
    motor: SimMotor,
    led: Led,
}

struct SimStream<T> {
    mode: Option<FrameMode>,
    buffer: Option<FrameBuffer<T>>,
    streaming: bool,
    next_due: Instant,
    frames: u64,
}

struct SimMotor {
    angle: f64,
    target: f64,
    /// The last request was beyond the travel limit.
    saturated: bool,
    status: TiltStatus,
    last_update: Instant,
}

impl SimUnit {
    fn new(now: Instant) -> Self {
        Self {
            native: None,
            video: SimStream::new(now),
            depth: SimStream::new(now),
            motor: SimMotor {
                angle: 0.0,
                target: 0.0,
                saturated: false,
                status: TiltStatus::Stopped,
                last_update: now,
            },
            led: Led::Green,
        }
    }
}

impl<T> SimStream<T> {
    fn new(now: Instant) -> Self {
        Self {
            mode: None,
            buffer: None,
            streaming: false,
            next_due: now,
            frames: 0,
        }
    }

    fn interval(&self, fixed: Option<Duration>) -> Duration {
        fixed.unwrap_or_else(|| {
            let fps = self.mode.map(|m| m.framerate.max(1)).unwrap_or(30);
            Duration::from_secs(1) / fps as u32
        })
    }

    fn start(&mut self, now: Instant, fixed: Option<Duration>) -> DriverResult<()> {
        if self.mode.is_none() || self.buffer.is_none() {
            return Err(ERR_INVALID_PARAM);
        }
        if !self.streaming {
            self.streaming = true;
            self.next_due = now + self.interval(fixed);
        }
        Ok(())
    }

    /// Fill the installed buffer if a frame is due. Returns the filled buffer
    /// identity, or `Err` if the application is holding the buffer locked.
    fn tick(
        &mut self,
        now: Instant,
        fixed: Option<Duration>,
        fill: impl Fn(&mut [T], u64),
    ) -> Option<Result<BufferId, ()>> {
        if !self.streaming || now < self.next_due {
            return None;
        }
        let interval = self.interval(fixed);
        self.next_due += interval;
        if self.next_due < now {
            // Fell behind; drop the backlog instead of bursting.
            self.next_due = now + interval;
        }

        let buffer = self.buffer.as_ref()?;
        let Some(mut samples) = buffer.try_lock() else {
            return Some(Err(()));
        };
        fill(&mut *samples, self.frames);
        self.frames += 1;
        Some(Ok(buffer.id()))
    }
}

impl SimMotor {
    /// Advance the motor to `now`. Returns true when the status changed.
    fn advance(&mut self, now: Instant, speed: f64) -> bool {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        let remaining = self.target - self.angle;
        let step = speed * dt;
        let status = if remaining.abs() <= step {
            self.angle = self.target;
            if self.saturated {
                TiltStatus::AtLimit
            } else {
                TiltStatus::Stopped
            }
        } else {
            self.angle += step.copysign(remaining);
            TiltStatus::Moving
        };

        let changed = status != self.status;
        self.status = status;
        changed
    }

    fn raw_state(&self) -> RawTiltState {
        let radians = self.angle.to_radians();
        let counts = |g: f64| (g * protocol::COUNTS_PER_G).round() as i16;
        let tilt_angle = if self.status == TiltStatus::Moving {
            protocol::TILT_ANGLE_UNKNOWN
        } else {
            (self.angle * 2.0).round() as i8
        };
        RawTiltState {
            accelerometer: [0, counts(radians.cos()), counts(radians.sin())],
            tilt_angle,
            tilt_status: self.status as u8,
        }
    }
}

impl SimState {
    fn unit_mut(&mut self, device: NativeDevice) -> DriverResult<&mut SimUnit> {
        self.units
            .iter_mut()
            .find(|u| u.native == Some(device))
            .ok_or(ERR_NO_DEVICE)
    }

    fn take_fault(&mut self, matches: impl Fn(&SimFault) -> Option<i32>) -> DriverResult<()> {
        if let Some(pos) = self.faults.iter().position(|f| matches(f).is_some()) {
            let fault = self.faults.remove(pos);
            return Err(matches(&fault).unwrap_or(ERR_IO));
        }
        Ok(())
    }

    fn log(&mut self, level: LogLevel, message: String) {
        if level <= self.log_level {
            self.pending.push_back(DriverEvent::Log { level, message });
        }
    }
}

impl SimulatedDriver {
    pub fn builder() -> SimulatedDriverBuilder {
        SimulatedDriverBuilder {
            devices: 1,
            frame_interval: None,
            motor_speed: 30.0,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timestamp(&self, now: Instant) -> u32 {
        // Camera clock in microseconds; wraps like the hardware counter.
        now.duration_since(self.epoch).as_micros() as u32
    }

    /// Call counters since construction.
    pub fn calls(&self) -> SimCalls {
        self.state().calls
    }

    /// Fail the next matching call with the given code.
    pub fn inject_fault(&self, fault: SimFault) {
        self.state().faults.push(fault);
    }

    /// Queue an arbitrary event for the next poll.
    pub fn inject_event(&self, event: DriverEvent) {
        self.state().pending.push_back(event);
    }

    /// Queue a driver log message, subject to the current log level.
    pub fn emit_log(&self, level: LogLevel, message: &str) {
        self.state().log(level, message.to_string());
    }

    /// Make every subsequent poll fail with `code`.
    pub fn fail_polls(&self, code: i32) {
        self.state().poll_failure = Some(code);
    }

    /// Native handle of the unit at `index`, if open.
    pub fn native_device(&self, index: usize) -> Option<NativeDevice> {
        self.state().units.get(index).and_then(|u| u.native)
    }

    pub fn video_mode(&self, index: usize) -> Option<FrameMode> {
        self.state().units.get(index).and_then(|u| u.video.mode)
    }

    pub fn depth_mode(&self, index: usize) -> Option<FrameMode> {
        self.state().units.get(index).and_then(|u| u.depth.mode)
    }

    pub fn is_video_streaming(&self, index: usize) -> bool {
        self.state()
            .units
            .get(index)
            .is_some_and(|u| u.video.streaming)
    }

    pub fn is_depth_streaming(&self, index: usize) -> bool {
        self.state()
            .units
            .get(index)
            .is_some_and(|u| u.depth.streaming)
    }

    pub fn led(&self, index: usize) -> Option<Led> {
        self.state().units.get(index).map(|u| u.led)
    }

    pub fn log_level(&self) -> LogLevel {
        self.state().log_level
    }

    pub fn subdevices(&self) -> Subdevices {
        self.state().subdevices
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }
}

impl Driver for SimulatedDriver {
    fn select_subdevices(&self, subdevices: Subdevices) {
        self.state().subdevices = subdevices;
    }

    fn device_count(&self) -> DriverResult<usize> {
        Ok(self.state().units.len())
    }

    fn open_device(&self, index: usize) -> DriverResult<NativeDevice> {
        let mut state = self.state();
        let native = NativeDevice(state.next_native);
        let unit = state.units.get_mut(index).ok_or(ERR_NO_DEVICE)?;
        if unit.native.is_some() {
            return Err(ERR_BUSY);
        }
        unit.native = Some(native);
        state.next_native += 1;
        state.log(LogLevel::Info, format!("Opened simulated device {}", index));
        Ok(native)
    }

    fn close_device(&self, device: NativeDevice) -> DriverResult<()> {
        let mut state = self.state();
        let now = Instant::now();
        let unit = state.unit_mut(device)?;
        *unit = SimUnit {
            led: unit.led,
            ..SimUnit::new(now)
        };
        state.log(LogLevel::Info, format!("Closed simulated device {:?}", device));
        Ok(())
    }

    fn set_log_level(&self, level: LogLevel) {
        self.state().log_level = level;
    }

    fn set_video_mode(&self, device: NativeDevice, mode: FrameMode) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.set_video_mode += 1;
        state.take_fault(|f| match f {
            SimFault::SetVideoMode(code) => Some(*code),
            _ => None,
        })?;
        let unit = state.unit_mut(device)?;
        if unit.video.streaming {
            return Err(ERR_BUSY);
        }
        unit.video.mode = Some(mode);
        Ok(())
    }

    fn set_depth_mode(&self, device: NativeDevice, mode: FrameMode) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.set_depth_mode += 1;
        state.take_fault(|f| match f {
            SimFault::SetDepthMode(code) => Some(*code),
            _ => None,
        })?;
        let unit = state.unit_mut(device)?;
        if unit.depth.streaming {
            return Err(ERR_BUSY);
        }
        unit.depth.mode = Some(mode);
        Ok(())
    }

    fn set_video_buffer(&self, device: NativeDevice, buffer: FrameBuffer<u8>) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.set_video_buffer += 1;
        state.take_fault(|f| match f {
            SimFault::SetVideoBuffer(code) => Some(*code),
            _ => None,
        })?;
        state.unit_mut(device)?.video.buffer = Some(buffer);
        Ok(())
    }

    fn set_depth_buffer(&self, device: NativeDevice, buffer: FrameBuffer<u16>) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.set_depth_buffer += 1;
        state.take_fault(|f| match f {
            SimFault::SetDepthBuffer(code) => Some(*code),
            _ => None,
        })?;
        state.unit_mut(device)?.depth.buffer = Some(buffer);
        Ok(())
    }

    fn start_video(&self, device: NativeDevice) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.start_video += 1;
        state.take_fault(|f| match f {
            SimFault::StartVideo(code) => Some(*code),
            _ => None,
        })?;
        let fixed = state.frame_interval;
        state.unit_mut(device)?.video.start(Instant::now(), fixed)?;
        state.log(LogLevel::Info, "Video stream started".to_string());
        Ok(())
    }

    fn stop_video(&self, device: NativeDevice) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.stop_video += 1;
        state.unit_mut(device)?.video.streaming = false;
        state.log(LogLevel::Info, "Video stream stopped".to_string());
        Ok(())
    }

    fn start_depth(&self, device: NativeDevice) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.start_depth += 1;
        state.take_fault(|f| match f {
            SimFault::StartDepth(code) => Some(*code),
            _ => None,
        })?;
        let fixed = state.frame_interval;
        state.unit_mut(device)?.depth.start(Instant::now(), fixed)?;
        state.log(LogLevel::Info, "Depth stream started".to_string());
        Ok(())
    }

    fn stop_depth(&self, device: NativeDevice) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.stop_depth += 1;
        state.unit_mut(device)?.depth.streaming = false;
        state.log(LogLevel::Info, "Depth stream stopped".to_string());
        Ok(())
    }

    fn update_tilt_state(&self, device: NativeDevice) -> DriverResult<RawTiltState> {
        let mut state = self.state();
        state.calls.tilt_reads += 1;
        if !state.subdevices.contains(Subdevices::MOTOR) {
            return Err(ERR_NO_DEVICE);
        }
        let speed = state.motor_speed;
        let motor = &mut state.unit_mut(device)?.motor;
        motor.advance(Instant::now(), speed);

        // Round-trip through the wire report, as the hardware would send it.
        let report = protocol::encode_motor_state(&motor.raw_state());
        protocol::parse_motor_state(&report).ok_or(ERR_IO)
    }

    fn set_tilt_degrees(&self, device: NativeDevice, degrees: f64) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.set_tilt += 1;
        if !state.subdevices.contains(Subdevices::MOTOR) {
            return Err(ERR_NO_DEVICE);
        }
        let speed = state.motor_speed;
        let motor = &mut state.unit_mut(device)?.motor;
        motor.advance(Instant::now(), speed);
        motor.target = degrees.clamp(-TILT_LIMIT_DEGREES, TILT_LIMIT_DEGREES);
        motor.saturated = degrees.abs() > TILT_LIMIT_DEGREES;
        Ok(())
    }

    fn set_led(&self, device: NativeDevice, led: Led) -> DriverResult<()> {
        let mut state = self.state();
        if !state.subdevices.contains(Subdevices::MOTOR) {
            return Err(ERR_NO_DEVICE);
        }
        state.unit_mut(device)?.led = led;
        Ok(())
    }

    fn process_events(&self, timeout: Duration) -> DriverResult<Vec<DriverEvent>> {
        let deadline = Instant::now() + timeout;

        loop {
            let now = Instant::now();
            let mut state = self.state();
            if let Some(code) = state.poll_failure {
                return Err(code);
            }
            if state.shut_down {
                return Err(ERR_NO_DEVICE);
            }

            let fixed = state.frame_interval;
            let speed = state.motor_speed;
            let timestamp = self.timestamp(now);
            let mut events: Vec<DriverEvent> = state.pending.drain(..).collect();
            let mut busy = Vec::new();
            let mut next_wake = deadline;

            for unit in state.units.iter_mut() {
                let Some(device) = unit.native else { continue };

                match unit.video.tick(now, fixed, |samples, frame| samples.fill(frame as u8)) {
                    Some(Ok(buffer)) => events.push(DriverEvent::VideoFrame {
                        device,
                        buffer,
                        timestamp,
                    }),
                    Some(Err(())) => busy.push("video"),
                    None => {}
                }
                match unit
                    .depth
                    .tick(now, fixed, |samples, frame| samples.fill((frame % 2048) as u16))
                {
                    Some(Ok(buffer)) => events.push(DriverEvent::DepthFrame {
                        device,
                        buffer,
                        timestamp,
                    }),
                    Some(Err(())) => busy.push("depth"),
                    None => {}
                }

                if unit.motor.status == TiltStatus::Moving && unit.motor.advance(now, speed) {
                    events.push(DriverEvent::MotorChanged { device });
                }

                if unit.video.streaming {
                    next_wake = next_wake.min(unit.video.next_due);
                }
                if unit.depth.streaming {
                    next_wake = next_wake.min(unit.depth.next_due);
                }
            }

            for stream in busy {
                state.log(
                    LogLevel::Warning,
                    format!("{} buffer busy, frame dropped", stream),
                );
            }
            events.extend(state.pending.drain(..));
            drop(state);

            if !events.is_empty() || now >= deadline {
                return Ok(events);
            }
            std::thread::sleep(next_wake.saturating_duration_since(now).min(timeout));
        }
    }

    fn shutdown(&self) -> DriverResult<()> {
        let mut state = self.state();
        for unit in state.units.iter_mut() {
            unit.video.streaming = false;
            unit.depth.streaming = false;
            unit.native = None;
        }
        state.shut_down = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_is_exclusive() {
        let sim = SimulatedDriver::builder().devices(2).build();
        let a = sim.open_device(0).unwrap();
        let b = sim.open_device(1).unwrap();
        assert_ne!(a, b);
        assert_eq!(sim.open_device(0), Err(ERR_BUSY));
        assert_eq!(sim.open_device(2), Err(ERR_NO_DEVICE));

        sim.close_device(a).unwrap();
        assert!(sim.open_device(0).is_ok());
    }

    #[test]
    fn test_frames_fill_installed_buffer() {
        let sim = SimulatedDriver::builder()
            .frame_interval(Duration::from_millis(1))
            .build();
        let dev = sim.open_device(0).unwrap();
        let mode = crate::mode::find_depth_mode(
            crate::types::Resolution::Medium,
            crate::types::DepthFormat::D11Bit,
        )
        .unwrap();
        sim.set_depth_mode(dev, mode).unwrap();
        let buffer: FrameBuffer<u16> = FrameBuffer::new(mode.samples(2));
        sim.set_depth_buffer(dev, buffer.clone()).unwrap();
        sim.start_depth(dev).unwrap();

        let mut filled = None;
        for _ in 0..100 {
            let events = sim.process_events(Duration::from_millis(5)).unwrap();
            filled = events.into_iter().find_map(|e| match e {
                DriverEvent::DepthFrame { buffer, .. } => Some(buffer),
                _ => None,
            });
            if filled.is_some() {
                break;
            }
        }
        assert_eq!(filled, Some(buffer.id()));
    }

    #[test]
    fn test_start_requires_mode_and_buffer() {
        let sim = SimulatedDriver::builder().build();
        let dev = sim.open_device(0).unwrap();
        assert_eq!(sim.start_video(dev), Err(ERR_INVALID_PARAM));
    }

    #[test]
    fn test_motor_saturates_at_limit() {
        let sim = SimulatedDriver::builder().motor_speed(1.0e6).build();
        let dev = sim.open_device(0).unwrap();
        sim.set_tilt_degrees(dev, 45.0).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let raw = sim.update_tilt_state(dev).unwrap();
        assert_eq!(raw.tilt_angle, 54);
        assert_eq!(TiltStatus::from_code(raw.tilt_status), TiltStatus::AtLimit);
    }

    #[test]
    fn test_poll_failure() {
        let sim = SimulatedDriver::builder().build();
        sim.fail_polls(-1);
        assert_eq!(sim.process_events(Duration::ZERO), Err(-1));
    }
}
