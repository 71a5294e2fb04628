use crate::driver::Driver;
use crate::protocol;
use crate::types::{NativeDevice, TiltState, TiltStatus};
use crate::{FreenectError, Result};
use std::sync::Arc;

/// Motor and accelerometer access for one open device.
///
/// Telemetry is a snapshot: it only changes when [`refresh`](Tilt::refresh)
/// is called, never in the background.
pub struct Tilt {
    driver: Arc<dyn Driver>,
    device: NativeDevice,
    state: TiltState,
}

impl Tilt {
    pub(crate) fn new(driver: Arc<dyn Driver>, device: NativeDevice) -> Self {
        Self {
            driver,
            device,
            state: TiltState::default(),
        }
    }

    /// Read the motor report and replace the whole snapshot.
    pub fn refresh(&mut self) -> Result<()> {
        let raw = self
            .driver
            .update_tilt_state(self.device)
            .map_err(FreenectError::Driver)?;
        self.state = protocol::tilt_state_from_raw(&raw);
        Ok(())
    }

    /// Last refreshed snapshot.
    pub fn state(&self) -> TiltState {
        self.state
    }

    /// Tilt angle in degrees. Unknown (-64°) while the motor is moving.
    pub fn angle(&self) -> f64 {
        self.state.angle
    }

    pub fn status(&self) -> TiltStatus {
        self.state.status
    }

    /// Acceleration [x, y, z] in m/s².
    pub fn acceleration(&self) -> [f64; 3] {
        self.state.acceleration
    }

    /// Ask the motor to move to `degrees`. Returns immediately; the hardware
    /// stops at its mechanical limit if the target is out of range.
    pub fn set_angle(&mut self, degrees: f64) -> Result<()> {
        log::debug!("Setting tilt target to {:.1} degrees", degrees);
        self.driver
            .set_tilt_degrees(self.device, degrees)
            .map_err(FreenectError::Driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDriver;
    use std::time::{Duration, Instant};

    fn open_tilt(speed: f64) -> (SimulatedDriver, Tilt) {
        let sim = SimulatedDriver::builder().motor_speed(speed).build();
        let device = sim.open_device(0).unwrap();
        let tilt = Tilt::new(Arc::new(sim.clone()), device);
        (sim, tilt)
    }

    #[test]
    fn test_snapshot_only_changes_on_refresh() {
        let (sim, mut tilt) = open_tilt(1.0e6);
        tilt.refresh().unwrap();
        assert_eq!(tilt.angle(), 0.0);
        assert_eq!(tilt.status(), TiltStatus::Stopped);

        tilt.set_angle(10.0).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tilt.angle(), 0.0);
        assert_eq!(sim.calls().tilt_reads, 1);

        tilt.refresh().unwrap();
        assert_eq!(tilt.angle(), 10.0);
        assert_eq!(sim.calls().tilt_reads, 2);
    }

    #[test]
    fn test_refresh_overwrites_all_fields() {
        let (_sim, mut tilt) = open_tilt(1.0e6);
        tilt.refresh().unwrap();
        let level = tilt.state();
        // Level: gravity entirely on y.
        assert!(level.acceleration[0].abs() < 1e-9);
        assert!((level.acceleration[1] - protocol::GRAVITY).abs() < 0.05);
        assert!(level.acceleration[2].abs() < 0.05);

        tilt.set_angle(20.0).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        tilt.refresh().unwrap();
        let tilted = tilt.state();
        assert_eq!(tilted.angle, 20.0);
        assert_ne!(tilted.acceleration[1], level.acceleration[1]);
        assert!(tilted.acceleration[2] > 3.0);
    }

    #[test]
    fn test_moving_then_converges() {
        let (_sim, mut tilt) = open_tilt(200.0);
        tilt.set_angle(-20.0).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        tilt.refresh().unwrap();
        assert_eq!(tilt.status(), TiltStatus::Moving);
        assert_eq!(tilt.angle(), -64.0);

        let deadline = Instant::now() + Duration::from_secs(2);
        while tilt.status() != TiltStatus::Stopped && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
            tilt.refresh().unwrap();
        }
        assert_eq!(tilt.status(), TiltStatus::Stopped);
        assert_eq!(tilt.angle(), -20.0);
    }

    #[test]
    fn test_out_of_range_target_reaches_limit() {
        let (_sim, mut tilt) = open_tilt(1.0e6);
        tilt.set_angle(-90.0).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        tilt.refresh().unwrap();
        assert_eq!(tilt.status(), TiltStatus::AtLimit);
        assert_eq!(tilt.angle(), -27.0);
    }
}
