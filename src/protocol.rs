use crate::types::{RawTiltState, TiltState, TiltStatus};

// -- USB identifiers --
pub const VID: u16 = 0x045E;
pub const PID_NUI_AUDIO: u16 = 0x02AD;
pub const PID_NUI_CAMERA: u16 = 0x02AE;
pub const PID_NUI_MOTOR: u16 = 0x02B0;
pub const PID_K4W_AUDIO: u16 = 0x02BE;
pub const PID_K4W_CAMERA: u16 = 0x02BF;

// -- Motor control transfers --
pub const REQUEST_TYPE_OUT: u8 = 0x40;
pub const REQUEST_TYPE_IN: u8 = 0xC0;
pub const REQ_SET_LED: u8 = 0x06;
pub const REQ_SET_TILT: u8 = 0x31;
pub const REQ_GET_STATE: u8 = 0x32;

/// Length of the motor state report.
pub const STATE_REPORT_SIZE: usize = 10;

/// Widest angle the firmware accepts on the wire. The mechanism itself stops
/// earlier, at roughly ±27°.
pub const MAX_WIRE_TILT_DEGREES: f64 = 31.0;

/// Raw tilt value meaning "angle unknown" (motor between positions).
pub const TILT_ANGLE_UNKNOWN: i8 = -128;

/// Accelerometer counts per g.
pub const COUNTS_PER_G: f64 = 819.0;

/// Standard gravity in m/s².
pub const GRAVITY: f64 = 9.80665;

/// Encode a tilt target for the SET_TILT `wValue`: signed half degrees.
pub fn encode_tilt_degrees(degrees: f64) -> u16 {
    let clamped = degrees.clamp(-MAX_WIRE_TILT_DEGREES, MAX_WIRE_TILT_DEGREES);
    ((clamped * 2.0).round() as i16) as u16
}

/// Parse the 10-byte motor state report.
///
/// Layout:
/// - `[0..2]`: unused
/// - `[2..8]`: 3x int16 BE accelerometer counts [x, y, z]
/// - `[8]`: int8 tilt angle in half degrees
/// - `[9]`: motor status code
pub fn parse_motor_state(report: &[u8]) -> Option<RawTiltState> {
    if report.len() < STATE_REPORT_SIZE {
        return None;
    }

    let accel = |i: usize| i16::from_be_bytes([report[i], report[i + 1]]);

    Some(RawTiltState {
        accelerometer: [accel(2), accel(4), accel(6)],
        tilt_angle: report[8] as i8,
        tilt_status: report[9],
    })
}

/// Inverse of [`parse_motor_state`], used by the simulated motor.
pub fn encode_motor_state(raw: &RawTiltState) -> [u8; STATE_REPORT_SIZE] {
    let mut report = [0u8; STATE_REPORT_SIZE];
    for (axis, value) in raw.accelerometer.iter().enumerate() {
        report[2 + axis * 2..4 + axis * 2].copy_from_slice(&value.to_be_bytes());
    }
    report[8] = raw.tilt_angle as u8;
    report[9] = raw.tilt_status;
    report
}

/// Convert accelerometer counts to m/s².
pub fn counts_to_mks(counts: i16) -> f64 {
    counts as f64 / COUNTS_PER_G * GRAVITY
}

/// Convert a raw motor report into physical units.
pub fn tilt_state_from_raw(raw: &RawTiltState) -> TiltState {
    TiltState {
        angle: raw.tilt_angle as f64 / 2.0,
        status: TiltStatus::from_code(raw.tilt_status),
        acceleration: [
            counts_to_mks(raw.accelerometer[0]),
            counts_to_mks(raw.accelerometer[1]),
            counts_to_mks(raw.accelerometer[2]),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_tilt_half_degrees() {
        assert_eq!(encode_tilt_degrees(0.0), 0);
        assert_eq!(encode_tilt_degrees(15.0), 30);
        assert_eq!(encode_tilt_degrees(-10.0) as i16, -20);
        // Beyond the wire range clamps to ±31°.
        assert_eq!(encode_tilt_degrees(90.0), 62);
        assert_eq!(encode_tilt_degrees(-90.0) as i16, -62);
    }

    #[test]
    fn test_parse_motor_state() {
        // Level, resting: gravity on +y, angle 0, stopped.
        let report: [u8; 10] = [0x00, 0x00, 0xff, 0xfe, 0x03, 0x33, 0x00, 0x10, 0x00, 0x00];
        let raw = parse_motor_state(&report).unwrap();
        assert_eq!(raw.accelerometer, [-2, 819, 16]);
        assert_eq!(raw.tilt_angle, 0);
        assert_eq!(raw.tilt_status, 0);

        let state = tilt_state_from_raw(&raw);
        assert!((state.acceleration[1] - GRAVITY).abs() < 1e-9);
        assert_eq!(state.status, TiltStatus::Stopped);
    }

    #[test]
    fn test_parse_motor_state_short_report() {
        assert!(parse_motor_state(&[0u8; 9]).is_none());
    }

    #[test]
    fn test_tilt_angle_and_status() {
        let raw = RawTiltState {
            accelerometer: [0, 0, 0],
            tilt_angle: -54,
            tilt_status: 0x01,
        };
        let state = tilt_state_from_raw(&parse_motor_state(&encode_motor_state(&raw)).unwrap());
        assert_eq!(state.angle, -27.0);
        assert_eq!(state.status, TiltStatus::AtLimit);
    }
}
