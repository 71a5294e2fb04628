//! Sweep the tilt motor and print accelerometer readings.
//!
//! Usage: cargo run --example tilt [--usb]
//! Without `--usb` a simulated Kinect is used.

use freenect::sim::SimulatedDriver;
use freenect::usb::UsbDriver;
use freenect::{Freenect, Led, TiltStatus};
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let use_usb = std::env::args().any(|a| a == "--usb");
    let init = if use_usb {
        UsbDriver::new().and_then(|driver| Freenect::initialize(driver))
    } else {
        Freenect::initialize(SimulatedDriver::builder().build())
    };
    let mut ctx = match init {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    if ctx.device_count() == 0 {
        eprintln!("No Kinect found");
        std::process::exit(1);
    }
    let device = match ctx.device(0) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = device.open() {
        eprintln!("Failed to open device: {}", e);
        std::process::exit(1);
    }

    for (target, led) in [(20.0, Led::Green), (-20.0, Led::Red), (0.0, Led::BlinkGreen)] {
        if let Err(e) = device.set_led(led) {
            eprintln!("LED: {}", e);
        }
        match device.tilt().and_then(|t| t.set_angle(target)) {
            Ok(()) => println!("Moving to {:+.1} degrees", target),
            Err(e) => {
                eprintln!("Tilt: {}", e);
                break;
            }
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(200));
            let state = match device.tilt() {
                Ok(t) => t.state(),
                Err(e) => {
                    eprintln!("Tilt: {}", e);
                    break;
                }
            };
            let [x, y, z] = state.acceleration;
            println!(
                "  angle={:+6.1}  status={:?}  accel=[{:+.2}, {:+.2}, {:+.2}] m/s²",
                state.angle, state.status, x, y, z
            );
            if state.status != TiltStatus::Moving {
                break;
            }
        }
    }

    if let Err(e) = ctx.shutdown() {
        eprintln!("Shutdown error: {}", e);
    }
}
