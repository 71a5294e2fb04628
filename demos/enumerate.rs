//! List Kinect units connected over USB.
//!
//! Each unit is reported with its model and the sub-devices that enumerated
//! next to it. Kinect for Windows units have no motor, so tilt and LED
//! control are unavailable on them.

use freenect::protocol::{PID_K4W_CAMERA, PID_NUI_CAMERA, PID_NUI_MOTOR};
use freenect::{DeviceInfo, Subdevices};

fn model(info: &DeviceInfo) -> &'static str {
    match info.product_id {
        PID_NUI_CAMERA => "Xbox 360 Kinect",
        PID_K4W_CAMERA => "Kinect for Windows",
        PID_NUI_MOTOR => "Xbox 360 Kinect (camera not enumerated)",
        _ => "unknown model",
    }
}

fn missing(info: &DeviceInfo) -> Vec<&'static str> {
    let mut notes = Vec::new();
    if !info.subdevices.contains(Subdevices::CAMERA) {
        notes.push("no camera: video and depth unavailable");
    }
    if !info.subdevices.contains(Subdevices::MOTOR) {
        notes.push("no motor: tilt and LED unavailable");
    }
    if !info.subdevices.contains(Subdevices::AUDIO) {
        // Audio needs firmware upload before it appears on the bus.
        notes.push("no audio");
    }
    notes
}

fn main() {
    env_logger::init();

    let devices = match freenect::usb::list_devices() {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    if devices.is_empty() {
        println!("No Kinect found");
        return;
    }

    println!("Found {} Kinect(s):", devices.len());
    for (i, dev) in devices.iter().enumerate() {
        println!(
            "  [{}] {}  Bus={:03} Addr={:03}  PID=0x{:04x}",
            i,
            model(dev),
            dev.bus_number,
            dev.address,
            dev.product_id
        );
        println!("      sub-devices: {:?}", dev.subdevices);
        for note in missing(dev) {
            println!("      {}", note);
        }
    }

    let tiltable = devices
        .iter()
        .filter(|d| d.subdevices.contains(Subdevices::MOTOR))
        .count();
    println!("{} of {} unit(s) support tilt", tiltable, devices.len());
}
