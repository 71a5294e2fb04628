//! # freenect - Rust driver layer for the Microsoft Kinect
//!
//! Provides:
//! - Video and depth streams with zero-copy buffer handoff between the
//!   driver and the application
//! - A background event loop that delivers frames to your callbacks
//! - Tilt motor, accelerometer and LED control with explicit refresh
//! - A simulated Kinect for testing without hardware
//!
//! ## Quick Start
//! ```no_run
//! use freenect::sim::SimulatedDriver;
//! use freenect::{BufferPool, Freenect, Resolution, VideoConfig, VideoFormat};
//!
//! let mut ctx = Freenect::initialize(SimulatedDriver::builder().build()).unwrap();
//! let device = ctx.device(0).unwrap();
//! device.open().unwrap();
//!
//! let pool: BufferPool<u8> = BufferPool::new(2, 640 * 480 * 3);
//! let returns = pool.clone();
//! let config = VideoConfig::new(Resolution::Medium, VideoFormat::Rgb)
//!     .producer(pool.producer())
//!     .consumer(move |frame, timestamp| {
//!         println!("frame at {}: first pixel {:?}", timestamp, &frame.lock()[..3]);
//!         returns.release(frame.clone());
//!     });
//!
//! let video = device.configure_video(config).unwrap();
//! video.start().unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! video.stop().unwrap();
//! ctx.shutdown().unwrap();
//! ```

pub mod buffer;
pub mod config;
pub mod context;
pub mod device;
pub mod driver;
pub mod error;
mod event_loop;
pub mod mode;
pub mod protocol;
pub mod sim;
pub mod stream;
pub mod tilt;
pub mod types;
pub mod usb;

pub use buffer::{BufferGuard, BufferId, BufferPool, FrameBuffer};
pub use config::Config;
pub use context::Freenect;
pub use device::Device;
pub use driver::{Driver, DriverEvent, DriverResult};
pub use error::FreenectError;
pub use event_loop::Logger;
pub use mode::FrameMode;
pub use stream::{
    DepthChannel, DepthConfig, StreamChannel, StreamConfig, Transition, VideoChannel, VideoConfig,
};
pub use tilt::Tilt;
pub use types::*;

/// Result type alias for freenect operations.
pub type Result<T> = std::result::Result<T, FreenectError>;
