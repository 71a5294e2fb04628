//! Stream RGB and depth from a simulated Kinect using double buffering.
//!
//! Usage: cargo run --example stream
//! Set FREENECT_POLL_TIMEOUT_MS to change the event loop poll interval.

use freenect::sim::SimulatedDriver;
use freenect::{
    BufferPool, Config, DepthConfig, DepthFormat, Freenect, FrameBuffer, Resolution, VideoConfig,
    VideoFormat,
};
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let mut ctx = match Freenect::with_config(SimulatedDriver::builder().build(), Config::from_env())
    {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };
    ctx.set_logger(|level, msg| log::log!(level.to_log_level(), "[device] {}", msg));

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

    // Video: two buffers cycling between the driver and a worker thread.
    let pool: BufferPool<u8> = BufferPool::new(2, 640 * 480 * 3);
    let (tx, rx) = crossbeam_channel::bounded::<(FrameBuffer<u8>, u32)>(2);
    let worker = {
        let pool = pool.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let mut count: u64 = 0;
            for (frame, timestamp) in rx {
                count += 1;
                if count % 30 == 1 {
                    let pixels = frame.lock();
                    println!(
                        "video ts={:<10}  rgb[0]=({}, {}, {})  {:.1} fps",
                        timestamp,
                        pixels[0],
                        pixels[1],
                        pixels[2],
                        count as f64 / start.elapsed().as_secs_f64()
                    );
                }
                pool.release(frame);
            }
            count
        })
    };

    let video_config = VideoConfig::new(Resolution::Medium, VideoFormat::Rgb)
        .producer(pool.producer())
        .consumer(move |frame, timestamp| {
            let _ = tx.send((frame.clone(), timestamp));
        });

    match device.configure_video(video_config).and_then(|v| v.start()) {
        Ok(t) => println!("Video: {:?}", t),
        Err(e) => {
            eprintln!("Failed to start video: {}", e);
            std::process::exit(1);
        }
    }

    // Depth: a single buffer reused in place.
    let mut depth_buffer: Option<FrameBuffer<u16>> = None;
    let depth_config = DepthConfig::new(Resolution::Medium, DepthFormat::D11Bit)
        .producer(move |samples| {
            if depth_buffer.is_some() {
                return None;
            }
            let fresh = FrameBuffer::new(samples);
            depth_buffer = Some(fresh.clone());
            Some(fresh)
        })
        .consumer(|frame, timestamp| {
            let depth = frame.lock();
            let center = depth[depth.len() / 2 + 320];
            log::debug!("depth ts={} center={}", timestamp, center);
        });

    match device.configure_depth(depth_config).and_then(|d| d.start()) {
        Ok(t) => println!("Depth: {:?}", t),
        Err(e) => eprintln!("Failed to start depth: {}", e),
    }

    std::thread::sleep(Duration::from_secs(3));

    if let Some(depth) = device.depth() {
        println!("Depth frames delivered: {}", depth.frames_delivered());
    }

    if let Err(e) = ctx.shutdown() {
        eprintln!("Shutdown error: {}", e);
    }
    match worker.join() {
        Ok(count) => println!("\nTotal: {} video frames", count),
        Err(_) => eprintln!("Video worker panicked"),
    }
}
