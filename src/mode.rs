//! Frame modes the Kinect cameras support.
//!
//! Mode negotiation resolves a (resolution, format) pair to a concrete
//! [`FrameMode`]. Only exact matches are accepted; there is no fallback to a
//! neighbouring resolution.

use crate::types::{DepthFormat, Resolution, VideoFormat};

/// Concrete transfer configuration for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMode {
    pub resolution: Resolution,
    pub format: ModeFormat,
    /// Size of one frame in bytes.
    pub bytes: usize,
    pub width: u16,
    pub height: u16,
    pub bits_per_pixel: u8,
    pub framerate: u8,
}

/// Format half of a mode, tagged by stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFormat {
    Video(VideoFormat),
    Depth(DepthFormat),
}

impl FrameMode {
    /// Number of samples of `sample_size` bytes needed to hold one frame.
    /// Packed formats round up to a whole sample.
    pub fn samples(&self, sample_size: usize) -> usize {
        self.bytes.div_ceil(sample_size)
    }
}

const fn video(
    resolution: Resolution,
    format: VideoFormat,
    width: u16,
    height: u16,
    bits_per_pixel: u8,
    framerate: u8,
) -> FrameMode {
    FrameMode {
        resolution,
        format: ModeFormat::Video(format),
        bytes: width as usize * height as usize * bits_per_pixel as usize / 8,
        width,
        height,
        bits_per_pixel,
        framerate,
    }
}

const fn depth(format: DepthFormat, bits_per_pixel: u8) -> FrameMode {
    FrameMode {
        resolution: Resolution::Medium,
        format: ModeFormat::Depth(format),
        bytes: 640 * 480 * bits_per_pixel as usize / 8,
        width: 640,
        height: 480,
        bits_per_pixel,
        framerate: 30,
    }
}

/// Video modes of the Kinect RGB/IR camera.
pub const VIDEO_MODES: &[FrameMode] = &[
    video(Resolution::High, VideoFormat::Rgb, 1280, 1024, 24, 10),
    video(Resolution::Medium, VideoFormat::Rgb, 640, 480, 24, 30),
    video(Resolution::High, VideoFormat::Bayer, 1280, 1024, 8, 10),
    video(Resolution::Medium, VideoFormat::Bayer, 640, 480, 8, 30),
    video(Resolution::High, VideoFormat::Ir8Bit, 1280, 1024, 8, 10),
    video(Resolution::Medium, VideoFormat::Ir8Bit, 640, 488, 8, 30),
    video(Resolution::High, VideoFormat::Ir10Bit, 1280, 1024, 16, 10),
    video(Resolution::Medium, VideoFormat::Ir10Bit, 640, 488, 16, 30),
    video(Resolution::High, VideoFormat::Ir10BitPacked, 1280, 1024, 10, 10),
    video(Resolution::Medium, VideoFormat::Ir10BitPacked, 640, 488, 10, 30),
    video(Resolution::Medium, VideoFormat::YuvRgb, 640, 480, 24, 15),
    video(Resolution::Medium, VideoFormat::YuvRaw, 640, 480, 16, 15),
];

/// Depth modes. The depth camera only runs at 640x480.
pub const DEPTH_MODES: &[FrameMode] = &[
    depth(DepthFormat::D11Bit, 16),
    depth(DepthFormat::D10Bit, 16),
    depth(DepthFormat::D11BitPacked, 11),
    depth(DepthFormat::D10BitPacked, 10),
    depth(DepthFormat::Registered, 16),
    depth(DepthFormat::Mm, 16),
];

/// Look up the video mode for an exact resolution and format.
pub fn find_video_mode(resolution: Resolution, format: VideoFormat) -> Option<FrameMode> {
    VIDEO_MODES
        .iter()
        .find(|m| m.resolution == resolution && m.format == ModeFormat::Video(format))
        .copied()
}

/// Look up the depth mode for an exact resolution and format.
pub fn find_depth_mode(resolution: Resolution, format: DepthFormat) -> Option<FrameMode> {
    DEPTH_MODES
        .iter()
        .find(|m| m.resolution == resolution && m.format == ModeFormat::Depth(format))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_medium_rgb_is_921600_bytes() {
        let mode = find_video_mode(Resolution::Medium, VideoFormat::Rgb).unwrap();
        assert_eq!(mode.bytes, 921_600);
        assert_eq!(mode.samples(1), 921_600);
        assert_eq!(mode.framerate, 30);
    }

    #[test]
    fn test_depth_samples_are_16_bit() {
        let mode = find_depth_mode(Resolution::Medium, DepthFormat::D11Bit).unwrap();
        assert_eq!(mode.bytes, 614_400);
        assert_eq!(mode.samples(2), 307_200);

        let packed = find_depth_mode(Resolution::Medium, DepthFormat::D11BitPacked).unwrap();
        assert_eq!(packed.bytes, 422_400);
        assert_eq!(packed.samples(2), 211_200);
    }

    #[test]
    fn test_ir_medium_has_extra_rows() {
        let mode = find_video_mode(Resolution::Medium, VideoFormat::Ir8Bit).unwrap();
        assert_eq!((mode.width, mode.height), (640, 488));
    }

    #[test]
    fn test_unsupported_combinations() {
        assert!(find_video_mode(Resolution::Low, VideoFormat::Rgb).is_none());
        assert!(find_video_mode(Resolution::High, VideoFormat::YuvRaw).is_none());
        assert!(find_depth_mode(Resolution::High, DepthFormat::D11Bit).is_none());
    }
}
