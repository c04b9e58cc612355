use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Channels in every decoded frame. The pipeline is RGB interleaved end to
/// end; the decoder is the single place raw formats are converted.
pub const FRAME_CHANNELS: u8 = 3;

/// A decoded, display-ready frame.
///
/// `pixels` is an immutable, freshly allocated buffer of exactly
/// `width * height * channels` bytes. Cloning is cheap and readers can hold
/// the data for as long as they like without aliasing the capture path.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub pixels: Bytes,

    /// Wire format this frame was decoded from.
    pub source_format: PixelFormat,

    /// Monotonic capture timestamp for latency tracking
    pub captured_at: Instant,
}

impl Frame {
    pub(crate) fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(
            pixels.len(),
            width as usize * height as usize * FRAME_CHANNELS as usize
        );
        Self {
            width,
            height,
            channels: FRAME_CHANNELS,
            pixels: Bytes::from(pixels),
            source_format: format,
            captured_at: Instant::now(),
        }
    }

    /// All-black placeholder shown before the first real frame arrives.
    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * FRAME_CHANNELS as usize;
        Self::new(width, height, PixelFormat::Mono8, vec![0u8; len])
    }
}

/// Sensor wire formats we decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Rgb8,
    Bgr8,
    BayerRg8,
    BayerBg8,
    BayerGb8,
    BayerGr8,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 7] = [
        PixelFormat::Mono8,
        PixelFormat::Rgb8,
        PixelFormat::Bgr8,
        PixelFormat::BayerRg8,
        PixelFormat::BayerBg8,
        PixelFormat::BayerGb8,
        PixelFormat::BayerGr8,
    ];

    /// Stable index used by the preset file and UI format selectors.
    pub fn index(self) -> u32 {
        Self::ALL.iter().position(|f| *f == self).unwrap_or(0) as u32
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// GenICam `PixelFormat` enumeration entry name.
    pub fn node_entry(self) -> &'static str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Bgr8 => "BGR8",
            PixelFormat::BayerRg8 => "BayerRG8",
            PixelFormat::BayerBg8 => "BayerBG8",
            PixelFormat::BayerGb8 => "BayerGB8",
            PixelFormat::BayerGr8 => "BayerGR8",
        }
    }

    pub fn from_node_entry(entry: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.node_entry() == entry)
    }

    /// Bytes per pixel on the wire (all supported formats are 8-bit).
    pub fn raw_bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerRg8
            | PixelFormat::BayerBg8
            | PixelFormat::BayerGb8
            | PixelFormat::BayerGr8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_index_round_trips() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_index(format.index()), Some(format));
        }
        assert_eq!(PixelFormat::from_index(99), None);
    }

    #[test]
    fn node_entry_round_trips() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_node_entry(format.node_entry()), Some(format));
        }
        assert_eq!(PixelFormat::from_node_entry("Mono12Packed"), None);
    }

    #[test]
    fn blank_frame_invariant() {
        let frame = Frame::blank(64, 48);
        assert_eq!(frame.pixels.len(), 64 * 48 * 3);
        assert!(frame.pixels.iter().all(|b| *b == 0));
    }
}
