pub mod capture;
pub mod control;
pub mod display;
pub mod pipeline;
pub mod utils;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};

pub use capture::frame::Frame;
pub use capture::session::{DeviceSession, SessionEvent, SessionStatus};
pub use control::facade::ControlFacade;
pub use pipeline::sink::FrameSink;

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
}

/// Acquisition and sensor settings, mirrored into the device session at
/// start and on each live update. Last writer wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub exposure_us: f64,
    pub gain_db: f64,
    pub wb_red_ratio: f64,
    pub pixel_format: PixelFormat,
    pub packet_size_bytes: u32,
    pub acquisition_timeout_ms: u32,
    /// Sustained FPS below this is logged as a warning, never an error.
    pub fps_warn_floor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            exposure_us: 20_000.0,
            gain_db: 15.0,
            wb_red_ratio: 1.5,
            pixel_format: PixelFormat::BayerRg8,
            packet_size_bytes: 9_000,
            acquisition_timeout_ms: 2_000,
            fps_warn_floor: 10.0,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}
