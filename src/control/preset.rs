//! User-facing settings snapshot persisted between runs.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::frame::PixelFormat;
use crate::utils::write_atomic;
use crate::CaptureConfig;

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("preset io: {0}")]
    Io(#[from] io::Error),

    #[error("preset format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Flat on-disk record of the user-facing subset of [`CaptureConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub exposure: f64,
    pub gain: f64,
    pub wb_red: f64,
    pub pixel_format_idx: u32,
}

impl Preset {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            exposure: config.exposure_us,
            gain: config.gain_db,
            wb_red: config.wb_red_ratio,
            pixel_format_idx: config.pixel_format.index(),
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::from_index(self.pixel_format_idx).unwrap_or(PixelFormat::Mono8)
    }

    /// Write-then-rename, so a crash mid-save never leaves a torn preset.
    pub fn save(&self, path: &Path) -> Result<(), PresetError> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        Ok(())
    }

    /// `Ok(None)` when no preset has been saved yet; a normal first-run
    /// condition, not an error.
    pub fn load(path: &Path) -> Result<Option<Self>, PresetError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}
