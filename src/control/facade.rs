//! UI-side controller.
//!
//! The facade is what the control thread talks to: it owns the capture
//! configuration, starts and stops device sessions, forwards parameter
//! changes, and republishes session notifications. It never touches the
//! device itself; every device access is delegated to the session's
//! capture thread, which is what keeps the facade safe to call from any
//! thread the UI happens to use.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};

use crate::capture::frame::PixelFormat;
use crate::capture::session::{
    DeviceSession, ParamError, ParamUpdate, SessionEvent, SessionStatus,
};
use crate::capture::transport::CameraSystem;
use crate::pipeline::sink::FrameSink;
use crate::{CaptureConfig, Config};

use super::preset::{Preset, PresetError};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("current frame has no valid pixel data")]
    BadFrame,

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub struct ControlFacade {
    system: Arc<dyn CameraSystem>,
    sink: Arc<FrameSink>,
    config: Mutex<CaptureConfig>,
    session: Mutex<Option<DeviceSession>>,
    events_tx: flume::Sender<SessionEvent>,
    events_rx: flume::Receiver<SessionEvent>,
    status: Mutex<SessionStatus>,
    fps: Mutex<f64>,
    preset_path: PathBuf,
}

impl ControlFacade {
    pub fn new(
        system: Arc<dyn CameraSystem>,
        config: Config,
        preset_path: impl Into<PathBuf>,
    ) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            system,
            sink: Arc::new(FrameSink::new(config.display.width, config.display.height)),
            config: Mutex::new(config.capture),
            session: Mutex::new(None),
            events_tx,
            events_rx,
            status: Mutex::new(SessionStatus::Idle),
            fps: Mutex::new(0.0),
            preset_path: preset_path.into(),
        }
    }

    pub fn sink(&self) -> Arc<FrameSink> {
        Arc::clone(&self.sink)
    }

    /// Mirrored session status, refreshed by [`poll_events`](Self::poll_events).
    pub fn status(&self) -> SessionStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn fps(&self) -> f64 {
        *self.fps.lock().unwrap()
    }

    pub fn config(&self) -> CaptureConfig {
        self.config.lock().unwrap().clone()
    }

    /// Start a capture session. A no-op while one is already active.
    pub fn start(&self) {
        let mut session = self.session.lock().unwrap();
        if session.as_ref().is_some_and(|s| s.is_active()) {
            info!("start requested while already running; ignored");
            return;
        }
        // Tear down a finished (faulted) session first so its events
        // precede the new start sequence.
        if let Some(mut old) = session.take() {
            old.stop();
        }
        let config = self.config.lock().unwrap().clone();
        match DeviceSession::start(
            Arc::clone(&self.system),
            config,
            Arc::clone(&self.sink),
            self.events_tx.clone(),
        ) {
            Ok(s) => *session = Some(s),
            Err(e) => {
                // Spawn failure is the only synchronous failure path;
                // report it the way the worker reports faults.
                warn!("failed to start session: {e}");
                let _ = self
                    .events_tx
                    .send(SessionEvent::Status(SessionStatus::Faulted(e.to_string())));
            }
        }
    }

    /// Tear down the session. The join is bounded; status events flow
    /// through the usual channel (`Stopping`, then `Idle`).
    pub fn stop(&self) {
        if let Some(mut s) = self.session.lock().unwrap().take() {
            s.stop();
        }
    }

    pub fn set_exposure(&self, micros: f64) -> Result<(), ParamError> {
        self.set_param(ParamUpdate::Exposure(micros))
    }

    pub fn set_gain(&self, db: f64) -> Result<(), ParamError> {
        self.set_param(ParamUpdate::Gain(db))
    }

    pub fn set_wb_red(&self, ratio: f64) -> Result<(), ParamError> {
        self.set_param(ParamUpdate::WhiteBalanceRed(ratio))
    }

    pub fn set_pixel_format(&self, format: PixelFormat) -> Result<(), ParamError> {
        self.set_param(ParamUpdate::PixelFormat(format))
    }

    fn set_param(&self, update: ParamUpdate) -> Result<(), ParamError> {
        let mut config = self.config.lock().unwrap();
        if !store_param(&mut config, update) {
            // Unchanged value: no device write, no notification.
            return Ok(());
        }
        drop(config);
        self.forward(update)
    }

    fn forward(&self, update: ParamUpdate) -> Result<(), ParamError> {
        let session = self.session.lock().unwrap();
        match session.as_ref().filter(|s| s.is_active()) {
            Some(s) => s.update(update),
            None => {
                // No live device to clamp against; echo the request so
                // two-way bindings settle on the stored value.
                let _ = self.events_tx.send(SessionEvent::ParameterApplied(update));
                Ok(())
            }
        }
    }

    /// Drain pending session notifications on the caller's thread,
    /// updating the status/FPS/config mirrors along the way. The UI calls
    /// this on its own refresh cadence; the capture thread never waits on
    /// a consumer.
    pub fn poll_events(&self) -> Vec<SessionEvent> {
        let events: Vec<SessionEvent> = self.events_rx.try_iter().collect();
        for event in &events {
            match event {
                SessionEvent::Status(status) => {
                    *self.status.lock().unwrap() = status.clone();
                }
                SessionEvent::Fps(fps) => {
                    *self.fps.lock().unwrap() = *fps;
                }
                SessionEvent::ParameterApplied(update) => {
                    // The device may have clamped the request; keep the
                    // owned config in step with what was actually applied.
                    store_param(&mut self.config.lock().unwrap(), *update);
                }
                _ => {}
            }
        }
        events
    }

    pub fn save_preset(&self) -> Result<(), PresetError> {
        let preset = Preset::from_config(&self.config.lock().unwrap());
        preset.save(&self.preset_path)?;
        info!("preset saved to {}", self.preset_path.display());
        Ok(())
    }

    /// Returns `Ok(false)` when no preset file exists yet.
    pub fn load_preset(&self) -> Result<bool, PresetError> {
        let Some(preset) = Preset::load(&self.preset_path)? else {
            info!("no preset saved yet");
            return Ok(false);
        };
        self.apply_user_settings(
            preset.exposure,
            preset.gain,
            preset.wb_red,
            preset.pixel_format(),
        );
        Ok(true)
    }

    pub fn reset_to_defaults(&self) {
        let defaults = CaptureConfig::default();
        self.apply_user_settings(
            defaults.exposure_us,
            defaults.gain_db,
            defaults.wb_red_ratio,
            defaults.pixel_format,
        );
    }

    /// Route a settings bundle through the ordinary setters so the usual
    /// idempotence guards and notifications apply.
    fn apply_user_settings(&self, exposure: f64, gain: f64, wb_red: f64, format: PixelFormat) {
        for result in [
            self.set_exposure(exposure),
            self.set_gain(gain),
            self.set_wb_red(wb_red),
            self.set_pixel_format(format),
        ] {
            if let Err(e) = result {
                warn!("setting not forwarded to session: {e}");
            }
        }
    }

    /// Encode the most recent frame as a PNG at `path`.
    pub fn save_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let frame = self.sink.latest();
        let image: image::RgbImage =
            image::ImageBuffer::from_raw(frame.width, frame.height, frame.pixels.to_vec())
                .ok_or(SnapshotError::BadFrame)?;
        image.save(path)?;
        info!("snapshot saved to {}", path.display());
        Ok(())
    }
}

/// Store one parameter into the config; returns whether anything changed.
/// Exact equality is the idempotence guard: re-setting the same value must
/// not reach the device or re-fire a notification.
fn store_param(config: &mut CaptureConfig, update: ParamUpdate) -> bool {
    match update {
        ParamUpdate::Exposure(v) => replace(&mut config.exposure_us, v),
        ParamUpdate::Gain(v) => replace(&mut config.gain_db, v),
        ParamUpdate::WhiteBalanceRed(v) => replace(&mut config.wb_red_ratio, v),
        ParamUpdate::PixelFormat(f) => {
            if config.pixel_format == f {
                false
            } else {
                config.pixel_format = f;
                true
            }
        }
    }
}

#[allow(clippy::float_cmp)]
fn replace(slot: &mut f64, value: f64) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}
