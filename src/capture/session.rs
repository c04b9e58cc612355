//! Device session: the lifetime of one camera and its capture thread.
//!
//! A session walks `Idle -> Starting -> Streaming -> Stopping -> Idle`,
//! with `Faulted` absorbing unrecoverable errors from `Starting` or
//! `Streaming`. Device discovery, configuration and the read loop all run
//! on a dedicated capture thread; the control side talks to it through a
//! command channel and listens on an event channel. The device handle never
//! leaves the capture thread, so parameter writes are serialized by
//! construction.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::pipeline::sink::FrameSink;
use crate::CaptureConfig;

use super::decoder;
use super::frame::PixelFormat;
use super::transport::{
    set_float_clamped, set_int_clamped, CameraDevice, CameraSystem, NodeError, TransportError,
};

/// Bounded wait for the capture thread to exit on `stop`. Comfortably above
/// the acquisition timeout so a healthy thread always makes the deadline.
const JOIN_DEADLINE: Duration = Duration::from_secs(5);

/// FPS aggregation window.
const FPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Starting,
    Streaming,
    Stopping,
    Faulted(String),
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Streaming => write!(f, "streaming"),
            SessionStatus::Stopping => write!(f, "stopping"),
            SessionStatus::Faulted(reason) => write!(f, "fault: {reason}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// Expected and user-actionable: plug the camera in, check power and
    /// network. Distinct from open failures by design.
    #[error("no camera found")]
    NoDeviceFound,

    #[error("failed to open device: {0}")]
    DeviceOpenFailed(TransportError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParamError {
    #[error("no active capture session")]
    SessionNotActive,
}

/// One parameter write, applied by the capture thread in send order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamUpdate {
    Exposure(f64),
    Gain(f64),
    WhiteBalanceRed(f64),
    PixelFormat(PixelFormat),
}

/// Session notifications. Sends are unbounded so the capture thread never
/// blocks on a slow consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(SessionStatus),
    DeviceInfo { model: String, serial: String },
    Fps(f64),
    /// Carries the value actually written after clamping, for two-way
    /// binding on the UI side.
    ParameterApplied(ParamUpdate),
    FrameReady,
}

struct Shared {
    stop: AtomicBool,
    status: Mutex<SessionStatus>,
    events: flume::Sender<SessionEvent>,
    sink: Arc<FrameSink>,
}

impl Shared {
    fn set_status(&self, status: SessionStatus) {
        *self.status.lock().unwrap() = status.clone();
        let _ = self.events.send(SessionEvent::Status(status));
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

pub struct DeviceSession {
    shared: Arc<Shared>,
    commands: flume::Sender<ParamUpdate>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSession {
    /// Spawn the capture thread and begin the start sequence on it.
    ///
    /// Enumeration and open run on the capture thread, so a missing or
    /// unopenable camera surfaces as a `Faulted` status event rather than
    /// an error here; the only synchronous failure is thread spawning.
    pub fn start(
        system: Arc<dyn CameraSystem>,
        config: CaptureConfig,
        sink: Arc<FrameSink>,
        events: flume::Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            status: Mutex::new(SessionStatus::Idle),
            events,
            sink,
        });
        let (commands, command_rx) = flume::unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("iris-capture".into())
            .spawn(move || worker_main(worker_shared, system, config, command_rx))
            .map_err(SessionError::Spawn)?;
        Ok(Self {
            shared,
            commands,
            worker: Some(worker),
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.shared.status.lock().unwrap().clone()
    }

    /// True while the capture thread is alive and no stop was requested.
    pub fn is_active(&self) -> bool {
        !self.shared.stopping() && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Queue a parameter write for the capture thread.
    ///
    /// Exposure, gain and white balance apply asynchronously relative to
    /// the frame stream; pixel format pauses and re-arms acquisition so no
    /// frame straddles the change. The value actually applied comes back
    /// as [`SessionEvent::ParameterApplied`].
    pub fn update(&self, update: ParamUpdate) -> Result<(), ParamError> {
        match &self.worker {
            Some(worker) if !worker.is_finished() => self
                .commands
                .send(update)
                .map_err(|_| ParamError::SessionNotActive),
            _ => Err(ParamError::SessionNotActive),
        }
    }

    /// Stop the session and wait for the capture thread to exit.
    ///
    /// Idempotent, callable from any thread and in any state, including
    /// `Starting` (the start sequence checks the stop flag between phases)
    /// and `Faulted` (the thread has already cleaned up and exited). The
    /// join is bounded; overrunning it is logged as a leaked thread, which
    /// is a fatal resource leak, not a condition to hide.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.set_status(SessionStatus::Stopping);
        self.shared.stop.store(true, Ordering::Release);

        let deadline = Instant::now() + JOIN_DEADLINE;
        while !worker.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if worker.is_finished() {
            if worker.join().is_err() {
                error!("capture thread panicked during shutdown");
            }
            self.shared.set_status(SessionStatus::Idle);
        } else {
            error!(
                "capture thread failed to exit within {:?}; leaking thread handle",
                JOIN_DEADLINE
            );
            self.shared
                .set_status(SessionStatus::Faulted("capture thread failed to stop".into()));
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_main(
    shared: Arc<Shared>,
    system: Arc<dyn CameraSystem>,
    config: CaptureConfig,
    commands: flume::Receiver<ParamUpdate>,
) {
    info!("capture session starting");
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        stream(&shared, system.as_ref(), &config, &commands)
    }));
    match result {
        Ok(Ok(())) => info!("capture session ended"),
        Ok(Err(e)) => {
            error!("capture session failed: {e}");
            shared.set_status(SessionStatus::Faulted(e.to_string()));
        }
        Err(_) => {
            error!("capture worker panicked");
            shared.set_status(SessionStatus::Faulted("capture worker panicked".into()));
        }
    }
}

/// Full session body: discover, open, configure, stream, clean up.
/// Cleanup runs on every exit path; the device handle is dropped (and with
/// it released) before this returns, success or failure.
fn stream(
    shared: &Shared,
    system: &dyn CameraSystem,
    config: &CaptureConfig,
    commands: &flume::Receiver<ParamUpdate>,
) -> Result<(), SessionError> {
    shared.set_status(SessionStatus::Starting);

    let devices = system.enumerate()?;
    info!("discovered {} camera(s)", devices.len());
    if devices.is_empty() {
        return Err(SessionError::NoDeviceFound);
    }

    let mut device = system.open(&devices[0]).map_err(SessionError::DeviceOpenFailed)?;
    {
        let d = device.descriptor();
        info!(model = %d.model, serial = %d.serial, "connected");
        let _ = shared.events.send(SessionEvent::DeviceInfo {
            model: d.model.clone(),
            serial: d.serial.clone(),
        });
    }
    if shared.stopping() {
        return Ok(());
    }

    configure_stream(device.as_mut(), config);
    apply_initial_parameters(device.as_mut(), config, shared);

    if shared.stopping() {
        return Ok(());
    }
    device.begin_acquisition()?;
    shared.set_status(SessionStatus::Streaming);

    let result = read_loop(shared, device.as_mut(), config, commands);

    if let Err(e) = device.end_acquisition() {
        warn!("cleanup: failed to end acquisition: {e}");
    }
    result
}

/// Transport-layer tuning before the first frame. Both knobs are
/// best-effort: not every transport exposes them.
fn configure_stream(device: &mut dyn CameraDevice, config: &CaptureConfig) {
    match set_int_clamped(device, "StreamPacketSize", i64::from(config.packet_size_bytes)) {
        Ok(v) => debug!("stream packet size set to {v}"),
        Err(e) => warn!("stream packet size not applied: {e}"),
    }
    // Live view must never render stale queued frames.
    match device.set_enum("StreamBufferHandlingMode", "NewestOnly") {
        Ok(()) => debug!("buffer handling mode: NewestOnly"),
        Err(e) => warn!("buffer handling mode not applied: {e}"),
    }
    match device.set_enum("PixelFormat", config.pixel_format.node_entry()) {
        Ok(()) => debug!("pixel format: {}", config.pixel_format.node_entry()),
        Err(e) => warn!("initial pixel format not applied: {e}"),
    }
}

fn apply_initial_parameters(device: &mut dyn CameraDevice, config: &CaptureConfig, shared: &Shared) {
    for update in [
        ParamUpdate::Exposure(config.exposure_us),
        ParamUpdate::Gain(config.gain_db),
        ParamUpdate::WhiteBalanceRed(config.wb_red_ratio),
    ] {
        apply_node_update(device, update, shared);
    }
}

/// Apply one exposure/gain/white-balance write: competing auto control off
/// first (manual writes are ignored while it owns the node), then clamp
/// into the device-reported range and report what was actually written.
/// Rejections are explicit values, logged once, never fatal.
fn apply_node_update(device: &mut dyn CameraDevice, update: ParamUpdate, shared: &Shared) {
    let applied = match update {
        ParamUpdate::Exposure(v) => set_exposure(device, v).map(ParamUpdate::Exposure),
        ParamUpdate::Gain(v) => set_gain(device, v).map(ParamUpdate::Gain),
        ParamUpdate::WhiteBalanceRed(v) => {
            set_wb_red(device, v).map(ParamUpdate::WhiteBalanceRed)
        }
        ParamUpdate::PixelFormat(_) => {
            debug_assert!(false, "pixel format updates take the pause/resume path");
            return;
        }
    };
    match applied {
        Ok(applied) => {
            info!(?applied, "parameter applied");
            let _ = shared.events.send(SessionEvent::ParameterApplied(applied));
        }
        Err(e) => warn!("parameter rejected: {e}"),
    }
}

fn set_exposure(device: &mut dyn CameraDevice, micros: f64) -> Result<f64, NodeError> {
    device.set_enum("ExposureAuto", "Off")?;
    set_float_clamped(device, "ExposureTime", micros)
}

fn set_gain(device: &mut dyn CameraDevice, db: f64) -> Result<f64, NodeError> {
    device.set_enum("GainAuto", "Off")?;
    set_float_clamped(device, "Gain", db)
}

fn set_wb_red(device: &mut dyn CameraDevice, ratio: f64) -> Result<f64, NodeError> {
    device.set_enum("BalanceWhiteAuto", "Off")?;
    device.set_enum("BalanceRatioSelector", "Red")?;
    set_float_clamped(device, "BalanceRatio", ratio)
}

/// Changing the wire format while the transport is streaming is undefined
/// behavior, so pause, write, re-arm. Failing to re-arm is fatal: the
/// session can no longer deliver frames.
fn switch_pixel_format(
    device: &mut dyn CameraDevice,
    format: PixelFormat,
    shared: &Shared,
) -> Result<(), SessionError> {
    if let Err(e) = device.end_acquisition() {
        warn!("failed to pause acquisition for format change: {e}");
    }
    match device.set_enum("PixelFormat", format.node_entry()) {
        Ok(()) => {
            info!("pixel format set to {}", format.node_entry());
            let _ = shared
                .events
                .send(SessionEvent::ParameterApplied(ParamUpdate::PixelFormat(format)));
        }
        Err(e) => warn!("pixel format rejected: {e}"),
    }
    device.begin_acquisition()?;
    Ok(())
}

fn read_loop(
    shared: &Shared,
    device: &mut dyn CameraDevice,
    config: &CaptureConfig,
    commands: &flume::Receiver<ParamUpdate>,
) -> Result<(), SessionError> {
    let timeout = Duration::from_millis(u64::from(config.acquisition_timeout_ms));
    let mut frames_delivered: u32 = 0;
    let mut window_start = Instant::now();

    while !shared.stopping() {
        // Parameter writes land here, between frame waits, in send order.
        while let Ok(update) = commands.try_recv() {
            match update {
                ParamUpdate::PixelFormat(format) => switch_pixel_format(device, format, shared)?,
                other => apply_node_update(device, other, shared),
            }
        }

        match device.next_frame(timeout) {
            Ok(raw) => match decoder::decode(&raw.data, raw.width, raw.height, &raw.format) {
                Ok(frame) => {
                    shared.sink.publish(frame);
                    let _ = shared.events.send(SessionEvent::FrameReady);
                    frames_delivered += 1;
                    metrics::counter!("iris_frames_delivered").increment(1);
                }
                Err(e) => warn!("frame dropped: {e}"),
            },
            Err(TransportError::Timeout) => {
                // Expected while settings are being reconfigured.
                debug!("frame wait timed out after {timeout:?}");
            }
            Err(TransportError::IncompleteFrame) => {
                warn!("incomplete frame discarded");
                metrics::counter!("iris_frames_incomplete").increment(1);
            }
            Err(e) => warn!("transport error: {e}"),
        }

        let elapsed = window_start.elapsed();
        if elapsed >= FPS_WINDOW {
            let fps = f64::from(frames_delivered) / elapsed.as_secs_f64();
            metrics::gauge!("iris_capture_fps").set(fps);
            if fps < config.fps_warn_floor {
                warn!("low FPS: {fps:.2}");
            }
            let _ = shared.events.send(SessionEvent::Fps(fps));
            frames_delivered = 0;
            window_start = Instant::now();
        }
    }
    Ok(())
}
