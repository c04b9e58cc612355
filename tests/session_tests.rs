//! Integration tests for the device session lifecycle, driven through the
//! simulated transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use iris::capture::session::{DeviceSession, ParamError, ParamUpdate, SessionEvent, SessionStatus};
use iris::capture::sim::{SimSpec, SimSystem};
use iris::capture::PixelFormat;
use iris::pipeline::sink::FrameSink;
use iris::CaptureConfig;

fn fast_spec() -> SimSpec {
    SimSpec {
        width: 32,
        height: 24,
        frame_interval: Duration::from_millis(2),
        ..SimSpec::default()
    }
}

fn fast_config() -> CaptureConfig {
    CaptureConfig {
        acquisition_timeout_ms: 50,
        ..CaptureConfig::default()
    }
}

fn start_session(
    system: SimSystem,
    config: CaptureConfig,
) -> (DeviceSession, flume::Receiver<SessionEvent>, Arc<FrameSink>) {
    let sink = Arc::new(FrameSink::new(32, 24));
    let (tx, rx) = flume::unbounded();
    let session = DeviceSession::start(Arc::new(system), config, Arc::clone(&sink), tx).unwrap();
    (session, rx, sink)
}

/// Receive events into `seen` until one matches or the deadline passes.
fn wait_for_event(
    rx: &flume::Receiver<SessionEvent>,
    seen: &mut Vec<SessionEvent>,
    deadline: Duration,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if let Ok(event) = rx.recv_timeout(Duration::from_millis(50)) {
            let hit = pred(&event);
            seen.push(event);
            if hit {
                return true;
            }
        }
    }
    false
}

#[test]
fn zero_devices_fault_distinctly_and_stop_is_safe() {
    let (mut session, rx, _sink) = start_session(SimSystem::empty(), fast_config());

    let mut seen = Vec::new();
    assert!(
        wait_for_event(&rx, &mut seen, Duration::from_secs(2), |e| matches!(
            e,
            SessionEvent::Status(SessionStatus::Faulted(_))
        )),
        "expected a fault status, saw {seen:?}"
    );

    let starting = seen
        .iter()
        .position(|e| *e == SessionEvent::Status(SessionStatus::Starting));
    let faulted = seen.iter().position(|e| {
        matches!(e, SessionEvent::Status(SessionStatus::Faulted(_)))
    });
    assert!(starting.unwrap() < faulted.unwrap(), "Starting precedes Faulted");

    match session.status() {
        SessionStatus::Faulted(reason) => assert!(reason.contains("no camera")),
        other => panic!("expected fault, got {other:?}"),
    }

    // A stop after the fault releases nothing twice and does not hang.
    session.stop();
    session.stop();
}

#[test]
fn streams_frames_and_reports_fps() {
    let (mut session, rx, sink) = start_session(SimSystem::single(fast_spec()), fast_config());

    let mut seen = Vec::new();
    assert!(wait_for_event(&rx, &mut seen, Duration::from_secs(2), |e| {
        *e == SessionEvent::FrameReady
    }));

    let frame = sink.latest();
    assert_eq!(frame.width, 32);
    assert_eq!(frame.height, 24);
    assert_eq!(frame.pixels.len(), 32 * 24 * 3);

    // The FPS window is one second; allow a little slack.
    assert!(
        wait_for_event(&rx, &mut seen, Duration::from_secs(3), |e| matches!(
            e,
            SessionEvent::Fps(_)
        )),
        "expected an FPS report"
    );

    session.stop();
    assert_eq!(session.status(), SessionStatus::Idle);
}

#[test]
fn device_info_is_published_on_connect() {
    let (mut session, rx, _sink) = start_session(SimSystem::single(fast_spec()), fast_config());

    let mut seen = Vec::new();
    assert!(wait_for_event(&rx, &mut seen, Duration::from_secs(2), |e| {
        matches!(e, SessionEvent::DeviceInfo { .. })
    }));
    session.stop();
}

#[test]
fn exposure_request_is_clamped_to_device_max() {
    let system = SimSystem::single(fast_spec());
    let probe = system.probe();
    let (mut session, rx, _sink) = start_session(system, fast_config());

    let mut seen = Vec::new();
    assert!(wait_for_event(&rx, &mut seen, Duration::from_secs(2), |e| {
        *e == SessionEvent::Status(SessionStatus::Streaming)
    }));

    session.update(ParamUpdate::Exposure(1e12)).unwrap();
    assert!(
        wait_for_event(&rx, &mut seen, Duration::from_secs(2), |e| {
            *e == SessionEvent::ParameterApplied(ParamUpdate::Exposure(30_000_000.0))
        }),
        "expected the clamped maximum to be reported"
    );
    assert_eq!(probe.float_writes("ExposureTime").last(), Some(&30_000_000.0));

    session.stop();
}

#[test]
fn setters_disable_auto_before_manual_writes() {
    let system = SimSystem::single(fast_spec());
    let probe = system.probe();
    let (mut session, rx, _sink) = start_session(system, fast_config());

    let mut seen = Vec::new();
    assert!(wait_for_event(&rx, &mut seen, Duration::from_secs(2), |e| {
        *e == SessionEvent::Status(SessionStatus::Streaming)
    }));

    // The sim rejects manual writes while auto is active, so a recorded
    // write proves the auto node was switched off first.
    assert_eq!(probe.enum_writes("ExposureAuto").first(), Some(&"Off".to_string()));
    assert_eq!(probe.float_writes("ExposureTime").len(), 1);
    assert_eq!(probe.enum_writes("BalanceWhiteAuto").first(), Some(&"Off".to_string()));
    assert_eq!(probe.float_writes("BalanceRatio").len(), 1);

    session.stop();
}

#[test]
fn stream_is_configured_for_latest_frame_delivery() {
    let system = SimSystem::single(fast_spec());
    let probe = system.probe();
    let (mut session, rx, _sink) = start_session(system, fast_config());

    let mut seen = Vec::new();
    assert!(wait_for_event(&rx, &mut seen, Duration::from_secs(2), |e| {
        *e == SessionEvent::Status(SessionStatus::Streaming)
    }));

    assert_eq!(
        probe.enum_writes("StreamBufferHandlingMode"),
        vec!["NewestOnly".to_string()]
    );
    // 9000 requested, within the sim's range, applied as-is.
    assert_eq!(probe.int_writes("StreamPacketSize"), vec![9_000]);

    session.stop();
}

#[test]
fn incomplete_frames_are_discarded_without_faulting() {
    let spec = SimSpec {
        incomplete_every: Some(3),
        ..fast_spec()
    };
    let (mut session, rx, _sink) = start_session(SimSystem::single(spec), fast_config());

    let mut seen = Vec::new();
    let mut frames = 0;
    assert!(wait_for_event(&rx, &mut seen, Duration::from_secs(3), |e| {
        if *e == SessionEvent::FrameReady {
            frames += 1;
        }
        frames >= 10
    }));
    assert!(
        !seen.iter().any(|e| matches!(e, SessionEvent::Status(SessionStatus::Faulted(_)))),
        "transport hiccups must not fault the session"
    );

    session.stop();
}

#[test]
fn pixel_format_change_never_straddles_a_frame() {
    let (mut session, rx, sink) = start_session(SimSystem::single(fast_spec()), fast_config());

    let mut seen = Vec::new();
    assert!(wait_for_event(&rx, &mut seen, Duration::from_secs(2), |e| {
        *e == SessionEvent::FrameReady
    }));
    assert_eq!(sink.latest().source_format, PixelFormat::BayerRg8);

    session.update(ParamUpdate::PixelFormat(PixelFormat::Rgb8)).unwrap();

    // Observe the format of every frame we can see across the transition.
    let mut observed = Vec::new();
    let end = Instant::now() + Duration::from_secs(3);
    while Instant::now() < end {
        if let Ok(event) = rx.recv_timeout(Duration::from_millis(50)) {
            if event == SessionEvent::FrameReady {
                let frame = sink.latest();
                assert_eq!(frame.pixels.len(), 32 * 24 * 3);
                observed.push(frame.source_format);
                if observed.iter().filter(|f| **f == PixelFormat::Rgb8).count() >= 5 {
                    break;
                }
            }
        }
    }

    let first_rgb = observed
        .iter()
        .position(|f| *f == PixelFormat::Rgb8)
        .expect("new format never observed");
    assert!(
        observed[first_rgb..].iter().all(|f| *f == PixelFormat::Rgb8),
        "old-format frame delivered after the switch: {observed:?}"
    );

    session.stop();
}

#[test]
fn updates_after_stop_are_rejected() {
    let (mut session, rx, _sink) = start_session(SimSystem::single(fast_spec()), fast_config());
    let mut seen = Vec::new();
    wait_for_event(&rx, &mut seen, Duration::from_secs(2), |e| {
        *e == SessionEvent::Status(SessionStatus::Streaming)
    });

    session.stop();
    assert!(matches!(
        session.update(ParamUpdate::Gain(1.0)),
        Err(ParamError::SessionNotActive)
    ));
}
