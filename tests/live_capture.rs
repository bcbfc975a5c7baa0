use detection_review::detect::StubBackend;
use detection_review::{CameraConfig, DetectorBackend, LiveCapture, UpdateKind};

fn stub_camera() -> CameraConfig {
    CameraConfig {
        device: "stub://bench?width=80&height=60".to_string(),
        ..CameraConfig::default()
    }
}

#[test]
fn start_tick_stop_and_reacquire() -> anyhow::Result<()> {
    let mut detector = StubBackend::new();
    let mut live = LiveCapture::new(stub_camera());

    // Nothing to read before start.
    assert!(live.tick(&mut detector)?.is_none());

    live.start()?;
    live.start()?;
    assert!(live.is_running());

    let first = live.tick(&mut detector)?.expect("first frame");
    assert_eq!(first.kind, UpdateKind::Live);
    assert_eq!(first.status, "Live: stub://bench?width=80&height=60 | FPS: 0.00");
    assert_eq!((first.image.width(), first.image.height()), (80, 60));
    assert!(first.position.is_none());

    for _ in 0..4 {
        live.tick(&mut detector)?.expect("frame");
    }
    assert_eq!(live.frames(), 5);
    assert!(live.last_fps() >= 0.0);

    assert!(live.stop());
    assert!(!live.stop());
    assert!(!live.is_running());

    live.start()?;
    assert!(live.is_running());
    let again = live.tick(&mut detector)?.expect("frame after restart");
    assert!(again.status.ends_with("FPS: 0.00"));
    assert_eq!(live.frames(), 1);
    Ok(())
}

#[test]
fn detector_errors_propagate_without_stopping() -> anyhow::Result<()> {
    let mut detector = StubBackend::new().failing_every(2);
    let calls = detector.call_counter();
    let mut live = LiveCapture::new(stub_camera());
    live.start()?;

    assert!(live.tick(&mut detector)?.is_some());
    assert!(live.tick(&mut detector).is_err());
    assert!(live.is_running());
    assert!(live.tick(&mut detector)?.is_some());
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(detector.name(), "stub");
    Ok(())
}

#[test]
fn unavailable_camera_fails_to_start() {
    let mut live = LiveCapture::new(CameraConfig {
        device: "stub://unavailable".to_string(),
        ..CameraConfig::default()
    });
    assert!(live.start().is_err());
    assert!(!live.is_running());
    assert!(!live.stop());
}
