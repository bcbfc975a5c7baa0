use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use detection_review::detect::StubBackend;
use detection_review::{
    Actions, AppConfig, ExportError, FrameUpdate, InferenceFailurePolicy, Intent, Notice,
    NoticeLevel, Session, SessionError, SessionState, Surface, UpdateKind,
};

#[derive(Default)]
struct Recorder {
    updates: Vec<FrameUpdate>,
    notices: Vec<Notice>,
    actions: Vec<Actions>,
}

impl Recorder {
    fn of_kind(&self, kind: UpdateKind) -> Vec<&FrameUpdate> {
        self.updates.iter().filter(|u| u.kind == kind).collect()
    }

    fn clear(&mut self) {
        self.updates.clear();
        self.notices.clear();
        self.actions.clear();
    }
}

impl Surface for Recorder {
    fn present(&mut self, update: &FrameUpdate) {
        self.updates.push(update.clone());
    }

    fn set_actions(&mut self, actions: Actions) {
        self.actions.push(actions);
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}

fn clip(frames: u64) -> String {
    format!("stub://clip?frames={}&fps=25&width=96&height=64", frames)
}

/// Session with a stub clip and a counting stub detector.
fn session_with(frames: u64, config: AppConfig) -> (Session, Recorder, Arc<AtomicU64>) {
    let mut session = Session::new(config);
    let mut surface = Recorder::default();
    session
        .dispatch(Intent::SelectVideo(clip(frames)), &mut surface)
        .expect("select video");
    let detector = StubBackend::new();
    let calls = detector.call_counter();
    session.set_detector(Box::new(detector)).expect("detector");
    (session, surface, calls)
}

/// Tick until the session returns to Idle; returns the number of ticks.
fn tick_until_idle(session: &mut Session, surface: &mut Recorder, max_ticks: usize) -> usize {
    for tick in 1..=max_ticks {
        session.on_tick(surface);
        if session.state() == SessionState::Idle {
            return tick;
        }
    }
    panic!("session still {} after {} ticks", session.state(), max_ticks);
}

#[test]
fn processing_n_frames_fills_the_buffer_and_finishes_once() {
    let (mut session, mut surface, calls) = session_with(12, AppConfig::default());
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    assert_eq!(session.state(), SessionState::Processing);

    tick_until_idle(&mut session, &mut surface, 100);
    assert_eq!(session.buffer().len(), 12);
    assert_eq!(session.stats().runs_completed, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 12);

    let processed = surface.of_kind(UpdateKind::Processed);
    let positions: Vec<_> = processed.iter().map(|u| u.position).collect();
    assert_eq!(positions, (0..12).map(Some).collect::<Vec<_>>());
    assert_eq!(
        processed[11].status,
        "Processed Frame: 12 / Total Frames: 12"
    );

    // Further ticks in Idle do nothing.
    for _ in 0..5 {
        session.on_tick(&mut surface);
    }
    assert_eq!(session.stats().runs_completed, 1);
    assert_eq!(session.buffer().len(), 12);

    let actions = session.actions();
    assert!(actions.replay);
    assert!(actions.export);
    assert!(actions.begin_processing);
    assert!(!actions.stop);
}

#[test]
fn seeking_previews_cached_entries_without_inference() {
    let (mut session, mut surface, calls) = session_with(10, AppConfig::default());
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    for _ in 0..6 {
        session.on_tick(&mut surface);
    }
    let processed: Vec<FrameUpdate> = surface
        .of_kind(UpdateKind::Processed)
        .into_iter()
        .cloned()
        .collect();
    assert_eq!(processed.len(), 6);

    session.dispatch(Intent::GrabSeek, &mut surface).expect("grab");
    assert_eq!(session.state(), SessionState::Seeking);
    let calls_before = calls.load(Ordering::SeqCst);

    // Ticks are suspended while seeking.
    session.on_tick(&mut surface);
    assert_eq!(session.buffer().len(), 6);

    for index in [4usize, 0, 2] {
        surface.clear();
        session
            .dispatch(Intent::DragSeek(index), &mut surface)
            .expect("drag");
        assert_eq!(surface.updates.len(), 1);
        let preview = &surface.updates[0];
        assert_eq!(preview.kind, UpdateKind::Preview);
        assert_eq!(preview.position, Some(index));
        assert_eq!(preview.image.digest(), processed[index].image.digest());
        assert_eq!(preview.summary, processed[index].summary);
        let entry = session.buffer().get(index).expect("entry");
        assert!(preview.image.shares_pixels_with(entry.frame()));
    }

    // Past the processed range: nothing to show.
    surface.clear();
    session
        .dispatch(Intent::DragSeek(8), &mut surface)
        .expect("drag past end");
    assert!(surface.updates.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), calls_before);

    // Releasing resumes decoding where it left off, not at the sought index.
    session
        .dispatch(Intent::ReleaseSeek, &mut surface)
        .expect("release");
    assert_eq!(session.state(), SessionState::Processing);
    surface.clear();
    session.on_tick(&mut surface);
    let next = surface.of_kind(UpdateKind::Processed);
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].position, Some(6));
    assert_eq!(next[0].image.index(), 6);

    tick_until_idle(&mut session, &mut surface, 100);
    assert_eq!(session.buffer().len(), 10);
}

#[test]
fn seeking_after_a_finished_run_returns_to_idle() {
    let (mut session, mut surface, _calls) = session_with(4, AppConfig::default());
    let err = session.dispatch(Intent::GrabSeek, &mut surface);
    assert!(matches!(err, Err(SessionError::InvalidTransition { .. })));

    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    tick_until_idle(&mut session, &mut surface, 20);

    session.dispatch(Intent::GrabSeek, &mut surface).expect("grab");
    assert!(!session.actions().replay);
    session
        .dispatch(Intent::DragSeek(3), &mut surface)
        .expect("drag");
    session
        .dispatch(Intent::ReleaseSeek, &mut surface)
        .expect("release");
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.stats().runs_completed, 1);
}

#[test]
fn replay_presents_entries_in_order_then_stops() {
    let (mut session, mut surface, calls) = session_with(7, AppConfig::default());
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    tick_until_idle(&mut session, &mut surface, 50);
    let digests: Vec<_> = session
        .buffer()
        .iter()
        .map(|entry| entry.frame().digest())
        .collect();
    let calls_after_run = calls.load(Ordering::SeqCst);

    surface.clear();
    session
        .dispatch(Intent::PlayAgain, &mut surface)
        .expect("play again");
    assert_eq!(session.state(), SessionState::Replaying);
    assert!(surface
        .notices
        .iter()
        .any(|n| n.message == "Playing..."));

    let ticks = tick_until_idle(&mut session, &mut surface, 50);
    assert_eq!(ticks, 7);

    let replayed = surface.of_kind(UpdateKind::Replay);
    let positions: Vec<_> = replayed.iter().map(|u| u.position).collect();
    assert_eq!(positions, (0..7).map(Some).collect::<Vec<_>>());
    let replayed_digests: Vec<_> = replayed.iter().map(|u| u.image.digest()).collect();
    assert_eq!(replayed_digests, digests);
    assert!(replayed.iter().all(|u| u.status == "Playing..."));

    // Buffer untouched, detector never called again.
    let after: Vec<_> = session
        .buffer()
        .iter()
        .map(|entry| entry.frame().digest())
        .collect();
    assert_eq!(after, digests);
    assert_eq!(calls.load(Ordering::SeqCst), calls_after_run);
    assert!(session.actions().replay);

    // Replay again is allowed.
    session
        .dispatch(Intent::PlayAgain, &mut surface)
        .expect("play again twice");
}

#[test]
fn a_new_run_rebuilds_the_buffer() {
    let (mut session, mut surface, _calls) = session_with(5, AppConfig::default());
    for run in 1..=2 {
        session
            .dispatch(Intent::BeginProcessing, &mut surface)
            .expect("begin");
        assert!(session.buffer().is_empty());
        tick_until_idle(&mut session, &mut surface, 20);
        assert_eq!(session.buffer().len(), 5);
        assert_eq!(session.stats().runs_completed, run);
    }
}

#[test]
fn skip_policy_drops_failed_frames() {
    let mut session = Session::new(AppConfig::default());
    let mut surface = Recorder::default();
    session
        .dispatch(Intent::SelectVideo(clip(9)), &mut surface)
        .expect("video");
    session
        .dispatch(
            Intent::SelectModel("stub://flaky?fail_every=3".to_string()),
            &mut surface,
        )
        .expect("model");
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    tick_until_idle(&mut session, &mut surface, 50);

    assert_eq!(session.buffer().len(), 6);
    assert_eq!(session.stats().frames_read, 9);
    assert_eq!(session.stats().frames_skipped, 3);
    assert_eq!(session.stats().runs_completed, 1);
    let indices: Vec<_> = session
        .buffer()
        .iter()
        .map(|entry| entry.frame().index())
        .collect();
    assert_eq!(indices, vec![0, 1, 3, 4, 6, 7]);
}

#[test]
fn abort_policy_ends_the_run_and_notifies() {
    let config = AppConfig {
        inference_failure: InferenceFailurePolicy::Abort,
        ..AppConfig::default()
    };
    let mut session = Session::new(config);
    let mut surface = Recorder::default();
    session
        .dispatch(Intent::SelectVideo(clip(9)), &mut surface)
        .expect("video");
    session
        .dispatch(
            Intent::SelectModel("stub://flaky?fail_every=3".to_string()),
            &mut surface,
        )
        .expect("model");
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    tick_until_idle(&mut session, &mut surface, 50);

    assert_eq!(session.buffer().len(), 2);
    assert_eq!(session.stats().runs_completed, 1);
    assert!(surface
        .notices
        .iter()
        .any(|n| n.level == NoticeLevel::Error));
}

#[cfg(feature = "export-ffmpeg")]
#[test]
fn export_writes_the_buffer_at_the_source_frame_rate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AppConfig::default();
    config.export.dir = dir.path().to_path_buf();
    let (mut session, mut surface, _calls) = session_with(10, config);
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    tick_until_idle(&mut session, &mut surface, 50);

    session
        .dispatch(Intent::Export(None), &mut surface)
        .expect("export");
    let path = dir.path().join("processed_video.avi");
    let info = detection_review::export::inspect(&path).expect("read back export");
    assert_eq!(info.frames, 10);
    assert_eq!(info.packets, 10);
    assert!((info.frame_rate.fps() - 25.0).abs() < 1e-6);
    assert!((info.duration_secs() - 10.0 / 25.0).abs() < 1e-6);
    assert_eq!((info.width, info.height), (96, 64));

    let custom = dir.path().join("custom.avi");
    let summary = session
        .export_to(Some(&custom), &mut surface)
        .expect("export to custom path");
    assert_eq!(summary.frames, 10);
    assert!(custom.is_file());
}

#[cfg(not(feature = "export-ffmpeg"))]
#[test]
fn export_without_encoder_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AppConfig::default();
    config.export.dir = dir.path().to_path_buf();
    let (mut session, mut surface, _calls) = session_with(4, config);
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    tick_until_idle(&mut session, &mut surface, 50);

    let err = session.dispatch(Intent::Export(None), &mut surface);
    assert!(matches!(
        err,
        Err(SessionError::Export(ExportError::Unsupported))
    ));
    let last = surface.notices.last().expect("error notice");
    assert_eq!(last.level, NoticeLevel::Error);
    assert_eq!(std::fs::read_dir(dir.path()).expect("read_dir").count(), 0);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn exporting_nothing_fails_without_a_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dest = dir.path().join("empty.avi");
    let mut session = Session::new(AppConfig::default());
    let mut surface = Recorder::default();

    let err = session.dispatch(Intent::Export(Some(dest.clone())), &mut surface);
    assert!(matches!(
        err,
        Err(SessionError::Export(ExportError::EmptyBuffer))
    ));
    assert!(!dest.exists());
}

#[test]
fn export_is_rejected_mid_run() {
    let (mut session, mut surface, _calls) = session_with(5, AppConfig::default());
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    session.on_tick(&mut surface);
    let err = session.dispatch(Intent::Export(None), &mut surface);
    assert!(matches!(
        err,
        Err(SessionError::InvalidTransition {
            state: SessionState::Processing,
            ..
        })
    ));
}

#[test]
fn navigate_back_releases_everything_but_the_detector() {
    let (mut session, mut surface, _calls) = session_with(6, AppConfig::default());
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("begin");
    session.on_tick(&mut surface);
    session.on_tick(&mut surface);

    session
        .dispatch(Intent::NavigateBack, &mut surface)
        .expect("back");
    assert_eq!(session.state(), SessionState::Idle);
    assert!(session.buffer().is_empty());
    assert!(!session.has_video());
    assert!(session.has_detector());

    let actions = surface.actions.last().copied().expect("actions published");
    assert!(!actions.begin_processing);
    assert!(actions.begin_camera);
    assert!(!actions.replay);
    assert!(!actions.export);
}

#[test]
fn camera_runs_until_stopped() {
    let mut config = AppConfig::default();
    config.camera.device = Some("stub://desk?width=96&height=64".to_string());
    let mut session = Session::new(config);
    let mut surface = Recorder::default();

    let err = session.dispatch(Intent::BeginCamera, &mut surface);
    assert!(matches!(err, Err(SessionError::MissingResource("model"))));

    session
        .dispatch(Intent::SelectModel("stub://coco".to_string()), &mut surface)
        .expect("model");
    session
        .dispatch(Intent::BeginCamera, &mut surface)
        .expect("camera");
    assert_eq!(session.state(), SessionState::CameraRunning);
    assert!(session.actions().stop);

    for _ in 0..3 {
        session.on_tick(&mut surface);
    }
    let live = surface.of_kind(UpdateKind::Live);
    assert_eq!(live.len(), 3);
    assert!(live[0].status.ends_with("FPS: 0.00"));
    assert!(session.buffer().is_empty());

    session.dispatch(Intent::Stop, &mut surface).expect("stop");
    assert_eq!(session.state(), SessionState::Idle);
    assert!(!session.camera_running());
    session
        .dispatch(Intent::Stop, &mut surface)
        .expect("second stop is a no-op");
    assert!(!session.camera_running());

    // The device can be reacquired.
    session
        .dispatch(Intent::BeginCamera, &mut surface)
        .expect("restart camera");
    assert!(session.camera_running());
}

#[test]
fn unavailable_camera_is_reported_and_state_kept() {
    let mut config = AppConfig::default();
    config.camera.device = Some("stub://unavailable".to_string());
    let mut session = Session::new(config);
    let mut surface = Recorder::default();
    session
        .dispatch(Intent::SelectModel("stub://coco".to_string()), &mut surface)
        .expect("model");

    let err = session.dispatch(Intent::BeginCamera, &mut surface);
    assert!(matches!(
        err,
        Err(SessionError::ResourceLoad { what: "camera", .. })
    ));
    assert_eq!(session.state(), SessionState::Idle);
    let errors: Vec<_> = surface
        .notices
        .iter()
        .filter(|n| n.level == NoticeLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.starts_with("failed to load camera"));
}

#[test]
fn pump_applies_queued_intents_and_reports_failures() {
    let mut session = Session::new(AppConfig::default());
    let mut surface = Recorder::default();
    let (tx, rx) = mpsc::channel();

    tx.send(Intent::SelectVideo(clip(3))).expect("send");
    tx.send(Intent::SelectModel("stub://coco".to_string()))
        .expect("send");
    tx.send(Intent::ReleaseSeek).expect("send");
    tx.send(Intent::BeginProcessing).expect("send");

    assert_eq!(session.pump(&rx, &mut surface), 4);
    assert_eq!(session.state(), SessionState::Processing);
    let errors: Vec<_> = surface
        .notices
        .iter()
        .filter(|n| n.level == NoticeLevel::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("release the seek control"));

    assert_eq!(session.pump(&rx, &mut surface), 0);
}

#[test]
fn invalid_model_keeps_the_loaded_detector() {
    let (mut session, mut surface, _calls) = session_with(3, AppConfig::default());
    let err = session.dispatch(
        Intent::SelectModel("/no/such/model.onnx".to_string()),
        &mut surface,
    );
    assert!(matches!(
        err,
        Err(SessionError::ResourceLoad { what: "model", .. })
    ));
    assert!(session.has_detector());
    session
        .dispatch(Intent::BeginProcessing, &mut surface)
        .expect("previous detector still usable");
}
