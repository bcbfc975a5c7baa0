//! Review session state machine.
//!
//! A `Session` owns every handle (video source, detector, camera loop) and
//! the processed buffer. The presentation layer talks to it through two
//! narrow channels:
//!
//! - intents in (`dispatch`, or `pump` draining an mpsc receiver)
//! - rendered frames, action flags and notices out (`Surface`)
//!
//! Work happens only in `on_tick`, which the caller invokes at a fixed period
//! (see `scheduler::Ticker`). Each tick runs to completion before the next,
//! and intents are applied between ticks, so no state is ever shared.
//!
//! Transitions are validated against the current state; an intent that does
//! not apply returns `SessionError::InvalidTransition` and changes nothing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{Receiver, TryRecvError};

use serde::Deserialize;
use thiserror::Error;

use crate::config::AppConfig;
use crate::detect::{self, ClassNames, DetectorBackend};
use crate::export::{self, ExportError, ExportSummary};
use crate::frame::{Frame, ProcessedBuffer, ProcessedEntry};
use crate::ingest::{FileConfig, FileSource, VideoSource};
use crate::live::LiveCapture;
use crate::overlay;

// ----------------------------------------------------------------------------
// States, intents, presentation contract
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Processing,
    Seeking,
    Replaying,
    CameraRunning,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Processing => "processing",
            SessionState::Seeking => "seeking",
            SessionState::Replaying => "replaying",
            SessionState::CameraRunning => "running the camera",
        };
        f.write_str(name)
    }
}

/// User requests coming from the presentation layer.
#[derive(Clone, Debug, PartialEq)]
pub enum Intent {
    SelectVideo(String),
    SelectModel(String),
    BeginProcessing,
    BeginCamera,
    GrabSeek,
    DragSeek(usize),
    ReleaseSeek,
    PlayAgain,
    /// Export to the given path, or the configured default.
    Export(Option<PathBuf>),
    Stop,
    NavigateBack,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::SelectVideo(_) => "select a video",
            Intent::SelectModel(_) => "select a model",
            Intent::BeginProcessing => "begin processing",
            Intent::BeginCamera => "start the camera",
            Intent::GrabSeek => "grab the seek control",
            Intent::DragSeek(_) => "drag the seek control",
            Intent::ReleaseSeek => "release the seek control",
            Intent::PlayAgain => "play again",
            Intent::Export(_) => "export",
            Intent::Stop => "stop",
            Intent::NavigateBack => "navigate back",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    /// Freshly processed frame.
    Processed,
    /// Cached entry shown while seeking.
    Preview,
    /// Cached entry shown during replay.
    Replay,
    /// Camera frame.
    Live,
}

/// One rendered frame plus its text for the presentation layer.
#[derive(Clone, Debug)]
pub struct FrameUpdate {
    pub image: Frame,
    pub status: String,
    pub summary: String,
    /// Buffer index of the shown entry, when it has one.
    pub position: Option<usize>,
    /// Total frames in the source, when known.
    pub total: Option<u64>,
    pub kind: UpdateKind,
}

/// Which user actions are currently available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Actions {
    pub begin_processing: bool,
    pub begin_camera: bool,
    pub replay: bool,
    pub export: bool,
    pub seek: bool,
    pub stop: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Presentation layer as seen by the session.
pub trait Surface {
    fn present(&mut self, update: &FrameUpdate);
    fn set_actions(&mut self, actions: Actions);
    fn notify(&mut self, notice: Notice);
}

/// What to do when the detector fails on a single frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceFailurePolicy {
    /// Log, count and drop the frame; keep processing.
    #[default]
    Skip,
    /// End the run as if the stream had ended, and tell the user.
    Abort,
}

impl FromStr for InferenceFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(anyhow::anyhow!(
                "unknown inference failure policy '{}' (expected skip or abort)",
                other
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {intent} while {state}")]
    InvalidTransition {
        state: SessionState,
        intent: &'static str,
    },
    #[error("a {0} must be loaded first")]
    MissingResource(&'static str),
    #[error("failed to load {what}: {detail}")]
    ResourceLoad { what: &'static str, detail: String },
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl SessionError {
    fn load(what: &'static str, err: anyhow::Error) -> Self {
        SessionError::ResourceLoad {
            what,
            detail: format!("{:#}", err),
        }
    }
}

/// Counters for the current (or last) processing run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames_read: u64,
    pub frames_skipped: u64,
    /// Times a run has left `Processing`.
    pub runs_completed: u64,
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

pub struct Session {
    config: AppConfig,
    state: SessionState,
    /// State to return to when the seek control is released.
    resume_to: SessionState,
    source: Option<Box<dyn VideoSource>>,
    detector: Option<Box<dyn DetectorBackend>>,
    buffer: ProcessedBuffer,
    /// Class names of the run that filled `buffer`.
    run_names: ClassNames,
    run_frame_rate: f64,
    total_frames: Option<u64>,
    replay_index: usize,
    stats: RunStats,
    live: LiveCapture,
}

impl Session {
    pub fn new(config: AppConfig) -> Self {
        let live = LiveCapture::new(config.camera.camera_config());
        Self {
            run_frame_rate: config.default_frame_rate,
            config,
            state: SessionState::Idle,
            resume_to: SessionState::Idle,
            source: None,
            detector: None,
            buffer: ProcessedBuffer::new(),
            run_names: ClassNames::default(),
            total_frames: None,
            replay_index: 0,
            stats: RunStats::default(),
            live,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn buffer(&self) -> &ProcessedBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn has_video(&self) -> bool {
        self.source.is_some()
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    pub fn camera_running(&self) -> bool {
        self.live.is_running()
    }

    pub fn live(&self) -> &LiveCapture {
        &self.live
    }

    /// Frame rate used for export: the source's own, or the configured default.
    pub fn frame_rate(&self) -> f64 {
        self.run_frame_rate
    }

    pub fn actions(&self) -> Actions {
        let idle = self.state == SessionState::Idle;
        let has_frames = !self.buffer.is_empty();
        Actions {
            begin_processing: idle && self.source.is_some() && self.detector.is_some(),
            begin_camera: idle && self.detector.is_some(),
            replay: idle && has_frames,
            export: idle && has_frames,
            seek: match self.state {
                SessionState::Processing | SessionState::Seeking => true,
                SessionState::Idle => has_frames,
                SessionState::Replaying | SessionState::CameraRunning => false,
            },
            stop: self.state == SessionState::CameraRunning,
        }
    }

    /// Install an already constructed video source (only while idle).
    pub fn set_video(&mut self, source: Box<dyn VideoSource>) -> Result<(), SessionError> {
        self.require_idle("select a video")?;
        self.replace_source(source);
        Ok(())
    }

    /// Install an already constructed detector (only while idle).
    pub fn set_detector(&mut self, detector: Box<dyn DetectorBackend>) -> Result<(), SessionError> {
        self.require_idle("select a model")?;
        log::info!("session: detector set ({})", detector.name());
        self.detector = Some(detector);
        Ok(())
    }

    /// Apply one user intent, then publish the resulting action flags.
    ///
    /// A rejected intent is also reported to the surface as an error notice.
    pub fn dispatch(
        &mut self,
        intent: Intent,
        surface: &mut dyn Surface,
    ) -> Result<(), SessionError> {
        log::debug!("session: {} while {}", intent.name(), self.state);
        let result = match intent {
            Intent::SelectVideo(path) => self.select_video(&path),
            Intent::SelectModel(path) => self.select_model(&path),
            Intent::BeginProcessing => self.begin_processing(),
            Intent::BeginCamera => self.begin_camera(),
            Intent::GrabSeek => self.grab_seek(),
            Intent::DragSeek(index) => self.drag_seek(index, surface),
            Intent::ReleaseSeek => self.release_seek(),
            Intent::PlayAgain => self.play_again(surface),
            Intent::Export(dest) => self
                .export_to(dest.as_deref(), surface)
                .map(|_| ()),
            Intent::Stop => self.stop(),
            Intent::NavigateBack => {
                self.navigate_back();
                Ok(())
            }
        };
        if let Err(err) = &result {
            log::warn!("session: {}", err);
            surface.notify(Notice::error(err.to_string()));
        }
        surface.set_actions(self.actions());
        result
    }

    /// Drain pending intents. Failures already reach the surface through
    /// `dispatch`, so they are dropped here.
    ///
    /// Returns how many intents were applied.
    pub fn pump(&mut self, intents: &Receiver<Intent>, surface: &mut dyn Surface) -> usize {
        let mut applied = 0;
        loop {
            match intents.try_recv() {
                Ok(intent) => {
                    applied += 1;
                    let _ = self.dispatch(intent, surface);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Run one unit of work for the current state.
    pub fn on_tick(&mut self, surface: &mut dyn Surface) {
        match self.state {
            SessionState::Processing => self.tick_processing(surface),
            SessionState::Replaying => self.tick_replay(surface),
            SessionState::CameraRunning => self.tick_camera(surface),
            SessionState::Idle | SessionState::Seeking => {}
        }
    }

    // ------------------------------------------------------------------------
    // Resource selection
    // ------------------------------------------------------------------------

    fn select_video(&mut self, path: &str) -> Result<(), SessionError> {
        self.require_idle("select a video")?;
        let source =
            FileSource::open(FileConfig::new(path)).map_err(|err| SessionError::load("video", err))?;
        self.replace_source(Box::new(source));
        Ok(())
    }

    fn replace_source(&mut self, source: Box<dyn VideoSource>) {
        if let Some(mut previous) = self.source.take() {
            previous.release();
        }
        log::info!(
            "session: video {} ({} frames)",
            source.describe(),
            source
                .frame_count()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        self.source = Some(source);
        self.buffer.reset(None);
        self.replay_index = 0;
    }

    fn select_model(&mut self, path: &str) -> Result<(), SessionError> {
        self.require_idle("select a model")?;
        let detector =
            detect::load(path, &self.config.detector).map_err(|err| SessionError::load("model", err))?;
        self.detector = Some(detector);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Processing
    // ------------------------------------------------------------------------

    fn begin_processing(&mut self) -> Result<(), SessionError> {
        self.require_idle("begin processing")?;
        let detector = self
            .detector
            .as_ref()
            .ok_or(SessionError::MissingResource("model"))?;
        let names = detector.class_names().clone();
        let source = self
            .source
            .as_mut()
            .ok_or(SessionError::MissingResource("video"))?;
        source
            .seek(0)
            .map_err(|err| SessionError::load("video", err))?;

        self.total_frames = source.frame_count();
        self.run_frame_rate = source
            .frame_rate()
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .unwrap_or(self.config.default_frame_rate);
        log::info!(
            "session: processing {} ({} frames @ {:.2} fps)",
            source.describe(),
            format_total(self.total_frames),
            self.run_frame_rate
        );

        self.run_names = names;
        self.buffer.reset(self.total_frames);
        self.replay_index = 0;
        self.stats.frames_read = 0;
        self.stats.frames_skipped = 0;
        self.resume_to = SessionState::Idle;
        self.state = SessionState::Processing;
        Ok(())
    }

    fn tick_processing(&mut self, surface: &mut dyn Surface) {
        if self.buffer_is_full() {
            self.finish_run(surface);
            return;
        }

        let read = match self.source.as_mut() {
            Some(source) => source.read_next(),
            None => Ok(None),
        };
        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.finish_run(surface);
                return;
            }
            Err(err) => {
                log::warn!("session: frame read failed, ending run: {:#}", err);
                surface.notify(Notice::warning(format!("Stopped reading video: {:#}", err)));
                self.finish_run(surface);
                return;
            }
        };
        self.stats.frames_read += 1;

        let Some(detector) = self.detector.as_mut() else {
            self.finish_run(surface);
            return;
        };
        let detections = match detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                self.on_inference_failure(frame.index(), err, surface);
                return;
            }
        };

        let annotated = overlay::annotate(&frame, &detections, &self.run_names);
        let summary = overlay::detection_summary(&detections, &self.run_names);
        let position = match self
            .buffer
            .push(ProcessedEntry::new(annotated.clone(), detections))
        {
            Ok(position) => position,
            Err(err) => {
                log::info!("session: {}", err);
                self.finish_run(surface);
                return;
            }
        };

        surface.present(&FrameUpdate {
            image: annotated,
            status: format!(
                "Processed Frame: {} / Total Frames: {}",
                self.stats.frames_read,
                format_total(self.total_frames)
            ),
            summary,
            position: Some(position),
            total: self.total_frames,
            kind: UpdateKind::Processed,
        });
    }

    fn buffer_is_full(&self) -> bool {
        self.buffer
            .limit()
            .is_some_and(|limit| self.buffer.len() as u64 >= limit)
    }

    fn on_inference_failure(&mut self, index: u64, err: anyhow::Error, surface: &mut dyn Surface) {
        match self.config.inference_failure {
            InferenceFailurePolicy::Skip => {
                self.stats.frames_skipped += 1;
                log::warn!("session: skipping frame {}: {:#}", index, err);
            }
            InferenceFailurePolicy::Abort => {
                log::error!("session: inference failed on frame {}: {:#}", index, err);
                surface.notify(Notice::error(format!(
                    "Detection failed on frame {}: {:#}",
                    index, err
                )));
                self.finish_run(surface);
            }
        }
    }

    fn finish_run(&mut self, surface: &mut dyn Surface) {
        self.state = SessionState::Idle;
        self.resume_to = SessionState::Idle;
        self.stats.runs_completed += 1;
        log::info!(
            "session: processing finished, {} frames buffered ({} skipped)",
            self.buffer.len(),
            self.stats.frames_skipped
        );
        let mut message = format!("Processing complete: {} frames", self.buffer.len());
        if self.stats.frames_skipped > 0 {
            message.push_str(&format!(" ({} skipped)", self.stats.frames_skipped));
        }
        surface.notify(Notice::info(message));
        surface.set_actions(self.actions());
    }

    // ------------------------------------------------------------------------
    // Seeking
    // ------------------------------------------------------------------------

    fn grab_seek(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Processing => {}
            SessionState::Idle if !self.buffer.is_empty() => {}
            state => {
                return Err(SessionError::InvalidTransition {
                    state,
                    intent: "grab the seek control",
                })
            }
        }
        self.resume_to = self.state;
        self.state = SessionState::Seeking;
        Ok(())
    }

    fn drag_seek(&mut self, index: usize, surface: &mut dyn Surface) -> Result<(), SessionError> {
        if self.state != SessionState::Seeking {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                intent: "drag the seek control",
            });
        }
        let Some(entry) = self.buffer.get(index) else {
            log::debug!(
                "session: seek to {} ignored, {} frames processed",
                index,
                self.buffer.len()
            );
            return Ok(());
        };
        surface.present(&FrameUpdate {
            image: entry.frame().clone(),
            status: format!(
                "Frame: {} / Processed Frames: {}",
                index + 1,
                self.buffer.len()
            ),
            summary: overlay::detection_summary(entry.detections(), &self.run_names),
            position: Some(index),
            total: self.total_frames,
            kind: UpdateKind::Preview,
        });
        Ok(())
    }

    fn release_seek(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Seeking {
            return Err(SessionError::InvalidTransition {
                state: self.state,
                intent: "release the seek control",
            });
        }
        self.state = self.resume_to;
        self.resume_to = SessionState::Idle;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Replay
    // ------------------------------------------------------------------------

    fn play_again(&mut self, surface: &mut dyn Surface) -> Result<(), SessionError> {
        self.require_idle("play again")?;
        if self.buffer.is_empty() {
            return Err(SessionError::MissingResource("processed video"));
        }
        self.replay_index = 0;
        self.state = SessionState::Replaying;
        surface.notify(Notice::info("Playing..."));
        Ok(())
    }

    fn tick_replay(&mut self, surface: &mut dyn Surface) {
        let index = self.replay_index;
        if let Some(entry) = self.buffer.get(index) {
            surface.present(&FrameUpdate {
                image: entry.frame().clone(),
                status: "Playing...".to_string(),
                summary: overlay::detection_summary(entry.detections(), &self.run_names),
                position: Some(index),
                total: self.total_frames,
                kind: UpdateKind::Replay,
            });
            self.replay_index += 1;
        }
        if self.replay_index >= self.buffer.len() {
            self.replay_index = 0;
            self.state = SessionState::Idle;
            log::info!("session: replay finished");
            surface.set_actions(self.actions());
        }
    }

    // ------------------------------------------------------------------------
    // Export
    // ------------------------------------------------------------------------

    /// Export the processed buffer. `None` uses the configured default path.
    pub fn export_to(
        &mut self,
        destination: Option<&Path>,
        surface: &mut dyn Surface,
    ) -> Result<ExportSummary, SessionError> {
        self.require_idle("export")?;
        let destination = destination
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.default_export_path());
        let summary = export::export(
            &self.buffer,
            &destination,
            self.run_frame_rate,
            &self.config.export_settings(),
        )?;
        surface.notify(Notice::info(format!(
            "Exported {} frames to {}",
            summary.frames,
            summary.path.display()
        )));
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Camera
    // ------------------------------------------------------------------------

    fn begin_camera(&mut self) -> Result<(), SessionError> {
        self.require_idle("start the camera")?;
        if self.detector.is_none() {
            return Err(SessionError::MissingResource("model"));
        }
        self.live
            .start()
            .map_err(|err| SessionError::load("camera", err))?;
        self.state = SessionState::CameraRunning;
        Ok(())
    }

    fn tick_camera(&mut self, surface: &mut dyn Surface) {
        let Some(detector) = self.detector.as_mut() else {
            self.stop_camera();
            return;
        };
        match self.live.tick(&mut **detector) {
            Ok(Some(update)) => surface.present(&update),
            Ok(None) => {}
            Err(err) => match self.config.inference_failure {
                InferenceFailurePolicy::Skip => {
                    log::warn!("session: skipping camera frame: {:#}", err);
                }
                InferenceFailurePolicy::Abort => {
                    log::error!("session: camera inference failed: {:#}", err);
                    self.stop_camera();
                    surface.notify(Notice::error(format!("Detection failed: {:#}", err)));
                    surface.set_actions(self.actions());
                }
            },
        }
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::CameraRunning => {
                self.stop_camera();
                Ok(())
            }
            SessionState::Idle => Ok(()),
            state => Err(SessionError::InvalidTransition {
                state,
                intent: "stop",
            }),
        }
    }

    fn stop_camera(&mut self) {
        self.live.stop();
        self.state = SessionState::Idle;
    }

    // ------------------------------------------------------------------------
    // Reset
    // ------------------------------------------------------------------------

    /// Back to the load screen: release handles and drop processed frames.
    /// The loaded detector is kept.
    fn navigate_back(&mut self) {
        self.live.stop();
        if let Some(mut source) = self.source.take() {
            source.release();
        }
        self.buffer.reset(None);
        self.replay_index = 0;
        self.total_frames = None;
        self.run_frame_rate = self.config.default_frame_rate;
        self.stats = RunStats::default();
        self.resume_to = SessionState::Idle;
        self.state = SessionState::Idle;
        log::info!("session: reset");
    }

    fn require_idle(&self, intent: &'static str) -> Result<(), SessionError> {
        if self.state == SessionState::Idle {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                state: self.state,
                intent,
            })
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
    }
}

fn format_total(total: Option<u64>) -> String {
    total
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string())
}
