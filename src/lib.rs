//! Detection review
//!
//! Load a video and an object-detection model, run per-frame inference,
//! scrub and replay the annotated results, export them to a video file, or
//! run the same loop against a live camera.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (local video files, cameras, synthetic `stub://` streams)
//! - `detect`: Detector backends, class names, YOLO post-processing
//! - `overlay`: Frame annotation (boxes, labels, FPS)
//! - `frame`: Frames and the processed-frame buffer
//! - `session`: The processing / seek / replay / camera state machine
//! - `live`: Camera capture loop with FPS counter
//! - `export`: All-or-nothing MPEG-4 AVI export through FFmpeg
//! - `scheduler`: Fixed-period cooperative ticker
//! - `config`: JSON config file plus environment overrides

pub mod config;
pub mod detect;
pub mod export;
pub mod frame;
pub mod ingest;
pub mod live;
pub mod overlay;
pub mod scheduler;
pub mod session;
mod stub_uri;

pub use config::AppConfig;
pub use detect::{BoundingBox, ClassNames, Detection, DetectorBackend, DetectorSettings};
pub use export::{export, ExportError, ExportSettings, ExportSummary, VideoInfo};
pub use frame::{BufferError, Frame, ProcessedBuffer, ProcessedEntry};
pub use ingest::{CameraConfig, CameraSource, FileConfig, FileSource, VideoSource};
pub use live::{FpsCounter, LiveCapture};
pub use scheduler::Ticker;
pub use session::{
    Actions, FrameUpdate, InferenceFailurePolicy, Intent, Notice, NoticeLevel, RunStats, Session,
    SessionError, SessionState, Surface, UpdateKind,
};
