//! Frame sources.
//!
//! - Local video files (`FileSource`; real decoding behind feature: ingest-file-ffmpeg)
//! - Cameras (`CameraSource`; V4L2 devices behind feature: ingest-v4l2)
//! - Synthetic `stub://` sources for tests and demos
//!
//! Every source implements `VideoSource`. `read_next` returning `Ok(None)` is
//! the normal end-of-stream signal.

pub mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(any(feature = "ingest-v4l2", test))]
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::Result;

use crate::frame::Frame;

pub use camera::{CameraConfig, CameraSource};
pub use file::{FileConfig, FileSource};

/// A decodable stream of frames.
pub trait VideoSource: Send {
    /// Human readable origin (path or device).
    fn describe(&self) -> String;

    /// Next frame, or `None` at end of stream.
    fn read_next(&mut self) -> Result<Option<Frame>>;

    /// Position the stream so the next read returns `frame_index`.
    fn seek(&mut self, frame_index: u64) -> Result<()>;

    /// Total frames, when the container reports it.
    fn frame_count(&self) -> Option<u64>;

    /// Nominal frames per second, when known.
    fn frame_rate(&self) -> Option<f64>;

    /// Frames handed out since open or the last seek.
    fn frames_read(&self) -> u64;

    /// Drop the underlying handle. Safe to call repeatedly.
    fn release(&mut self);

    fn is_open(&self) -> bool;
}
