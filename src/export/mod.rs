//! Export of a processed buffer to a video file.
//!
//! Frames are encoded as MPEG-4 Part 2 in an AVI container through FFmpeg
//! (`export-ffmpeg` feature). Writes are all-or-nothing: the encoder fills a
//! temporary file next to the destination, which is renamed into place only
//! after the container trailer is written.

#[cfg(feature = "export-ffmpeg")]
mod ffmpeg;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use thiserror::Error;

use crate::frame::ProcessedBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportSettings {
    /// Target video bit rate.
    pub bit_rate_kbps: u32,
    /// Frames between forced keyframes.
    pub keyframe_interval: u32,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            bit_rate_kbps: 4000,
            keyframe_interval: 12,
        }
    }
}

/// Frame rate as a reduced `num / den` pair, the form container headers use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn from_fps(fps: f64) -> Result<Self> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(anyhow!("frame rate must be finite and positive, got {}", fps));
        }
        let (num, den) = if fps.fract() == 0.0 && fps <= f64::from(i32::MAX as u32) {
            (fps as u32, 1)
        } else {
            ((fps * 1000.0).round() as u32, 1000)
        };
        if num == 0 {
            return Err(anyhow!("frame rate {} is too small to encode", fps));
        }
        let divisor = gcd(num, den);
        Ok(Self {
            num: num / divisor,
            den: den / divisor,
        })
    }

    pub fn fps(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        f64::from(self.num) / f64::from(self.den)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub frames: usize,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

impl ExportSummary {
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.frame_rate
    }
}

/// What FFmpeg reads back from a video file's video track.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfo {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    /// Frame count from the container header.
    pub frames: u64,
    /// Packets actually demuxed from the track.
    pub packets: u64,
    pub frame_rate: FrameRate,
}

impl VideoInfo {
    pub fn duration_secs(&self) -> f64 {
        match self.frame_rate.fps() {
            fps if fps > 0.0 => self.frames as f64 / fps,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export: no processed frames")]
    EmptyBuffer,
    #[error("invalid export frame rate {0}")]
    InvalidFrameRate(f64),
    #[error("frame {index} is {width}x{height}, expected {expected_width}x{expected_height}")]
    FrameSizeMismatch {
        index: usize,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error("cannot encode {width}x{height} frames: dimensions must be even")]
    OddDimensions { width: u32, height: u32 },
    #[error("failed to encode {}: {detail}", path.display())]
    Encode { path: PathBuf, detail: String },
    #[error("cannot write {}: {source}", path.display())]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("video export requires the export-ffmpeg feature")]
    Unsupported,
}

/// Write the annotated frames of `buffer`, in order, to `destination` as an
/// MPEG-4 AVI playing at `frame_rate`.
pub fn export(
    buffer: &ProcessedBuffer,
    destination: &Path,
    frame_rate: f64,
    settings: &ExportSettings,
) -> Result<ExportSummary, ExportError> {
    let first = buffer.get(0).ok_or(ExportError::EmptyBuffer)?.frame();
    let rate = FrameRate::from_fps(frame_rate).map_err(|_| ExportError::InvalidFrameRate(frame_rate))?;
    let (width, height) = (first.width(), first.height());
    if width % 2 != 0 || height % 2 != 0 {
        return Err(ExportError::OddDimensions { width, height });
    }
    for (index, entry) in buffer.iter().enumerate() {
        let frame = entry.frame();
        if frame.width() != width || frame.height() != height {
            return Err(ExportError::FrameSizeMismatch {
                index,
                width: frame.width(),
                height: frame.height(),
                expected_width: width,
                expected_height: height,
            });
        }
    }

    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let unwritable = |source: std::io::Error| ExportError::Unwritable {
        path: destination.to_path_buf(),
        source,
    };

    // The extension lets FFmpeg and players recognise the partial file.
    let tmp = tempfile::Builder::new()
        .prefix(".export-")
        .suffix(".part.avi")
        .tempfile_in(&dir)
        .map_err(unwritable)?;

    encode(buffer, tmp.path(), rate, settings)?;
    tmp.as_file().sync_all().map_err(unwritable)?;

    let file = tmp
        .persist(destination)
        .map_err(|err| unwritable(err.error))?;
    let bytes = file.metadata().map(|m| m.len()).unwrap_or(0);

    log::info!(
        "exported {} frames ({}x{} @ {:.2} fps) to {}",
        buffer.len(),
        width,
        height,
        rate.fps(),
        destination.display()
    );
    Ok(ExportSummary {
        path: destination.to_path_buf(),
        frames: buffer.len(),
        frame_rate: rate.fps(),
        width,
        height,
        bytes,
    })
}

#[cfg(feature = "export-ffmpeg")]
fn encode(
    buffer: &ProcessedBuffer,
    path: &Path,
    rate: FrameRate,
    settings: &ExportSettings,
) -> Result<(), ExportError> {
    ffmpeg::write_avi(buffer, path, rate, settings).map_err(|err| ExportError::Encode {
        path: path.to_path_buf(),
        detail: format!("{:#}", err),
    })
}

#[cfg(not(feature = "export-ffmpeg"))]
fn encode(
    _buffer: &ProcessedBuffer,
    _path: &Path,
    _rate: FrameRate,
    _settings: &ExportSettings,
) -> Result<(), ExportError> {
    Err(ExportError::Unsupported)
}

/// Read back the video track of `path`: codec, size, header frame count,
/// demuxed packet count and frame rate.
#[cfg(feature = "export-ffmpeg")]
pub fn inspect(path: &Path) -> Result<VideoInfo> {
    ffmpeg::read_info(path)
}

#[cfg(not(feature = "export-ffmpeg"))]
pub fn inspect(path: &Path) -> Result<VideoInfo> {
    Err(anyhow!(
        "reading {} requires the export-ffmpeg feature",
        path.display()
    ))
}
