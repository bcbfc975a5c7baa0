//! Local video file source.
//!
//! `FileSource` decodes a local video file frame by frame. Paths starting with
//! `stub://` produce a synthetic finite clip (`stub://name?frames=N&fps=F`).

use std::path::Path;

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{SyntheticOptions, SyntheticStream};
use super::VideoSource;
use crate::frame::Frame;
use crate::stub_uri;

const DEFAULT_STUB_FRAMES: u64 = 90;

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path (e.g., "clips/street.mp4") or `stub://...`.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Local file frame source.
pub struct FileSource {
    config: FileConfig,
    backend: Option<FileBackend>,
}

enum FileBackend {
    Synthetic(SyntheticStream),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open the file and read its stream properties.
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file sources only support local paths (no URL schemes): {}",
                config.path
            ));
        }
        let backend = if stub_uri::is_stub(&config.path) {
            FileBackend::Synthetic(SyntheticStream::new(SyntheticOptions::parse(
                &config.path,
                Some(DEFAULT_STUB_FRAMES),
            )?))
        } else {
            if !Path::new(&config.path).is_file() {
                return Err(anyhow!("video file not found: {}", config.path));
            }
            Self::open_decoder(&config)?
        };

        let source = Self {
            config,
            backend: Some(backend),
        };
        log::info!(
            "FileSource: opened {} ({} frames @ {:.2} fps)",
            source.config.path,
            source
                .frame_count()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string()),
            source.frame_rate().unwrap_or(0.0)
        );
        Ok(source)
    }

    #[cfg(feature = "ingest-file-ffmpeg")]
    fn open_decoder(config: &FileConfig) -> Result<FileBackend> {
        Ok(FileBackend::Ffmpeg(FfmpegFileSource::new(config)?))
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    fn open_decoder(config: &FileConfig) -> Result<FileBackend> {
        Err(anyhow!(
            "decoding {} requires the ingest-file-ffmpeg feature",
            config.path
        ))
    }

    fn backend_mut(&mut self) -> Result<&mut FileBackend> {
        let path = &self.config.path;
        self.backend
            .as_mut()
            .ok_or_else(|| anyhow!("video source {} has been released", path))
    }
}

impl VideoSource for FileSource {
    fn describe(&self) -> String {
        self.config.path.clone()
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        match self.backend_mut()? {
            FileBackend::Synthetic(stream) => Ok(stream.next_frame()),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn seek(&mut self, frame_index: u64) -> Result<()> {
        match self.backend_mut()? {
            FileBackend::Synthetic(stream) => stream.seek(frame_index),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.seek(frame_index),
        }
    }

    fn frame_count(&self) -> Option<u64> {
        match self.backend.as_ref()? {
            FileBackend::Synthetic(stream) => stream.spec.frames,
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frame_count(),
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        match self.backend.as_ref()? {
            FileBackend::Synthetic(stream) => Some(stream.spec.fps),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frame_rate(),
        }
    }

    fn frames_read(&self) -> u64 {
        match &self.backend {
            Some(FileBackend::Synthetic(stream)) => stream.frames_read(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Some(FileBackend::Ffmpeg(source)) => source.frames_read(),
            None => 0,
        }
    }

    fn release(&mut self) {
        if self.backend.take().is_some() {
            log::info!("FileSource: released {}", self.config.path);
        }
    }

    fn is_open(&self) -> bool {
        self.backend.is_some()
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if stub_uri::is_stub(path) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_clip_reports_properties_and_ends() -> Result<()> {
        let mut source = FileSource::open(FileConfig::new("stub://clip?frames=3&fps=25"))?;
        assert_eq!(source.frame_count(), Some(3));
        assert_eq!(source.frame_rate(), Some(25.0));

        let mut indices = Vec::new();
        while let Some(frame) = source.read_next()? {
            indices.push(frame.index());
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(source.frames_read(), 3);
        Ok(())
    }

    #[test]
    fn remote_urls_and_missing_files_are_rejected() {
        assert!(FileSource::open(FileConfig::new("rtsp://camera/stream")).is_err());
        assert!(FileSource::open(FileConfig::new("")).is_err());
        assert!(FileSource::open(FileConfig::new("/no/such/video.mp4")).is_err());
    }

    #[test]
    fn release_is_idempotent_and_blocks_reads() -> Result<()> {
        let mut source = FileSource::open(FileConfig::new("stub://clip"))?;
        source.release();
        source.release();
        assert!(!source.is_open());
        assert!(source.read_next().is_err());
        assert_eq!(source.frame_count(), None);
        Ok(())
    }
}
