//! Frames and the processed-frame cache.
//!
//! - `Frame`: immutable RGB raster tagged with its index in the source.
//! - `ProcessedEntry`: annotated frame plus the detections that produced it.
//! - `ProcessedBuffer`: append-only cache built during one processing run.
//!
//! Pixel storage is shared behind an `Arc`, so cloning a frame never copies
//! pixels and no API hands out a mutable view of them.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use image::RgbImage;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::detect::Detection;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded RGB image from a video file or camera.
#[derive(Clone, Debug)]
pub struct Frame {
    index: u64,
    image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            image: Arc::new(image),
        }
    }

    /// Build a frame from tightly packed RGB24 bytes.
    pub fn from_rgb(index: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("RGB buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(index, image))
    }

    /// Position of this frame in its source (0-based).
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// SHA-256 over dimensions and pixels.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.width().to_le_bytes());
        hasher.update(self.height().to_le_bytes());
        hasher.update(self.pixels());
        hasher.finalize().into()
    }

    /// True when both frames share the same pixel allocation.
    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

// ----------------------------------------------------------------------------
// ProcessedEntry / ProcessedBuffer
// ----------------------------------------------------------------------------

/// An annotated frame and its detections. Read-only once built.
#[derive(Clone, Debug)]
pub struct ProcessedEntry {
    frame: Frame,
    detections: Vec<Detection>,
}

impl ProcessedEntry {
    pub fn new(frame: Frame, detections: Vec<Detection>) -> Self {
        Self { frame, detections }
    }

    /// The annotated frame.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("processed buffer is full ({limit} frames)")]
    Full { limit: u64 },
}

/// Append-only cache of processed frames for one run.
///
/// When the source reports a frame count, the buffer never grows past it.
#[derive(Debug, Default)]
pub struct ProcessedBuffer {
    entries: Vec<ProcessedEntry>,
    limit: Option<u64>,
}

impl ProcessedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: Option<u64>) -> Self {
        Self {
            entries: Vec::new(),
            limit,
        }
    }

    /// Drop every entry and start a fresh run capped at `limit` frames.
    pub fn reset(&mut self, limit: Option<u64>) {
        self.entries.clear();
        self.limit = limit;
    }

    pub fn push(&mut self, entry: ProcessedEntry) -> std::result::Result<usize, BufferError> {
        if let Some(limit) = self.limit {
            if self.entries.len() as u64 >= limit {
                return Err(BufferError::Full { limit });
            }
        }
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&ProcessedEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessedEntry> + '_ {
        self.entries.iter()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
