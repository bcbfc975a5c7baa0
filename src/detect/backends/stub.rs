use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::ClassNames;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;
use crate::stub_uri;

/// Stub backend for testing and demos.
///
/// Detections are derived from a SHA-256 of the frame pixels, so the same
/// frame always yields the same boxes. Selected with `stub://<name>`;
/// `?fail_every=N` makes every Nth call fail.
pub struct StubBackend {
    names: ClassNames,
    fail_every: Option<u64>,
    calls: Arc<AtomicU64>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            names: ClassNames::coco(),
            fail_every: None,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Parse a `stub://name?fail_every=N` model path.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let (_, options) = stub_uri::parse(uri)?;
        let mut backend = Self::new();
        for (key, value) in options {
            match key.as_str() {
                "fail_every" => {
                    let n: u64 = value
                        .parse()
                        .map_err(|_| anyhow!("fail_every must be an integer"))?;
                    backend = backend.failing_every(n);
                }
                _ => return Err(anyhow!("unknown stub model option '{}={}'", key, value)),
            }
        }
        Ok(backend)
    }

    pub fn with_names(mut self, names: ClassNames) -> Self {
        self.names = names;
        self
    }

    /// Fail every `n`th call (0 disables).
    pub fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Shared counter of `detect` calls, readable after the backend is boxed.
    pub fn call_counter(&self) -> Arc<AtomicU64> {
        self.calls.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(n) = self.fail_every {
            if call % n == 0 {
                return Err(anyhow!("stub inference failure on call {}", call));
            }
        }

        let hash: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let count = (hash[0] % 3) as usize;
        let w = frame.width() as f32;
        let h = frame.height() as f32;
        let classes = self.names.len().max(1);

        let detections = (0..count)
            .map(|k| {
                let b = &hash[1 + k * 6..7 + k * 6];
                let unit = |v: u8| v as f32 / 255.0;
                let x1 = unit(b[2]) * w * 0.6;
                let y1 = unit(b[3]) * h * 0.6;
                let x2 = x1 + w * (0.1 + unit(b[4]) * 0.3);
                let y2 = y1 + h * (0.1 + unit(b[5]) * 0.3);
                Detection::new(
                    b[0] as usize % classes,
                    0.3 + unit(b[1]) * 0.7,
                    BoundingBox::new(x1, y1, x2, y2).clamped(frame.width(), frame.height()),
                )
            })
            .collect();
        Ok(detections)
    }

    fn class_names(&self) -> &ClassNames {
        &self.names
    }
}
