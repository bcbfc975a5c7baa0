//! Object detectors.
//!
//! `load` turns a model path into a boxed `DetectorBackend`:
//! - `stub://...` selects the deterministic `StubBackend`
//! - `*.onnx` uses `TractBackend` (feature: backend-tract)

mod backend;
mod backends;
mod labels;
pub mod postprocess;
mod result;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::ClassNames;
pub use result::{BoundingBox, Detection};

use crate::stub_uri;
use postprocess::PostprocessParams;

/// Inference parameters shared by model-backed detectors.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Square model input side in pixels.
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Class names file; defaults to `<model>.names` or COCO.
    pub labels_path: Option<PathBuf>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 100,
            labels_path: None,
        }
    }
}

impl DetectorSettings {
    pub fn postprocess_params(&self) -> PostprocessParams {
        PostprocessParams {
            confidence_threshold: self.confidence_threshold,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!("confidence_threshold must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(anyhow!("iou_threshold must be within 0..=1"));
        }
        if self.max_detections == 0 {
            return Err(anyhow!("max_detections must be greater than zero"));
        }
        Ok(())
    }
}

/// Load a detector for `model_path`.
pub fn load(model_path: &str, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    if model_path.trim().is_empty() {
        return Err(anyhow!("model path is empty"));
    }
    if stub_uri::is_stub(model_path) {
        let mut backend = StubBackend::from_uri(model_path)?;
        if let Some(labels) = settings.labels_path.as_deref() {
            backend = backend.with_names(ClassNames::from_file(labels)?);
        }
        log::info!("detector: loaded {} (stub)", model_path);
        return Ok(Box::new(backend));
    }

    let path = Path::new(model_path);
    if !path.is_file() {
        return Err(anyhow!("model file not found: {}", model_path));
    }
    settings.validate()?;

    #[cfg(feature = "backend-tract")]
    {
        let names = ClassNames::resolve(path, settings.labels_path.as_deref())?;
        let mut backend = TractBackend::new(path, settings, names)?;
        backend.warm_up()?;
        log::info!("detector: loaded {} (tract)", model_path);
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(anyhow!(
            "loading {} requires the backend-tract feature",
            model_path
        ))
    }
}
