#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::ClassNames;
use crate::detect::postprocess::{decode_yolov8, PostprocessParams};
use crate::detect::result::Detection;
use crate::detect::DetectorSettings;
use crate::frame::Frame;

/// Tract-based backend for YOLOv8 ONNX exports.
///
/// Frames are resized to the square model input, normalised to 0..1 and fed
/// as NCHW f32. Boxes are mapped back to frame pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    params: PostprocessParams,
    names: ClassNames,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        settings: &DetectorSettings,
        names: ClassNames,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size: settings.input_size,
            params: settings.postprocess_params(),
            names,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let side = self.input_size;
        let resized = image::imageops::resize(frame.image(), side, side, FilterType::Triangle);
        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        input.into_tensor()
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let shape = output.shape().to_vec();
        let data = output
            .as_slice::<f32>()
            .context("model output tensor was not f32")?;

        let side = self.input_size as f32;
        decode_yolov8(
            data,
            &shape,
            Some(self.names.len()),
            &self.params,
            frame.width() as f32 / side,
            frame.height() as f32 / side,
        )
        .map(|dets| {
            dets.into_iter()
                .map(|mut d| {
                    d.bbox = d.bbox.clamped(frame.width(), frame.height());
                    d
                })
                .collect()
        })
    }

    fn class_names(&self) -> &ClassNames {
        &self.names
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = Frame::new(0, image::RgbImage::new(side, side));
        self.detect(&blank).map(|_| ())
    }
}
