use anyhow::Result;

use crate::detect::labels::ClassNames;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend owns a loaded model. `detect` runs one inference and returns the
/// detections in model output order; it must not keep the frame.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Class id to name mapping for this model.
    fn class_names(&self) -> &ClassNames;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
