use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorSettings;
use crate::export::ExportSettings;
use crate::ingest::camera::{device_path, CameraConfig};
use crate::session::InferenceFailurePolicy;

const DEFAULT_TICK_MS: u64 = 30;
const DEFAULT_FRAME_RATE: f64 = 30.0;
const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_EXPORT_DIR: &str = ".";
const DEFAULT_EXPORT_FILE: &str = "processed_video.avi";

#[derive(Debug, Deserialize, Default)]
struct AppConfigFile {
    tick_ms: Option<u64>,
    default_frame_rate: Option<f64>,
    inference_failure: Option<InferenceFailurePolicy>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    export: Option<ExportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device_index: Option<u32>,
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
    labels_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ExportConfigFile {
    dir: Option<PathBuf>,
    file_name: Option<String>,
    bit_rate_kbps: Option<u32>,
    keyframe_interval: Option<u32>,
}

/// Runtime configuration for a review session.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub tick: Duration,
    /// Export frame rate when the source does not report one.
    pub default_frame_rate: f64,
    pub inference_failure: InferenceFailurePolicy,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub device_index: u32,
    /// Explicit device path or `stub://` uri; wins over `device_index`.
    pub device: Option<String>,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub dir: PathBuf,
    pub file_name: String,
    pub bit_rate_kbps: u32,
    pub keyframe_interval: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_file(AppConfigFile::default())
    }
}

impl AppConfig {
    /// Load from `DETREVIEW_CONFIG` (JSON, optional), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETREVIEW_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let export = file.export.unwrap_or_default();
        let detector_defaults = DetectorSettings::default();
        let export_defaults = ExportSettings::default();

        Self {
            tick: Duration::from_millis(file.tick_ms.unwrap_or(DEFAULT_TICK_MS)),
            default_frame_rate: file.default_frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
            inference_failure: file.inference_failure.unwrap_or_default(),
            camera: CameraSettings {
                device_index: camera.device_index.unwrap_or(DEFAULT_CAMERA_INDEX),
                device: camera.device,
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            },
            detector: DetectorSettings {
                input_size: detector.input_size.unwrap_or(detector_defaults.input_size),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(detector_defaults.confidence_threshold),
                iou_threshold: detector
                    .iou_threshold
                    .unwrap_or(detector_defaults.iou_threshold),
                max_detections: detector
                    .max_detections
                    .unwrap_or(detector_defaults.max_detections),
                labels_path: detector.labels_path,
            },
            export: ExportConfig {
                dir: export
                    .dir
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_DIR)),
                file_name: export
                    .file_name
                    .unwrap_or_else(|| DEFAULT_EXPORT_FILE.to_string()),
                bit_rate_kbps: export
                    .bit_rate_kbps
                    .unwrap_or(export_defaults.bit_rate_kbps),
                keyframe_interval: export
                    .keyframe_interval
                    .unwrap_or(export_defaults.keyframe_interval),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(tick) = std::env::var("DETREVIEW_TICK_MS") {
            let ms: u64 = tick
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETREVIEW_TICK_MS must be an integer number of milliseconds"))?;
            self.tick = Duration::from_millis(ms);
        }
        if let Ok(device) = std::env::var("DETREVIEW_CAMERA_DEVICE") {
            let device = device.trim();
            if !device.is_empty() {
                match device.parse::<u32>() {
                    Ok(index) => {
                        self.camera.device_index = index;
                        self.camera.device = None;
                    }
                    Err(_) => self.camera.device = Some(device.to_string()),
                }
            }
        }
        if let Ok(dir) = std::env::var("DETREVIEW_EXPORT_DIR") {
            if !dir.trim().is_empty() {
                self.export.dir = PathBuf::from(dir);
            }
        }
        if let Ok(policy) = std::env::var("DETREVIEW_FAILURE_POLICY") {
            if !policy.trim().is_empty() {
                self.inference_failure = policy.parse()?;
            }
        }
        if let Ok(threshold) = std::env::var("DETREVIEW_CONF_THRESHOLD") {
            self.detector.confidence_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETREVIEW_CONF_THRESHOLD must be a number"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick.is_zero() {
            return Err(anyhow!("tick_ms must be greater than zero"));
        }
        if !(self.default_frame_rate.is_finite() && self.default_frame_rate > 0.0) {
            return Err(anyhow!("default_frame_rate must be positive"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.export.bit_rate_kbps == 0 || self.export.keyframe_interval == 0 {
            return Err(anyhow!(
                "export bit_rate_kbps and keyframe_interval must be greater than zero"
            ));
        }
        if self.export.file_name.trim().is_empty() {
            return Err(anyhow!("export file_name must not be empty"));
        }
        self.detector.validate()
    }

    /// Where `Export` writes when no destination is given.
    pub fn default_export_path(&self) -> PathBuf {
        self.export.dir.join(&self.export.file_name)
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            bit_rate_kbps: self.export.bit_rate_kbps,
            keyframe_interval: self.export.keyframe_interval,
        }
    }
}

impl CameraSettings {
    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            device: self
                .device
                .clone()
                .unwrap_or_else(|| device_path(self.device_index)),
            target_fps: self.target_fps,
            width: self.width,
            height: self.height,
        }
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
