//! Camera frame source.
//!
//! `CameraSource` captures from a local V4L2 device (feature: ingest-v4l2) or
//! from an endless synthetic `stub://` stream. `stub://unavailable` always
//! fails to open, which stands in for a missing or busy device.

use anyhow::{anyhow, Result};

use super::synthetic::{SyntheticOptions, SyntheticStream};
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::DeviceV4l2Source;
use super::VideoSource;
use crate::frame::Frame;
use crate::stub_uri;

/// Configuration for a camera source.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or `stub://...`.
    pub device: String,
    /// Requested frame rate.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: device_path(0),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

/// Device node for a camera index.
pub fn device_path(index: u32) -> String {
    format!("/dev/video{}", index)
}

/// Camera frame source.
pub struct CameraSource {
    config: CameraConfig,
    backend: Option<CameraBackend>,
}

enum CameraBackend {
    Synthetic(SyntheticStream),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceV4l2Source),
}

impl CameraSource {
    /// Acquire the device.
    pub fn open(config: CameraConfig) -> Result<Self> {
        let backend = if stub_uri::is_stub(&config.device) {
            let spec = SyntheticOptions::parse(&config.device, None)?;
            if spec.name == "unavailable" {
                return Err(anyhow!("camera {} is unavailable", config.device));
            }
            log::info!("CameraSource: connected to {} (synthetic)", config.device);
            CameraBackend::Synthetic(SyntheticStream::new(spec))
        } else {
            Self::open_device(&config)?
        };
        Ok(Self {
            config,
            backend: Some(backend),
        })
    }

    #[cfg(feature = "ingest-v4l2")]
    fn open_device(config: &CameraConfig) -> Result<CameraBackend> {
        let mut device = DeviceV4l2Source::new(config.clone());
        device.connect()?;
        Ok(CameraBackend::Device(device))
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    fn open_device(config: &CameraConfig) -> Result<CameraBackend> {
        Err(anyhow!(
            "capturing from {} requires the ingest-v4l2 feature",
            config.device
        ))
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }
}

impl VideoSource for CameraSource {
    fn describe(&self) -> String {
        self.config.device.clone()
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        let device = &self.config.device;
        match self
            .backend
            .as_mut()
            .ok_or_else(|| anyhow!("camera {} has been released", device))?
        {
            CameraBackend::Synthetic(stream) => Ok(stream.next_frame()),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame().map(Some),
        }
    }

    fn seek(&mut self, _frame_index: u64) -> Result<()> {
        Err(anyhow!("camera sources cannot seek"))
    }

    fn frame_count(&self) -> Option<u64> {
        None
    }

    fn frame_rate(&self) -> Option<f64> {
        (self.config.target_fps > 0).then(|| f64::from(self.config.target_fps))
    }

    fn frames_read(&self) -> u64 {
        match &self.backend {
            Some(CameraBackend::Synthetic(stream)) => stream.frames_read(),
            #[cfg(feature = "ingest-v4l2")]
            Some(CameraBackend::Device(source)) => source.frames_captured(),
            None => 0,
        }
    }

    fn release(&mut self) {
        if self.backend.take().is_some() {
            log::info!("CameraSource: released {}", self.config.device);
        }
    }

    fn is_open(&self) -> bool {
        self.backend.is_some()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://desk?width=160&height=120".to_string(),
            ..CameraConfig::default()
        }
    }

    #[test]
    fn camera_source_produces_frames() -> Result<()> {
        let mut source = CameraSource::open(stub_config())?;
        let frame = source.read_next()?.expect("frame");
        assert_eq!(frame.width(), 160);
        assert_eq!(frame.height(), 120);
        assert_eq!(source.frame_count(), None);
        assert!(source.seek(0).is_err());
        Ok(())
    }

    #[test]
    fn unavailable_camera_fails_to_open() {
        let config = CameraConfig {
            device: "stub://unavailable".to_string(),
            ..CameraConfig::default()
        };
        assert!(CameraSource::open(config).is_err());
    }

    #[test]
    fn device_index_maps_to_node() {
        assert_eq!(device_path(1), "/dev/video1");
    }
}
