//! Live camera loop.
//!
//! Same tick shape as file processing, without the processed buffer or
//! seeking. Every rendered frame carries the rolling FPS.

use std::time::Instant;

use anyhow::{Context, Result};

use crate::detect::DetectorBackend;
use crate::ingest::{CameraConfig, CameraSource, VideoSource};
use crate::overlay;
use crate::session::{FrameUpdate, UpdateKind};

/// Frames-per-second since the capture started.
#[derive(Clone, Debug, Default)]
pub struct FpsCounter {
    started: Option<Instant>,
    frames: u64,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.started = None;
        self.frames = 0;
    }

    pub fn tick(&mut self) -> f64 {
        self.tick_at(Instant::now())
    }

    /// Count one frame observed at `now`.
    ///
    /// The first frame starts the clock and reports 0.0.
    pub fn tick_at(&mut self, now: Instant) -> f64 {
        self.frames += 1;
        let Some(started) = self.started else {
            self.started = Some(now);
            return 0.0;
        };
        let elapsed = now.saturating_duration_since(started).as_secs_f64();
        if elapsed <= 0.0 {
            0.0
        } else {
            self.frames as f64 / elapsed
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Camera capture with inference and FPS burn-in.
pub struct LiveCapture {
    config: CameraConfig,
    source: Option<CameraSource>,
    fps: FpsCounter,
    last_fps: f64,
}

impl LiveCapture {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            source: None,
            fps: FpsCounter::new(),
            last_fps: 0.0,
        }
    }

    /// Acquire the camera. A no-op when it is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.source.is_some() {
            return Ok(());
        }
        let source = CameraSource::open(self.config.clone())
            .with_context(|| format!("open camera {}", self.config.device))?;
        self.source = Some(source);
        self.fps.reset();
        self.last_fps = 0.0;
        log::info!("live capture started on {}", self.config.device);
        Ok(())
    }

    /// Capture, detect and render one frame.
    ///
    /// `Ok(None)` when the camera delivered nothing this tick; the loop keeps
    /// running. Detector errors are returned to the caller.
    pub fn tick(&mut self, detector: &mut dyn DetectorBackend) -> Result<Option<FrameUpdate>> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        let frame = match source.read_next() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(err) => {
                log::warn!("live capture: failed to read frame: {:#}", err);
                return Ok(None);
            }
        };

        self.last_fps = self.fps.tick();
        let detections = detector
            .detect(&frame)
            .with_context(|| format!("detect on live frame {}", frame.index()))?;
        let names = detector.class_names();
        let annotated = overlay::annotate(&frame, &detections, names);
        let burned = overlay::overlay_fps(&annotated, self.last_fps);

        Ok(Some(FrameUpdate {
            image: burned,
            status: format!("Live: {} | FPS: {:.2}", self.config.device, self.last_fps),
            summary: overlay::detection_summary(&detections, names),
            position: None,
            total: None,
            kind: UpdateKind::Live,
        }))
    }

    /// Release the camera. Returns whether a device was actually released.
    pub fn stop(&mut self) -> bool {
        match self.source.take() {
            Some(mut source) => {
                source.release();
                log::info!(
                    "live capture stopped after {} frames ({:.2} fps)",
                    self.fps.frames(),
                    self.last_fps
                );
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.source.is_some()
    }

    pub fn frames(&self) -> u64 {
        self.fps.frames()
    }

    pub fn last_fps(&self) -> f64 {
        self.last_fps
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }
}

impl Drop for LiveCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_tick_reports_zero() {
        let mut counter = FpsCounter::new();
        let t0 = Instant::now();
        assert_eq!(counter.tick_at(t0), 0.0);
        assert_eq!(counter.frames(), 1);
    }

    #[test]
    fn converges_to_frames_over_elapsed() {
        let mut counter = FpsCounter::new();
        let t0 = Instant::now();
        counter.tick_at(t0);
        let mut fps = 0.0;
        for i in 1..=10u64 {
            fps = counter.tick_at(t0 + Duration::from_millis(100 * i));
        }
        // 11 frames over one second.
        assert!((fps - 11.0).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_is_guarded() {
        let mut counter = FpsCounter::new();
        let t0 = Instant::now();
        counter.tick_at(t0);
        assert_eq!(counter.tick_at(t0), 0.0);
    }
}
