use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use crate::frame::Frame;
use crate::stub_uri;

/// Parameters of a `stub://` stream.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SyntheticOptions {
    pub name: String,
    /// `None` for endless (camera-like) streams.
    pub frames: Option<u64>,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl SyntheticOptions {
    pub(crate) fn parse(uri: &str, default_frames: Option<u64>) -> Result<Self> {
        let (name, options) = stub_uri::parse(uri)?;
        let mut spec = Self {
            name,
            frames: default_frames,
            fps: 30.0,
            width: 320,
            height: 240,
        };
        for (key, value) in options {
            let bad = || anyhow!("invalid value '{}' for stub option '{}'", value, key);
            match key.as_str() {
                "frames" => spec.frames = Some(value.parse().map_err(|_| bad())?),
                "fps" => spec.fps = value.parse().map_err(|_| bad())?,
                "width" => spec.width = value.parse().map_err(|_| bad())?,
                "height" => spec.height = value.parse().map_err(|_| bad())?,
                _ => return Err(anyhow!("unknown stub option '{}'", key)),
            }
        }
        if spec.width == 0 || spec.height == 0 {
            return Err(anyhow!("stub frame size must be non-zero"));
        }
        if !(spec.fps.is_finite() && spec.fps > 0.0) {
            return Err(anyhow!("stub fps must be positive"));
        }
        Ok(spec)
    }
}

/// Deterministic frame generator: frame `i` always has the same pixels.
pub(crate) struct SyntheticStream {
    pub spec: SyntheticOptions,
    position: u64,
    frames_read: u64,
}

impl SyntheticStream {
    pub(crate) fn new(spec: SyntheticOptions) -> Self {
        Self {
            spec,
            position: 0,
            frames_read: 0,
        }
    }

    pub(crate) fn next_frame(&mut self) -> Option<Frame> {
        if let Some(total) = self.spec.frames {
            if self.position >= total {
                return None;
            }
        }
        let frame = Frame::new(self.position, self.render(self.position));
        self.position += 1;
        self.frames_read += 1;
        Some(frame)
    }

    pub(crate) fn seek(&mut self, frame_index: u64) -> Result<()> {
        if let Some(total) = self.spec.frames {
            if frame_index > total {
                return Err(anyhow!(
                    "seek to frame {} beyond end of {}-frame stream",
                    frame_index,
                    total
                ));
            }
        }
        self.position = frame_index;
        self.frames_read = 0;
        Ok(())
    }

    pub(crate) fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Gradient background with a square drifting left to right.
    fn render(&self, index: u64) -> RgbImage {
        let (w, h) = (self.spec.width, self.spec.height);
        let side = (w.min(h) / 4).max(1);
        let travel = w.saturating_sub(side).max(1) as u64;
        let square_x = ((index * 4) % travel) as u32;
        let square_y = (h - side) / 2;

        RgbImage::from_fn(w, h, |x, y| {
            let inside = x >= square_x && x < square_x + side && y >= square_y && y < square_y + side;
            if inside {
                Rgb([240, 200, 40])
            } else {
                let shade = ((x as u64 + y as u64 + index) % 256) as u8;
                Rgb([shade / 2, shade / 3, 64])
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finite_stream_ends() -> Result<()> {
        let mut stream = SyntheticStream::new(SyntheticOptions::parse("stub://t?frames=2", None)?);
        assert!(stream.next_frame().is_some());
        assert!(stream.next_frame().is_some());
        assert!(stream.next_frame().is_none());
        Ok(())
    }

    #[test]
    fn frames_are_reproducible_after_seek() -> Result<()> {
        let mut stream = SyntheticStream::new(SyntheticOptions::parse("stub://t?frames=5", None)?);
        let first = stream.next_frame().map(|f| f.digest());
        stream.next_frame();
        stream.seek(0)?;
        assert_eq!(stream.next_frame().map(|f| f.digest()), first);
        assert!(stream.seek(6).is_err());
        Ok(())
    }

    #[test]
    fn uri_rejects_bad_options() {
        assert!(SyntheticOptions::parse("stub://t?width=0", None).is_err());
        assert!(SyntheticOptions::parse("stub://t?fps=-1", None).is_err());
        assert!(SyntheticOptions::parse("stub://t?colour=red", None).is_err());
    }
}
