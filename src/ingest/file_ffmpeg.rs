//! Local file decoding using FFmpeg.
//!
//! Frames are decoded in-memory and converted to packed RGB24.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;

use super::file::FileConfig;
use crate::frame::Frame;

pub(crate) struct FfmpegFileSource {
    config: FileConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: Option<u64>,
    frame_rate: Option<f64>,
    time_base: ffmpeg::Rational,
    /// After a seek: decoded frames before this index are dropped.
    skip_until: Option<u64>,
    next_index: u64,
    frames_read: u64,
    eof_sent: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(config: &FileConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.path)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", config.path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let time_base = input_stream.time_base();

        let frames = input_stream.frames();
        let frame_count = (frames > 0).then_some(frames as u64);
        let rate = input_stream.avg_frame_rate();
        let frame_rate = (rate.denominator() != 0 && rate.numerator() > 0)
            .then(|| f64::from(rate.numerator()) / f64::from(rate.denominator()));

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            config: config.clone(),
            input,
            stream_index,
            decoder,
            scaler,
            frame_count,
            frame_rate,
            time_base,
            skip_until: None,
            next_index: 0,
            frames_read: 0,
            eof_sent: false,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        while let Some(decoded) = self.decode_next()? {
            if let Some(target) = self.skip_until {
                if self.index_of(&decoded).is_some_and(|index| index < target) {
                    continue;
                }
                self.skip_until = None;
            }
            return self.convert(&decoded).map(Some);
        }
        log::info!("FileSource: end of stream for {}", self.config.path);
        Ok(None)
    }

    fn decode_next(&mut self) -> Result<Option<ffmpeg::frame::Video>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return Ok(Some(decoded));
        }
        if self.eof_sent {
            return Ok(None);
        }

        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(Some(decoded));
            }
        }

        // Drain frames still held by the decoder.
        self.decoder.send_eof().context("flush ffmpeg decoder")?;
        self.eof_sent = true;
        if self.decoder.receive_frame(&mut decoded).is_ok() {
            return Ok(Some(decoded));
        }
        Ok(None)
    }

    /// Source frame index of a decoded frame, from its presentation time.
    fn index_of(&self, decoded: &ffmpeg::frame::Video) -> Option<u64> {
        let pts = decoded.timestamp().or_else(|| decoded.pts())?;
        let fps = self.frame_rate?;
        let seconds = pts as f64 * f64::from(self.time_base.numerator())
            / f64::from(self.time_base.denominator());
        Some((seconds * fps).round().max(0.0) as u64)
    }

    /// Position on `frame_index`. The demuxer lands on the keyframe at or
    /// before the target; frames up to the target are decoded and dropped
    /// by the following reads.
    pub(crate) fn seek(&mut self, frame_index: u64) -> Result<()> {
        let fps = self.frame_rate.unwrap_or(30.0);
        let timestamp = (frame_index as f64 / fps * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        self.input
            .seek(timestamp, ..=timestamp)
            .with_context(|| format!("seek {} to frame {}", self.config.path, frame_index))?;
        self.decoder.flush();
        self.eof_sent = false;
        self.skip_until = (frame_index > 0).then_some(frame_index);
        self.next_index = frame_index;
        self.frames_read = 0;
        Ok(())
    }

    pub(crate) fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    pub(crate) fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }

    pub(crate) fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        let frame = Frame::from_rgb(self.next_index, width, height, pixels)?;
        self.next_index += 1;
        self.frames_read += 1;
        Ok(frame)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data[..row_bytes * height as usize].to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
