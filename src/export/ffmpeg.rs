//! MPEG-4 AVI encoding and read-back through FFmpeg.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use ffmpeg::format::Pixel;

use super::{ExportSettings, FrameRate, VideoInfo};
use crate::frame::{Frame, ProcessedBuffer};

pub(super) fn write_avi(
    buffer: &ProcessedBuffer,
    path: &Path,
    rate: FrameRate,
    settings: &ExportSettings,
) -> Result<()> {
    let first = buffer.get(0).context("empty buffer")?.frame();
    let (width, height) = (first.width(), first.height());

    ffmpeg::init().context("initialize ffmpeg")?;
    let mut output = ffmpeg::format::output_as(&path, "avi")
        .with_context(|| format!("create {}", path.display()))?;
    let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
        .ok_or_else(|| anyhow!("ffmpeg was built without an MPEG-4 encoder"))?;
    let global_header = output
        .format()
        .flags()
        .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

    // One tick per frame.
    let time_base = ffmpeg::Rational::new(rate.den as i32, rate.num as i32);
    let stream_index = {
        let mut stream = output.add_stream(codec).context("add video stream")?;
        stream.set_time_base(time_base);
        stream.index()
    };

    let mut context = ffmpeg::codec::context::Context::new_with_codec(codec)
        .encoder()
        .video()
        .context("create video encoder")?;
    context.set_width(width);
    context.set_height(height);
    context.set_format(Pixel::YUV420P);
    context.set_time_base(time_base);
    context.set_frame_rate(Some(ffmpeg::Rational::new(rate.num as i32, rate.den as i32)));
    context.set_bit_rate(settings.bit_rate_kbps as usize * 1000);
    context.set_gop(settings.keyframe_interval);
    context.set_max_b_frames(0);
    if global_header {
        context.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
    }
    let mut encoder = context.open_as(codec).context("open MPEG-4 encoder")?;

    output
        .stream_mut(stream_index)
        .context("output stream vanished")?
        .set_parameters(&encoder);
    output.write_header().context("write AVI header")?;
    let stream_time_base = output
        .stream(stream_index)
        .context("output stream vanished")?
        .time_base();

    let mut scaler = ffmpeg::software::scaling::Context::get(
        Pixel::RGB24,
        width,
        height,
        Pixel::YUV420P,
        width,
        height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .context("create ffmpeg scaler")?;

    let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, width, height);
    for (index, entry) in buffer.iter().enumerate() {
        fill_rgb(&mut rgb, entry.frame())?;
        let mut yuv = ffmpeg::frame::Video::empty();
        scaler
            .run(&rgb, &mut yuv)
            .with_context(|| format!("convert frame {} to YUV", index))?;
        yuv.set_pts(Some(index as i64));
        encoder
            .send_frame(&yuv)
            .with_context(|| format!("encode frame {}", index))?;
        write_packets(&mut encoder, &mut output, stream_index, time_base, stream_time_base)?;
    }

    encoder.send_eof().context("flush MPEG-4 encoder")?;
    write_packets(&mut encoder, &mut output, stream_index, time_base, stream_time_base)?;
    output.write_trailer().context("write AVI index")?;
    Ok(())
}

fn write_packets(
    encoder: &mut ffmpeg::encoder::video::Encoder,
    output: &mut ffmpeg::format::context::Output,
    stream_index: usize,
    encoder_time_base: ffmpeg::Rational,
    stream_time_base: ffmpeg::Rational,
) -> Result<()> {
    let mut packet = ffmpeg::Packet::empty();
    while encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(stream_index);
        packet.rescale_ts(encoder_time_base, stream_time_base);
        packet
            .write_interleaved(output)
            .context("write packet")?;
    }
    Ok(())
}

/// Copy packed RGB rows into a frame whose stride may be padded.
fn fill_rgb(target: &mut ffmpeg::frame::Video, frame: &Frame) -> Result<()> {
    let row_bytes = frame.width() as usize * 3;
    let stride = target.stride(0);
    let data = target.data_mut(0);
    for (row, pixels) in frame.image().as_raw().chunks_exact(row_bytes).enumerate() {
        let start = row * stride;
        data.get_mut(start..start + row_bytes)
            .context("ffmpeg frame row is out of bounds")?
            .copy_from_slice(pixels);
    }
    Ok(())
}

pub(super) fn read_info(path: &Path) -> Result<VideoInfo> {
    ffmpeg::init().context("initialize ffmpeg")?;
    let mut input = ffmpeg::format::input(&path)
        .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;

    let (stream_index, frames, rate, parameters) = {
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("{} has no video track", path.display()))?;
        let rate = match stream.avg_frame_rate() {
            r if r.numerator() > 0 && r.denominator() > 0 => r,
            _ => stream.rate(),
        };
        (stream.index(), stream.frames(), rate, stream.parameters())
    };

    let codec = format!("{:?}", parameters.id());
    let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)
        .context("load video stream parameters")?
        .decoder()
        .video()
        .context("open ffmpeg video decoder")?;

    let packets = input
        .packets()
        .filter(|(stream, _)| stream.index() == stream_index)
        .count() as u64;

    let frame_rate = FrameRate {
        num: u32::try_from(rate.numerator()).unwrap_or(0),
        den: u32::try_from(rate.denominator()).unwrap_or(0),
    };
    Ok(VideoInfo {
        codec,
        width: decoder.width(),
        height: decoder.height(),
        frames: u64::try_from(frames).unwrap_or(0),
        packets,
        frame_rate,
    })
}
