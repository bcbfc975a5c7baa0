use anyhow::{anyhow, Context, Result};

/// Capture formats a device may hand back after format negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Nv12,
    Mjpeg,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"NV12" => Some(Self::Nv12),
            b"MJPG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = plane_len(width, height, 3)?;
            if pixels.len() != expected {
                return Err(anyhow!(
                    "RGB24 buffer is {} bytes, {}x{} needs {}",
                    pixels.len(),
                    width,
                    height,
                    expected
                ));
            }
            Ok(pixels.to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
        PixelFormat::Mjpeg => mjpeg_to_rgb(pixels, width, height),
    }
}

fn plane_len(width: u32, height: u32, bytes_per_pixel: u32) -> Result<usize> {
    width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(bytes_per_pixel))
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = plane_len(width, height, 2)?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(plane_len(width, height, 3)?);
    for chunk in pixels[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }
    Ok(rgb)
}

/// NV12: full-resolution luma plane, then one interleaved UV pair per 2x2 block.
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
        return Err(anyhow!("NV12 needs even, non-zero dimensions, got {}x{}", width, height));
    }
    let luma_len = plane_len(width, height, 1)?;
    let total = luma_len + luma_len / 2;
    if pixels.len() != total {
        return Err(anyhow!(
            "NV12 buffer is {} bytes, {}x{} needs {}",
            pixels.len(),
            width,
            height,
            total
        ));
    }

    let row = width as usize;
    let (luma, chroma) = pixels.split_at(luma_len);
    let mut rgb = Vec::with_capacity(luma_len * 3);
    for (line, luma_row) in luma.chunks_exact(row).enumerate() {
        let chroma_row = &chroma[(line / 2) * row..];
        for (col, &y) in luma_row.iter().enumerate() {
            let pair = (col / 2) * 2;
            let u = chroma_row[pair] as f32 - 128.0;
            let v = chroma_row[pair + 1] as f32 - 128.0;
            rgb.extend_from_slice(&yuv_to_rgb(y as f32, u, v));
        }
    }
    Ok(rgb)
}

fn mjpeg_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(pixels, image::ImageFormat::Jpeg)
        .context("decode MJPEG frame")?
        .to_rgb8();
    if decoded.width() != width || decoded.height() != height {
        return Err(anyhow!(
            "MJPEG frame is {}x{}, negotiated {}x{}",
            decoded.width(),
            decoded.height(),
            width,
            height
        ));
    }
    Ok(decoded.into_raw())
}

fn yuv_to_rgb(y: f32, u: f32, v: f32) -> [u8; 3] {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_neutral_chroma_is_gray() -> Result<()> {
        // 2x2 luma block, one UV pair.
        let nv12 = [10u8, 20, 30, 40, 128, 128];
        let rgb = normalize_to_rgb(&nv12, 2, 2, PixelFormat::Nv12)?;
        assert_eq!(
            rgb,
            vec![10, 10, 10, 20, 20, 20, 30, 30, 30, 40, 40, 40]
        );
        assert!(normalize_to_rgb(&nv12[..5], 2, 2, PixelFormat::Nv12).is_err());
        Ok(())
    }

    #[test]
    fn yuyv_conversion_expands_pairs() -> Result<()> {
        // Two pixels sharing neutral chroma.
        let yuyv = [16u8, 128, 235, 128];
        let rgb = normalize_to_rgb(&yuyv, 2, 1, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![16, 16, 16, 235, 235, 235]);
        assert!(normalize_to_rgb(&yuyv[..2], 2, 1, PixelFormat::Yuyv).is_err());
        Ok(())
    }

    #[test]
    fn rgb_is_copied_when_the_length_fits() -> Result<()> {
        let pixels: Vec<u8> = (0..9).collect();
        assert_eq!(normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24)?, pixels);
        assert!(normalize_to_rgb(&pixels, 2, 3, PixelFormat::Rgb24).is_err());
        Ok(())
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"H264"), None);
    }
}
