use anyhow::{anyhow, Result};

use crate::frame::PixelFormat;

/// Expected buffer length for a frame, or an error on overflow.
pub(crate) fn expected_len(width: u32, height: u32, format: PixelFormat) -> Result<usize> {
    let plane = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    let len = match format {
        PixelFormat::Luma8 => Some(plane),
        PixelFormat::Rgba8 => plane.checked_mul(4),
        PixelFormat::Nv12 => {
            // Chroma plane is interleaved UV at half resolution in both axes.
            let chroma = (width as usize).div_ceil(2) * 2 * (height as usize).div_ceil(2);
            plane.checked_add(chroma)
        }
    };
    len.ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// Single-channel intensity for any supported format.
pub(crate) fn to_luma(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Vec<u8> {
    let plane = width as usize * height as usize;
    match format {
        PixelFormat::Luma8 => pixels[..plane].to_vec(),
        // NV12 carries luma as its first plane.
        PixelFormat::Nv12 => pixels[..plane].to_vec(),
        PixelFormat::Rgba8 => pixels
            .chunks_exact(4)
            .map(|px| luma_bt601(px[0], px[1], px[2]))
            .collect(),
    }
}

/// Packed RGB (3 bytes per pixel) for any supported format.
pub(crate) fn to_rgb(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Vec<u8> {
    match format {
        PixelFormat::Luma8 => pixels.iter().flat_map(|&y| [y, y, y]).collect(),
        PixelFormat::Rgba8 => pixels
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
    }
}

/// Packed RGBA with opaque alpha for any supported format.
pub(crate) fn to_rgba(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> Vec<u8> {
    match format {
        PixelFormat::Rgba8 => pixels.to_vec(),
        _ => to_rgb(pixels, width, height, format)
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], 255])
            .collect(),
    }
}

fn luma_bt601(r: u8, g: u8, b: u8) -> u8 {
    clamp_to_u8(0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
}

/// BT.601 YUV -> RGB. Length is validated when the frame is constructed.
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;
    let uv_stride = w.div_ceil(2) * 2;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * uv_stride + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }

    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() -> Result<()> {
        let width = 2;
        let height = 2;
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![128u8; 2];
        let nv12 = [y_plane, uv_plane].concat();
        assert_eq!(nv12.len(), expected_len(width, height, PixelFormat::Nv12)?);

        let rgb = to_rgb(&nv12, width, height, PixelFormat::Nv12);
        assert_eq!(rgb, vec![128u8; 12]);
        Ok(())
    }

    #[test]
    fn nv12_odd_dimensions_round_chroma_up() -> Result<()> {
        // 3x3 luma + 2x2 UV pairs.
        assert_eq!(expected_len(3, 3, PixelFormat::Nv12)?, 9 + 8);
        Ok(())
    }

    #[test]
    fn rgba_luma_uses_bt601_weights() {
        let px = [255u8, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255];
        let luma = to_luma(&px, 3, 1, PixelFormat::Rgba8);
        assert_eq!(luma, vec![76, 150, 29]);
    }

    #[test]
    fn luma_expands_to_opaque_rgba() {
        let rgba = to_rgba(&[7, 9], 2, 1, PixelFormat::Luma8);
        assert_eq!(rgba, vec![7, 7, 7, 255, 9, 9, 9, 255]);
    }
}
