//! Plane-level image kernels shared by the stages.
//!
//! Planes are row-major `f32` buffers wrapped as `Luma<f32>` images so the
//! convolutions come from `imageproc`. All borders replicate the edge sample.

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use imageproc::filter::{filter3x3, separable_filter_equal};
use imageproc::gradients::{HORIZONTAL_SCHARR, HORIZONTAL_SOBEL, VERTICAL_SCHARR, VERTICAL_SOBEL};

use crate::error::ensure_arg;
use crate::field::{FloatField, GrayField};

type Plane = ImageBuffer<Luma<f32>, Vec<f32>>;

fn as_image(plane: &[f32], width: usize, height: usize) -> Option<Plane> {
    ImageBuffer::from_raw(width as u32, height as u32, plane.to_vec())
}

/// Run `op` over the plane; a buffer that does not match its dimensions yields zeros.
fn with_image(plane: &[f32], width: usize, height: usize, op: impl FnOnce(&Plane) -> Plane) -> Vec<f32> {
    match as_image(plane, width, height) {
        Some(img) => op(&img).into_raw(),
        None => vec![0.0; width * height],
    }
}

/// Odd, positive kernel sizes only.
pub(crate) fn validate_kernel(ksize: u32, what: &str) -> Result<()> {
    ensure_arg(ksize >= 1 && ksize % 2 == 1, || {
        format!("{what} must be odd and >= 1, got {ksize}")
    })
}

/// Normalized 1D Gaussian taps with sigma derived from the size.
pub(crate) fn gaussian_kernel(ksize: u32) -> Vec<f32> {
    let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let half = (ksize / 2) as i32;
    let denom = 2.0 * sigma * sigma;
    let mut taps: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum: f32 = taps.iter().sum();
    for t in &mut taps {
        *t /= sum;
    }
    taps
}

/// Gaussian blur of a float plane. `ksize <= 1` returns a copy.
pub(crate) fn gaussian_blur_plane(plane: &[f32], width: usize, height: usize, ksize: u32) -> Vec<f32> {
    if ksize <= 1 || width == 0 || height == 0 {
        return plane.to_vec();
    }
    let taps = gaussian_kernel(ksize);
    with_image(plane, width, height, |img| separable_filter_equal(img, &taps))
}

/// Gaussian blur of an 8-bit field, rounded back to bytes.
pub(crate) fn gaussian_blur_gray(field: &GrayField, ksize: u32) -> Result<GrayField> {
    validate_kernel(ksize, "blur kernel")?;
    let (w, h) = field.dimensions();
    let out = gaussian_blur_plane(&field.to_plane(), w as usize, h as usize, ksize);
    Ok(GrayField::from_parts(
        w,
        h,
        out.into_iter()
            .map(|v| v.round().clamp(0.0, 255.0) as u8)
            .collect(),
    ))
}

/// Un-normalized box sum over a `ksize x ksize` window.
pub(crate) fn box_sum_plane(plane: &[f32], width: usize, height: usize, ksize: u32) -> Vec<f32> {
    let taps = vec![1.0f32; ksize.max(1) as usize];
    with_image(plane, width, height, |img| separable_filter_equal(img, &taps))
}

fn derivatives(plane: &[f32], width: usize, height: usize, kx: &[i32; 9], ky: &[i32; 9]) -> (Vec<f32>, Vec<f32>) {
    let kx = kx.map(|v| v as f32);
    let ky = ky.map(|v| v as f32);
    let dx = with_image(plane, width, height, |img| {
        filter3x3::<Luma<f32>, f32, f32>(img, &kx)
    });
    let dy = with_image(plane, width, height, |img| {
        filter3x3::<Luma<f32>, f32, f32>(img, &ky)
    });
    (dx, dy)
}

/// 3x3 Sobel derivatives `(dx, dy)`.
pub(crate) fn sobel_3x3(plane: &[f32], width: usize, height: usize) -> (Vec<f32>, Vec<f32>) {
    derivatives(plane, width, height, &HORIZONTAL_SOBEL, &VERTICAL_SOBEL)
}

/// 3x3 Scharr derivatives scaled to intensity units per pixel.
pub(crate) fn scharr_3x3(plane: &[f32], width: usize, height: usize) -> (Vec<f32>, Vec<f32>) {
    let (mut dx, mut dy) = derivatives(plane, width, height, &HORIZONTAL_SCHARR, &VERTICAL_SCHARR);
    for v in dx.iter_mut().chain(dy.iter_mut()) {
        *v /= 32.0;
    }
    (dx, dy)
}

/// Bilinear sample with clamped coordinates.
#[inline]
pub(crate) fn sample_bilinear(plane: &[f32], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let top = plane[y0 * width + x0] * (1.0 - fx) + plane[y0 * width + x1] * fx;
    let bottom = plane[y1 * width + x0] * (1.0 - fx) + plane[y1 * width + x1] * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Bilinear (triangle filter) resize of a field whose values lie in `[0, 1]`.
pub(crate) fn resize_unit(field: &FloatField, width: u32, height: u32) -> FloatField {
    if field.width() == 0 || field.height() == 0 || width == 0 || height == 0 {
        return FloatField::zeros(width, height);
    }
    if field.dimensions() == (width, height) {
        return field.clone();
    }
    let Some(img) = Plane::from_raw(field.width(), field.height(), field.data().to_vec()) else {
        return FloatField::zeros(width, height);
    };
    let out = imageops::resize(&img, width, height, FilterType::Triangle);
    FloatField::from_parts(width, height, out.into_raw())
}

/// Halve a plane with a 5-tap binomial filter. Output is `ceil(w/2) x ceil(h/2)`.
pub(crate) fn pyr_down(plane: &[f32], width: usize, height: usize) -> (Vec<f32>, usize, usize) {
    const TAPS: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];
    let blurred = with_image(plane, width, height, |img| separable_filter_equal(img, &TAPS));
    let ow = width.div_ceil(2);
    let oh = height.div_ceil(2);
    let mut out = Vec::with_capacity(ow * oh);
    for y in 0..oh {
        for x in 0..ow {
            out.push(blurred[(2 * y) * width + 2 * x]);
        }
    }
    (out, ow, oh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_kernel_is_normalized_and_symmetric() {
        let k = gaussian_kernel(5);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((k[0] - k[4]).abs() < 1e-6);
        assert!(k[2] > k[1]);
    }

    #[test]
    fn blur_preserves_constant_plane() {
        let b = gaussian_blur_plane(&[0.4; 35], 7, 5, 5);
        assert_eq!(b.len(), 35);
        assert!(b.iter().all(|v| (v - 0.4).abs() < 1e-5));
    }

    #[test]
    fn blur_spreads_an_impulse() {
        let mut plane = vec![0.0f32; 49];
        plane[24] = 1.0;
        let b = gaussian_blur_plane(&plane, 7, 7, 3);
        assert!(b[24] < 1.0);
        assert!(b[23] > 0.0 && (b[23] - b[25]).abs() < 1e-6);
        let sum: f32 = b.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn gray_blur_rejects_even_kernel() {
        let f = GrayField::from_parts(4, 4, vec![0; 16]);
        assert!(gaussian_blur_gray(&f, 4).is_err());
        assert!(gaussian_blur_gray(&f, 0).is_err());
        assert!(gaussian_blur_gray(&f, 3).is_ok());
    }

    #[test]
    fn box_sum_counts_window() {
        let s = box_sum_plane(&[1.0; 25], 5, 5, 3);
        assert!(s.iter().all(|v| (v - 9.0).abs() < 1e-5));
    }

    #[test]
    fn sobel_responds_to_vertical_step() {
        let w = 6;
        let h = 3;
        let plane: Vec<f32> = (0..w * h)
            .map(|i| if i % w >= 3 { 100.0 } else { 0.0 })
            .collect();
        let (dx, dy) = sobel_3x3(&plane, w, h);
        assert!((dx[w + 2] - 400.0).abs() < 1e-3);
        assert!(dy.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn scharr_is_scaled_to_unit_slope() {
        let w = 5;
        let plane: Vec<f32> = (0..w * w).map(|i| (i % w) as f32).collect();
        let (dx, dy) = scharr_3x3(&plane, w, w);
        assert!((dx[2 * w + 2] - 1.0).abs() < 1e-5);
        assert!(dy[2 * w + 2].abs() < 1e-6);
    }

    #[test]
    fn resize_constant_is_constant() {
        let f = FloatField::from_parts(4, 4, vec![0.25; 16]);
        let r = resize_unit(&f, 9, 7);
        assert_eq!(r.dimensions(), (9, 7));
        assert!(r.data().iter().all(|v| (v - 0.25).abs() < 1e-5));
    }

    #[test]
    fn resize_of_empty_field_is_zeros() {
        let r = resize_unit(&FloatField::zeros(0, 0), 3, 2);
        assert_eq!(r.dimensions(), (3, 2));
        assert!(r.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn pyr_down_halves_dimensions() {
        let plane = vec![1.0f32; 9 * 5];
        let (out, w, h) = pyr_down(&plane, 9, 5);
        assert_eq!((w, h), (5, 3));
        assert!(out.iter().all(|v| (v - 1.0).abs() < 1e-5));
    }
}
