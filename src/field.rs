//! Single-channel 2D buffers passed between stages.
//!
//! A `Field` owns its samples. Stages borrow input fields and return a freshly owned
//! output field; nothing aliases stage-internal state.
//!
//! - `GrayField`: 8-bit intensity (`0..=255`), the output of grayscale conversion and
//!   edge detection.
//! - `FloatField`: 32-bit float, normally in `0.0..=1.0`, the output of motion and
//!   depth stages.

use anyhow::Result;

use crate::error::ensure_arg;

pub type GrayField = Field<u8>;
pub type FloatField = Field<f32>;

/// Owned single-channel 2D buffer, row-major.
///
/// There is no public mutable access to the samples. Published fields are shared as
/// `Arc<Field<T>>`, so consumers only ever see read-only snapshots.
#[derive(Clone, Debug, PartialEq)]
pub struct Field<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

impl<T: Copy + Default> Field<T> {
    /// Wrap an existing buffer. Fails if `data.len() != width * height`.
    pub fn new(width: u32, height: u32, data: Vec<T>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| crate::PerceptionError::invalid("field dimensions overflow"))?;
        ensure_arg(data.len() == expected, || {
            format!(
                "field length mismatch: {}x{} needs {} samples, got {}",
                width,
                height,
                expected,
                data.len()
            )
        })?;
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Zero-filled field of the given size.
    pub fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![T::default(); width as usize * height as usize],
        }
    }

    /// The explicit "no data" field (0x0).
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            data: Vec::new(),
        }
    }

    pub(crate) fn from_parts(width: u32, height: u32, data: Vec<T>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read-only sample access.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Sample at `(x, y)`. Panics when out of bounds, like slice indexing.
    pub fn get(&self, x: u32, y: u32) -> T {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn same_size<U>(&self, other: &Field<U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn map<U: Copy + Default>(&self, f: impl Fn(T) -> U) -> Field<U> {
        Field {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }
}

impl GrayField {
    /// Multiply every sample by `gain`, rounding and saturating at 255.
    pub fn scaled_clamped(&self, gain: f32) -> GrayField {
        self.map(|v| (v as f32 * gain).round().clamp(0.0, 255.0) as u8)
    }

    /// Samples as floats in the same `0..=255` range.
    pub(crate) fn to_plane(&self) -> Vec<f32> {
        self.data.iter().map(|&v| v as f32).collect()
    }
}

impl FloatField {
    pub fn max_value(&self) -> Option<f32> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .reduce(f32::max)
    }

    pub fn min_value(&self) -> Option<f32> {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .reduce(f32::min)
    }

    pub(crate) fn clamp_unit(&mut self) {
        for v in &mut self.data {
            *v = v.clamp(0.0, 1.0);
        }
    }
}

/// Sample types that can be read as an intensity on the `0..=255` scale.
///
/// Float fields carry unit-range values, so they are scaled up by 255.
pub trait Intensity: Copy + Default {
    fn intensity(self) -> f64;
}

impl Intensity for u8 {
    fn intensity(self) -> f64 {
        self as f64
    }
}

impl Intensity for f32 {
    fn intensity(self) -> f64 {
        self as f64 * 255.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_invalid_argument;

    #[test]
    fn new_rejects_length_mismatch() {
        let err = GrayField::new(4, 4, vec![0; 15]).unwrap_err();
        assert!(is_invalid_argument(&err));
    }

    #[test]
    fn zeros_and_empty() {
        let z = FloatField::zeros(3, 2);
        assert_eq!(z.len(), 6);
        assert!(z.data().iter().all(|&v| v == 0.0));
        assert!(FloatField::empty().is_empty());
    }

    #[test]
    fn scaled_clamped_saturates() -> Result<()> {
        let f = GrayField::new(3, 1, vec![10, 100, 200])?;
        assert_eq!(f.scaled_clamped(3.0).data(), &[30, 255, 255]);
        Ok(())
    }

    #[test]
    fn float_intensity_uses_byte_scale() {
        assert_eq!(1.0f32.intensity(), 255.0);
        assert_eq!(128u8.intensity(), 128.0);
    }
}
