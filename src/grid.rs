//! Coarse grid summaries of a field, for lightweight overlay rendering.
//!
//! `aggregate` partitions a field into `target_w x target_h` cells, takes the mean
//! intensity of each cell normalized to `[0, 1]`, and then rotates the grid 90° counter-
//! clockwise and flips it horizontally so grid coordinates match display orientation.
//! The post-transform is always applied; a published grid is therefore `target_h` wide
//! and `target_w` tall.

use anyhow::Result;
use serde::Serialize;

use crate::error::ensure_arg;
use crate::field::{Field, Intensity};

/// Fixed-size, row-major grid of values in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutputGrid {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl OutputGrid {
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Result<Self> {
        ensure_arg(values.len() == width as usize * height as usize, || {
            format!(
                "grid length mismatch: {}x{} needs {} values, got {}",
                width,
                height,
                width as usize * height as usize,
                values.len()
            )
        })?;
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.values[y as usize * self.width as usize + x as usize]
    }

    /// Multiply every cell by `gain`, clamping to 1.
    pub fn apply_gain(&self, gain: f32) -> Self {
        Self {
            width: self.width,
            height: self.height,
            values: self.values.iter().map(|v| (v * gain).min(1.0)).collect(),
        }
    }

    fn rotate_90_ccw(&self) -> Self {
        let in_cols = self.width as usize;
        let in_rows = self.height as usize;
        let out_cols = in_rows;
        let mut out = vec![0.0f32; self.values.len()];
        for y in 0..in_rows {
            for x in 0..in_cols {
                let x2 = y;
                let y2 = in_cols - 1 - x;
                out[y2 * out_cols + x2] = self.values[y * in_cols + x];
            }
        }
        Self {
            width: self.height,
            height: self.width,
            values: out,
        }
    }

    fn flip_horizontal(&self) -> Self {
        let cols = self.width as usize;
        let mut out = vec![0.0f32; self.values.len()];
        for (y, row) in self.values.chunks(cols.max(1)).enumerate() {
            for (x, &v) in row.iter().enumerate() {
                out[y * cols + (cols - 1 - x)] = v;
            }
        }
        Self {
            width: self.width,
            height: self.height,
            values: out,
        }
    }

    /// Display orientation transform applied to every aggregated grid.
    pub(crate) fn orient_for_display(&self) -> Self {
        self.rotate_90_ccw().flip_horizontal()
    }
}

/// Downsample `field` to a `target_w x target_h` grid of mean intensities.
///
/// Cells are `max(1, dim / target)` pixels; the last row and column absorb the
/// remainder so every pixel lands in exactly one cell. Cells that fall outside a field
/// smaller than the grid hold 0.
pub fn aggregate<T: Intensity>(field: &Field<T>, target_w: u32, target_h: u32) -> Result<OutputGrid> {
    ensure_arg(target_w > 0 && target_h > 0, || {
        format!("grid target must be positive, got {target_w}x{target_h}")
    })?;

    let w = field.width() as usize;
    let h = field.height() as usize;
    let tw = target_w as usize;
    let th = target_h as usize;
    let cell_w = (w / tw).max(1);
    let cell_h = (h / th).max(1);
    let data = field.data();

    let mut values = Vec::with_capacity(tw * th);
    for r in 0..th {
        let y0 = (r * cell_h).min(h);
        let y1 = if r == th - 1 { h } else { (y0 + cell_h).min(h) };
        for c in 0..tw {
            let x0 = (c * cell_w).min(w);
            let x1 = if c == tw - 1 { w } else { (x0 + cell_w).min(w) };
            let count = (x1 - x0) * (y1 - y0);
            if count == 0 {
                values.push(0.0);
                continue;
            }
            let mut sum = 0.0f64;
            for y in y0..y1 {
                for v in &data[y * w + x0..y * w + x1] {
                    sum += v.intensity();
                }
            }
            let mean = (sum / count as f64 / 255.0).clamp(0.0, 1.0);
            values.push(mean as f32);
        }
    }

    Ok(OutputGrid {
        width: target_w,
        height: target_h,
        values,
    }
    .orient_for_display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_invalid_argument;
    use crate::field::{FloatField, GrayField};

    #[test]
    fn rejects_zero_target() {
        let f = GrayField::zeros(8, 8);
        assert!(is_invalid_argument(&aggregate(&f, 0, 4).unwrap_err()));
        assert!(is_invalid_argument(&aggregate(&f, 4, 0).unwrap_err()));
    }

    #[test]
    fn grid_has_exact_length_and_unit_range() -> Result<()> {
        let data: Vec<u8> = (0..37 * 23).map(|i| (i * 7 % 256) as u8).collect();
        let f = GrayField::new(37, 23, data)?;
        for (tw, th) in [(1, 1), (4, 3), (5, 7), (37, 23), (50, 40)] {
            let g = aggregate(&f, tw, th)?;
            assert_eq!(g.values().len(), (tw * th) as usize);
            assert!(g.values().iter().all(|v| (0.0..=1.0).contains(v)));
        }
        Ok(())
    }

    #[test]
    fn remainder_pixels_are_absorbed_by_last_cell() -> Result<()> {
        // 5 columns into 2 cells: cell 0 = col 0..2, cell 1 = cols 2..5.
        let f = GrayField::new(5, 1, vec![255, 255, 0, 0, 255])?;
        let g = aggregate(&f, 2, 1)?;
        // rotated 90 ccw then flipped: a 2x1 grid becomes 1x2, last column on top.
        assert_eq!((g.width(), g.height()), (1, 2));
        assert!((g.get(0, 0) - 1.0 / 3.0).abs() < 1e-6);
        assert!((g.get(0, 1) - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn orientation_maps_corners() -> Result<()> {
        // 2x2 field, single bright quadrant top-right.
        let f = GrayField::new(2, 2, vec![0, 255, 0, 0])?;
        let g = aggregate(&f, 2, 2)?;
        // (x, y) -> rotate ccw -> (y, W-1-x) -> flip -> (H-1-y, W-1-x)
        // top-right (1, 0) lands at (1, 0).
        assert_eq!(g.get(1, 0), 1.0);
        assert_eq!(g.values().iter().filter(|&&v| v > 0.0).count(), 1);
        Ok(())
    }

    #[test]
    fn float_fields_use_unit_intensity() -> Result<()> {
        let f = FloatField::new(4, 4, vec![0.5; 16])?;
        let g = aggregate(&f, 2, 2)?;
        assert!(g.values().iter().all(|v| (v - 0.5).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn apply_gain_clamps() -> Result<()> {
        let g = OutputGrid::new(2, 1, vec![0.2, 0.5])?.apply_gain(3.0);
        assert!((g.values()[0] - 0.6).abs() < 1e-6);
        assert_eq!(g.values()[1], 1.0);
        Ok(())
    }
}
