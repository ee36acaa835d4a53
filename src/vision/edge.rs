//! Canny-style edge extraction.
//!
//! Sobel gradients, non-maximum suppression along the quantized gradient direction,
//! then hysteresis: pixels above `high_threshold` seed edges, pixels above
//! `low_threshold` join an edge only when 8-connected to a seed.

use anyhow::Result;
use image::GrayImage;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde::Deserialize;

use crate::error::ensure_arg;
use crate::field::GrayField;
use crate::stage::{FrameProcessor, StageConfig};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EdgeDetectorConfig {
    pub low_threshold: f32,
    pub high_threshold: f32,
    /// Use the Euclidean gradient norm instead of `|dx| + |dy|`.
    pub l2_gradient: bool,
}

impl Default for EdgeDetectorConfig {
    fn default() -> Self {
        Self {
            low_threshold: 60.0,
            high_threshold: 160.0,
            l2_gradient: false,
        }
    }
}

impl StageConfig for EdgeDetectorConfig {
    fn validate(&self) -> Result<()> {
        ensure_arg(self.low_threshold >= 0.0, || {
            format!("edge low threshold must be >= 0, got {}", self.low_threshold)
        })?;
        ensure_arg(self.low_threshold < self.high_threshold, || {
            format!(
                "edge thresholds must satisfy low < high, got {} >= {}",
                self.low_threshold, self.high_threshold
            )
        })
    }
}

/// Stateless edge detector producing a binary 0/255 field.
#[derive(Clone, Copy, Debug, Default)]
pub struct CannyEdgeDetector;

impl CannyEdgeDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, gray: &GrayField, config: &EdgeDetectorConfig) -> GrayField {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        if w == 0 || h == 0 {
            return GrayField::zeros(gray.width(), gray.height());
        }
        let Some(image) = GrayImage::from_raw(gray.width(), gray.height(), gray.data().to_vec())
        else {
            return GrayField::zeros(gray.width(), gray.height());
        };
        let dx: Vec<f32> = horizontal_sobel(&image).iter().map(|&v| v as f32).collect();
        let dy: Vec<f32> = vertical_sobel(&image).iter().map(|&v| v as f32).collect();
        let magnitude: Vec<f32> = dx
            .iter()
            .zip(&dy)
            .map(|(&gx, &gy)| {
                if config.l2_gradient {
                    (gx * gx + gy * gy).sqrt()
                } else {
                    gx.abs() + gy.abs()
                }
            })
            .collect();

        let marks = suppress_non_maxima(&magnitude, &dx, &dy, w, h, config);
        GrayField::from_parts(gray.width(), gray.height(), hysteresis(marks, w, h))
    }
}

impl FrameProcessor for CannyEdgeDetector {
    type Input = GrayField;
    type Output = GrayField;
    type Config = EdgeDetectorConfig;

    fn name(&self) -> &'static str {
        "canny"
    }

    fn process(&mut self, input: &GrayField, config: &EdgeDetectorConfig) -> Result<GrayField> {
        Ok(self.detect(input, config))
    }
}

const NONE: u8 = 0;
const WEAK: u8 = 1;
const STRONG: u8 = 2;

// tan(22.5°) and tan(67.5°)
const TAN_22_5: f32 = 0.414_213_56;
const TAN_67_5: f32 = 2.414_213_6;

fn suppress_non_maxima(
    magnitude: &[f32],
    dx: &[f32],
    dy: &[f32],
    w: usize,
    h: usize,
    config: &EdgeDetectorConfig,
) -> Vec<u8> {
    let mag_at = |x: isize, y: isize| -> f32 {
        if x < 0 || y < 0 || x >= w as isize || y >= h as isize {
            0.0
        } else {
            magnitude[y as usize * w + x as usize]
        }
    };

    let mut marks = vec![NONE; w * h];
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            let m = magnitude[idx];
            if m <= config.low_threshold {
                continue;
            }
            let (gx, gy) = (dx[idx], dy[idx]);
            let (ax, ay) = (gx.abs(), gy.abs());
            let (xi, yi) = (x as isize, y as isize);
            let (a, b) = if ay <= ax * TAN_22_5 {
                (mag_at(xi - 1, yi), mag_at(xi + 1, yi))
            } else if ay >= ax * TAN_67_5 {
                (mag_at(xi, yi - 1), mag_at(xi, yi + 1))
            } else if (gx > 0.0) == (gy > 0.0) {
                (mag_at(xi - 1, yi - 1), mag_at(xi + 1, yi + 1))
            } else {
                (mag_at(xi + 1, yi - 1), mag_at(xi - 1, yi + 1))
            };
            // Asymmetric comparison keeps one pixel of a plateau.
            if m > a && m >= b {
                marks[idx] = if m > config.high_threshold { STRONG } else { WEAK };
            }
        }
    }
    marks
}

fn hysteresis(mut marks: Vec<u8>, w: usize, h: usize) -> Vec<u8> {
    let mut stack: Vec<usize> = marks
        .iter()
        .enumerate()
        .filter(|(_, &m)| m == STRONG)
        .map(|(i, _)| i)
        .collect();

    while let Some(idx) = stack.pop() {
        let (x, y) = ((idx % w) as isize, (idx / w) as isize);
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if marks[n] == WEAK {
                    marks[n] = STRONG;
                    stack.push(n);
                }
            }
        }
    }

    marks
        .into_iter()
        .map(|m| if m == STRONG { 255 } else { 0 })
        .collect()
}
