use anyhow::Result;
use serde::Deserialize;

use crate::error::ensure_arg;
use crate::field::{FloatField, GrayField};
use crate::filter::{gaussian_blur_gray, validate_kernel};
use crate::stage::{FrameProcessor, StageConfig};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct FrameDiffConfig {
    pub enable_smoothing: bool,
    /// Odd Gaussian kernel size applied to the thresholded difference.
    pub kernel_size: u32,
    /// Differences at or below this value are zeroed.
    pub min_threshold: u8,
    /// Differences are capped here before normalization.
    pub max_threshold: u8,
}

impl Default for FrameDiffConfig {
    fn default() -> Self {
        Self {
            enable_smoothing: true,
            kernel_size: 5,
            min_threshold: 25,
            max_threshold: 255,
        }
    }
}

impl StageConfig for FrameDiffConfig {
    fn validate(&self) -> Result<()> {
        validate_kernel(self.kernel_size, "frame diff kernel_size")?;
        ensure_arg(self.min_threshold <= self.max_threshold, || {
            format!(
                "frame diff thresholds must satisfy min <= max, got {} > {}",
                self.min_threshold, self.max_threshold
            )
        })
    }
}

/// Two-frame absolute differencing.
#[derive(Debug, Default)]
pub struct FrameDiffDetector {
    previous: Option<GrayField>,
}

impl FrameDiffDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detect(&mut self, gray: &GrayField, config: &FrameDiffConfig) -> Result<FloatField> {
        let previous = match self.previous.take() {
            Some(prev) if prev.same_size(gray) => prev,
            _ => {
                self.previous = Some(gray.clone());
                return Ok(FloatField::zeros(gray.width(), gray.height()));
            }
        };

        let diff: Vec<u8> = gray
            .data()
            .iter()
            .zip(previous.data())
            .map(|(&a, &b)| {
                let d = a.abs_diff(b);
                if d > config.min_threshold {
                    d.min(config.max_threshold)
                } else {
                    0
                }
            })
            .collect();
        let mut diff = GrayField::from_parts(gray.width(), gray.height(), diff);

        if config.enable_smoothing && config.kernel_size > 1 {
            diff = gaussian_blur_gray(&diff, config.kernel_size)?;
        }

        self.previous = Some(gray.clone());
        Ok(diff.map(|v| v as f32 / 255.0))
    }
}

impl FrameProcessor for FrameDiffDetector {
    type Input = GrayField;
    type Output = FloatField;
    type Config = FrameDiffConfig;

    fn name(&self) -> &'static str {
        "frame_diff"
    }

    fn process(&mut self, input: &GrayField, config: &FrameDiffConfig) -> Result<FloatField> {
        self.detect(input, config)
    }

    fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(w: u32, h: u32, v: u8) -> GrayField {
        GrayField::from_parts(w, h, vec![v; (w * h) as usize])
    }

    #[test]
    fn first_call_returns_zeros_of_input_size() -> Result<()> {
        let mut det = FrameDiffDetector::new();
        let out = det.detect(&field(12, 7, 200), &FrameDiffConfig::default())?;
        assert_eq!(out.dimensions(), (12, 7));
        assert!(out.data().iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn identical_frames_are_quiet() -> Result<()> {
        let mut det = FrameDiffDetector::new();
        let cfg = FrameDiffConfig::default();
        let img = GrayField::from_parts(8, 8, (0..64).map(|i| (i * 4) as u8).collect());
        det.detect(&img, &cfg)?;
        let out = det.detect(&img, &cfg)?;
        assert!(out.data().iter().all(|&v| v < 1e-6));
        Ok(())
    }

    #[test]
    fn small_changes_are_thresholded_away() -> Result<()> {
        let mut det = FrameDiffDetector::new();
        let cfg = FrameDiffConfig::default();
        det.detect(&field(4, 4, 100), &cfg)?;
        let out = det.detect(&field(4, 4, 120), &cfg)?;
        assert!(out.data().iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn large_change_is_capped_and_normalized() -> Result<()> {
        let mut det = FrameDiffDetector::new();
        let cfg = FrameDiffConfig {
            enable_smoothing: false,
            max_threshold: 102,
            ..Default::default()
        };
        det.detect(&field(4, 4, 0), &cfg)?;
        let out = det.detect(&field(4, 4, 200), &cfg)?;
        assert!(out.data().iter().all(|&v| (v - 0.4).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn size_change_is_a_cold_start() -> Result<()> {
        let mut det = FrameDiffDetector::new();
        let cfg = FrameDiffConfig::default();
        det.detect(&field(4, 4, 0), &cfg)?;
        let out = det.detect(&field(6, 6, 255), &cfg)?;
        assert_eq!(out.dimensions(), (6, 6));
        assert!(out.data().iter().all(|&v| v == 0.0));
        // The resized frame is now the reference.
        let out = det.detect(&field(6, 6, 255), &cfg)?;
        assert!(out.data().iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn even_kernel_is_rejected_by_validation() {
        let cfg = FrameDiffConfig {
            kernel_size: 4,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
