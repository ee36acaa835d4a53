//! Monocular depth estimation around an opaque inference backend.
//!
//! The estimator resizes the color frame to the model resolution, normalizes it,
//! runs the backend, then maps the raw output into `[0, 1]` using an exponential
//! moving average of the output range so the scale does not jump between frames.

mod backend;
pub mod backends;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use serde::Deserialize;

use crate::error::{ensure_arg, PerceptionError};
use crate::field::FloatField;
use crate::filter::{gaussian_blur_plane, resize_unit, validate_kernel};
use crate::frame::Frame;
use crate::stage::{FrameProcessor, StageConfig};

pub use backend::{DepthBackend, TensorShape};
pub use backends::{ConstantDepthBackend, FnDepthBackend, LumaDepthBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractDepthBackend;

/// Input normalization expected by the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// `(v - mean) / std` per channel.
    ImageNet,
    /// `v * 2 - 1`.
    MinusOneToOne,
    /// `v`.
    ZeroToOne,
}

/// What `estimate` returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthOutputKind {
    /// Un-normalized tensor at model resolution.
    Raw,
    /// `[0, 1]` field at frame resolution.
    Normalized,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    pub input_width: u32,
    pub input_height: u32,
    pub normalization: NormalizationMode,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// EMA weight of the current frame's range, in `(0, 1]`.
    pub ema_alpha: f32,
    pub invert: bool,
    /// Contrast curve exponent; `1.0` disables it.
    pub gamma: f32,
    /// Odd Gaussian kernel; `0` disables smoothing.
    pub blur_kernel: u32,
    pub output: DepthOutputKind,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            input_width: 256,
            input_height: 256,
            normalization: NormalizationMode::ImageNet,
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
            ema_alpha: 0.05,
            invert: false,
            gamma: 0.7,
            blur_kernel: 3,
            output: DepthOutputKind::Normalized,
        }
    }
}

impl StageConfig for DepthConfig {
    fn validate(&self) -> Result<()> {
        ensure_arg(self.input_width > 0 && self.input_height > 0, || {
            format!(
                "depth input size must be positive, got {}x{}",
                self.input_width, self.input_height
            )
        })?;
        ensure_arg(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0, || {
            format!("depth ema_alpha must be in (0, 1], got {}", self.ema_alpha)
        })?;
        ensure_arg(self.gamma > 0.0 && self.gamma.is_finite(), || {
            format!("depth gamma must be > 0, got {}", self.gamma)
        })?;
        ensure_arg(self.std.iter().all(|s| *s > 0.0), || {
            "depth std values must be > 0".to_string()
        })?;
        if self.blur_kernel > 0 {
            validate_kernel(self.blur_kernel, "depth blur_kernel")?;
        }
        Ok(())
    }
}

/// EMA-normalized depth stage owning its inference backend.
pub struct DepthEstimator {
    backend: Box<dyn DepthBackend>,
    ema: Option<(f64, f64)>,
    last_raw: Option<FloatField>,
}

impl DepthEstimator {
    /// Wrap a backend and run its warm-up. A failing warm-up is a construction error.
    pub fn new(backend: impl DepthBackend + 'static) -> Result<Self> {
        let mut backend: Box<dyn DepthBackend> = Box::new(backend);
        backend
            .warm_up()
            .map_err(|e| PerceptionError::Backend(format!("{}: {e:#}", backend.name())))?;
        log::info!("depth backend '{}' ready", backend.name());
        Ok(Self {
            backend,
            ema: None,
            last_raw: None,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Current `(min, max)` EMA of the raw output range, once seeded.
    pub fn ema_range(&self) -> Option<(f64, f64)> {
        self.ema
    }

    /// Raw model output from the most recent successful inference.
    pub fn last_raw(&self) -> Option<&FloatField> {
        self.last_raw.as_ref()
    }

    pub fn estimate(&mut self, frame: &Frame, config: &DepthConfig) -> Result<FloatField> {
        let (fw, fh) = (frame.width(), frame.height());
        if frame.is_empty() {
            return Ok(FloatField::zeros(fw, fh));
        }

        let shape = TensorShape::rgb(config.input_width, config.input_height);
        let input = build_input(frame, config)?;
        let raw = self
            .backend
            .infer(&input, shape)
            .with_context(|| format!("depth backend '{}' failed", self.backend.name()))?;

        let side = (raw.len() as f64).sqrt().round() as usize;
        if side == 0 || side * side != raw.len() {
            log::warn!(
                "depth output of {} values is not a square image; publishing zeros",
                raw.len()
            );
            return Ok(FloatField::zeros(fw, fh));
        }
        if side != config.input_width as usize || side != config.input_height as usize {
            log::warn!(
                "depth output {side}x{side} differs from model input {}x{}",
                config.input_width,
                config.input_height
            );
        }
        let raw = FloatField::from_parts(side as u32, side as u32, raw);

        let (lo, hi) = self.update_ema(&raw, config.ema_alpha);
        let hi = hi.max(lo + 1e-6);
        let scale = 1.0 / (hi - lo);
        let mut unit: Vec<f32> = raw
            .data()
            .iter()
            .map(|&v| {
                let n = ((v as f64 - lo) * scale).clamp(0.0, 1.0) as f32;
                if config.invert {
                    1.0 - n
                } else {
                    n
                }
            })
            .collect();
        if config.blur_kernel > 1 {
            unit = gaussian_blur_plane(&unit, side, side, config.blur_kernel);
        }
        if (config.gamma - 1.0).abs() > f32::EPSILON {
            for v in &mut unit {
                *v = v.max(0.0).powf(config.gamma);
            }
        }
        let unit = FloatField::from_parts(side as u32, side as u32, unit);

        let out = match config.output {
            DepthOutputKind::Raw => raw.clone(),
            DepthOutputKind::Normalized => resize_unit(&unit, fw, fh),
        };
        self.last_raw = Some(raw);
        Ok(out)
    }

    fn update_ema(&mut self, raw: &FloatField, alpha: f32) -> (f64, f64) {
        let cur_min = raw.min_value().unwrap_or(0.0) as f64;
        let cur_max = raw.max_value().unwrap_or(0.0) as f64;
        let a = alpha as f64;
        let next = match self.ema {
            None => (cur_min, cur_max),
            Some((lo, hi)) => ((1.0 - a) * lo + a * cur_min, (1.0 - a) * hi + a * cur_max),
        };
        self.ema = Some(next);
        next
    }
}

impl FrameProcessor for DepthEstimator {
    type Input = Frame;
    type Output = FloatField;
    type Config = DepthConfig;

    fn name(&self) -> &'static str {
        "depth"
    }

    fn process(&mut self, input: &Frame, config: &DepthConfig) -> Result<FloatField> {
        self.estimate(input, config)
    }

    fn reset(&mut self) {
        self.ema = None;
        self.last_raw = None;
    }
}

/// Resize to model resolution and pack normalized NHWC floats.
fn build_input(frame: &Frame, config: &DepthConfig) -> Result<Vec<f32>> {
    let rgb = frame.to_rgb_image()?;
    let resized = imageops::resize(
        &rgb,
        config.input_width,
        config.input_height,
        FilterType::Triangle,
    );
    let mut input = Vec::with_capacity(resized.as_raw().len());
    for px in resized.pixels() {
        for (c, &byte) in px.0.iter().enumerate() {
            let v = byte as f32 / 255.0;
            input.push(match config.normalization {
                NormalizationMode::ImageNet => (v - config.mean[c]) / config.std[c],
                NormalizationMode::MinusOneToOne => v * 2.0 - 1.0,
                NormalizationMode::ZeroToOne => v,
            });
        }
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn rgba_frame(w: u32, h: u32, v: u8) -> Frame {
        Frame::new(vec![v; (w * h * 4) as usize], w, h, PixelFormat::Rgba8).unwrap()
    }

    fn ramp_backend() -> impl DepthBackend {
        FnDepthBackend::new("ramp", |_input: &[f32], shape: TensorShape| {
            let n = (shape.width * shape.height) as usize;
            Ok((0..n).map(|i| 2.0 + 6.0 * i as f32 / (n - 1) as f32).collect())
        })
    }

    #[test]
    fn normalized_output_matches_frame_size_and_range() -> Result<()> {
        let mut est = DepthEstimator::new(ramp_backend())?;
        let cfg = DepthConfig {
            input_width: 16,
            input_height: 16,
            ..Default::default()
        };
        let out = est.estimate(&rgba_frame(40, 30, 90), &cfg)?;
        assert_eq!(out.dimensions(), (40, 30));
        assert!(out.data().iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(est.last_raw().map(|r| r.dimensions()), Some((16, 16)));
        Ok(())
    }

    #[test]
    fn raw_output_is_model_resolution() -> Result<()> {
        let mut est = DepthEstimator::new(ramp_backend())?;
        let cfg = DepthConfig {
            input_width: 8,
            input_height: 8,
            output: DepthOutputKind::Raw,
            ..Default::default()
        };
        let out = est.estimate(&rgba_frame(40, 30, 90), &cfg)?;
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(out.max_value(), Some(8.0));
        Ok(())
    }

    #[test]
    fn ema_converges_to_constant_range() -> Result<()> {
        let mut est = DepthEstimator::new(ramp_backend())?;
        let cfg = DepthConfig {
            input_width: 8,
            input_height: 8,
            ema_alpha: 0.5,
            ..Default::default()
        };
        // Seed the EMA away from the steady range.
        est.ema = Some((-10.0, 50.0));
        let mut last_err = f64::MAX;
        for _ in 0..20 {
            est.estimate(&rgba_frame(8, 8, 10), &cfg)?;
            let (lo, hi) = est.ema_range().unwrap_or((0.0, 0.0));
            let err = (lo - 2.0).abs() + (hi - 8.0).abs();
            assert!(err <= last_err);
            last_err = err;
        }
        assert!(last_err < 1e-3, "ema did not converge: {last_err}");
        Ok(())
    }

    #[test]
    fn first_call_seeds_ema_directly() -> Result<()> {
        let mut est = DepthEstimator::new(ramp_backend())?;
        let cfg = DepthConfig {
            input_width: 8,
            input_height: 8,
            ..Default::default()
        };
        est.estimate(&rgba_frame(8, 8, 10), &cfg)?;
        let (lo, hi) = est.ema_range().unwrap_or_default();
        assert!((lo - 2.0).abs() < 1e-6 && (hi - 8.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn non_square_output_degrades_to_zeros() -> Result<()> {
        let mut est = DepthEstimator::new(ConstantDepthBackend::new(1.0).with_output_len(10))?;
        let out = est.estimate(&rgba_frame(12, 9, 10), &DepthConfig::default())?;
        assert_eq!(out.dimensions(), (12, 9));
        assert!(out.data().iter().all(|&v| v == 0.0));
        assert!(est.ema_range().is_none());
        Ok(())
    }

    #[test]
    fn constant_tensor_is_uniform() -> Result<()> {
        let mut est = DepthEstimator::new(ConstantDepthBackend::new(3.0))?;
        let cfg = DepthConfig {
            input_width: 8,
            input_height: 8,
            ..Default::default()
        };
        let out = est.estimate(&rgba_frame(16, 16, 10), &cfg)?;
        let first = out.data()[0];
        assert!(out.data().iter().all(|&v| (v - first).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn invert_flips_the_ramp() -> Result<()> {
        let cfg = DepthConfig {
            input_width: 8,
            input_height: 8,
            blur_kernel: 0,
            gamma: 1.0,
            output: DepthOutputKind::Normalized,
            ..Default::default()
        };
        let inverted = DepthConfig {
            invert: true,
            ..cfg.clone()
        };
        let plain = DepthEstimator::new(ramp_backend())?.estimate(&rgba_frame(8, 8, 10), &cfg)?;
        let flipped = DepthEstimator::new(ramp_backend())?.estimate(&rgba_frame(8, 8, 10), &inverted)?;
        for (a, b) in plain.data().iter().zip(flipped.data()) {
            assert!((a + b - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn failing_warm_up_is_a_backend_error() {
        struct Broken;
        impl DepthBackend for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn infer(&mut self, _: &[f32], _: TensorShape) -> Result<Vec<f32>> {
                Ok(Vec::new())
            }
            fn warm_up(&mut self) -> Result<()> {
                Err(anyhow::anyhow!("model missing"))
            }
        }
        let err = DepthEstimator::new(Broken).err().map(|e| e.to_string());
        assert!(err.is_some_and(|m| m.contains("model missing")));
    }

    #[test]
    fn imagenet_normalization_centres_channels() -> Result<()> {
        let frame = rgba_frame(4, 4, 255);
        let cfg = DepthConfig {
            input_width: 2,
            input_height: 2,
            ..Default::default()
        };
        let input = build_input(&frame, &cfg)?;
        assert_eq!(input.len(), 12);
        assert!((input[0] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        let zero_one = build_input(
            &frame,
            &DepthConfig {
                normalization: NormalizationMode::ZeroToOne,
                ..cfg
            },
        )?;
        assert!(zero_one.iter().all(|&v| (v - 1.0).abs() < 1e-6));
        Ok(())
    }
}
