//! Sparse-feature motion energy.
//!
//! Corners are detected on the previous frame, tracked into the current frame with
//! pyramidal Lucas-Kanade, and each moving point writes its displacement magnitude at
//! its previous location. The sparse result is normalized and blurred into a
//! continuous-looking field. Tracked points are carried across frames and refreshed
//! every `refresh_every_n` frames or when too few survive.

use anyhow::Result;
use serde::Deserialize;

use crate::error::ensure_arg;
use crate::field::{FloatField, GrayField};
use crate::filter::{gaussian_blur_plane, validate_kernel};
use crate::stage::{FrameProcessor, StageConfig};
use crate::vision::features::{detect_corners, CornerParams, Point2};
use crate::vision::lk::{track, LkParams, Pyramid};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct OpticalFlowConfig {
    // corner detection
    pub max_corners: u32,
    pub quality_level: f32,
    pub min_distance: f32,
    pub block_size: u32,
    pub use_harris: bool,
    pub k: f32,

    // tracking
    pub win_size: u32,
    pub max_level: u32,
    pub max_iterations: u32,
    pub epsilon: f32,
    pub min_eig_threshold: f32,

    // bookkeeping
    pub refresh_every_n: u32,
    pub min_tracked_points: u32,
    pub min_pixel_motion: f32,

    /// Normalization scale in pixels. `0` normalizes by the per-frame maximum instead.
    pub fixed_norm_max: f32,
    pub splat_kernel: u32,
}

impl Default for OpticalFlowConfig {
    fn default() -> Self {
        Self {
            max_corners: 600,
            quality_level: 0.01,
            min_distance: 8.0,
            block_size: 7,
            use_harris: false,
            k: 0.04,
            win_size: 21,
            max_level: 3,
            max_iterations: 20,
            epsilon: 0.03,
            min_eig_threshold: 1e-4,
            refresh_every_n: 8,
            min_tracked_points: 120,
            min_pixel_motion: 1.0,
            fixed_norm_max: 12.0,
            splat_kernel: 15,
        }
    }
}

impl StageConfig for OpticalFlowConfig {
    fn validate(&self) -> Result<()> {
        ensure_arg(self.quality_level > 0.0 && self.quality_level <= 1.0, || {
            format!("quality_level must be in (0, 1], got {}", self.quality_level)
        })?;
        ensure_arg(self.min_distance >= 0.0, || {
            format!("min_distance must be >= 0, got {}", self.min_distance)
        })?;
        validate_kernel(self.block_size, "block_size")?;
        ensure_arg(self.win_size >= 3 && self.win_size % 2 == 1, || {
            format!("win_size must be odd and >= 3, got {}", self.win_size)
        })?;
        ensure_arg(self.max_iterations > 0 && self.epsilon > 0.0, || {
            "tracking needs max_iterations > 0 and epsilon > 0".to_string()
        })?;
        ensure_arg(self.refresh_every_n > 0, || "refresh_every_n must be > 0".to_string())?;
        ensure_arg(self.min_pixel_motion >= 0.0 && self.fixed_norm_max >= 0.0, || {
            "min_pixel_motion and fixed_norm_max must be >= 0".to_string()
        })?;
        validate_kernel(self.splat_kernel, "splat_kernel")
    }
}

impl OpticalFlowConfig {
    fn corner_params(&self) -> CornerParams {
        CornerParams {
            max_corners: self.max_corners as usize,
            quality_level: self.quality_level,
            min_distance: self.min_distance,
            block_size: self.block_size,
            use_harris: self.use_harris,
            k: self.k,
        }
    }

    fn lk_params(&self) -> LkParams {
        LkParams {
            win_size: self.win_size,
            max_level: self.max_level,
            max_iterations: self.max_iterations,
            epsilon: self.epsilon,
            min_eig_threshold: self.min_eig_threshold,
        }
    }
}

/// Tracker state carried between frames.
#[derive(Debug, Default)]
struct TrackState {
    previous: Option<GrayField>,
    points: Vec<Point2>,
    frame_counter: u64,
}

#[derive(Debug, Default)]
pub struct OpticalFlowDetector {
    state: TrackState,
}

impl OpticalFlowDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points that will be tracked on the next call.
    pub fn tracked_points(&self) -> &[Point2] {
        &self.state.points
    }

    pub fn detect(&mut self, gray: &GrayField, config: &OpticalFlowConfig) -> Result<FloatField> {
        let (width, height) = gray.dimensions();
        if gray.is_empty() {
            return Ok(FloatField::empty());
        }
        let previous = match self.state.previous.take() {
            Some(prev) if prev.same_size(gray) => prev,
            _ => {
                self.state = TrackState {
                    previous: Some(gray.clone()),
                    ..TrackState::default()
                };
                return Ok(FloatField::zeros(width, height));
            }
        };

        let (w, h) = (width as usize, height as usize);
        let prev_plane = unit_plane(&previous);
        self.state.frame_counter += 1;
        if self.state.points.is_empty()
            || self.state.frame_counter % u64::from(config.refresh_every_n) == 0
        {
            self.state.points = detect_corners(&prev_plane, w, h, &config.corner_params());
            log::debug!("optical flow re-detected {} corners", self.state.points.len());
        }
        if self.state.points.is_empty() {
            self.state.previous = Some(gray.clone());
            return Ok(FloatField::zeros(width, height));
        }

        let prev_pyr = Pyramid::build(prev_plane, w, h, config.max_level);
        let next_pyr = Pyramid::build(unit_plane(gray), w, h, config.max_level);
        let tracked = track(&prev_pyr, &next_pyr, &self.state.points, &config.lk_params());

        let mut energy = vec![0.0f32; w * h];
        let mut max_mag = 1e-6f32;
        let mut survivors = Vec::new();
        for t in tracked.iter().filter(|t| t.ok) {
            let mag = t.displacement();
            if mag < config.min_pixel_motion {
                continue;
            }
            deposit(&mut energy, w, h, t.from, mag);
            max_mag = max_mag.max(mag);
            survivors.push(t.to);
        }

        let denom = if config.fixed_norm_max > 0.0 {
            config.fixed_norm_max
        } else {
            max_mag
        };
        if denom > 1e-6 {
            for v in &mut energy {
                *v /= denom;
            }
        }

        let mut field = if survivors.is_empty() {
            FloatField::from_parts(width, height, energy)
        } else {
            let splat = gaussian_blur_plane(&energy, w, h, config.splat_kernel);
            FloatField::from_parts(width, height, splat)
        };
        field.clamp_unit();

        if survivors.len() < config.min_tracked_points as usize {
            survivors.clear();
        }
        self.state.points = survivors;
        self.state.previous = Some(gray.clone());
        Ok(field)
    }
}

impl FrameProcessor for OpticalFlowDetector {
    type Input = GrayField;
    type Output = FloatField;
    type Config = OpticalFlowConfig;

    fn name(&self) -> &'static str {
        "optical_flow"
    }

    fn process(&mut self, input: &GrayField, config: &OpticalFlowConfig) -> Result<FloatField> {
        self.detect(input, config)
    }

    fn reset(&mut self) {
        self.state = TrackState::default();
    }
}

fn unit_plane(gray: &GrayField) -> Vec<f32> {
    gray.data().iter().map(|&v| v as f32 / 255.0).collect()
}

/// Write `mag` into the pixel containing `p`. Later points overwrite earlier ones.
fn deposit(energy: &mut [f32], width: usize, height: usize, p: Point2, mag: f32) {
    let x = (p.x.max(0.0) as usize).min(width - 1);
    let y = (p.y.max(0.0) as usize).min(height - 1);
    energy[y * width + x] = mag;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs(w: u32, h: u32, dx: f32) -> GrayField {
        let mut data = Vec::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                let fx = x as f32 - dx;
                let fy = y as f32;
                let v = 128.0 + 60.0 * (fx / 5.0).sin() * (fy / 6.0).cos();
                data.push(v.round() as u8);
            }
        }
        GrayField::from_parts(w, h, data)
    }

    #[test]
    fn deposit_truncates_and_last_point_wins() {
        let mut energy = vec![0.0f32; 16];
        deposit(&mut energy, 4, 4, Point2 { x: 1.9, y: 2.7 }, 5.0);
        assert_eq!(energy[2 * 4 + 1], 5.0);
        deposit(&mut energy, 4, 4, Point2 { x: 1.2, y: 2.1 }, 3.0);
        assert_eq!(energy[2 * 4 + 1], 3.0);
        deposit(&mut energy, 4, 4, Point2 { x: -0.5, y: 9.0 }, 1.0);
        assert_eq!(energy[3 * 4], 1.0);
        assert_eq!(energy.iter().filter(|&&v| v != 0.0).count(), 2);
    }

    #[test]
    fn cold_start_returns_zeros() -> Result<()> {
        let mut det = OpticalFlowDetector::new();
        let out = det.detect(&blobs(64, 48, 0.0), &OpticalFlowConfig::default())?;
        assert_eq!(out.dimensions(), (64, 48));
        assert!(out.data().iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn identical_frames_produce_no_energy() -> Result<()> {
        let mut det = OpticalFlowDetector::new();
        let cfg = OpticalFlowConfig::default();
        let img = blobs(64, 64, 0.0);
        det.detect(&img, &cfg)?;
        for _ in 0..3 {
            let out = det.detect(&img, &cfg)?;
            assert!(out.data().iter().all(|&v| v == 0.0));
        }
        Ok(())
    }

    #[test]
    fn translation_produces_bounded_energy() -> Result<()> {
        let mut det = OpticalFlowDetector::new();
        let cfg = OpticalFlowConfig {
            min_tracked_points: 1,
            max_level: 1,
            ..Default::default()
        };
        det.detect(&blobs(64, 64, 0.0), &cfg)?;
        let out = det.detect(&blobs(64, 64, 3.0), &cfg)?;
        assert!(out.max_value().unwrap_or(0.0) > 0.0);
        assert!(out.data().iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(!det.tracked_points().is_empty());
        Ok(())
    }

    #[test]
    fn too_few_survivors_force_redetection() -> Result<()> {
        let mut det = OpticalFlowDetector::new();
        let cfg = OpticalFlowConfig {
            min_tracked_points: 100_000,
            ..Default::default()
        };
        det.detect(&blobs(64, 64, 0.0), &cfg)?;
        det.detect(&blobs(64, 64, 2.0), &cfg)?;
        assert!(det.tracked_points().is_empty());
        Ok(())
    }

    #[test]
    fn size_change_resets_state() -> Result<()> {
        let mut det = OpticalFlowDetector::new();
        let cfg = OpticalFlowConfig {
            min_tracked_points: 1,
            ..Default::default()
        };
        det.detect(&blobs(64, 64, 0.0), &cfg)?;
        det.detect(&blobs(64, 64, 2.0), &cfg)?;
        let out = det.detect(&blobs(32, 32, 0.0), &cfg)?;
        assert_eq!(out.dimensions(), (32, 32));
        assert!(out.data().iter().all(|&v| v == 0.0));
        assert!(det.tracked_points().is_empty());
        Ok(())
    }

    #[test]
    fn validation_rejects_even_window() {
        let cfg = OpticalFlowConfig {
            win_size: 20,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        assert!(OpticalFlowConfig::default().validate().is_ok());
    }
}
