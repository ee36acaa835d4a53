use anyhow::Result;
use serde::Deserialize;

use crate::error::ensure_arg;
use crate::field::FloatField;
use crate::stage::{FrameProcessor, StageConfig};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Fraction of the accumulated heat removed per frame, in `[0, 1]`.
    pub decay: f32,
    /// Weight of new motion, `>= 0`.
    pub gain: f32,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            decay: 0.05,
            gain: 0.5,
        }
    }
}

impl StageConfig for TemporalConfig {
    fn validate(&self) -> Result<()> {
        ensure_arg((0.0..=1.0).contains(&self.decay), || {
            format!("temporal decay must be in [0, 1], got {}", self.decay)
        })?;
        ensure_arg(self.gain >= 0.0 && self.gain.is_finite(), || {
            format!("temporal gain must be >= 0, got {}", self.gain)
        })
    }
}

/// Exponentially decaying motion heat map.
#[derive(Debug, Default)]
pub struct TemporalAccumulator {
    heat: Option<FloatField>,
}

impl TemporalAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `motion` into the heat map and return a copy of it.
    pub fn accumulate(&mut self, motion: &FloatField, config: &TemporalConfig) -> FloatField {
        if motion.is_empty() {
            self.heat = None;
            return FloatField::empty();
        }

        match self.heat.as_mut() {
            Some(heat) if heat.same_size(motion) => {
                let keep = 1.0 - config.decay;
                for (a, &m) in heat.data_mut().iter_mut().zip(motion.data()) {
                    *a = (*a * keep + config.gain * m).min(1.0);
                }
                heat.clone()
            }
            _ => {
                let zeros = FloatField::zeros(motion.width(), motion.height());
                self.heat = Some(zeros.clone());
                zeros
            }
        }
    }
}

impl FrameProcessor for TemporalAccumulator {
    type Input = FloatField;
    type Output = FloatField;
    type Config = TemporalConfig;

    fn name(&self) -> &'static str {
        "temporal"
    }

    fn process(&mut self, input: &FloatField, config: &TemporalConfig) -> Result<FloatField> {
        Ok(self.accumulate(input, config))
    }

    fn reset(&mut self) {
        self.heat = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(v: f32) -> FloatField {
        FloatField::from_parts(3, 2, vec![v; 6])
    }

    #[test]
    fn first_call_seeds_zero_heat() {
        let mut acc = TemporalAccumulator::new();
        let out = acc.accumulate(&constant(0.8), &TemporalConfig::default());
        assert_eq!(out.dimensions(), (3, 2));
        assert!(out.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn saturates_at_one_without_decay() {
        let mut acc = TemporalAccumulator::new();
        let cfg = TemporalConfig { decay: 0.0, gain: 1.0 };
        // Without decay any positive input keeps adding until the cap.
        for k in [0.3f32, 1.0, 1.5] {
            acc.reset();
            let mut last = FloatField::empty();
            for _ in 0..10 {
                last = acc.accumulate(&constant(k), &cfg);
                assert!(last.data().iter().all(|&v| v <= 1.0));
            }
            assert!(last.data().iter().all(|&v| (v - 1.0).abs() < 1e-6));
        }
    }

    #[test]
    fn full_decay_keeps_no_memory() {
        let mut acc = TemporalAccumulator::new();
        let cfg = TemporalConfig { decay: 1.0, gain: 0.5 };
        acc.accumulate(&constant(0.9), &cfg);
        acc.accumulate(&constant(0.9), &cfg);
        let out = acc.accumulate(&constant(0.4), &cfg);
        assert!(out.data().iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn empty_input_resets() {
        let mut acc = TemporalAccumulator::new();
        let cfg = TemporalConfig { decay: 0.0, gain: 1.0 };
        acc.accumulate(&constant(0.5), &cfg);
        acc.accumulate(&constant(0.5), &cfg);
        assert!(acc.accumulate(&FloatField::empty(), &cfg).is_empty());
        // Heat starts over after the reset.
        let out = acc.accumulate(&constant(0.5), &cfg);
        assert!(out.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn returned_field_is_independent_of_state() {
        let mut acc = TemporalAccumulator::new();
        let cfg = TemporalConfig { decay: 0.0, gain: 1.0 };
        acc.accumulate(&constant(0.25), &cfg);
        let first = acc.accumulate(&constant(0.25), &cfg);
        let second = acc.accumulate(&constant(0.25), &cfg);
        assert!(first.data().iter().all(|&v| (v - 0.25).abs() < 1e-6));
        assert!(second.data().iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn validation_bounds() {
        assert!(TemporalConfig { decay: 1.5, gain: 0.5 }.validate().is_err());
        assert!(TemporalConfig { decay: 0.5, gain: -1.0 }.validate().is_err());
        assert!(TemporalConfig::default().validate().is_ok());
    }
}
