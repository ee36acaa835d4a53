use anyhow::Result;

use crate::depth::backend::{DepthBackend, TensorShape};

/// Deterministic backend returning the same value for every output pixel.
///
/// Output resolution equals the input tensor resolution unless overridden with
/// `with_output_len`, which lets tests provoke degraded-output paths.
pub struct ConstantDepthBackend {
    value: f32,
    output_len: Option<usize>,
}

impl ConstantDepthBackend {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            output_len: None,
        }
    }

    pub fn with_output_len(mut self, len: usize) -> Self {
        self.output_len = Some(len);
        self
    }
}

impl Default for ConstantDepthBackend {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl DepthBackend for ConstantDepthBackend {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn infer(&mut self, _input: &[f32], shape: TensorShape) -> Result<Vec<f32>> {
        let len = self
            .output_len
            .unwrap_or(shape.width as usize * shape.height as usize);
        Ok(vec![self.value; len])
    }
}

/// Backend driven by a closure, for tests and simple heuristics.
pub struct FnDepthBackend<F> {
    name: &'static str,
    infer: F,
}

impl<F> FnDepthBackend<F>
where
    F: FnMut(&[f32], TensorShape) -> Result<Vec<f32>> + Send,
{
    pub fn new(name: &'static str, infer: F) -> Self {
        Self { name, infer }
    }
}

impl<F> DepthBackend for FnDepthBackend<F>
where
    F: FnMut(&[f32], TensorShape) -> Result<Vec<f32>> + Send,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn infer(&mut self, input: &[f32], shape: TensorShape) -> Result<Vec<f32>> {
        (self.infer)(input, shape)
    }
}

/// Model-free fallback: brighter pixels read as nearer.
///
/// Sums the three normalized channels per pixel. Useful for running the daemon
/// without a model file; it carries no real depth information.
#[derive(Default)]
pub struct LumaDepthBackend;

impl DepthBackend for LumaDepthBackend {
    fn name(&self) -> &'static str {
        "luma"
    }

    fn infer(&mut self, input: &[f32], shape: TensorShape) -> Result<Vec<f32>> {
        let channels = shape.channels.max(1) as usize;
        Ok(input
            .chunks_exact(channels)
            .map(|px| px.iter().sum::<f32>())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backend_matches_input_resolution() -> Result<()> {
        let mut backend = ConstantDepthBackend::new(2.0);
        let out = backend.infer(&[0.0; 4 * 4 * 3], TensorShape::rgb(4, 4))?;
        assert_eq!(out, vec![2.0; 16]);
        Ok(())
    }

    #[test]
    fn constant_backend_output_len_override() -> Result<()> {
        let mut backend = ConstantDepthBackend::new(1.0).with_output_len(10);
        assert_eq!(backend.infer(&[], TensorShape::rgb(4, 4))?.len(), 10);
        Ok(())
    }

    #[test]
    fn fn_backend_forwards_to_closure() -> Result<()> {
        let mut calls = 0;
        {
            let mut backend = FnDepthBackend::new("count", |input: &[f32], _shape| {
                calls += 1;
                Ok(input.to_vec())
            });
            assert_eq!(backend.name(), "count");
            assert_eq!(backend.infer(&[1.0, 2.0], TensorShape::rgb(1, 1))?, vec![1.0, 2.0]);
        }
        assert_eq!(calls, 1);
        Ok(())
    }

    #[test]
    fn luma_backend_sums_channels() -> Result<()> {
        let mut backend = LumaDepthBackend;
        let out = backend.infer(&[0.1, 0.2, 0.3, 1.0, 1.0, 1.0], TensorShape::rgb(2, 1))?;
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.6).abs() < 1e-6);
        assert!((out[1] - 3.0).abs() < 1e-6);
        Ok(())
    }
}
