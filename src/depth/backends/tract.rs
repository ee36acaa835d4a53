#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::depth::backend::{DepthBackend, TensorShape};

/// Tract-based backend for ONNX depth models.
///
/// Loads a local model file whose single input is `[1, H, W, 3]` f32 and whose first
/// output holds one depth value per output pixel. No network I/O.
pub struct TractDepthBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractDepthBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "loaded depth model {} ({}x{})",
            model_path.display(),
            width,
            height
        );
        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, input: &[f32], shape: TensorShape) -> Result<Tensor> {
        if shape.width != self.width || shape.height != self.height || shape.channels != 3 {
            return Err(anyhow!(
                "tensor shape {}x{}x{} does not match model input {}x{}x3",
                shape.width,
                shape.height,
                shape.channels,
                self.width,
                self.height
            ));
        }
        if input.len() != shape.len() {
            return Err(anyhow!(
                "expected {} input floats, received {}",
                shape.len(),
                input.len()
            ));
        }

        let tensor = tract_ndarray::Array4::from_shape_vec(
            (1, shape.height as usize, shape.width as usize, 3),
            input.to_vec(),
        )
        .context("failed to shape input tensor")?;
        Ok(tensor.into_tensor())
    }
}

impl DepthBackend for TractDepthBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, input: &[f32], shape: TensorShape) -> Result<Vec<f32>> {
        let tensor = self.build_input(input, shape)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let depth = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(depth.iter().copied().collect())
    }

    fn warm_up(&mut self) -> Result<()> {
        let shape = TensorShape::rgb(self.width, self.height);
        self.infer(&vec![0.0; shape.len()], shape).map(|_| ())
    }
}
