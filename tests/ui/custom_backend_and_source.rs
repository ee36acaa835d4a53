// A downstream crate supplies its own depth backend and capture loop.
use std::time::Duration;

use anyhow::Result;
use pixel_perception::{
    DepthBackend, EngineConfig, Frame, FrameListener, GridSource, OutputType,
    PerceptionEngine, PixelFormat, TensorShape,
};

struct Gradient;

impl DepthBackend for Gradient {
    fn name(&self) -> &'static str {
        "gradient"
    }

    fn infer(&mut self, _input: &[f32], shape: TensorShape) -> Result<Vec<f32>> {
        let n = shape.width as usize * shape.height as usize;
        Ok((0..n).map(|i| i as f32 / n as f32).collect())
    }
}

fn main() -> Result<()> {
    let engine = PerceptionEngine::spawn(
        EngineConfig {
            grid_source: GridSource::Depth,
            grid_width: 4,
            grid_height: 4,
            ..Default::default()
        },
        Gradient,
    )?;
    engine.enable_output(OutputType::DepthDetection, false);
    let mut outputs = engine.outputs();

    let listener: &dyn FrameListener = &engine;
    listener.on_frame_ready(Frame::new(vec![120; 40 * 30], 40, 30, PixelFormat::Luma8)?);

    let depth = outputs.depth.wait_next(Duration::from_secs(5));
    let grid = outputs.primary_grid.wait_next(Duration::from_secs(5));
    assert!(depth.is_some());
    assert!(grid.is_some());
    engine.dispose();
    Ok(())
}
