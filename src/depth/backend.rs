use anyhow::Result;

/// Layout of the float tensor handed to a depth backend.
///
/// Input is always NHWC with a batch of one: `[1, height, width, 3]`, RGB order,
/// already normalized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TensorShape {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl TensorShape {
    pub fn rgb(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            channels: 3,
        }
    }

    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Monocular depth inference backend.
///
/// # Audit Boundary
///
/// Implementations receive a normalized float tensor, never raw camera bytes, and
/// must not retain it past the `infer` call. Output is one relative-depth value per
/// output pixel, row-major; the estimator infers a square resolution from its length.
pub trait DepthBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on one input tensor.
    fn infer(&mut self, input: &[f32], shape: TensorShape) -> Result<Vec<f32>>;

    /// Optional warm-up hook. Failure here is fatal to engine construction.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: DepthBackend + ?Sized> DepthBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, input: &[f32], shape: TensorShape) -> Result<Vec<f32>> {
        (**self).infer(input, shape)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
