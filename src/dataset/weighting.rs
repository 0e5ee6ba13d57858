use ndarray::Array3;

/// Loss weights attached to each output field.
///
/// Only [`UniformWeighting`] exists today. A latitude- or channel-aware
/// policy implements this trait and is installed with
/// [`GridDataset::with_weighting`](crate::GridDataset::with_weighting).
pub trait LambdaWeighting: Send + Sync {
    fn weights(&self, key: &str, field: &Array3<f32>) -> Array3<f32>;
}

/// All ones, shaped like the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformWeighting;

impl LambdaWeighting for UniformWeighting {
    fn weights(&self, _key: &str, field: &Array3<f32>) -> Array3<f32> {
        Array3::ones(field.raw_dim())
    }
}
