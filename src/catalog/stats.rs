use std::path::Path;

use ndarray::{Array3, Array4, ArrayD, ArrayView3, Axis, Ix4};
use ndarray_npy::{ReadNpyError, read_npy};

use crate::error::{Error, Result};

pub const MEANS_FILE: &str = "global_means.npy";
pub const STDS_FILE: &str = "global_stds.npy";

/// Per-channel global mean and standard deviation, shape `[1, C, 1, 1]`,
/// already restricted to the selected channels.
#[derive(Debug, Clone)]
pub struct NormalizationStats {
    mean: Array4<f32>,
    std: Array4<f32>,
}

impl NormalizationStats {
    /// Load [`MEANS_FILE`] and [`STDS_FILE`] from `stats_dir` and keep `chans`.
    pub fn load(stats_dir: &Path, chans: &[usize]) -> Result<Self> {
        let mean = load_selected(&stats_dir.join(MEANS_FILE), chans)?;
        let std = load_selected(&stats_dir.join(STDS_FILE), chans)?;
        Self::from_arrays(mean, std, chans.len())
    }

    pub fn from_arrays(mean: ArrayD<f32>, std: ArrayD<f32>, n_channels: usize) -> Result<Self> {
        let expected = [1, n_channels, 1, 1];
        if mean.shape() != expected || std.shape() != expected {
            return Err(Error::DataIntegrity(format!(
                "normalisation arrays have wrong shape: mean {:?}, std {:?}, expected {:?}",
                mean.shape(),
                std.shape(),
                expected
            )));
        }
        let to4 = |a: ArrayD<f32>| {
            a.into_dimensionality::<Ix4>()
                .map_err(|e| Error::DataIntegrity(e.to_string()))
        };
        Ok(Self {
            mean: to4(mean)?,
            std: to4(std)?,
        })
    }

    pub fn n_channels(&self) -> usize {
        self.mean.shape()[1]
    }

    /// Means as `[C, 1, 1]`, ready to broadcast over a `[C, H, W]` field.
    pub fn mean(&self) -> ArrayView3<'_, f32> {
        self.mean.index_axis(Axis(0), 0)
    }

    pub fn std(&self) -> ArrayView3<'_, f32> {
        self.std.index_axis(Axis(0), 0)
    }

    /// `(x - mean[c]) / std[c]` in place.
    pub fn normalize(&self, x: &mut Array3<f32>) {
        *x -= &self.mean();
        *x /= &self.std();
    }

    /// Inverse of [`normalize`](Self::normalize).
    pub fn denormalize(&self, x: &mut Array3<f32>) {
        *x *= &self.std();
        *x += &self.mean();
    }
}

fn load_selected(path: &Path, chans: &[usize]) -> Result<ArrayD<f32>> {
    let raw = read_f32_lossy(path)?;
    if raw.ndim() < 2 {
        return Err(Error::DataIntegrity(format!(
            "{} has shape {:?}, expected [1, C, 1, 1]",
            path.display(),
            raw.shape()
        )));
    }
    let total = raw.shape()[1];
    if let Some(&c) = chans.iter().find(|&&c| c >= total) {
        return Err(Error::Config(format!(
            "channel {} out of range: {} holds {} channels",
            c,
            path.display(),
            total
        )));
    }
    Ok(raw.select(Axis(1), chans))
}

// statistics are often saved as float64
fn read_f32_lossy(path: &Path) -> Result<ArrayD<f32>> {
    let wrap = |source| Error::ReadNpy {
        path: path.to_path_buf(),
        source,
    };
    match read_npy::<_, ArrayD<f32>>(path) {
        Ok(arr) => Ok(arr),
        Err(ReadNpyError::WrongDescriptor(_)) => read_npy::<_, ArrayD<f64>>(path)
            .map(|arr| arr.mapv(|v| v as f32))
            .map_err(wrap),
        Err(source) => Err(wrap(source)),
    }
}
