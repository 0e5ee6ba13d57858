//! Per-year archive access.
//!
//! The dataset never looks inside an archive itself; it goes through
//! [`ArchiveFormat`] to open a file and [`ArchiveReader`] to pull one
//! channel-selected sample out of it. [`NpyArchive`] is the shipped format.

use std::path::{Path, PathBuf};

use ndarray::ArrayD;

use crate::error::{Error, Result};

mod npy;

pub use npy::{NpyArchive, NpyReader};

/// A file format that per-year archives are stored in.
pub trait ArchiveFormat: Send + Sync + 'static {
    type Reader: ArchiveReader;

    /// File extension without the dot, e.g. `"npy"`.
    const EXTENSION: &'static str;

    /// Open a read handle. Handles belong to one worker and are not shared.
    fn open(path: &Path) -> Result<Self::Reader>;
}

/// An open read handle on one archive.
pub trait ArchiveReader {
    /// Native shape of the whole archive, `[samples, channels, height, width]`.
    fn shape(&self) -> Result<Vec<usize>>;

    /// Read one sample restricted to `chans`, in `chans` order.
    fn read_slice(&self, sample: usize, chans: &[usize]) -> Result<ArrayD<f32>>;
}

/// What the catalog knows about one archive without holding it open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearArchive {
    pub path: PathBuf,
    pub n_samples: usize,
    pub n_channels: usize,
    pub img_shape: [usize; 2],
}

impl YearArchive {
    /// Open `path` once, read its shape and drop the handle.
    pub fn inspect<A: ArchiveFormat>(path: &Path) -> Result<Self> {
        let reader = A::open(path)?;
        let shape = reader.shape()?;
        match shape[..] {
            [n_samples, n_channels, h, w] => Ok(Self {
                path: path.to_path_buf(),
                n_samples,
                n_channels,
                img_shape: [h, w],
            }),
            _ => Err(Error::DataIntegrity(format!(
                "{} has shape {:?}, expected [samples, channels, height, width]",
                path.display(),
                shape
            ))),
        }
    }

    /// Same sample count and field shape, ignoring the path.
    pub fn same_layout(&self, other: &YearArchive) -> bool {
        self.n_samples == other.n_samples
            && self.n_channels == other.n_channels
            && self.img_shape == other.img_shape
    }
}
