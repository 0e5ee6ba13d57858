use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use ndarray_npy::ViewNpyExt;

use super::{ArchiveFormat, ArchiveReader};
use crate::error::{Error, Result};

/// Archives stored as one little-endian `f32` `.npy` array `[N, C, H, W]`.
///
/// Files are memory-mapped, so a read only faults in the pages of the
/// requested sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpyArchive;

impl ArchiveFormat for NpyArchive {
    type Reader = NpyReader;

    const EXTENSION: &'static str = "npy";

    fn open(path: &Path) -> Result<NpyReader> {
        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // SAFETY: archives are read-only inputs; nothing in this process writes them.
        let map = unsafe { Mmap::map(&file) }.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // The header is parsed once here; reads index the data block directly.
        let view = ArrayViewD::<f32>::view_npy(&map[..]).map_err(|source| Error::ViewNpy {
            path: path.to_path_buf(),
            source,
        })?;
        if !view.is_standard_layout() {
            return Err(Error::DataIntegrity(format!(
                "{} is stored in Fortran order, expected C order",
                path.display()
            )));
        }
        let shape = view.shape().to_vec();
        // view_npy rejects trailing bytes, so the data is the tail of the file
        let data_offset = map.len() - view.len() * size_of::<f32>();
        Ok(NpyReader {
            path: path.to_path_buf(),
            map,
            shape,
            data_offset,
        })
    }
}

#[derive(Debug)]
pub struct NpyReader {
    path: PathBuf,
    map: Mmap,
    shape: Vec<usize>,
    data_offset: usize,
}

impl NpyReader {
    /// Elements of the whole array, native-endian `f32`.
    fn data(&self) -> Result<&[f32]> {
        bytemuck::try_cast_slice(&self.map[self.data_offset..]).map_err(|e| {
            Error::DataIntegrity(format!(
                "cannot view data of {} as f32: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl ArchiveReader for NpyReader {
    fn shape(&self) -> Result<Vec<usize>> {
        Ok(self.shape.clone())
    }

    fn read_slice(&self, sample: usize, chans: &[usize]) -> Result<ArrayD<f32>> {
        if self.shape.len() < 2 {
            return Err(Error::DataIntegrity(format!(
                "{} has shape {:?}, expected at least [samples, channels]",
                self.path.display(),
                self.shape
            )));
        }
        let (n_samples, n_channels) = (self.shape[0], self.shape[1]);
        if sample >= n_samples {
            return Err(Error::DataIntegrity(format!(
                "sample {} out of range for {} ({} samples)",
                sample,
                self.path.display(),
                n_samples
            )));
        }
        if let Some(&c) = chans.iter().find(|&&c| c >= n_channels) {
            return Err(Error::DataIntegrity(format!(
                "channel {} out of range for {} ({} channels)",
                c,
                self.path.display(),
                n_channels
            )));
        }
        let inner = &self.shape[1..];
        let stride: usize = inner.iter().product();
        let data = self.data()?;
        let block = &data[sample * stride..(sample + 1) * stride];
        let view = ArrayViewD::from_shape(IxDyn(inner), block)
            .map_err(|e| Error::DataIntegrity(format!("{}: {}", self.path.display(), e)))?;
        Ok(view.select(Axis(0), chans))
    }
}
