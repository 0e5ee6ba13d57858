use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Construction parameters for a [`GridDataset`](crate::GridDataset).
///
/// Optional fields stay `None` here; [`DatasetConfig::resolve_paths`] fills
/// in the directory defaults once, during construction.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Directory holding the `NNNNNN.<ext>` archives.
    pub data_dir: PathBuf,
    /// Channel indices to load, in output order.
    pub chans: Vec<usize>,
    /// Stride between the input sample and each future step.
    pub tstep: usize,
    /// Number of future steps per sample.
    pub n_tsteps: usize,
    /// Crop fields so both spatial dims are multiples of this.
    pub patch_size: Option<usize>,
    /// Draw this many samples per year instead of using all of them.
    pub n_samples_per_year: Option<usize>,
    /// Statistics directory; defaults to `<data_dir>/../stats`.
    pub stats_dir: Option<PathBuf>,
    /// Seed for the per-year subsample draw.
    pub seed: Option<u64>,
    /// Inspect every archive, not just the first, and fail on shape mismatch.
    pub verify_archives: bool,
}

impl DatasetConfig {
    pub fn new(data_dir: impl Into<PathBuf>, chans: Vec<usize>) -> Self {
        Self {
            data_dir: data_dir.into(),
            chans,
            tstep: 1,
            n_tsteps: 1,
            patch_size: None,
            n_samples_per_year: None,
            stats_dir: None,
            seed: None,
            verify_archives: false,
        }
    }

    pub fn tstep(mut self, tstep: usize) -> Self {
        self.tstep = tstep;
        self
    }

    pub fn n_tsteps(mut self, n: usize) -> Self {
        self.n_tsteps = n;
        self
    }

    pub fn patch_size(mut self, p: usize) -> Self {
        self.patch_size = Some(p);
        self
    }

    pub fn n_samples_per_year(mut self, k: usize) -> Self {
        self.n_samples_per_year = Some(k);
        self
    }

    pub fn stats_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stats_dir = Some(dir.into());
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = Some(s);
        self
    }

    pub fn verify_archives(mut self, v: bool) -> Self {
        self.verify_archives = v;
        self
    }

    /// Check the parameters that do not need the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.chans.is_empty() {
            return Err(Error::Config("channel list is empty".into()));
        }
        if self.tstep == 0 {
            return Err(Error::Config(
                "tstep must be positive; every output would alias the input".into(),
            ));
        }
        if self.patch_size == Some(0) {
            return Err(Error::Config("patch_size must be positive".into()));
        }
        Ok(())
    }

    /// Make both directories absolute and check that they exist.
    pub fn resolve_paths(&self) -> Result<ResolvedPaths> {
        let data_dir = absolute(&self.data_dir)?;
        let stats_dir = match &self.stats_dir {
            Some(dir) => absolute(dir)?,
            None => default_stats_dir(&data_dir),
        };

        if !data_dir.is_dir() {
            return Err(Error::Config(format!(
                "data directory {} does not exist",
                data_dir.display()
            )));
        }
        if !stats_dir.is_dir() {
            return Err(Error::Config(format!(
                "stats directory {} does not exist",
                stats_dir.display()
            )));
        }
        Ok(ResolvedPaths {
            data_dir,
            stats_dir,
        })
    }
}

/// Directories after defaults are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub data_dir: PathBuf,
    pub stats_dir: PathBuf,
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn default_stats_dir(data_dir: &Path) -> PathBuf {
    data_dir
        .parent()
        .unwrap_or_else(|| Path::new("/"))
        .join("stats")
}
