//! Catalog resolution: everything about the archives that is fixed once the
//! dataset is constructed.
//!
//! Building a [`Catalog`] discovers the per-year archives, inspects the first one
//! for the native sample count and field shape, draws the per-year sample
//! tables, derives the cropped image shape and loads the normalisation
//! statistics. Nothing in it changes afterwards, so workers read it freely.

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::archive::{ArchiveFormat, YearArchive};
use crate::config::{DatasetConfig, ResolvedPaths};
use crate::error::{Error, Result};

pub mod discover;
pub mod stats;

pub use stats::NormalizationStats;

/// Which native samples of one year are exposed, in local-index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleTable {
    /// Every native sample, `0..n`.
    All(usize),
    /// A fixed draw without replacement.
    Drawn(Vec<usize>),
}

impl SampleTable {
    pub fn len(&self) -> usize {
        match self {
            SampleTable::All(n) => *n,
            SampleTable::Drawn(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Native sample index for `local`, `None` past the end.
    pub fn get(&self, local: usize) -> Option<usize> {
        match self {
            SampleTable::All(n) => (local < *n).then_some(local),
            SampleTable::Drawn(v) => v.get(local).copied(),
        }
    }

    pub fn to_vec(&self) -> Vec<usize> {
        match self {
            SampleTable::All(n) => (0..*n).collect(),
            SampleTable::Drawn(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    paths: ResolvedPaths,
    archives: Vec<YearArchive>,
    chans: Vec<usize>,
    tstep: usize,
    n_tsteps: usize,
    patch_size: Option<usize>,
    n_samples_per_year_all: usize,
    n_samples_per_year: usize,
    samples: Vec<SampleTable>,
    native_shape: [usize; 2],
    img_shape: [usize; 2],
    stats: NormalizationStats,
    length: usize,
}

impl Catalog {
    pub fn build<A: ArchiveFormat>(config: &DatasetConfig) -> Result<Self> {
        config.validate()?;
        let paths = config.resolve_paths()?;
        info!(data_dir = %paths.data_dir.display(), stats_dir = %paths.stats_dir.display(), "resolving catalog");

        let files = discover::discover_archives(&paths.data_dir, A::EXTENSION)?;
        for path in &files {
            info!("archive file found: {}", path.display());
        }
        info!("number of archives: {}", files.len());

        // the first archive stands in for all of them unless verification is on
        let first = files.first().ok_or_else(|| {
            Error::Config(format!(
                "no NNNNNN.{} archives in {}",
                A::EXTENSION,
                paths.data_dir.display()
            ))
        })?;
        info!("getting file stats from {}", first.display());
        let reference = YearArchive::inspect::<A>(first)?;
        info!("number of channels available: {}", reference.n_channels);

        let archives = if config.verify_archives {
            verify_all::<A>(&files, &reference)?
        } else {
            files
                .into_iter()
                .map(|path| YearArchive {
                    path,
                    ..reference.clone()
                })
                .collect()
        };

        let n_samples_per_year_all = reference.n_samples;
        let samples = sample_tables(
            config.n_samples_per_year,
            n_samples_per_year_all,
            archives.len(),
            config.seed,
        )?;
        let n_samples_per_year = config.n_samples_per_year.unwrap_or(n_samples_per_year_all);
        info!("number of samples/year: {}", n_samples_per_year);

        let length = archives.len() * n_samples_per_year;

        let img_shape = effective_shape(reference.img_shape, config.patch_size)?;
        info!("input image shape: {:?}", img_shape);

        let stats = NormalizationStats::load(&paths.stats_dir, &config.chans)?;

        Ok(Self {
            paths,
            archives,
            chans: config.chans.clone(),
            tstep: config.tstep,
            n_tsteps: config.n_tsteps,
            patch_size: config.patch_size,
            n_samples_per_year_all,
            n_samples_per_year,
            samples,
            native_shape: reference.img_shape,
            img_shape,
            stats,
            length,
        })
    }

    /// Split a flat index into `(year_index, local_index)`.
    pub fn locate(&self, index: usize) -> Result<(usize, usize)> {
        if index >= self.length {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.length,
            });
        }
        Ok((index / self.n_samples_per_year, index % self.n_samples_per_year))
    }

    /// Native sample index behind `(year, local)`.
    pub fn sample_index(&self, year: usize, local: usize) -> Option<usize> {
        self.samples.get(year)?.get(local)
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    pub fn archives(&self) -> &[YearArchive] {
        &self.archives
    }

    pub fn n_years(&self) -> usize {
        self.archives.len()
    }

    pub fn chans(&self) -> &[usize] {
        &self.chans
    }

    pub fn tstep(&self) -> usize {
        self.tstep
    }

    pub fn n_tsteps(&self) -> usize {
        self.n_tsteps
    }

    pub fn patch_size(&self) -> Option<usize> {
        self.patch_size
    }

    pub fn n_samples_per_year(&self) -> usize {
        self.n_samples_per_year
    }

    /// Native samples per archive, before any subsampling.
    pub fn n_samples_per_year_all(&self) -> usize {
        self.n_samples_per_year_all
    }

    pub fn sample_table(&self, year: usize) -> Option<&SampleTable> {
        self.samples.get(year)
    }

    pub fn native_shape(&self) -> [usize; 2] {
        self.native_shape
    }

    /// Spatial shape after patch-aligned cropping.
    pub fn img_shape(&self) -> [usize; 2] {
        self.img_shape
    }

    pub fn stats(&self) -> &NormalizationStats {
        &self.stats
    }
}

fn verify_all<A: ArchiveFormat>(
    files: &[std::path::PathBuf],
    reference: &YearArchive,
) -> Result<Vec<YearArchive>> {
    files
        .iter()
        .map(|path| {
            let archive = YearArchive::inspect::<A>(path)?;
            if !archive.same_layout(reference) {
                return Err(Error::DataIntegrity(format!(
                    "{} has {} samples x {} channels x {:?}, but {} has {} x {} x {:?}",
                    archive.path.display(),
                    archive.n_samples,
                    archive.n_channels,
                    archive.img_shape,
                    reference.path.display(),
                    reference.n_samples,
                    reference.n_channels,
                    reference.img_shape
                )));
            }
            Ok(archive)
        })
        .collect()
}

/// One table per year: the identity range, or `k` distinct native indices
/// drawn once per year.
pub fn sample_tables(
    requested: Option<usize>,
    n_all: usize,
    n_years: usize,
    seed: Option<u64>,
) -> Result<Vec<SampleTable>> {
    match requested {
        None => Ok(vec![SampleTable::All(n_all); n_years]),
        Some(k) if k > n_all => Err(Error::Config(format!(
            "n_samples_per_year ({}) > number of samples available ({})",
            k, n_all
        ))),
        Some(k) => {
            let mut rng = match seed {
                Some(s) => StdRng::seed_from_u64(s),
                None => StdRng::from_entropy(),
            };
            Ok((0..n_years)
                .map(|_| SampleTable::Drawn(rand::seq::index::sample(&mut rng, n_all, k).into_vec()))
                .collect())
        }
    }
}

/// Floor each dimension to a multiple of `patch_size`.
pub fn effective_shape(native: [usize; 2], patch_size: Option<usize>) -> Result<[usize; 2]> {
    let Some(p) = patch_size else {
        return Ok(native);
    };
    let shape = native.map(|s| s - s % p);
    if shape.contains(&0) {
        return Err(Error::Config(format!(
            "patch_size {} is larger than the native image shape {:?}",
            p, native
        )));
    }
    Ok(shape)
}
