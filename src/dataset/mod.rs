//! Sample access over a resolved [`Catalog`].
//!
//! A [`GridDataset`] maps a flat index to a year and an in-year offset, reads
//! the input field and its future steps from that year's archive, normalises
//! and crops them, and hands back three tensor dicts: inputs, outputs and
//! loss weights.
//!
//! Archive handles live in [`WorkerHandles`], one set per worker, opened with
//! [`GridDataset::worker_init`] before the worker's first `get`.

use std::marker::PhantomData;
use std::path::Path;

use ndarray::{Array3, ArrayD, Ix3, s};
use tracing::debug;

use crate::archive::{ArchiveFormat, ArchiveReader, NpyArchive};
use crate::catalog::Catalog;
use crate::config::DatasetConfig;
use crate::error::{Error, Result};
use crate::tensor::{ArrayTensors, FieldMap, TensorConverter, TensorDict};

mod plan;
mod weighting;

pub use plan::{OutputIndices, plan_output_indices};
pub use weighting::{LambdaWeighting, UniformWeighting};

/// Key of the single input field.
pub const INPUT_KEY: &str = "x_t0";

/// Key of the output `offset` native steps after the input.
pub fn output_key(offset: usize) -> String {
    format!("x_t{offset}")
}

/// One resolved training example.
#[derive(Debug, Clone)]
pub struct Sample<T = Array3<f32>> {
    pub invar: TensorDict<T>,
    pub outvar: TensorDict<T>,
    pub lambda_weighting: TensorDict<T>,
}

/// Open archive handles for one worker, in catalog year order.
///
/// Never shared between workers; every worker calls
/// [`GridDataset::worker_init`] for its own set.
#[derive(Debug)]
pub struct WorkerHandles<R> {
    worker_id: usize,
    readers: Vec<R>,
}

impl<R> WorkerHandles<R> {
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

pub struct GridDataset<A: ArchiveFormat = NpyArchive> {
    catalog: Catalog,
    weighting: Box<dyn LambdaWeighting>,
    _format: PhantomData<fn() -> A>,
}

impl GridDataset<NpyArchive> {
    /// Build a dataset over `.npy` archives.
    pub fn new(config: &DatasetConfig) -> Result<Self> {
        Self::with_format(config)
    }
}

impl<A: ArchiveFormat> GridDataset<A> {
    pub fn with_format(config: &DatasetConfig) -> Result<Self> {
        Ok(Self {
            catalog: Catalog::build::<A>(config)?,
            weighting: Box::new(UniformWeighting),
            _format: PhantomData,
        })
    }

    /// Replace the uniform output weighting.
    pub fn with_weighting(mut self, weighting: impl LambdaWeighting + 'static) -> Self {
        self.weighting = Box::new(weighting);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn invar_keys(&self) -> Vec<String> {
        vec![INPUT_KEY.to_string()]
    }

    pub fn outvar_keys(&self) -> Vec<String> {
        (1..=self.catalog.n_tsteps())
            .map(|i| output_key(i * self.catalog.tstep()))
            .collect()
    }

    /// Open every year archive for the calling worker.
    pub fn worker_init(&self, worker_id: usize) -> Result<WorkerHandles<A::Reader>> {
        let readers = self
            .catalog
            .archives()
            .iter()
            .map(|archive| A::open(&archive.path))
            .collect::<Result<Vec<_>>>()?;
        debug!(worker_id, archives = readers.len(), "opened archive handles");
        Ok(WorkerHandles { worker_id, readers })
    }

    /// Input and output native indices for a flat index, plus its year.
    pub fn resolve_indices(&self, index: usize) -> Result<(usize, usize, OutputIndices)> {
        let (year, local) = self.catalog.locate(index)?;
        let in_idx = self
            .catalog
            .sample_index(year, local)
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.catalog.len(),
            })?;
        let out_idxs = plan_output_indices(
            in_idx,
            self.catalog.tstep(),
            self.catalog.n_tsteps(),
            self.catalog.n_samples_per_year_all(),
        );
        Ok((year, in_idx, out_idxs))
    }

    pub fn get(&self, worker: &WorkerHandles<A::Reader>, index: usize) -> Result<Sample> {
        self.get_with(worker, index, &ArrayTensors)
    }

    /// Resolve `index` and convert the result with `converter`.
    pub fn get_with<C: TensorConverter>(
        &self,
        worker: &WorkerHandles<A::Reader>,
        index: usize,
        converter: &C,
    ) -> Result<Sample<C::Tensor>> {
        if worker.readers.len() != self.catalog.n_years() {
            return Err(Error::Config(format!(
                "worker {} holds {} archive handles, dataset has {} archives",
                worker.worker_id,
                worker.readers.len(),
                self.catalog.n_years()
            )));
        }
        let (year, in_idx, out_idxs) = self.resolve_indices(index)?;
        debug!(worker = worker.worker_id, index, year, in_idx, ?out_idxs, "resolving sample");

        let reader = &worker.readers[year];
        let path = &self.catalog.archives()[year].path;
        let mut fields = std::iter::once(in_idx)
            .chain(out_idxs.iter().copied())
            .map(|idx| {
                let raw = reader.read_slice(idx, self.catalog.chans())?;
                self.process(raw, path)
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter();

        let mut invar = FieldMap::default();
        if let Some(x) = fields.next() {
            invar.insert(INPUT_KEY.to_string(), x);
        }
        let outvar: FieldMap = self.outvar_keys().into_iter().zip(fields).collect();
        let lambda_weighting: FieldMap = outvar
            .iter()
            .map(|(key, field)| (key.clone(), self.weighting.weights(key, field)))
            .collect();

        Ok(Sample {
            invar: converter.to_tensor_dict(invar),
            outvar: converter.to_tensor_dict(outvar),
            lambda_weighting: converter.to_tensor_dict(lambda_weighting),
        })
    }

    fn process(&self, raw: ArrayD<f32>, path: &Path) -> Result<Array3<f32>> {
        if raw.ndim() != 3 {
            return Err(Error::DataIntegrity(format!(
                "expected 3 dimensions reading {}, but got {:?}",
                path.display(),
                raw.shape()
            )));
        }
        let mut x = raw
            .into_dimensionality::<Ix3>()
            .map_err(|e| Error::DataIntegrity(e.to_string()))?;
        if x.shape()[0] != self.catalog.stats().n_channels() {
            return Err(Error::DataIntegrity(format!(
                "read {} channels from {}, expected {}",
                x.shape()[0],
                path.display(),
                self.catalog.stats().n_channels()
            )));
        }
        self.catalog.stats().normalize(&mut x);
        if self.catalog.patch_size().is_some() {
            x = crop_top_left(x, self.catalog.img_shape());
        }
        Ok(x)
    }
}

/// Keep rows `0..h` and columns `0..w`.
pub fn crop_top_left(x: Array3<f32>, [h, w]: [usize; 2]) -> Array3<f32> {
    x.slice_move(s![.., ..h, ..w])
}
