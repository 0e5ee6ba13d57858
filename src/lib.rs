//! # gridset
//!
//! Lazy, randomly indexable access to multi-year gridded time series stored
//! as one archive per year (or month) named `NNNNNN.<ext>`.
//!
//! - [`DatasetConfig`]: construction parameters
//! - [`Catalog`]: archive discovery, per-year sample tables, statistics
//! - [`GridDataset`]: flat index → normalised `(input, outputs, weights)`
//! - [`ArchiveFormat`]: how archives are opened and read ([`NpyArchive`])
//! - [`TensorConverter`]: how processed fields become training tensors

pub mod archive;
pub mod catalog;
pub mod config;
pub mod dataset;
pub mod error;
pub mod runtime;
pub mod tensor;

pub use archive::{ArchiveFormat, ArchiveReader, NpyArchive, YearArchive};
pub use catalog::{Catalog, NormalizationStats, SampleTable};
pub use config::{DatasetConfig, ResolvedPaths};
pub use dataset::{
    GridDataset, INPUT_KEY, LambdaWeighting, Sample, UniformWeighting, WorkerHandles, output_key,
    plan_output_indices,
};
pub use error::{Error, Result};
pub use tensor::{ArrayTensors, FieldMap, FlatTensor, FlatTensors, TensorConverter, TensorDict};
