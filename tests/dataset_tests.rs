// Tests for gridset: catalog resolution, sample access, errors

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ndarray::{Array, Array3, Array4, ArrayD, Axis, IxDyn, s};
use ndarray_npy::write_npy;
use rayon::prelude::*;
use tempfile::TempDir;

use gridset::archive::NpyReader;
use gridset::catalog::stats::{MEANS_FILE, STDS_FILE};
use gridset::{
    ArchiveFormat, ArchiveReader, DatasetConfig, Error, FlatTensors, GridDataset, NpyArchive,
    Result, SampleTable,
};

// Fixture: per-year .npy archives plus a sibling stats directory

struct Fixture {
    _root: TempDir,
    data_dir: PathBuf,
    stats_dir: PathBuf,
    years: Vec<Array4<f32>>,
}

/// Exactly representable, distinct per (year, sample, channel, row, col).
fn value(year: usize, n: usize, c: usize, h: usize, w: usize) -> f32 {
    ((((year * 16 + n) * 8 + c) * 32 + h) * 32 + w) as f32
}

fn stat(values: &[f32]) -> ArrayD<f32> {
    Array::from_shape_vec(IxDyn(&[1, values.len(), 1, 1]), values.to_vec()).unwrap()
}

impl Fixture {
    fn new(n_years: usize, n_samples: usize, n_chans: usize, h: usize, w: usize) -> Self {
        let means = vec![0.0; n_chans];
        let stds = vec![1.0; n_chans];
        Self::with_stats(n_years, n_samples, n_chans, (h, w), &means, &stds)
    }

    fn with_stats(
        n_years: usize,
        n_samples: usize,
        n_chans: usize,
        (h, w): (usize, usize),
        means: &[f32],
        stds: &[f32],
    ) -> Self {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        let stats_dir = root.path().join("stats");
        std::fs::create_dir(&data_dir).unwrap();
        std::fs::create_dir(&stats_dir).unwrap();

        let years: Vec<Array4<f32>> = (0..n_years)
            .map(|y| {
                let arr = Array4::from_shape_fn((n_samples, n_chans, h, w), |(n, c, i, j)| {
                    value(y, n, c, i, j)
                });
                write_npy(data_dir.join(format!("2018{:02}.npy", y + 1)), &arr).unwrap();
                arr
            })
            .collect();

        write_npy(stats_dir.join(MEANS_FILE), &stat(means)).unwrap();
        write_npy(stats_dir.join(STDS_FILE), &stat(stds)).unwrap();

        Self {
            _root: root,
            data_dir,
            stats_dir,
            years,
        }
    }

    fn config(&self, chans: Vec<usize>) -> DatasetConfig {
        DatasetConfig::new(&self.data_dir, chans)
    }

    /// Native `[C, H, W]` field for `chans`.
    fn native(&self, year: usize, n: usize, chans: &[usize]) -> Array3<f32> {
        self.years[year]
            .index_axis(Axis(0), n)
            .select(Axis(0), chans)
    }
}

// End-to-end scenarios

#[test]
fn two_years_length_and_first_sample() {
    let fx = Fixture::new(2, 10, 3, 6, 8);
    let ds = GridDataset::new(&fx.config(vec![0, 1, 2]).tstep(2)).unwrap();
    assert_eq!(ds.len(), 20);
    assert_eq!(ds.catalog().n_years(), 2);

    let worker = ds.worker_init(0).unwrap();
    let sample = ds.get(&worker, 0).unwrap();

    assert_eq!(sample.invar.len(), 1);
    assert_eq!(sample.invar["x_t0"], fx.native(0, 0, &[0, 1, 2]));
    assert_eq!(sample.outvar.len(), 1);
    assert_eq!(sample.outvar["x_t2"], fx.native(0, 2, &[0, 1, 2]));
}

#[test]
fn last_sample_learns_identity() {
    let fx = Fixture::new(2, 10, 3, 6, 8);
    let ds = GridDataset::new(&fx.config(vec![0, 1, 2]).tstep(2)).unwrap();
    let worker = ds.worker_init(0).unwrap();

    let sample = ds.get(&worker, 9).unwrap();
    assert_eq!(sample.invar["x_t0"], fx.native(0, 9, &[0, 1, 2]));
    assert_eq!(sample.outvar["x_t2"], sample.invar["x_t0"]);

    // second year, last sample
    let sample = ds.get(&worker, 19).unwrap();
    assert_eq!(sample.invar["x_t0"], fx.native(1, 9, &[0, 1, 2]));
    assert_eq!(sample.outvar["x_t2"], sample.invar["x_t0"]);
}

#[test]
fn patch_crop_drops_trailing_row_and_column() {
    let fx = Fixture::new(1, 3, 2, 21, 21);
    let ds = GridDataset::new(&fx.config(vec![0, 1]).patch_size(4)).unwrap();
    assert_eq!(ds.catalog().native_shape(), [21, 21]);
    assert_eq!(ds.catalog().img_shape(), [20, 20]);

    let worker = ds.worker_init(0).unwrap();
    let sample = ds.get(&worker, 1).unwrap();
    let x = &sample.invar["x_t0"];
    assert_eq!(x.shape(), &[2, 20, 20]);
    assert_eq!(x, &fx.native(0, 1, &[0, 1]).slice(s![.., ..20, ..20]));
    assert_eq!(sample.outvar["x_t1"].shape(), &[2, 20, 20]);
}

#[test]
fn no_crop_without_patch_size() {
    let fx = Fixture::new(1, 3, 1, 21, 19);
    let ds = GridDataset::new(&fx.config(vec![0])).unwrap();
    assert_eq!(ds.catalog().img_shape(), [21, 19]);
    let worker = ds.worker_init(0).unwrap();
    assert_eq!(ds.get(&worker, 0).unwrap().invar["x_t0"].shape(), &[1, 21, 19]);
}

// Indexing

#[test]
fn flat_index_splits_into_year_and_offset() {
    let fx = Fixture::new(3, 7, 1, 2, 2);
    let ds = GridDataset::new(&fx.config(vec![0])).unwrap();
    let cat = ds.catalog();
    let spy = cat.n_samples_per_year();
    assert_eq!(ds.len(), 21);

    for idx in 0..ds.len() {
        let (year, local) = cat.locate(idx).unwrap();
        assert_eq!(year * spy + local, idx);
        assert!(year < cat.n_years());
        assert!(local < spy);
    }
}

#[test]
fn out_of_range_index_is_rejected() {
    let fx = Fixture::new(2, 4, 1, 2, 2);
    let ds = GridDataset::new(&fx.config(vec![0])).unwrap();
    let worker = ds.worker_init(0).unwrap();
    let err = ds.get(&worker, 8).unwrap_err();
    assert!(matches!(err, Error::IndexOutOfRange { index: 8, len: 8 }));
}

#[test]
fn catalog_lookups_past_the_end_are_none() {
    let fx = Fixture::new(2, 4, 1, 2, 2);
    let ds = GridDataset::new(&fx.config(vec![0]).n_samples_per_year(3).seed(5)).unwrap();
    let cat = ds.catalog();
    assert!(cat.sample_index(1, 2).is_some());
    assert_eq!(cat.sample_index(1, 3), None);
    assert_eq!(cat.sample_index(2, 0), None);
    assert!(cat.sample_table(2).is_none());
}

#[test]
fn identity_tables_when_not_subsampling() {
    let fx = Fixture::new(2, 5, 1, 2, 2);
    let ds = GridDataset::new(&fx.config(vec![0])).unwrap();
    assert_eq!(ds.len(), 2 * 5);
    for year in 0..2 {
        assert_eq!(ds.catalog().sample_table(year), Some(&SampleTable::All(5)));
    }
}

#[test]
fn multi_step_outputs_fall_back_independently() {
    let fx = Fixture::new(1, 10, 1, 2, 3);
    let ds = GridDataset::new(&fx.config(vec![0]).tstep(2).n_tsteps(3)).unwrap();
    assert_eq!(ds.outvar_keys(), vec!["x_t2", "x_t4", "x_t6"]);

    let (_, in_idx, outs) = ds.resolve_indices(5).unwrap();
    assert_eq!(in_idx, 5);
    assert_eq!(outs.as_slice(), &[7, 9, 5]);

    let worker = ds.worker_init(0).unwrap();
    let sample = ds.get(&worker, 5).unwrap();
    assert_eq!(sample.outvar["x_t2"], fx.native(0, 7, &[0]));
    assert_eq!(sample.outvar["x_t4"], fx.native(0, 9, &[0]));
    assert_eq!(sample.outvar["x_t6"], fx.native(0, 5, &[0]));
}

// Subsampling

#[test]
fn subsampled_tables_are_distinct_and_stable() {
    let fx = Fixture::new(3, 12, 1, 2, 2);
    let ds = GridDataset::new(&fx.config(vec![0]).n_samples_per_year(4)).unwrap();
    assert_eq!(ds.len(), 12);
    assert_eq!(ds.catalog().n_samples_per_year_all(), 12);

    let tables: Vec<Vec<usize>> = (0..3).map(|y| ds.catalog().sample_table(y).unwrap().to_vec()).collect();
    for t in &tables {
        assert_eq!(t.len(), 4);
        assert!(t.iter().all(|&i| i < 12));
        assert_eq!(t.iter().collect::<HashSet<_>>().len(), 4);
    }

    let worker = ds.worker_init(0).unwrap();
    for _ in 0..3 {
        assert_eq!(ds.len(), 12);
        for idx in 0..ds.len() {
            let (year, local) = ds.catalog().locate(idx).unwrap();
            let sample = ds.get(&worker, idx).unwrap();
            assert_eq!(sample.invar["x_t0"], fx.native(year, tables[year][local], &[0]));
        }
    }
    let again: Vec<Vec<usize>> = (0..3).map(|y| ds.catalog().sample_table(y).unwrap().to_vec()).collect();
    assert_eq!(tables, again);
}

#[test]
fn seeded_subsampling_is_reproducible() {
    let fx = Fixture::new(2, 30, 1, 2, 2);
    let cfg = fx.config(vec![0]).n_samples_per_year(6).seed(42);
    let a = GridDataset::new(&cfg).unwrap();
    let b = GridDataset::new(&cfg).unwrap();
    for y in 0..2 {
        assert_eq!(a.catalog().sample_table(y), b.catalog().sample_table(y));
    }
}

#[test]
fn oversized_subsample_is_config_error() {
    let fx = Fixture::new(1, 10, 1, 2, 2);
    let err = GridDataset::new(&fx.config(vec![0]).n_samples_per_year(11)).err().unwrap();
    assert!(matches!(err, Error::Config(_)));
}

// Normalisation and channels

#[test]
fn fields_are_normalised_per_channel() {
    let means = [100.0, -50.0, 7.0];
    let stds = [4.0, 2.0, 0.5];
    let fx = Fixture::with_stats(1, 4, 3, (3, 3), &means, &stds);
    let ds = GridDataset::new(&fx.config(vec![0, 1, 2])).unwrap();
    let worker = ds.worker_init(0).unwrap();
    let sample = ds.get(&worker, 1).unwrap();

    let x = &sample.invar["x_t0"];
    let raw = fx.native(0, 1, &[0, 1, 2]);
    for ((c, h, w), &v) in x.indexed_iter() {
        let expected = (raw[[c, h, w]] - means[c]) / stds[c];
        assert!((v - expected).abs() <= 1e-4 * expected.abs().max(1.0));
    }

    let mut back = x.clone();
    ds.catalog().stats().denormalize(&mut back);
    for (a, b) in back.iter().zip(raw.iter()) {
        assert!((a - b).abs() <= 1e-3 * b.abs().max(1.0));
    }
}

#[test]
fn channel_selection_orders_output_and_stats() {
    let means = [1.0, 2.0, 3.0, 4.0];
    let stds = [1.0, 1.0, 1.0, 1.0];
    let fx = Fixture::with_stats(1, 3, 4, (2, 2), &means, &stds);
    let ds = GridDataset::new(&fx.config(vec![3, 0])).unwrap();
    let worker = ds.worker_init(0).unwrap();
    let x = ds.get(&worker, 0).unwrap().invar.remove("x_t0").unwrap();

    let raw = fx.native(0, 0, &[3, 0]);
    assert_eq!(x.shape(), &[2, 2, 2]);
    assert_eq!(x[[0, 1, 1]], raw[[0, 1, 1]] - 4.0);
    assert_eq!(x[[1, 0, 1]], raw[[1, 0, 1]] - 1.0);
}

#[test]
fn channel_beyond_stats_is_config_error() {
    let fx = Fixture::new(1, 3, 2, 2, 2);
    let err = GridDataset::new(&fx.config(vec![0, 2])).err().unwrap();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn stats_shape_mismatch_is_integrity_error() {
    let fx = Fixture::new(1, 3, 2, 2, 2);
    let bad = Array::from_shape_vec(IxDyn(&[1, 2, 2, 1]), vec![0.0f32; 4]).unwrap();
    write_npy(fx.stats_dir.join(STDS_FILE), &bad).unwrap();
    let err = GridDataset::new(&fx.config(vec![0, 1])).err().unwrap();
    assert!(matches!(err, Error::DataIntegrity(_)));
}

// Weights and keys

#[test]
fn weights_mirror_outputs() {
    let fx = Fixture::new(1, 10, 2, 5, 7);
    let ds = GridDataset::new(&fx.config(vec![1, 0]).tstep(3).n_tsteps(2).patch_size(2)).unwrap();
    assert_eq!(ds.invar_keys(), vec!["x_t0"]);
    assert_eq!(ds.outvar_keys(), vec!["x_t3", "x_t6"]);

    let worker = ds.worker_init(0).unwrap();
    for idx in [0, 4, 9] {
        let sample = ds.get(&worker, idx).unwrap();
        let out_keys: HashSet<_> = sample.outvar.keys().collect();
        let weight_keys: HashSet<_> = sample.lambda_weighting.keys().collect();
        assert_eq!(out_keys, weight_keys);
        for (key, out) in sample.outvar.iter() {
            let w = &sample.lambda_weighting[key];
            assert_eq!(w.shape(), out.shape());
            assert!(w.iter().all(|&v| v == 1.0));
        }
    }
}

#[test]
fn converter_sees_every_dict() {
    let fx = Fixture::new(1, 4, 1, 3, 4);
    let ds = GridDataset::new(&fx.config(vec![0]).patch_size(2)).unwrap();
    let worker = ds.worker_init(0).unwrap();
    let sample = ds.get_with(&worker, 2, &FlatTensors).unwrap();

    let x = &sample.invar["x_t0"];
    assert_eq!(x.shape, vec![1, 2, 4]);
    let expected: Vec<f32> = fx.native(0, 2, &[0]).slice(s![.., ..2, ..4]).iter().copied().collect();
    assert_eq!(x.data, expected);
    assert_eq!(sample.lambda_weighting["x_t1"].data, vec![1.0; 8]);
}

// Configuration errors

#[test]
fn missing_data_dir_is_config_error() {
    let fx = Fixture::new(1, 2, 1, 2, 2);
    let cfg = DatasetConfig::new(fx.data_dir.join("nope"), vec![0]);
    assert!(matches!(GridDataset::new(&cfg).err().unwrap(), Error::Config(_)));
}

#[test]
fn missing_stats_dir_is_config_error() {
    let fx = Fixture::new(1, 2, 1, 2, 2);
    std::fs::remove_dir_all(&fx.stats_dir).unwrap();
    assert!(matches!(
        GridDataset::new(&fx.config(vec![0])).err().unwrap(),
        Error::Config(_)
    ));
}

#[test]
fn explicit_stats_dir_overrides_default() {
    let fx = Fixture::new(1, 2, 1, 2, 2);
    let moved = fx.data_dir.parent().unwrap().join("elsewhere");
    std::fs::rename(&fx.stats_dir, &moved).unwrap();
    let ds = GridDataset::new(&fx.config(vec![0]).stats_dir(&moved)).unwrap();
    assert_eq!(ds.catalog().paths().stats_dir, moved);
}

#[test]
fn empty_data_dir_is_config_error() {
    let fx = Fixture::new(0, 2, 1, 2, 2);
    std::fs::write(fx.data_dir.join("README"), b"no archives here").unwrap();
    assert!(matches!(
        GridDataset::new(&fx.config(vec![0])).err().unwrap(),
        Error::Config(_)
    ));
}

#[test]
fn oversized_patch_is_config_error() {
    let fx = Fixture::new(1, 2, 1, 3, 8);
    assert!(matches!(
        GridDataset::new(&fx.config(vec![0]).patch_size(4)).err().unwrap(),
        Error::Config(_)
    ));
}

#[test]
fn zero_tstep_is_config_error() {
    let fx = Fixture::new(1, 4, 1, 2, 2);
    assert!(matches!(
        GridDataset::new(&fx.config(vec![0]).tstep(0).n_tsteps(3)).err().unwrap(),
        Error::Config(_)
    ));
}

// Cross-archive verification

fn shrink_second_year(fx: &Fixture) {
    let arr = Array4::<f32>::zeros((9, 2, 4, 4));
    write_npy(fx.data_dir.join("201802.npy"), &arr).unwrap();
}

#[test]
fn verification_catches_mismatched_archive() {
    let fx = Fixture::new(2, 10, 2, 4, 4);
    shrink_second_year(&fx);
    let err = GridDataset::new(&fx.config(vec![0]).verify_archives(true)).err().unwrap();
    assert!(matches!(err, Error::DataIntegrity(_)));
}

#[test]
fn first_archive_is_trusted_without_verification() {
    let fx = Fixture::new(2, 10, 2, 4, 4);
    shrink_second_year(&fx);
    let ds = GridDataset::new(&fx.config(vec![0])).unwrap();
    assert_eq!(ds.len(), 20);
    assert!(ds.catalog().archives().iter().all(|a| a.n_samples == 10));
}

// Malformed slices

struct SqueezedFormat;

struct SqueezedReader(NpyReader);

impl ArchiveFormat for SqueezedFormat {
    type Reader = SqueezedReader;

    const EXTENSION: &'static str = "npy";

    fn open(path: &Path) -> Result<SqueezedReader> {
        Ok(SqueezedReader(NpyArchive::open(path)?))
    }
}

impl ArchiveReader for SqueezedReader {
    fn shape(&self) -> Result<Vec<usize>> {
        self.0.shape()
    }

    fn read_slice(&self, sample: usize, chans: &[usize]) -> Result<ArrayD<f32>> {
        Ok(self.0.read_slice(sample, chans)?.index_axis_move(Axis(0), 0))
    }
}

#[test]
fn two_dimensional_slice_is_integrity_error() {
    let fx = Fixture::new(1, 3, 1, 2, 2);
    let ds = GridDataset::<SqueezedFormat>::with_format(&fx.config(vec![0])).unwrap();
    let worker = ds.worker_init(0).unwrap();
    assert!(matches!(ds.get(&worker, 0).unwrap_err(), Error::DataIntegrity(_)));
}

// Workers

#[test]
fn handles_from_another_dataset_are_rejected() {
    let one = Fixture::new(1, 3, 1, 2, 2);
    let two = Fixture::new(2, 3, 1, 2, 2);
    let small = GridDataset::new(&one.config(vec![0])).unwrap();
    let large = GridDataset::new(&two.config(vec![0])).unwrap();
    let worker = small.worker_init(0).unwrap();
    assert!(matches!(large.get(&worker, 0).unwrap_err(), Error::Config(_)));
}

#[test]
fn parallel_workers_hold_their_own_handles() {
    let fx = Fixture::new(3, 8, 2, 4, 4);
    let ds = GridDataset::new(&fx.config(vec![1, 0]).tstep(3)).unwrap();

    let results: Vec<(usize, usize)> = (0..ds.len())
        .into_par_iter()
        .map_init(
            || ds.worker_init(gridset::runtime::worker_id()).unwrap(),
            |worker, idx| {
                assert_eq!(worker.len(), 3);
                let sample = ds.get(worker, idx).unwrap();
                let (year, local) = ds.catalog().locate(idx).unwrap();
                assert_eq!(sample.invar["x_t0"], fx.native(year, local, &[1, 0]));
                (idx, sample.outvar.len())
            },
        )
        .collect();

    assert_eq!(results.len(), 24);
    assert!(results.iter().enumerate().all(|(i, &(idx, n))| i == idx && n == 1));
}
