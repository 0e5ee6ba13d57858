use ahash::AHashMap;
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use rayon::prelude::*;
use std::path::PathBuf;
use tracing::info;

use gridset::{DatasetConfig, GridDataset, Sample, runtime};

/// Inspect a directory of per-year grid archives: resolve samples the way a
/// training loader would and report shapes and normalised moments.
#[derive(Parser, Debug)]
#[command(name = "gridset", version)]
struct Args {
    /// Directory holding the NNNNNN.npy archives
    #[arg(env = "GRIDSET_DATA_DIR")]
    data_dir: PathBuf,

    /// Channel indices to load, comma separated, in output order
    #[arg(long, value_delimiter = ',', required = true, env = "GRIDSET_CHANS")]
    chans: Vec<usize>,

    #[arg(long, default_value_t = 1, env = "GRIDSET_TSTEP")]
    tstep: usize,

    #[arg(long, default_value_t = 1, env = "GRIDSET_N_TSTEPS")]
    n_tsteps: usize,

    #[arg(long, env = "GRIDSET_PATCH_SIZE")]
    patch_size: Option<usize>,

    /// Randomly keep this many samples per archive
    #[arg(long, env = "GRIDSET_SAMPLES_PER_YEAR")]
    samples_per_year: Option<usize>,

    /// Statistics directory (default: <data_dir>/../stats)
    #[arg(long, env = "GRIDSET_STATS_DIR")]
    stats_dir: Option<PathBuf>,

    #[arg(long, env = "GRIDSET_SEED")]
    seed: Option<u64>,

    /// Inspect every archive and fail if any differs from the first
    #[arg(long)]
    verify_archives: bool,

    /// Only resolve the first N indices
    #[arg(long)]
    limit: Option<usize>,

    /// Worker threads (default: GRIDSET_THREADS, scheduler hints, or all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Print the catalog and exit without resolving samples
    #[arg(long)]
    describe: bool,
}

impl Args {
    fn dataset_config(&self) -> DatasetConfig {
        let mut cfg = DatasetConfig::new(&self.data_dir, self.chans.clone())
            .tstep(self.tstep)
            .n_tsteps(self.n_tsteps)
            .verify_archives(self.verify_archives);
        if let Some(p) = self.patch_size {
            cfg = cfg.patch_size(p);
        }
        if let Some(k) = self.samples_per_year {
            cfg = cfg.n_samples_per_year(k);
        }
        if let Some(dir) = &self.stats_dir {
            cfg = cfg.stats_dir(dir);
        }
        if let Some(s) = self.seed {
            cfg = cfg.seed(s);
        }
        cfg
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Moments {
    sum: f64,
    sum_sq: f64,
    count: f64,
}

impl Moments {
    fn of(field: &ndarray::Array3<f32>) -> Self {
        field.iter().fold(Self::default(), |m, &v| {
            let v = v as f64;
            Self {
                sum: m.sum + v,
                sum_sq: m.sum_sq + v * v,
                count: m.count + 1.0,
            }
        })
    }

    fn merge(self, other: Self) -> Self {
        Self {
            sum: self.sum + other.sum,
            sum_sq: self.sum_sq + other.sum_sq,
            count: self.count + other.count,
        }
    }

    fn mean_std(&self) -> (f64, f64) {
        if self.count == 0.0 {
            return (f64::NAN, f64::NAN);
        }
        let mean = self.sum / self.count;
        let var = (self.sum_sq / self.count - mean * mean).max(0.0);
        (mean, var.sqrt())
    }
}

type MomentTable = AHashMap<String, Moments>;

fn sample_moments(sample: &Sample) -> MomentTable {
    sample
        .invar
        .iter()
        .chain(sample.outvar.iter())
        .map(|(key, field)| (key.clone(), Moments::of(field)))
        .collect()
}

fn merge_tables(mut a: MomentTable, b: MomentTable) -> MomentTable {
    for (key, m) in b {
        let slot = a.entry(key).or_default();
        *slot = slot.merge(m);
    }
    a
}

fn describe(ds: &GridDataset) {
    let cat = ds.catalog();
    println!("data dir      : {}", cat.paths().data_dir.display());
    println!("stats dir     : {}", cat.paths().stats_dir.display());
    println!("archives      : {}", cat.n_years());
    println!(
        "samples/year  : {} of {}",
        cat.n_samples_per_year(),
        cat.n_samples_per_year_all()
    );
    println!("length        : {}", ds.len());
    println!("channels      : [{}]", cat.chans().iter().join(", "));
    println!(
        "image shape   : {} (native {})",
        cat.img_shape().iter().join("x"),
        cat.native_shape().iter().join("x")
    );
    println!("input keys    : {}", ds.invar_keys().join(", "));
    println!("output keys   : {}", ds.outvar_keys().join(", "));
}

fn scan(ds: &GridDataset, n: usize) -> Result<MomentTable> {
    let pb = ProgressBar::new(n as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} samples {msg}")?
            .progress_chars("=>-"),
    );

    let table = (0..n)
        .into_par_iter()
        .map_init(
            || ds.worker_init(runtime::worker_id()),
            |handles, idx| -> Result<MomentTable> {
                let handles = handles
                    .as_ref()
                    .map_err(|e| anyhow!("opening archive handles: {e}"))?;
                let sample = ds
                    .get(handles, idx)
                    .with_context(|| format!("resolving index {idx}"))?;
                pb.inc(1);
                Ok(sample_moments(&sample))
            },
        )
        .try_reduce(MomentTable::default, |a, b| {
            Ok::<_, anyhow::Error>(merge_tables(a, b))
        })?;

    pb.finish_with_message("done");
    Ok(table)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gridset=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    runtime::configure_thread_pool(args.threads);

    let ds = GridDataset::new(&args.dataset_config())
        .with_context(|| format!("building dataset from {}", args.data_dir.display()))?;
    describe(&ds);
    if args.describe {
        return Ok(());
    }

    let n = args.limit.map_or(ds.len(), |l| l.min(ds.len()));
    info!(samples = n, "scanning");
    let table = scan(&ds, n)?;

    let keys = ds.invar_keys().into_iter().chain(ds.outvar_keys());
    for key in keys {
        if let Some(m) = table.get(&key) {
            let (mean, std) = m.mean_std();
            println!("{key:>8}  mean={mean:+.4}  std={std:.4}");
        }
    }
    Ok(())
}
