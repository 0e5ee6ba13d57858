//! Worker pool sizing for parallel scans.

use rayon::ThreadPoolBuilder;
use std::sync::Once;
use tracing::{info, warn};

struct ThreadConfig {
    count: usize,
    source: String,
}

const ENV_HINTS: [&str; 6] = [
    "GRIDSET_THREADS",
    "RAYON_NUM_THREADS",
    "SLURM_CPUS_PER_TASK",
    "SLURM_CPUS_ON_NODE",
    "PBS_NP",
    "OMP_NUM_THREADS",
];

fn parse_thread_hint(key: &str, value: &str) -> Option<ThreadConfig> {
    match value.trim().parse::<usize>() {
        Ok(count) if count > 0 => Some(ThreadConfig {
            count,
            source: key.to_string(),
        }),
        _ => None,
    }
}

fn detect_thread_config(requested: Option<usize>) -> ThreadConfig {
    if let Some(count) = requested.filter(|&n| n > 0) {
        return ThreadConfig {
            count,
            source: "--threads".to_string(),
        };
    }

    let from_env = ENV_HINTS.iter().find_map(|&key| {
        std::env::var(key)
            .ok()
            .and_then(|v| parse_thread_hint(key, &v))
    });
    if let Some(cfg) = from_env {
        return cfg;
    }

    let fallback = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1);

    ThreadConfig {
        count: fallback,
        source: "available_parallelism".to_string(),
    }
}

/// Size the global rayon pool once per process; later calls are no-ops.
pub fn configure_thread_pool(requested: Option<usize>) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let cfg = detect_thread_config(requested);
        match ThreadPoolBuilder::new()
            .num_threads(cfg.count)
            .thread_name(|i| format!("gridset-worker-{i}"))
            .build_global()
        {
            Ok(_) => info!(threads = cfg.count, hint = %cfg.source, "configured worker pool"),
            Err(err) => warn!("failed to configure worker pool ({err}); continuing with default"),
        }
    });
}

/// Id of the calling pool thread, `0` outside the pool.
pub fn worker_id() -> usize {
    rayon::current_thread_index().unwrap_or(0)
}
