use std::path::PathBuf;

/// Every failure the dataset can report.
///
/// Nothing here is retried: configuration and integrity problems halt
/// construction, access-time problems halt the calling `get`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing directories, bad channel lists, oversized per-year sample counts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Archive or statistics contents do not have the expected shape.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Flat index outside `[0, len)`.
    #[error("index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    ReadNpy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    #[error("failed to view {path}: {source}")]
    ViewNpy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ViewNpyError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
