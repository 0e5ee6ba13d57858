use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// `NNNNNN.<ext>`: exactly six ASCII digits, then the extension.
pub fn is_archive_name(name: &str, ext: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, e)) => e == ext && stem.len() == 6 && stem.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Archive files directly under `dir`, in chronological (= lexicographic) order.
pub fn discover_archives(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let io_err = |source| Error::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if is_archive_name(name, ext) && entry.path().is_file() {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}
