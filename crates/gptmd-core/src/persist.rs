//! Writing exported files to their destination.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::export::AssetFile;

/// Destination for exported files.
pub trait AssetSink {
    /// Persists one file and returns where it ended up.
    ///
    /// # Errors
    /// Returns an error if the file could not be written.
    fn save(&self, file: &AssetFile) -> Result<PathBuf>;
}

/// Writes files into one directory, creating it on demand.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AssetSink for DirectorySink {
    fn save(&self, file: &AssetFile) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory {}", self.dir.display()))?;

        let path = self.dir.join(&file.filename);
        let tmp_path = self.dir.join(format!(".{}.tmp", file.filename));
        fs::write(&tmp_path, &file.bytes)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(path)
    }
}

/// Outcome of persisting one export.
#[derive(Debug, Default)]
pub struct PersistReport {
    pub saved: Vec<PathBuf>,
    /// `(filename, error)` for every file that could not be saved.
    pub failed: Vec<(String, String)>,
}

impl PersistReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Saves every file, logging each outcome.
///
/// A failed file is reported and skipped; it is never retried and does not
/// stop the remaining files.
pub fn persist_all(files: &[AssetFile], sink: &impl AssetSink) -> PersistReport {
    let mut report = PersistReport::default();
    for file in files {
        match sink.save(file) {
            Ok(path) => {
                info!(path = %path.display(), bytes = file.bytes.len(), "saved");
                report.saved.push(path);
            }
            Err(err) => {
                warn!(file = %file.filename, error = %format!("{err:#}"), "save failed");
                report.failed.push((file.filename.clone(), format!("{err:#}")));
            }
        }
    }
    report
}
