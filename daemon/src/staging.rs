//! Temporary on-disk copies of uploads and derived audio.
//!
//! A [`StagedFile`] owns its path: [`StagedFile::release`] removes it
//! explicitly, and dropping it removes it as well, so every exit path of a run
//! leaves nothing behind. Removal errors are logged and swallowed.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::upload::UploadedAudio;

/// Suffix for uploads whose name carries no extension.
const FALLBACK_SUFFIX: &str = ".audio";

const PREFIX: &str = "scribe-";

/// Creates uniquely named staged files in one directory.
#[derive(Debug, Clone)]
pub struct Stager {
    dir: PathBuf,
}

impl Stager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write the whole upload to a fresh file.
    pub fn stage(&self, upload: &UploadedAudio) -> Result<StagedFile> {
        let suffix = upload
            .extension()
            .unwrap_or_else(|| FALLBACK_SUFFIX.to_string());

        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create staging directory: {}", self.dir.display())
        })?;

        let mut file = tempfile::Builder::new()
            .prefix(PREFIX)
            .suffix(&suffix)
            .tempfile_in(&self.dir)
            .context("Failed to create staged file")?;
        file.write_all(upload.bytes())
            .context("Failed to write staged upload")?;
        file.flush().context("Failed to flush staged upload")?;

        let staged = StagedFile::from_temp_path(file.into_temp_path());
        debug!(
            path = %staged.path().display(),
            bytes = upload.size(),
            "Staged upload"
        );
        Ok(staged)
    }

    /// Reserve an empty file with the given suffix, e.g. for transcoder output.
    pub fn reserve(&self, suffix: &str) -> Result<StagedFile> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create staging directory: {}", self.dir.display())
        })?;

        let file = tempfile::Builder::new()
            .prefix(PREFIX)
            .suffix(suffix)
            .tempfile_in(&self.dir)
            .context("Failed to reserve staged file")?;
        Ok(StagedFile::from_temp_path(file.into_temp_path()))
    }
}

impl Default for Stager {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

/// A staged artifact that is removed on release or drop.
#[derive(Debug)]
pub struct StagedFile {
    path: Option<TempPath>,
}

impl StagedFile {
    fn from_temp_path(path: TempPath) -> Self {
        Self { path: Some(path) }
    }

    pub fn path(&self) -> &Path {
        // Only `release` takes the path, and it consumes `self`.
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Remove the artifact. Failures are logged, never returned.
    pub fn release(mut self) {
        if let Some(path) = self.path.take() {
            remove(path);
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            remove(path);
        }
    }
}

fn remove(path: TempPath) {
    let staged_path = path.to_path_buf();
    match path.close() {
        Ok(()) => debug!(path = %staged_path.display(), "Released staged file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %staged_path.display(), error = %e, "Failed to remove staged file"),
    }
}

#[cfg(test)]
#[path = "staging_test.rs"]
mod tests;
