//! PID-file lifecycle (`spec.md` §6 "PID file"): created on start, removed
//! on clean exit, presence at startup aborts with exit code 1.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    #[error("PID file {0} already exists; another instance may be running against this repo")]
    AlreadyPresent(PathBuf),

    #[error("failed to write PID file {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

/// Holds the PID file open for the process lifetime and removes it on
/// `Drop`, so a panic or early return still cleans up.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, PidFileError> {
        let path = path.into();
        if path.exists() {
            return Err(PidFileError::AlreadyPresent(path));
        }
        std::fs::write(&path, std::process::id().to_string())
            .map_err(|source| PidFileError::Write { path: path.clone(), source })?;
        Ok(Self { path })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), %err, "failed to remove PID file on exit");
        }
    }
}
