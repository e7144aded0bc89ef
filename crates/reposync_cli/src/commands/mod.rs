//! CLI command implementations.

pub mod gc;
pub mod inspect;
pub mod verify;

use reposync_core::{CoreError, Depot};
use reposync_storage::{FileBackend, StorageError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by the maintenance commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The path holds no depot.
    #[error("no depot found at {0:?}")]
    NoDepot(PathBuf),

    /// Backend failure while opening.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Engine failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// JSON output failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    VerifyFailed(usize),
}

/// Result type for the commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format of reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens the file-backed depot at `path`. Never creates one.
pub fn open_depot(path: &Path) -> CliResult<Depot> {
    if !path.is_dir() {
        return Err(CliError::NoDepot(path.to_path_buf()));
    }
    let backend = FileBackend::open(path)?;
    let depot = Depot::open(Arc::new(backend))?;
    tracing::debug!(path = %path.display(), "depot opened");
    Ok(depot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_not_a_depot() {
        let dir = reposync_testkit::TestDepot::file();
        let absent = dir.path().unwrap().join("nowhere");
        assert!(matches!(open_depot(&absent), Err(CliError::NoDepot(_))));
        assert!(!absent.exists());
    }
}
