//! Error types for mtgate-sync.

use std::path::PathBuf;

use thiserror::Error;

use mtgate_codec::RenderError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// An artifact could not be persisted. Artifacts committed earlier in the
    /// same run stay on disk.
    #[error("failed to persist {path}: {source}")]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Artifact the failure is about, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            SyncError::PersistenceFailure { path, .. } => Some(path),
            SyncError::Render(_) => None,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::PersistenceFailure {
        path: path.into(),
        source,
    }
}
