//! Error types for pcb-cas-storage

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Input rejected before anything was persisted (or after staging was discarded).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The incoming stream or the staged file could not be written or hashed.
    #[error("Read failure on {target}: {source}")]
    ReadFailure {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object not found: digest {digest} at {}", .path.display())]
    NotFound { digest: String, path: PathBuf },

    /// Promotion failed after it started writing; partial artifacts were removed.
    #[error("Partial write rolled back at {}: {source}", .path.display())]
    PartialWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn read_failure(target: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::ReadFailure {
            target: target.into(),
            source,
        }
    }

    /// Whether the caller sent bad input and must not retry unchanged.
    pub fn is_client_error(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
