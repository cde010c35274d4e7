use std::path::PathBuf;

use campus_store::StoreError;

use crate::codec::FormatError;
use crate::config::ConfigError;
use crate::job::{JobError, JobStoreError};

/// Errors that stop an operation as a whole.
///
/// Per-record failures never surface here; they become `error` outcomes
/// in the report.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("cannot resolve entity type '{entity_type}': {source}")]
    EntityResolution {
        entity_type: String,
        #[source]
        source: StoreError,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("clearing {entity_type} failed: {source}")]
    Clear {
        entity_type: String,
        #[source]
        source: StoreError,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("backup job {0} not found")]
    BackupNotFound(String),
    #[error("backup job {0} has no usable file")]
    BackupUnavailable(String),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Jobs(#[from] JobStoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RestoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RestoreError::Io {
            path: path.into(),
            source,
        }
    }
}
