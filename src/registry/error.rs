//! Errors raised by the registries. Engine failures are not among them:
//! they end up in a job's `last_error` instead.

use super::RegistryKind;
use thiserror::Error;

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} entry not found: {name}")]
    NotFound { kind: RegistryKind, name: String },

    /// The name cannot be used as a folder name.
    #[error("invalid {kind} name: {name:?}")]
    InvalidName { kind: RegistryKind, name: String },

    /// The entry is being trained, transcribed or populated right now.
    #[error("{kind} entry {name} is busy")]
    Busy { kind: RegistryKind, name: String },

    #[error("transcription {0} has not completed yet")]
    NotCompleted(String),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("preprocessing dataset '{dataset}' failed: {message}")]
    Preprocessing { dataset: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RegistryError {
    pub fn not_found(kind: RegistryKind, name: impl Into<String>) -> Self {
        RegistryError::NotFound { kind, name: name.into() }
    }

    pub fn busy(kind: RegistryKind, name: impl Into<String>) -> Self {
        RegistryError::Busy { kind, name: name.into() }
    }
}
