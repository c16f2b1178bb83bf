//! Error types

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of the persistence collaborator
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failure to accept or store a marker attachment
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("File type not allowed: {0}")]
    UnsupportedType(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid server configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}
