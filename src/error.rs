//! Error types for AtlasStore
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::record::Document;

/// Result type alias using AtlasError
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Unified error type for AtlasStore operations
#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    /// A byte span (or a whole file) could not be read back as a record
    #[error("Corrupt record '{key}': {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Writing, syncing or renaming during a save failed; the original file is kept
    #[error("Store write failed for {}: {reason}", path.display())]
    StoreWrite { path: PathBuf, reason: String },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    // -------------------------------------------------------------------------
    // Record Codec Errors
    // -------------------------------------------------------------------------
    /// The raw document is kept so the failure can be diagnosed from logs
    #[error("Failed to decode record '{key}': {reason}")]
    Decode {
        key: String,
        reason: String,
        document: Box<Document>,
    },

    #[error("Failed to encode record '{key}': {reason}")]
    Encode { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Manager Errors
    // -------------------------------------------------------------------------
    #[error("Manager '{manager}' is already saving (in progress for {elapsed:?}); this attempt is ignored")]
    ConcurrentSave { manager: String, elapsed: Duration },

    // -------------------------------------------------------------------------
    // Startup Errors
    // -------------------------------------------------------------------------
    #[error("Startup step '{step}' did not finish within {timeout:?}")]
    StartupTimeout { step: String, timeout: Duration },

    #[error("Startup step '{step}' failed: {reason}")]
    StartupStep { step: String, reason: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AtlasError {
    /// Shorthand for a corrupt-record error
    pub(crate) fn corrupt(key: impl Into<String>, reason: impl ToString) -> Self {
        AtlasError::CorruptRecord {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a store-write error
    pub(crate) fn store_write(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        AtlasError::StoreWrite {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for AtlasError {
    fn from(err: serde_json::Error) -> Self {
        AtlasError::Serialization(err.to_string())
    }
}
