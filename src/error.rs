//! Error types for the Bakker library
//!
//! This module defines all error types that can occur while building,
//! storing and restoring checkpoints. Each fatal variant carries enough
//! context (path, checksum or checkpoint id) to diagnose the failure
//! without re-running the operation.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Bakker library
pub type Result<T> = std::result::Result<T, BakkerError>;

/// Main error type for all Bakker operations
#[derive(Debug, Error)]
pub enum BakkerError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Checkpoint name does not match `^[a-zA-Z0-9_.-]+$`
    #[error("Invalid checkpoint name: {0:?}")]
    InvalidName(String),

    /// Filesystem entry that is neither a file, a directory nor a symlink
    #[error("Unsupported file type: {path:?}")]
    UnsupportedFileType {
        /// Path to the unsupported entry
        path: PathBuf,
    },

    /// Node record carries a type tag other than file, symlink or directory
    #[error("Unknown node type: {0:?}")]
    UnknownNodeType(String),

    /// Node record is structurally invalid (missing children, duplicate names, ...)
    #[error("Malformed node record: {0}")]
    MalformedRecord(String),

    /// A checkpoint references content that is not in the blob pool
    #[error("Missing blob {checksum} referenced by checkpoint {checkpoint_id}")]
    MissingBlob {
        /// Checksum of the missing blob
        checksum: String,
        /// Checkpoint whose document references it
        checkpoint_id: String,
    },

    /// Catalog document could not be parsed into a checkpoint
    #[error("Corrupt catalog entry {checkpoint_id}: {reason}")]
    CorruptCatalogEntry {
        /// Identifier of the offending catalog entry
        checkpoint_id: String,
        /// What went wrong while parsing it
        reason: String,
    },

    /// Checkpoint not found in the catalog
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// Checksum string is not 16 hex characters
    #[error("Invalid checksum: {0:?}")]
    InvalidChecksum(String),

    /// Timestamp string is not an ISO-8601 date-time
    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// Checkpoint identifier string could not be decoded
    #[error("Invalid checkpoint id {id:?}: {reason}")]
    InvalidCheckpointId {
        /// The identifier as given
        id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Content read while storing does not match the checksum computed at build time
    #[error("Hash mismatch for {path:?} - expected: {expected}, actual: {actual}")]
    HashMismatch {
        /// Source path whose content changed
        path: PathBuf,
        /// Checksum recorded in the checkpoint
        expected: String,
        /// Checksum of the content actually read
        actual: String,
    },

    /// Restore destination cannot receive the checkpoint
    #[error("Invalid restore destination {path:?}: {reason}")]
    InvalidDestination {
        /// Destination as given
        path: PathBuf,
        /// Why it was refused
        reason: String,
    },

    /// Storage is not initialized
    #[error("Storage not initialized at path: {0:?}")]
    StorageNotInitialized(PathBuf),

    /// Storage already exists
    #[error("Storage already exists at path: {0:?}")]
    StorageAlreadyExists(PathBuf),

    /// Storage was written by an incompatible format version
    #[error("Incompatible storage format: found version {found}, expected {expected}")]
    IncompatibleFormat {
        /// Version recorded in the storage metadata
        found: u32,
        /// Version this build understands
        expected: u32,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BakkerError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        BakkerError::Internal(msg.into())
    }

    /// Create a corrupt catalog entry error for `checkpoint_id`
    pub fn corrupt_entry(checkpoint_id: impl Into<String>, reason: impl ToString) -> Self {
        BakkerError::CorruptCatalogEntry {
            checkpoint_id: checkpoint_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error indicates corruption of stored data
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            BakkerError::MissingBlob { .. }
                | BakkerError::CorruptCatalogEntry { .. }
                | BakkerError::UnknownNodeType(_)
                | BakkerError::MalformedRecord(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            BakkerError::CheckpointNotFound(id) => {
                format!("Checkpoint '{}' not found. Use 'bakker list' to see stored checkpoints.", id)
            }
            BakkerError::InvalidName(name) => {
                format!(
                    "Checkpoint name {:?} is invalid. Names may only contain letters, digits, '_', '.' and '-'.",
                    name
                )
            }
            BakkerError::StorageNotInitialized(path) => {
                format!("No storage found at {:?}. Run 'bakker backup' to create one.", path)
            }
            BakkerError::MissingBlob { checksum, checkpoint_id } => {
                format!(
                    "Checkpoint '{}' references blob {} which is not in storage. The storage is corrupt.",
                    checkpoint_id, checksum
                )
            }
            _ => self.to_string(),
        }
    }
}
