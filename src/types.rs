//! Core data types used throughout the Bakker library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Configuration**: `StorageConfig` - how the storage engine reads and writes content
//! - **Storage**: `StorageMetadata` - the on-disk description of a storage directory
//! - **Operations**: `StoreReport`, `RestoreReport`, `StorageStats` - results of operations
//!
//! ## Examples
//!
//! ```rust
//! use bakker::types::StorageConfig;
//!
//! let config = StorageConfig::default()
//!     .chunk_size(1024 * 1024)
//!     .verify_on_store(false);
//! assert_eq!(config.chunk_size, 1024 * 1024);
//! ```

use crate::hashing::DEFAULT_CHUNK_SIZE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage engine configuration
///
/// Persisted in the storage directory's `metadata.json` when the storage
/// is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Read chunk used when copying content into and out of the blob pool
    pub chunk_size: usize,
    /// Re-hash content while copying it into the blob pool and reject it
    /// if it no longer matches the checkpoint
    pub verify_on_store: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            verify_on_store: true,
        }
    }
}

impl StorageConfig {
    /// Set the copy chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Enable or disable re-hashing on store
    pub fn verify_on_store(mut self, verify: bool) -> Self {
        self.verify_on_store = verify;
        self
    }
}

/// Description of a storage directory, stored as `metadata.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetadata {
    /// On-disk layout version
    pub format_version: u32,
    /// Bakker version that created the storage
    pub bakker_version: String,
    /// When the storage was initialized
    pub created_at: DateTime<Utc>,
    /// Configuration in effect
    pub config: StorageConfig,
}

/// Result of storing a checkpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreReport {
    /// Catalog key the checkpoint was stored under
    pub checkpoint_id: String,
    /// Blobs newly written to the pool
    pub blobs_written: usize,
    /// Referenced contents that were already in the pool
    pub blobs_reused: usize,
    /// Bytes copied into the pool
    pub bytes_written: u64,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Result of restoring a checkpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    /// ID of the checkpoint that was restored
    pub checkpoint_id: String,
    /// Regular files written
    pub files_restored: usize,
    /// Symlinks created
    pub symlinks_restored: usize,
    /// Directories created or reused
    pub directories_restored: usize,
    /// Total file bytes written
    pub bytes_written: u64,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of distinct blobs in the pool
    pub blob_count: usize,
    /// Total size of all blobs in bytes
    pub blob_bytes: u64,
    /// Number of catalog entries
    pub checkpoint_count: usize,
}
