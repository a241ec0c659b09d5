//! # Bakker - Deduplicating directory backups
//!
//! A backup library that captures directory trees as immutable,
//! content-identified checkpoints and stores each distinct content once.
//!
//! ## Overview
//!
//! Bakker lets you:
//! - Capture a directory tree as a checkpoint with a single deterministic checksum
//! - Store checkpoints with storage proportional to distinct content, not file count
//! - Restore any stored checkpoint byte- and permission-exact
//! - Address checkpoints by a canonical, human-readable identifier
//!
//! ## Architecture
//!
//! - **Tree nodes**: files, symlinks and directories are captured as a tree of
//!   [`TreeNode`]s. Files hash their content, symlinks hash their target and
//!   directories hash their children's checksums in name order, so identical
//!   sub-trees have identical checksums wherever they live
//! - **Checkpoints**: a root node plus a capture time and an optional name,
//!   serialized as a JSON document
//! - **Identifiers**: `<checksum>_<time>[_<name>]`, the catalog key of a checkpoint
//! - **Content-Addressable Storage**: a blob pool keyed by checksum and a catalog
//!   of checkpoint documents keyed by identifier
//!
//! Checksums are 64-bit XXH64 digests. They are fast and stable, but not
//! cryptographic: they identify content, they do not authenticate it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bakker::{Checkpoint, FileSystemStorage, StorageConfig};
//! use std::path::Path;
//!
//! # fn main() -> bakker::Result<()> {
//! let storage = FileSystemStorage::init_or_open(Path::new("./backups"), StorageConfig::default())?;
//!
//! // Capture and store
//! let checkpoint = Checkpoint::build_checkpoint(Path::new("./project"), Some("nightly"))?;
//! let report = storage.store(Path::new("./project"), &checkpoint)?;
//! println!("Stored {} ({} new blobs)", report.checkpoint_id, report.blobs_written);
//!
//! // List and restore
//! for id in storage.retrieve_checkpoint_ids()? {
//!     println!("{}", id);
//! }
//! storage.retrieve(Path::new("./restored"), &report.checkpoint_id)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Decoding identifiers
//!
//! ```rust
//! use bakker::CheckpointMeta;
//!
//! let meta: CheckpointMeta = "3c5e1f0a9b2d4e68_2024-01-01T12:00:00.000000_nightly_full"
//!     .parse()
//!     .unwrap();
//! assert_eq!(meta.name(), Some("nightly_full"));
//! assert_eq!(meta.checksum.to_string(), "3c5e1f0a9b2d4e68");
//! ```
//!
//! ## What is captured
//!
//! - Regular file content and permission bits
//! - Symlink targets, never followed
//! - Directory structure and permission bits
//!
//! Ownership, timestamps, extended attributes and special files (sockets,
//! FIFOs, devices) are not captured; special files are skipped with a warning.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, BakkerError>`. Corruption of stored
//! data (missing blobs, unreadable catalog entries) is reported with
//! dedicated variants, see [`BakkerError::is_corruption`].
//!
//! ## Module Organization
//!
//! - [`hashing`]: Checksums and the XXH64 accumulator
//! - [`node`]: Tree node model and directory walking
//! - [`checkpoint`]: Checkpoint building and the JSON document
//! - [`meta`]: Checkpoint identifiers
//! - [`storage`]: Content-addressable storage engine
//! - [`types`]: Configuration and report types
//! - [`error`]: Error types and handling

// Public API modules
pub mod checkpoint;
pub mod error;
pub mod hashing;
pub mod meta;
pub mod node;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use checkpoint::{Checkpoint, CheckpointName, CheckpointSummary};
pub use error::{BakkerError, Result};
pub use hashing::Checksum;
pub use meta::CheckpointMeta;
pub use node::{build_node, DirectoryNode, FileNode, NodeKind, SymlinkNode, TreeNode};
pub use storage::FileSystemStorage;
pub use types::*;
