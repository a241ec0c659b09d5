//! Content-addressable storage implementation for Bakker
//!
//! This module provides the storage engine that persists checkpoints with
//! storage proportional to distinct content rather than file count:
//!
//! - **Deduplication**: each distinct file or symlink content is stored
//!   once in the blob pool, keyed by its checksum, no matter how many
//!   files or checkpoints reference it
//! - **Catalog**: each checkpoint document is stored under its checkpoint id
//! - **Restore**: any stored checkpoint can be materialized byte- and
//!   permission-exact into a destination directory
//!
//! ## Architecture
//!
//! ```text
//! storage_root/
//! ├── metadata.json          # Storage metadata and configuration
//! ├── blobs/                 # Content-addressed blob pool (sharded)
//! │   └── <prefix>/          # First 2 chars of the checksum
//! │       └── <suffix>       # Remaining 14 chars
//! └── checkpoints/           # Catalog
//!     └── <checkpoint_id>.json
//! ```
//!
//! The pool and the catalog are append-only: nothing here mutates or
//! deletes an entry once written. Every write goes to a temporary file in
//! the target directory and is renamed into place, so readers never see a
//! partial blob or document.
//!
//! ## Concurrency
//!
//! All operations are blocking and single-threaded. Concurrent `store`
//! calls from separate processes are harmless for blobs (same checksum,
//! same bytes) but catalog writes to the same key are not ordered;
//! callers must serialize `store` calls themselves.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bakker::{Checkpoint, FileSystemStorage, StorageConfig};
//! use std::path::Path;
//!
//! # fn main() -> bakker::Result<()> {
//! let storage = FileSystemStorage::init_or_open(Path::new("./backups"), StorageConfig::default())?;
//!
//! let checkpoint = Checkpoint::build_checkpoint(Path::new("./project"), Some("nightly"))?;
//! let report = storage.store(Path::new("./project"), &checkpoint)?;
//!
//! storage.retrieve(Path::new("./restored"), &report.checkpoint_id)?;
//! # Ok(())
//! # }
//! ```

use crate::checkpoint::Checkpoint;
use crate::error::{BakkerError, Result};
use crate::hashing::{Checksum, ChecksumBuilder};
use crate::node::{BuildOptions, TreeNode};
use crate::types::{RestoreReport, StorageConfig, StorageMetadata, StorageStats, StoreReport};
use crate::utils;
use chrono::Utc;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, trace, warn};

/// On-disk layout version written to `metadata.json`
pub const FORMAT_VERSION: u32 = 1;

const METADATA_FILE: &str = "metadata.json";
const BLOB_DIR: &str = "blobs";
const CATALOG_DIR: &str = "checkpoints";
const CATALOG_EXTENSION: &str = "json";

/// Filesystem-backed content-addressed storage
#[derive(Debug)]
pub struct FileSystemStorage {
    /// Root directory for storage
    root: PathBuf,
    /// Storage metadata and configuration
    metadata: StorageMetadata,
}

impl FileSystemStorage {
    /// Initialize a new storage directory
    ///
    /// The directory may already exist (for example an empty mount point)
    /// but must not already hold a storage.
    ///
    /// # Errors
    ///
    /// - [`BakkerError::StorageAlreadyExists`] if `metadata.json` is already present
    /// - [`BakkerError::Io`] if filesystem operations fail
    pub fn init(root: &Path, config: StorageConfig) -> Result<Self> {
        let metadata_path = root.join(METADATA_FILE);
        if metadata_path.exists() {
            return Err(BakkerError::StorageAlreadyExists(root.to_path_buf()));
        }

        fs::create_dir_all(root.join(BLOB_DIR))?;
        fs::create_dir_all(root.join(CATALOG_DIR))?;

        let metadata = StorageMetadata {
            format_version: FORMAT_VERSION,
            bakker_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            config,
        };
        utils::atomic_write(&metadata_path, serde_json::to_string_pretty(&metadata)?.as_bytes())?;

        info!("Initialized storage at {:?}", root);
        Ok(Self {
            root: root.to_path_buf(),
            metadata,
        })
    }

    /// Open an existing storage directory
    ///
    /// # Errors
    ///
    /// - [`BakkerError::StorageNotInitialized`] if there is no `metadata.json`
    /// - [`BakkerError::IncompatibleFormat`] if it was written by another format version
    pub fn open(root: &Path) -> Result<Self> {
        let metadata_path = root.join(METADATA_FILE);
        if !metadata_path.exists() {
            return Err(BakkerError::StorageNotInitialized(root.to_path_buf()));
        }

        let metadata: StorageMetadata = serde_json::from_str(&fs::read_to_string(&metadata_path)?)?;
        if metadata.format_version != FORMAT_VERSION {
            return Err(BakkerError::IncompatibleFormat {
                found: metadata.format_version,
                expected: FORMAT_VERSION,
            });
        }

        debug!("Opened storage at {:?}", root);
        Ok(Self {
            root: root.to_path_buf(),
            metadata,
        })
    }

    /// Open the storage at `root`, initializing it with `config` if there is none
    pub fn init_or_open(root: &Path, config: StorageConfig) -> Result<Self> {
        if root.join(METADATA_FILE).exists() {
            Self::open(root)
        } else {
            Self::init(root, config)
        }
    }

    /// Build options matching this storage
    ///
    /// Uses the configured chunk size and excludes the storage root, so a
    /// storage kept inside the tree it backs up (such as `./.bakker` when
    /// backing up `.`) never captures itself.
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions::default()
            .chunk_size(self.metadata.config.chunk_size)
            .exclude(&self.root)
    }

    /// Store a checkpoint captured from `source_root`
    ///
    /// Every file and symlink of the checkpoint whose checksum is not yet
    /// in the blob pool is copied in from `source_root` joined with its
    /// relative path; contents already present are skipped entirely. The
    /// checkpoint document is written to the catalog last, so a catalog
    /// entry never references a blob that was not written.
    ///
    /// Storing the same checkpoint twice rewrites an identical document
    /// under the same key.
    ///
    /// # Errors
    ///
    /// - [`BakkerError::HashMismatch`] if a source changed since the
    ///   checkpoint was built (with `verify_on_store`)
    /// - [`BakkerError::Io`] if reading sources or writing storage fails
    pub fn store(&self, source_root: &Path, checkpoint: &Checkpoint) -> Result<StoreReport> {
        let start = Instant::now();
        let checkpoint_id = checkpoint.meta().to_string();
        info!("Storing checkpoint {} from {:?}", checkpoint_id, source_root);

        let mut report = StoreReport {
            checkpoint_id: checkpoint_id.clone(),
            ..Default::default()
        };

        for (node, relative) in checkpoint.iter() {
            let checksum = node.checksum();
            let source = join_relative(source_root, &relative);

            let written = match node {
                TreeNode::Directory(_) => continue,
                _ if self.blob_exists(&checksum) => {
                    trace!("Blob {} already stored, skipping {:?}", checksum, relative);
                    report.blobs_reused += 1;
                    continue;
                }
                TreeNode::File(_) => {
                    let mut file = File::open(&source)?;
                    self.write_blob(&checksum, &mut file, &source)?
                }
                TreeNode::Symlink(_) => {
                    let target = utils::read_symlink_bytes(&source)?;
                    self.write_blob(&checksum, &mut Cursor::new(target), &source)?
                }
            };

            report.blobs_written += 1;
            report.bytes_written += written;
        }

        let document = checkpoint.to_json()?;
        utils::atomic_write(&self.catalog_path(&checkpoint_id)?, document.as_bytes())?;

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Stored checkpoint {} in {}ms ({} blobs written, {} reused)",
            checkpoint_id, report.duration_ms, report.blobs_written, report.blobs_reused
        );
        Ok(report)
    }

    /// List every checkpoint id in the catalog, sorted
    pub fn retrieve_checkpoint_ids(&self) -> Result<Vec<String>> {
        let catalog_dir = self.root.join(CATALOG_DIR);
        let mut ids = Vec::new();

        if catalog_dir.exists() {
            for entry in fs::read_dir(catalog_dir)? {
                let path = entry?.path();
                if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(CATALOG_EXTENSION) {
                    continue;
                }
                if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                    if !id.starts_with('.') {
                        ids.push(id.to_string());
                    }
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Check whether the catalog holds `checkpoint_id`
    pub fn contains_checkpoint(&self, checkpoint_id: &str) -> bool {
        self.catalog_path(checkpoint_id)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Load and parse a checkpoint document from the catalog
    ///
    /// # Errors
    ///
    /// - [`BakkerError::CheckpointNotFound`] if there is no such entry
    /// - [`BakkerError::CorruptCatalogEntry`] if the document cannot be
    ///   parsed, including unknown node types
    pub fn load_checkpoint(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        let path = self.catalog_path(checkpoint_id)?;
        if !path.is_file() {
            return Err(BakkerError::CheckpointNotFound(checkpoint_id.to_string()));
        }

        let bytes = fs::read(&path)?;
        let json = String::from_utf8(bytes).map_err(|e| BakkerError::corrupt_entry(checkpoint_id, e))?;
        let checkpoint = Checkpoint::from_json(&json).map_err(|e| BakkerError::corrupt_entry(checkpoint_id, e))?;

        let derived_id = checkpoint.meta().to_string();
        if derived_id != checkpoint_id {
            warn!("Catalog entry {} describes checkpoint {}", checkpoint_id, derived_id);
        }

        Ok(checkpoint)
    }

    /// Restore a stored checkpoint into `destination`
    ///
    /// Directories are created before their children, file bytes are copied
    /// from the blob pool, symlinks are recreated with their stored target
    /// and permission bits are applied after content is written (directory
    /// permissions last, deepest first). Entries already at the destination
    /// that conflict with the checkpoint are replaced; unrelated entries
    /// are left alone, so restoring twice gives the same result.
    ///
    /// Every referenced blob is checked before anything is written, so a
    /// missing blob aborts the restore without touching the destination.
    ///
    /// When the checkpoint root is a file or a symlink, `destination` is the
    /// path of that entry itself and must not be an existing directory.
    ///
    /// # Errors
    ///
    /// - [`BakkerError::CheckpointNotFound`] / [`BakkerError::CorruptCatalogEntry`]
    ///   if the document cannot be loaded
    /// - [`BakkerError::MissingBlob`] if a referenced checksum has no blob
    /// - [`BakkerError::InvalidDestination`] if a file or symlink root would
    ///   replace an existing directory
    /// - [`BakkerError::Io`] if writing the destination fails
    pub fn retrieve(&self, destination: &Path, checkpoint_id: &str) -> Result<RestoreReport> {
        let start = Instant::now();
        info!("Restoring checkpoint {} into {:?}", checkpoint_id, destination);

        let checkpoint = self.load_checkpoint(checkpoint_id)?;

        for (node, _) in checkpoint.iter() {
            if node.has_blob() && !self.blob_exists(&node.checksum()) {
                return Err(missing_blob(&node.checksum(), checkpoint_id));
            }
        }

        if !checkpoint.root().is_dir() && fs::symlink_metadata(destination).map(|m| m.is_dir()).unwrap_or(false) {
            return Err(BakkerError::InvalidDestination {
                path: destination.to_path_buf(),
                reason: format!("checkpoint root is a {} but the destination is a directory", checkpoint.root().kind()),
            });
        }

        let mut report = RestoreReport {
            checkpoint_id: checkpoint_id.to_string(),
            ..Default::default()
        };
        let mut directories = Vec::new();

        for (node, relative) in checkpoint.iter() {
            let target = join_relative(destination, &relative);

            match node {
                TreeNode::Directory(dir) => {
                    prepare_directory(&target)?;
                    directories.push((target, dir.permissions));
                    report.directories_restored += 1;
                }
                TreeNode::File(file) => {
                    let written = self.restore_file(&file.checksum, &target, checkpoint_id)?;
                    utils::set_permissions(&target, file.permissions)?;
                    report.files_restored += 1;
                    report.bytes_written += written;
                }
                TreeNode::Symlink(link) => {
                    let mut target_bytes = Vec::new();
                    self.open_blob(&link.checksum, checkpoint_id)?
                        .read_to_end(&mut target_bytes)?;

                    utils::remove_existing(&target)?;
                    utils::create_symlink(&target_bytes, &target)?;
                    report.symlinks_restored += 1;
                }
            }
            trace!("Restored {} {:?}", node.kind(), relative);
        }

        for (path, permissions) in directories.iter().rev() {
            utils::set_permissions(path, *permissions)?;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Restored checkpoint {} in {}ms ({} files, {} symlinks, {} directories)",
            checkpoint_id,
            report.duration_ms,
            report.files_restored,
            report.symlinks_restored,
            report.directories_restored
        );
        Ok(report)
    }

    /// Check if the pool holds a blob for `checksum`
    pub fn blob_exists(&self, checksum: &Checksum) -> bool {
        self.blob_path(checksum).is_file()
    }

    /// Read a whole blob into memory
    ///
    /// # Errors
    ///
    /// - [`BakkerError::Io`] with `NotFound` if there is no such blob
    pub fn load_blob(&self, checksum: &Checksum) -> Result<Vec<u8>> {
        Ok(fs::read(self.blob_path(checksum))?)
    }

    /// List the checksums of every blob in the pool
    pub fn list_blobs(&self) -> Result<Vec<Checksum>> {
        let mut blobs = Vec::new();

        let blob_dir = self.root.join(BLOB_DIR);
        if !blob_dir.exists() {
            return Ok(blobs);
        }

        for shard_entry in fs::read_dir(blob_dir)? {
            let shard_entry = shard_entry?;
            if !shard_entry.path().is_dir() {
                continue;
            }
            let shard_name = shard_entry.file_name().to_string_lossy().to_string();

            for blob_entry in fs::read_dir(shard_entry.path())? {
                let blob_entry = blob_entry?;
                if !blob_entry.path().is_file() {
                    continue;
                }
                let blob_name = blob_entry.file_name().to_string_lossy().to_string();

                // Leftover temp files and foreign entries don't parse
                if let Ok(checksum) = format!("{}{}", shard_name, blob_name).parse::<Checksum>() {
                    blobs.push(checksum);
                }
            }
        }

        blobs.sort();
        Ok(blobs)
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        let blobs = self.list_blobs()?;
        let mut blob_bytes = 0;
        for checksum in &blobs {
            blob_bytes += fs::metadata(self.blob_path(checksum))?.len();
        }

        Ok(StorageStats {
            blob_count: blobs.len(),
            blob_bytes,
            checkpoint_count: self.retrieve_checkpoint_ids()?.len(),
        })
    }

    /// Get storage root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get storage metadata
    pub fn metadata(&self) -> &StorageMetadata {
        &self.metadata
    }

    /// Path of the blob for `checksum` (with sharding)
    pub fn blob_path(&self, checksum: &Checksum) -> PathBuf {
        let hex = checksum.to_string();
        let (prefix, suffix) = hex.split_at(2);
        self.root.join(BLOB_DIR).join(prefix).join(suffix)
    }

    /// Path of the catalog document for `checkpoint_id`
    fn catalog_path(&self, checkpoint_id: &str) -> Result<PathBuf> {
        validate_catalog_key(checkpoint_id)?;
        Ok(self
            .root
            .join(CATALOG_DIR)
            .join(format!("{}.{}", checkpoint_id, CATALOG_EXTENSION)))
    }

    /// Copy `reader` into the pool under `checksum`, returning the byte count
    fn write_blob<R: Read>(&self, checksum: &Checksum, reader: &mut R, source: &Path) -> Result<u64> {
        let blob_path = self.blob_path(checksum);
        let blob_dir = blob_path
            .parent()
            .ok_or_else(|| BakkerError::internal(format!("Blob path {:?} has no parent", blob_path)))?;
        fs::create_dir_all(blob_dir)?;

        let config = &self.metadata.config;
        let mut temp = NamedTempFile::new_in(blob_dir)?;
        let mut hasher = ChecksumBuilder::new();
        let mut buffer = vec![0u8; config.chunk_size.max(1)];
        let mut total = 0u64;

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            temp.write_all(&buffer[..bytes_read])?;
            total += bytes_read as u64;
        }

        let actual = hasher.finish();
        if config.verify_on_store && actual != *checksum {
            return Err(BakkerError::HashMismatch {
                path: source.to_path_buf(),
                expected: checksum.to_string(),
                actual: actual.to_string(),
            });
        }

        temp.as_file().sync_all()?;
        temp.persist(&blob_path).map_err(|e| BakkerError::Io(e.error))?;

        trace!("Stored blob {} from {:?} ({} bytes)", checksum, source, total);
        Ok(total)
    }

    /// Open a blob for reading, reporting a missing blob against `checkpoint_id`
    fn open_blob(&self, checksum: &Checksum, checkpoint_id: &str) -> Result<File> {
        File::open(self.blob_path(checksum)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => missing_blob(checksum, checkpoint_id),
            _ => BakkerError::Io(e),
        })
    }

    /// Write a file's content from the pool to `target`
    ///
    /// Content goes to a temporary sibling first and is renamed over
    /// `target`, so a failure never leaves an empty or truncated file.
    fn restore_file(&self, checksum: &Checksum, target: &Path, checkpoint_id: &str) -> Result<u64> {
        let mut blob = self.open_blob(checksum, checkpoint_id)?;

        if fs::symlink_metadata(target).map(|m| m.is_dir()).unwrap_or(false) {
            utils::remove_existing(target)?;
        }

        let parent = target
            .parent()
            .ok_or_else(|| BakkerError::internal(format!("Restore target {:?} has no parent", target)))?;
        let mut temp = NamedTempFile::new_in(parent)?;
        let written = io::copy(&mut blob, &mut temp)?;
        temp.persist(target).map_err(|e| BakkerError::Io(e.error))?;

        Ok(written)
    }
}

/// Make sure a directory exists at `path` and is writable while it is filled
fn prepare_directory(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => {
            utils::remove_existing(path)?;
            fs::create_dir(path)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(path)?,
        Err(e) => return Err(e.into()),
    }

    // Recorded permissions are applied once all children are written
    utils::set_permissions(path, 0o700)
}

/// `base` joined with a walk path; the root's empty path maps to `base` itself
fn join_relative(base: &Path, relative: &Path) -> PathBuf {
    if relative.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

fn missing_blob(checksum: &Checksum, checkpoint_id: &str) -> BakkerError {
    BakkerError::MissingBlob {
        checksum: checksum.to_string(),
        checkpoint_id: checkpoint_id.to_string(),
    }
}

/// Catalog keys become file names, so they must be a single plain path component
fn validate_catalog_key(checkpoint_id: &str) -> Result<()> {
    let invalid = checkpoint_id.is_empty()
        || checkpoint_id.starts_with('.')
        || checkpoint_id.contains(['/', '\\', '\0']);

    if invalid {
        return Err(BakkerError::InvalidCheckpointId {
            id: checkpoint_id.to_string(),
            reason: "not usable as a catalog key".to_string(),
        });
    }
    Ok(())
}
