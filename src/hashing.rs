//! Content checksums for tree nodes
//!
//! Every node in a checkpoint is identified by a 64-bit XXH64 digest
//! (seed 0). The digest is a deduplication key, not an integrity channel,
//! so a fast non-cryptographic hash is used.
//!
//! - **Files** hash their raw byte stream, fed in sequential chunks. The
//!   chunk size never affects the digest.
//! - **Symlinks** hash the raw bytes of their unresolved target.
//! - **Directories** hash the concatenation of their children's raw digest
//!   bytes (8 bytes, big-endian) in ascending name order.
//!
//! Permissions and timestamps never enter a checksum.

use crate::error::{BakkerError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use xxhash_rust::xxh64::Xxh64;

/// Default read chunk for hashing and copying file content
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Length of a checksum's textual form
pub const CHECKSUM_HEX_LEN: usize = 16;

const SEED: u64 = 0;

/// A 64-bit content digest
///
/// Rendered as exactly 16 lowercase hex characters, which is the form
/// stored in checkpoint documents, blob file names and checkpoint ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checksum(u64);

impl Checksum {
    /// Wrap a raw digest value
    pub const fn from_u64(value: u64) -> Self {
        Self(value)
    }

    /// The raw digest value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The raw digest bytes (big-endian) used when hashing a parent directory
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Hex form of the digest
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = BakkerError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != CHECKSUM_HEX_LEN {
            return Err(BakkerError::InvalidChecksum(s.to_string()));
        }
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| BakkerError::InvalidChecksum(s.to_string()))?;
        Ok(Self(u64::from_be_bytes(bytes)))
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Incremental checksum accumulator
///
/// One builder is created per file, symlink or directory being hashed;
/// nothing is shared between computations.
pub struct ChecksumBuilder {
    hasher: Xxh64,
}

impl ChecksumBuilder {
    /// Create a fresh accumulator
    pub fn new() -> Self {
        Self {
            hasher: Xxh64::new(SEED),
        }
    }

    /// Feed bytes into the digest
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Feed a child's raw digest bytes into the digest
    pub fn update_checksum(&mut self, checksum: &Checksum) {
        self.hasher.update(&checksum.to_bytes());
    }

    /// Digest of everything fed so far
    pub fn finish(&self) -> Checksum {
        Checksum(self.hasher.digest())
    }
}

impl Default for ChecksumBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChecksumBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumBuilder")
            .field("current", &self.finish())
            .finish()
    }
}

/// Hash arbitrary data already in memory
pub fn hash_data(data: &[u8]) -> Checksum {
    let mut builder = ChecksumBuilder::new();
    builder.update(data);
    builder.finish()
}

/// Hash everything a reader yields, `chunk_size` bytes at a time
pub fn hash_reader<R: Read>(reader: &mut R, chunk_size: usize) -> Result<Checksum> {
    let mut builder = ChecksumBuilder::new();
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        builder.update(&buffer[..bytes_read]);
    }

    Ok(builder.finish())
}

/// Hash a file's content using buffered sequential reads
pub fn hash_file_content(path: &Path, chunk_size: usize) -> Result<Checksum> {
    let mut file = File::open(path)?;
    hash_reader(&mut file, chunk_size)
}

/// Hash a symlink's unresolved target string
pub fn hash_symlink_target(path: &Path) -> Result<Checksum> {
    let target = crate::utils::read_symlink_bytes(path)?;
    Ok(hash_data(&target))
}
