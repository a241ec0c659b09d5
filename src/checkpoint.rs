//! Checkpoint definitions and operations
//!
//! A checkpoint is an immutable snapshot of a directory tree: the root
//! [`TreeNode`], the capture time and an optional name.
//!
//! ## At-rest document
//!
//! Checkpoints are stored as JSON documents:
//!
//! ```text
//! {
//!   "root": { "name": "", "checksum": "...", "permissions": 493,
//!             "type": "directory", "children": [ ... ] },
//!   "time": "2024-01-01T12:00:00.000000",
//!   "name": "nightly" | null
//! }
//! ```
//!
//! `time` carries no timezone and is always written with microsecond
//! precision; both the second-precision and the microsecond form are
//! accepted on read.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use bakker::Checkpoint;
//! use std::path::Path;
//!
//! # fn main() -> bakker::Result<()> {
//! let checkpoint = Checkpoint::build_checkpoint(Path::new("./project"), Some("nightly"))?;
//! println!("Checkpoint id: {}", checkpoint.meta());
//!
//! for (node, path) in checkpoint.iter() {
//!     println!("{} {:?}", node.kind(), path);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{BakkerError, Result};
use crate::meta::CheckpointMeta;
use crate::node::{self, BuildOptions, NodeKind, NodeRecord, TreeNode, Walk};
use crate::utils;
use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// A validated checkpoint name
///
/// Names are non-empty and consist only of ASCII letters, digits, `_`,
/// `.` and `-`. They may contain underscores even though `_` separates
/// the fields of a checkpoint id; the id codec only splits on the first
/// two underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointName(String);

impl CheckpointName {
    /// Validate and wrap a name
    ///
    /// # Errors
    ///
    /// - [`BakkerError::InvalidName`] if the name is empty or contains any
    ///   other character
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));

        if valid {
            Ok(Self(name))
        } else {
            Err(BakkerError::InvalidName(name))
        }
    }

    /// The name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CheckpointName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An immutable snapshot of a directory tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    root: TreeNode,
    time: NaiveDateTime,
    name: Option<CheckpointName>,
}

impl Checkpoint {
    /// Create a checkpoint around an already-built tree
    ///
    /// `time` defaults to now. Capture times are truncated to microseconds,
    /// the precision of the document and the checkpoint id.
    ///
    /// # Errors
    ///
    /// - [`BakkerError::InvalidName`] if `name` is given and invalid
    pub fn new(root: TreeNode, time: Option<NaiveDateTime>, name: Option<&str>) -> Result<Self> {
        let name = name.map(CheckpointName::new).transpose()?;
        let time = time.map(|t| t.trunc_subsecs(6)).unwrap_or_else(utils::now);

        Ok(Self { root, time, name })
    }

    /// Walk `path` and capture it as a checkpoint taken now
    ///
    /// The root node is built with an empty name. The name is validated
    /// before the tree is walked, so an invalid name fails fast.
    pub fn build_checkpoint(path: &Path, name: Option<&str>) -> Result<Self> {
        Self::build_checkpoint_with(path, name, None, &BuildOptions::default())
    }

    /// Walk `path` and capture it with an explicit capture time
    pub fn build_checkpoint_at(path: &Path, name: Option<&str>, time: NaiveDateTime) -> Result<Self> {
        Self::build_checkpoint_with(path, name, Some(time), &BuildOptions::default())
    }

    /// Walk `path` with custom build options
    pub fn build_checkpoint_with(
        path: &Path,
        name: Option<&str>,
        time: Option<NaiveDateTime>,
        options: &BuildOptions,
    ) -> Result<Self> {
        if let Some(name) = name {
            CheckpointName::new(name)?;
        }

        let root = node::build_node_with(path, "", options)?;
        let checkpoint = Self::new(root, time, name)?;

        debug!(
            "Built checkpoint of {:?}: root {}",
            path,
            checkpoint.root.checksum()
        );
        Ok(checkpoint)
    }

    /// Root of the captured tree
    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    /// Capture time
    pub fn time(&self) -> NaiveDateTime {
        self.time
    }

    /// Optional checkpoint name
    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().map(CheckpointName::as_str)
    }

    /// Identity view used as the catalog key
    pub fn meta(&self) -> CheckpointMeta {
        CheckpointMeta::new(self.root.checksum(), self.time, self.name.clone())
    }

    /// Lazy depth-first traversal yielding `(node, relative_path)`, root first
    ///
    /// Siblings come out in the order the directory was listed when the
    /// checkpoint was built (or the order of the stored document), which
    /// depends on the filesystem and is not guaranteed to be sorted.
    pub fn iter(&self) -> Walk<'_> {
        self.root.walk()
    }

    /// Count the entries of each kind
    pub fn summary(&self) -> CheckpointSummary {
        let mut summary = CheckpointSummary::default();
        for (node, _) in self.iter() {
            match node.kind() {
                NodeKind::File => summary.files += 1,
                NodeKind::Symlink => summary.symlinks += 1,
                NodeKind::Directory => summary.directories += 1,
            }
        }
        summary
    }

    /// Serialize to the at-rest JSON document
    pub fn to_json(&self) -> Result<String> {
        let document = CheckpointDocument {
            root: self.root.to_record(),
            time: utils::format_timestamp(&self.time),
            name: self.name.as_ref().map(|n| n.to_string()),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Parse an at-rest JSON document
    ///
    /// # Errors
    ///
    /// - [`BakkerError::Json`] if the document is not valid JSON of the right shape
    /// - [`BakkerError::UnknownNodeType`] / [`BakkerError::MalformedRecord`]
    ///   if a node record is invalid, including a root with a non-empty name
    /// - [`BakkerError::InvalidTimestamp`] if `time` cannot be parsed
    /// - [`BakkerError::InvalidName`] if `name` is invalid
    pub fn from_json(json: &str) -> Result<Self> {
        let document: CheckpointDocument = serde_json::from_str(json)?;
        if !document.root.name.is_empty() {
            return Err(BakkerError::MalformedRecord(format!(
                "root node must have an empty name, found {:?}",
                document.root.name
            )));
        }

        let root = TreeNode::from_record(document.root)?;
        let time = utils::parse_timestamp(&document.time)?;
        Self::new(root, Some(time), document.name.as_deref())
    }
}

impl<'a> IntoIterator for &'a Checkpoint {
    type Item = (&'a TreeNode, std::path::PathBuf);
    type IntoIter = Walk<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Entry counts of a checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointSummary {
    /// Number of regular files
    pub files: usize,
    /// Number of symlinks
    pub symlinks: usize,
    /// Number of directories, the root included when it is one
    pub directories: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    root: NodeRecord,
    time: String,
    #[serde(default)]
    name: Option<String>,
}
