//! Tree node model for checkpoints
//!
//! A checkpoint's content is a tree of [`TreeNode`]s. The variant set is
//! closed and matches the three filesystem entry kinds that can be backed
//! up: regular files, symbolic links and directories.
//!
//! ## Identity
//!
//! Every node carries a `name`, a content [`Checksum`] and its POSIX
//! permission bits. Checksums are computed bottom-up while building and
//! depend only on content:
//!
//! ```text
//! file      = XXH64(bytes)
//! symlink   = XXH64(target bytes)
//! directory = XXH64(child_1 || child_2 || ... )   children sorted by name
//! ```
//!
//! Two subtrees with the same content but different permissions share a
//! checksum, which is what lets the storage engine deduplicate them.
//!
//! ## Serialization
//!
//! Nodes convert to and from [`NodeRecord`], the discriminated shape used
//! inside checkpoint documents:
//!
//! ```text
//! { "name": "...", "checksum": "<16 hex>", "permissions": 420,
//!   "type": "file" | "symlink" | "directory", "children": [ ... ] }
//! ```
//!
//! `children` is present only for directories. Any other `type` tag is
//! rejected with [`BakkerError::UnknownNodeType`].

use crate::error::{BakkerError, Result};
use crate::hashing::{self, Checksum, ChecksumBuilder, DEFAULT_CHUNK_SIZE};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Options controlling how a tree is built from the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Read chunk used while hashing file content
    pub chunk_size: usize,
    /// Directories left out of the tree, stored canonicalized
    excluded: Vec<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            excluded: Vec::new(),
        }
    }
}

impl BuildOptions {
    /// Set the hashing chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Leave the directory at `path` out of any tree built with these options
    ///
    /// Used to keep a storage directory out of its own backups when it
    /// lives inside the backed-up tree. Matching is done on canonical
    /// paths, so `path` may be relative.
    pub fn exclude(mut self, path: &Path) -> Self {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.excluded.push(canonical);
        self
    }

    /// Whether the directory at `path` is excluded
    fn is_excluded(&self, path: &Path) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        match fs::canonicalize(path) {
            Ok(canonical) => self.excluded.iter().any(|excluded| *excluded == canonical),
            Err(_) => false,
        }
    }
}

/// Discriminator of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Regular file
    File,
    /// Symbolic link
    Symlink,
    /// Directory
    Directory,
}

impl NodeKind {
    /// The type tag used in node records
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Symlink => "symlink",
            NodeKind::Directory => "directory",
        }
    }

    /// Parse a type tag
    ///
    /// # Errors
    ///
    /// - [`BakkerError::UnknownNodeType`] for anything but the three known tags
    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "file" => Ok(NodeKind::File),
            "symlink" => Ok(NodeKind::Symlink),
            "directory" => Ok(NodeKind::Directory),
            other => Err(BakkerError::UnknownNodeType(other.to_string())),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A regular file, identified by the hash of its bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// Entry name within the parent directory
    pub name: String,
    /// XXH64 of the file content
    pub checksum: Checksum,
    /// POSIX permission bits
    pub permissions: u32,
}

impl FileNode {
    /// Build a file node by streaming the file through the hasher
    pub fn build(path: &Path, name: &str, options: &BuildOptions) -> Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let checksum = hashing::hash_file_content(path, options.chunk_size)?;

        trace!("Hashed file {:?}: {}", path, checksum);
        Ok(Self {
            name: name.to_string(),
            checksum,
            permissions: utils::get_permissions(&metadata),
        })
    }
}

/// A symbolic link, identified by the hash of its unresolved target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkNode {
    /// Entry name within the parent directory
    pub name: String,
    /// XXH64 of the raw target string
    pub checksum: Checksum,
    /// POSIX permission bits of the link itself
    pub permissions: u32,
}

impl SymlinkNode {
    /// Build a symlink node; the target is never dereferenced
    pub fn build(path: &Path, name: &str) -> Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let checksum = hashing::hash_symlink_target(path)?;

        trace!("Hashed symlink {:?}: {}", path, checksum);
        Ok(Self {
            name: name.to_string(),
            checksum,
            permissions: utils::get_permissions(&metadata),
        })
    }
}

/// A directory, identified by the hashes of its children
///
/// Children keep the order in which they were listed from the filesystem
/// (or from the document they were parsed from). That order drives
/// traversal only; the checksum always visits children sorted by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryNode {
    /// Entry name within the parent directory (empty for a checkpoint root)
    pub name: String,
    /// XXH64 over the children's raw digests in name order
    pub checksum: Checksum,
    /// POSIX permission bits
    pub permissions: u32,
    children: Vec<TreeNode>,
}

impl DirectoryNode {
    /// Create a directory node from already-built children, computing its checksum
    ///
    /// # Errors
    ///
    /// - [`BakkerError::MalformedRecord`] if a child name is not a plain
    ///   entry name or two children share a name
    pub fn new(name: impl Into<String>, permissions: u32, children: Vec<TreeNode>) -> Result<Self> {
        validate_child_names(&children)?;
        let checksum = directory_checksum(&children);
        Ok(Self {
            name: name.into(),
            checksum,
            permissions,
            children,
        })
    }

    /// Build a directory node by listing and recursively building its entries
    ///
    /// Some entries are skipped with a warning while the rest of the
    /// directory is still built:
    ///
    /// - entries that are neither files, directories nor symlinks
    /// - entries whose name is not valid UTF-8; a tree holding such names
    ///   does not restore to an identical copy
    ///
    /// Directories excluded through [`BuildOptions::exclude`] are skipped
    /// silently.
    pub fn build(path: &Path, name: &str, options: &BuildOptions) -> Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let mut children = Vec::new();

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let child_path = entry.path();
            let child_name = match entry.file_name().into_string() {
                Ok(child_name) => child_name,
                Err(raw) => {
                    warn!("Could not back up {:?}: name {:?} is not valid UTF-8", child_path, raw);
                    continue;
                }
            };

            if entry.file_type()?.is_dir() && options.is_excluded(&child_path) {
                debug!("Skipping excluded directory {:?}", child_path);
                continue;
            }

            match build_node_with(&child_path, &child_name, options) {
                Ok(child) => children.push(child),
                Err(BakkerError::UnsupportedFileType { path }) => {
                    warn!("Could not back up {:?}: unsupported file type", path);
                }
                Err(e) => return Err(e),
            }
        }

        let node = Self::new(name, utils::get_permissions(&metadata), children)?;
        trace!("Hashed directory {:?} ({} children): {}", path, node.children.len(), node.checksum);
        Ok(node)
    }

    /// Children in listing order
    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    /// Look up a direct child by name
    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.children.iter().find(|c| c.name() == name)
    }
}

/// One entry of a checkpoint tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    /// Regular file
    File(FileNode),
    /// Symbolic link
    Symlink(SymlinkNode),
    /// Directory with children
    Directory(DirectoryNode),
}

impl TreeNode {
    /// Entry name within the parent directory
    pub fn name(&self) -> &str {
        match self {
            TreeNode::File(n) => &n.name,
            TreeNode::Symlink(n) => &n.name,
            TreeNode::Directory(n) => &n.name,
        }
    }

    /// Content checksum
    pub fn checksum(&self) -> Checksum {
        match self {
            TreeNode::File(n) => n.checksum,
            TreeNode::Symlink(n) => n.checksum,
            TreeNode::Directory(n) => n.checksum,
        }
    }

    /// POSIX permission bits
    pub fn permissions(&self) -> u32 {
        match self {
            TreeNode::File(n) => n.permissions,
            TreeNode::Symlink(n) => n.permissions,
            TreeNode::Directory(n) => n.permissions,
        }
    }

    /// Which variant this is
    pub fn kind(&self) -> NodeKind {
        match self {
            TreeNode::File(_) => NodeKind::File,
            TreeNode::Symlink(_) => NodeKind::Symlink,
            TreeNode::Directory(_) => NodeKind::Directory,
        }
    }

    /// Whether this node is a directory
    pub fn is_dir(&self) -> bool {
        matches!(self, TreeNode::Directory(_))
    }

    /// Whether this node's content lives in the blob pool (files and symlinks)
    pub fn has_blob(&self) -> bool {
        !self.is_dir()
    }

    /// Children of a directory; empty for files and symlinks
    pub fn children(&self) -> &[TreeNode] {
        match self {
            TreeNode::Directory(dir) => dir.children(),
            _ => &[],
        }
    }

    /// Lazy depth-first walk over this subtree, this node first
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![(self, PathBuf::new())],
        }
    }

    /// Convert into the serializable record form
    pub fn to_record(&self) -> NodeRecord {
        let children = match self {
            TreeNode::Directory(dir) => Some(dir.children.iter().map(TreeNode::to_record).collect()),
            _ => None,
        };

        NodeRecord {
            name: self.name().to_string(),
            checksum: self.checksum(),
            permissions: self.permissions(),
            node_type: self.kind().as_str().to_string(),
            children,
        }
    }

    /// Rebuild a node from its record form
    ///
    /// Stored checksums are taken as-is; nothing is rehashed.
    ///
    /// # Errors
    ///
    /// - [`BakkerError::UnknownNodeType`] for an unrecognized `type` tag
    /// - [`BakkerError::MalformedRecord`] for a directory without `children`,
    ///   a leaf with `children`, child names that are empty, `.`, `..` or hold
    ///   a path separator, duplicate child names or out-of-range
    ///   permission bits
    pub fn from_record(record: NodeRecord) -> Result<Self> {
        let kind = NodeKind::from_tag(&record.node_type)?;

        if record.permissions > utils::PERMISSION_MASK {
            return Err(BakkerError::MalformedRecord(format!(
                "permissions {:o} of {:?} exceed 7777",
                record.permissions, record.name
            )));
        }

        match (kind, record.children) {
            (NodeKind::File, None) => Ok(TreeNode::File(FileNode {
                name: record.name,
                checksum: record.checksum,
                permissions: record.permissions,
            })),
            (NodeKind::Symlink, None) => Ok(TreeNode::Symlink(SymlinkNode {
                name: record.name,
                checksum: record.checksum,
                permissions: record.permissions,
            })),
            (NodeKind::Directory, Some(child_records)) => {
                let children = child_records
                    .into_iter()
                    .map(TreeNode::from_record)
                    .collect::<Result<Vec<_>>>()?;
                validate_child_names(&children)?;

                Ok(TreeNode::Directory(DirectoryNode {
                    name: record.name,
                    checksum: record.checksum,
                    permissions: record.permissions,
                    children,
                }))
            }
            (NodeKind::Directory, None) => Err(BakkerError::MalformedRecord(format!(
                "directory {:?} has no children list",
                record.name
            ))),
            (kind, Some(_)) => Err(BakkerError::MalformedRecord(format!(
                "{} {:?} must not have children",
                kind, record.name
            ))),
        }
    }
}

/// Build a node from a filesystem entry using default options
///
/// Symlink-ness is tested before anything else, so a link is never
/// followed into a recursive traversal.
///
/// # Errors
///
/// - [`BakkerError::UnsupportedFileType`] for devices, sockets, pipes, ...
/// - [`BakkerError::Io`] if the entry cannot be read
pub fn build_node(path: &Path, name: &str) -> Result<TreeNode> {
    build_node_with(path, name, &BuildOptions::default())
}

/// Build a node from a filesystem entry
pub fn build_node_with(path: &Path, name: &str, options: &BuildOptions) -> Result<TreeNode> {
    let file_type = fs::symlink_metadata(path)?.file_type();

    if file_type.is_symlink() {
        Ok(TreeNode::Symlink(SymlinkNode::build(path, name)?))
    } else if file_type.is_file() {
        Ok(TreeNode::File(FileNode::build(path, name, options)?))
    } else if file_type.is_dir() {
        Ok(TreeNode::Directory(DirectoryNode::build(path, name, options)?))
    } else {
        Err(BakkerError::UnsupportedFileType {
            path: path.to_path_buf(),
        })
    }
}

/// Checksum of a directory with the given children
pub fn directory_checksum(children: &[TreeNode]) -> Checksum {
    let mut sorted: Vec<&TreeNode> = children.iter().collect();
    sorted.sort_by(|a, b| a.name().as_bytes().cmp(b.name().as_bytes()));

    let mut builder = ChecksumBuilder::new();
    for child in sorted {
        builder.update_checksum(&child.checksum());
    }
    builder.finish()
}

/// Whether `name` can be joined onto a directory path as exactly one component
///
/// Rejects the empty name, `.`, `..` and anything holding a separator or NUL,
/// so a restored entry never lands outside its parent.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

fn validate_child_names(children: &[TreeNode]) -> Result<()> {
    let mut seen = HashSet::with_capacity(children.len());
    for child in children {
        if !is_plain_name(child.name()) {
            return Err(BakkerError::MalformedRecord(format!(
                "child name {:?} is not a plain entry name",
                child.name()
            )));
        }
        if !seen.insert(child.name()) {
            return Err(BakkerError::MalformedRecord(format!(
                "duplicate child name {:?}",
                child.name()
            )));
        }
    }
    Ok(())
}

/// Serialized shape of a node inside a checkpoint document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Entry name
    pub name: String,
    /// Content checksum as 16 hex characters
    pub checksum: Checksum,
    /// POSIX permission bits
    pub permissions: u32,
    /// `file`, `symlink` or `directory`
    #[serde(rename = "type")]
    pub node_type: String,
    /// Child records, directories only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NodeRecord>>,
}

/// Depth-first traversal over a borrowed tree
///
/// Yields `(node, relative_path)` pairs, parents before their children and
/// siblings in listing order. The root's path is empty. The walk is lazy
/// and single-pass; call [`TreeNode::walk`] again to restart it.
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<(&'a TreeNode, PathBuf)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (&'a TreeNode, PathBuf);

    fn next(&mut self) -> Option<Self::Item> {
        let (node, path) = self.stack.pop()?;

        // Reverse so the first-listed child is popped first
        for child in node.children().iter().rev() {
            self.stack.push((child, path.join(child.name())));
        }

        Some((node, path))
    }
}
