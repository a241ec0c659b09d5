//! Utility functions for the Bakker library
//!
//! Filesystem and time helpers shared by the node builder, the storage
//! engine and the CLI:
//!
//! - **Timestamps**: parsing and formatting of the ISO-8601 capture time
//! - **Permissions**: reading and applying POSIX mode bits
//! - **Symlinks**: reading and creating links from raw target bytes
//! - **Writes**: atomic temp-file-then-rename writes
//!
//! Functions here hold no state and are safe to call from any thread.

use crate::error::{BakkerError, Result};
use chrono::{Local, NaiveDateTime, SubsecRound};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::trace;

/// Mask for the POSIX permission bits kept in a checkpoint
pub const PERMISSION_MASK: u32 = 0o7777;

const SECONDS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const MICROS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
const SECONDS_LEN: usize = 19;

/// Current local time truncated to microsecond precision
///
/// Capture times never carry more precision than the document and the
/// checkpoint id can represent, so they survive a round trip unchanged.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local().trunc_subsecs(6)
}

/// Format a capture time as ISO-8601 with microsecond precision, no timezone
///
/// ```rust,ignore
/// let time = parse_timestamp("2024-01-01T00:00:00")?;
/// assert_eq!(format_timestamp(&time), "2024-01-01T00:00:00.000000");
/// ```
pub fn format_timestamp(time: &NaiveDateTime) -> String {
    time.format(MICROS_FORMAT).to_string()
}

/// Parse an ISO-8601 timestamp with or without a fractional part
///
/// Accepts the 19-character second-precision form
/// (`2024-01-01T00:00:00`) and the fractional form
/// (`2024-01-01T00:00:00.123456`).
///
/// # Errors
///
/// - [`BakkerError::InvalidTimestamp`] if neither form matches
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let parsed = if s.len() == SECONDS_LEN {
        NaiveDateTime::parse_from_str(s, SECONDS_FORMAT)
    } else {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
    };

    parsed.map_err(|_| BakkerError::InvalidTimestamp(s.to_string()))
}

/// Get the permission bits of an entry without following symlinks
#[cfg(unix)]
pub fn get_permissions(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & PERMISSION_MASK
}

/// Get permissions from metadata (non-Unix implementation)
#[cfg(not(unix))]
pub fn get_permissions(metadata: &fs::Metadata) -> u32 {
    let mut mode = if metadata.permissions().readonly() { 0o444 } else { 0o644 };
    if metadata.is_dir() {
        mode |= 0o111;
    }
    mode
}

/// Set Unix permissions
///
/// Follows symlinks, so callers must never pass a link.
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let permissions = fs::Permissions::from_mode(mode & PERMISSION_MASK);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

/// Set permissions (non-Unix implementation, read-only flag only)
#[cfg(not(unix))]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// Read a symlink's unresolved target as raw bytes
#[cfg(unix)]
pub fn read_symlink_bytes(path: &Path) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    let target = fs::read_link(path)?;
    Ok(target.as_os_str().as_bytes().to_vec())
}

/// Read a symlink's unresolved target (non-Unix, lossy UTF-8)
#[cfg(not(unix))]
pub fn read_symlink_bytes(path: &Path) -> Result<Vec<u8>> {
    let target = fs::read_link(path)?;
    Ok(target.to_string_lossy().into_owned().into_bytes())
}

/// Create a symlink at `link` pointing at the raw target bytes
#[cfg(unix)]
pub fn create_symlink(target: &[u8], link: &Path) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(OsStr::from_bytes(target), link)?;
    Ok(())
}

/// Create a symlink (Windows)
#[cfg(windows)]
pub fn create_symlink(target: &[u8], link: &Path) -> Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    let target = Path::new(std::str::from_utf8(target).map_err(|e| BakkerError::internal(e.to_string()))?);
    let resolved = link.parent().map(|p| p.join(target)).unwrap_or_else(|| target.to_path_buf());
    if resolved.is_dir() {
        symlink_dir(target, link)?;
    } else {
        symlink_file(target, link)?;
    }
    Ok(())
}

/// Remove whatever non-directory entry or directory tree sits at `path`
///
/// Returns `true` if something was removed. Broken symlinks are detected
/// through `symlink_metadata` and removed as well.
pub fn remove_existing(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.is_dir() {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_file(path)?;
            }
            trace!("Removed existing entry at {:?}", path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file lives in the target's directory so the final rename
/// never crosses filesystems. If any step fails the temporary file is
/// removed when it goes out of scope and the target is left untouched.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| BakkerError::internal(format!("Path {:?} has no parent directory", path)))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| BakkerError::Io(e.error))?;

    Ok(())
}

/// Format bytes in human-readable form
///
/// ```rust,ignore
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
