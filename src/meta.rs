//! Checkpoint identifiers
//!
//! A [`CheckpointMeta`] is the identity of a checkpoint: root checksum,
//! capture time and optional name. Its string form is the catalog key:
//!
//! ```text
//! <checksum>_<time>            e.g. 3c5e1f0a9b2d4e68_2024-01-01T12:00:00.000000
//! <checksum>_<time>_<name>     e.g. 3c5e1f0a9b2d4e68_2024-01-01T12:00:00.000000_nightly_full
//! ```
//!
//! The time is always rendered with microsecond precision. Decoding
//! splits on the first two underscores only, so a name may itself
//! contain underscores; the checksum (hex) and the time (ISO-8601)
//! never do.

use crate::checkpoint::CheckpointName;
use crate::error::{BakkerError, Result};
use crate::hashing::Checksum;
use crate::utils;
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

const SEPARATOR: char = '_';

/// Identity view of a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointMeta {
    /// Root checksum
    pub checksum: Checksum,
    /// Capture time
    pub time: NaiveDateTime,
    /// Optional name
    pub name: Option<CheckpointName>,
}

impl CheckpointMeta {
    /// Create an identity from its parts
    pub fn new(checksum: Checksum, time: NaiveDateTime, name: Option<CheckpointName>) -> Self {
        Self { checksum, time, name }
    }

    /// Decode a checkpoint id
    ///
    /// # Errors
    ///
    /// - [`BakkerError::InvalidCheckpointId`] if the id has fewer than two
    ///   fields, or its checksum, time or name is invalid
    pub fn parse(id: &str) -> Result<Self> {
        let invalid = |reason: String| BakkerError::InvalidCheckpointId {
            id: id.to_string(),
            reason,
        };

        let mut parts = id.splitn(3, SEPARATOR);
        let (checksum, time) = match (parts.next(), parts.next()) {
            (Some(checksum), Some(time)) => (checksum, time),
            _ => return Err(invalid("expected <checksum>_<time>[_<name>]".to_string())),
        };

        let checksum = checksum.parse::<Checksum>().map_err(|e| invalid(e.to_string()))?;
        let time = utils::parse_timestamp(time).map_err(|e| invalid(e.to_string()))?;
        let name = parts
            .next()
            .map(CheckpointName::new)
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self { checksum, time, name })
    }

    /// Name as a string slice
    pub fn name(&self) -> Option<&str> {
        self.name.as_ref().map(CheckpointName::as_str)
    }
}

impl fmt::Display for CheckpointMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.checksum, SEPARATOR, utils::format_timestamp(&self.time))?;
        if let Some(name) = &self.name {
            write!(f, "{}{}", SEPARATOR, name)?;
        }
        Ok(())
    }
}

impl FromStr for CheckpointMeta {
    type Err = BakkerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
