// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Consistency findings and the saved report.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BlobStoreResult;
use crate::volume::BlobLocator;

/// Classification of a mismatch between the item index and the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    /// An item references a blob that is on no volume.
    MissingBlob,
    /// A blob is on disk but no item references it.
    UnexpectedBlob,
    /// The blob exists but its size differs from the item's.
    InconsistentSize,
    /// The blob exists but its digest differs from the item's.
    InconsistentDigest,
    /// The blob is absent from the item's volume but present on another.
    WrongVolume,
    /// The item names a volume the store does not know.
    UnknownVolume,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingBlob => "MISSING_BLOB",
            Self::UnexpectedBlob => "UNEXPECTED_BLOB",
            Self::InconsistentSize => "INCONSISTENT_SIZE",
            Self::InconsistentDigest => "INCONSISTENT_DIGEST",
            Self::WrongVolume => "WRONG_VOLUME",
            Self::UnknownVolume => "UNKNOWN_VOLUME",
        })
    }
}

/// One consistency finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    /// Mailbox and item ids; `None` for a stray file outside the layout.
    pub mailbox_id: Option<i64>,
    pub item_id: Option<i64>,
    pub mod_content: Option<i64>,
    /// Revision version, `None` for an item's current content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    /// The volume the item points at, or the volume the blob was found on.
    pub volume_id: u16,
    /// For `WrongVolume`, the volume that actually holds the blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found_volume_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Finding {
    pub fn new(kind: FindingKind, volume_id: u16, locator: Option<&BlobLocator>) -> Self {
        Self {
            kind,
            mailbox_id: locator.map(|l| l.mailbox_id),
            item_id: locator.map(|l| l.item_id),
            mod_content: locator.map(|l| l.mod_content),
            version: None,
            volume_id,
            found_volume_id: None,
            expected_size: None,
            actual_size: None,
            expected_digest: None,
            actual_digest: None,
            path: None,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let (Some(mailbox), Some(item)) = (self.mailbox_id, self.item_id) {
            write!(f, " mailbox={mailbox} item={item}")?;
        }
        if let Some(rev) = self.mod_content {
            write!(f, " mod_content={rev}")?;
        }
        if let Some(version) = self.version {
            write!(f, " version={version}")?;
        }
        write!(f, " volume={}", self.volume_id)?;
        if let Some(found) = self.found_volume_id {
            write!(f, " found_on={found}")?;
        }
        if let (Some(expected), Some(actual)) = (self.expected_size, self.actual_size) {
            write!(f, " size={actual} expected={expected}")?;
        } else if let Some(expected) = self.expected_size {
            write!(f, " size={expected}")?;
        }
        if let (Some(expected), Some(actual)) = (&self.expected_digest, &self.actual_digest) {
            write!(f, " digest={actual} expected={expected}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " path={}", path.display())?;
        }
        Ok(())
    }
}

/// Result of one consistency check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub generated_at: DateTime<Utc>,
    /// Restricts the check to one mailbox when set.
    pub mailbox_id: Option<i64>,
    pub items_checked: usize,
    pub blobs_checked: usize,
    /// Whether volumes were enumerated. Without enumeration unexpected
    /// blobs cannot be detected.
    pub enumerated: bool,
    pub digests_checked: bool,
    pub findings: Vec<Finding>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }

    pub fn findings_of(&self, kind: FindingKind) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.kind == kind)
    }

    /// One-line result, e.g. `"2 inconsistencies found"`.
    pub fn summary(&self) -> String {
        match self.findings.len() {
            0 => "No inconsistencies found".to_string(),
            1 => "1 inconsistency found".to_string(),
            n => format!("{n} inconsistencies found"),
        }
    }

    pub fn save(&self, path: &Path) -> BlobStoreResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> BlobStoreResult<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for finding in &self.findings {
            writeln!(f, "{finding}")?;
        }
        write!(f, "{}", self.summary())
    }
}
