// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Logical item index records: what the mailbox believes is stored.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BlobStoreResult;
use crate::volume::BlobLocator;

/// An older content revision of an item, with its own blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub version: i32,
    pub volume_id: u16,
    pub size: u64,
    /// Lowercase hex SHA-256 of the blob.
    pub digest: String,
    pub mod_content: i64,
}

/// A mailbox item that has a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub mailbox_id: i64,
    pub id: i64,
    pub volume_id: u16,
    pub size: u64,
    pub digest: String,
    pub mod_content: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<Revision>,
}

/// One expected blob: an item's current content or one of its revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub locator: BlobLocator,
    /// `None` for the current content.
    pub version: Option<i32>,
    pub volume_id: u16,
    pub size: u64,
    pub digest: String,
}

impl Item {
    pub fn new(
        mailbox_id: i64,
        id: i64,
        volume_id: u16,
        size: u64,
        digest: impl Into<String>,
        mod_content: i64,
    ) -> Self {
        Self {
            mailbox_id,
            id,
            volume_id,
            size,
            digest: digest.into(),
            mod_content,
            revisions: Vec::new(),
        }
    }

    pub fn with_revision(mut self, revision: Revision) -> Self {
        self.revisions.push(revision);
        self
    }

    /// Every blob this item expects to find, current content first.
    pub fn blob_refs(&self) -> impl Iterator<Item = BlobRef> + '_ {
        let current = BlobRef {
            locator: BlobLocator::new(self.mailbox_id, self.id, self.mod_content),
            version: None,
            volume_id: self.volume_id,
            size: self.size,
            digest: self.digest.clone(),
        };
        std::iter::once(current).chain(self.revisions.iter().map(|r| BlobRef {
            locator: BlobLocator::new(self.mailbox_id, self.id, r.mod_content),
            version: Some(r.version),
            volume_id: r.volume_id,
            size: r.size,
            digest: r.digest.clone(),
        }))
    }
}

/// Load an item index exported as a JSON array.
pub fn load_items(path: &Path) -> BlobStoreResult<Vec<Item>> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
