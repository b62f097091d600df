// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Volume definitions and the on-disk blob layout.
//
// A blob for item `item` (content revision `mod_content`) of mailbox `mbox`
// lives at:
//
//   <root>/<mbox group>/<mbox>/msg/<file group>/<item>-<mod_content>.msg
//
// where `mbox group = (mbox >> mbox_bits) & ((1 << mbox_group_bits) - 1)` and
// `file group = (item >> file_bits) & ((1 << file_group_bits) - 1)`. The
// grouping keeps any one directory from holding too many entries.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BlobStoreError, BlobStoreResult};

const BLOB_DIR: &str = "msg";
const BLOB_EXTENSION: &str = "msg";

/// Identifies one blob independent of the volume it sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobLocator {
    pub mailbox_id: i64,
    pub item_id: i64,
    pub mod_content: i64,
}

impl BlobLocator {
    pub fn new(mailbox_id: i64, item_id: i64, mod_content: i64) -> Self {
        Self {
            mailbox_id,
            item_id,
            mod_content,
        }
    }
}

impl std::fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mailbox {} item {} rev {}",
            self.mailbox_id, self.item_id, self.mod_content
        )
    }
}

/// One blob volume: a storage root plus its directory hashing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub id: u16,
    pub name: String,
    pub root: PathBuf,
    #[serde(default = "default_mbox_group_bits")]
    pub mbox_group_bits: u8,
    #[serde(default = "default_mbox_bits")]
    pub mbox_bits: u8,
    #[serde(default = "default_file_group_bits")]
    pub file_group_bits: u8,
    #[serde(default = "default_file_bits")]
    pub file_bits: u8,
}

fn default_mbox_group_bits() -> u8 {
    8
}
fn default_mbox_bits() -> u8 {
    12
}
fn default_file_group_bits() -> u8 {
    8
}
fn default_file_bits() -> u8 {
    12
}

fn group(value: i64, shift: u8, bits: u8) -> i64 {
    (value >> shift) & ((1i64 << bits) - 1)
}

impl VolumeConfig {
    /// A volume with the default hashing parameters.
    pub fn new(id: u16, name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            root: root.into(),
            mbox_group_bits: default_mbox_group_bits(),
            mbox_bits: default_mbox_bits(),
            file_group_bits: default_file_group_bits(),
            file_bits: default_file_bits(),
        }
    }

    /// Reject bit widths whose shifts or masks would not fit an `i64`.
    pub fn validate(&self) -> BlobStoreResult<()> {
        for (field, bits) in [
            ("mbox_group_bits", self.mbox_group_bits),
            ("mbox_bits", self.mbox_bits),
            ("file_group_bits", self.file_group_bits),
            ("file_bits", self.file_bits),
        ] {
            if !(1..=62).contains(&bits) {
                return Err(BlobStoreError::InvalidLayout(format!(
                    "volume {} ({}): {field} = {bits} is outside 1..=62",
                    self.id, self.name
                )));
            }
        }
        Ok(())
    }

    /// Directory holding every blob of `mailbox_id` on this volume.
    pub fn mailbox_dir(&self, mailbox_id: i64) -> PathBuf {
        self.root
            .join(group(mailbox_id, self.mbox_bits, self.mbox_group_bits).to_string())
            .join(mailbox_id.to_string())
            .join(BLOB_DIR)
    }

    pub fn blob_path(&self, locator: &BlobLocator) -> PathBuf {
        self.mailbox_dir(locator.mailbox_id)
            .join(group(locator.item_id, self.file_bits, self.file_group_bits).to_string())
            .join(format!("{}-{}.{BLOB_EXTENSION}", locator.item_id, locator.mod_content))
    }

    /// Inverse of [`blob_path`](Self::blob_path). `None` for any path that
    /// is not a well-formed blob location on this volume, including one whose
    /// group directories disagree with its ids.
    pub fn parse_blob_path(&self, path: &Path) -> Option<BlobLocator> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Option<_>>()?;
        let [mbox_group, mbox, dir, file_group, file] = parts.as_slice() else {
            return None;
        };
        if *dir != BLOB_DIR {
            return None;
        }

        let mailbox_id: i64 = mbox.parse().ok()?;
        let stem = file.strip_suffix(&format!(".{BLOB_EXTENSION}"))?;
        let (item, mod_content) = stem.split_once('-')?;
        let locator = BlobLocator::new(mailbox_id, item.parse().ok()?, mod_content.parse().ok()?);

        let groups_match = mbox_group.parse::<i64>().ok()
            == Some(group(mailbox_id, self.mbox_bits, self.mbox_group_bits))
            && file_group.parse::<i64>().ok()
                == Some(group(locator.item_id, self.file_bits, self.file_group_bits));
        groups_match.then_some(locator)
    }
}
