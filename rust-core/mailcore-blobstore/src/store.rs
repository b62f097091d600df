// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Store manager abstraction and the file-backed implementation.
//
// A store advertises what it can do through `supports(feature)`. Callers
// choose their strategy from that answer; a store without `BulkDelete` may
// still answer per-blob `stat` queries but refuses `list`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{BlobStoreError, BlobStoreResult};
use crate::volume::{BlobLocator, VolumeConfig};

/// Optional store capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreFeature {
    /// Blobs can be enumerated and deleted in bulk.
    BulkDelete,
    /// Blobs live in storage shared by every node.
    CentralizedStorage,
}

impl fmt::Display for StoreFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BulkDelete => f.write_str("BULK_DELETE"),
            Self::CentralizedStorage => f.write_str("CENTRALIZED_STORAGE"),
        }
    }
}

/// Physical facts about one stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStat {
    pub path: PathBuf,
    pub size: u64,
}

/// A blob found by enumerating a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub volume_id: u16,
    /// `None` when the file name does not follow the blob layout.
    pub locator: Option<BlobLocator>,
    pub path: PathBuf,
    pub size: u64,
}

/// Blob store backend.
pub trait StoreManager: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, feature: StoreFeature) -> bool;

    fn volume(&self, volume_id: u16) -> Option<&VolumeConfig>;

    /// Every configured volume, by id.
    fn volumes(&self) -> Vec<&VolumeConfig>;

    /// Size and location of a blob, `None` if it is absent.
    fn stat(&self, volume_id: u16, locator: &BlobLocator) -> BlobStoreResult<Option<BlobStat>>;

    /// Lowercase hex SHA-256 of a blob's bytes.
    fn digest(&self, volume_id: u16, locator: &BlobLocator) -> BlobStoreResult<String>;

    /// Enumerate a volume. Fails with `FeatureNotSupported` when the store
    /// does not support `BulkDelete`.
    fn list(&self, volume_id: u16) -> BlobStoreResult<Vec<StoredBlob>>;

    /// Store a blob, replacing any previous content.
    fn put(&self, volume_id: u16, locator: &BlobLocator, data: &[u8]) -> BlobStoreResult<BlobStat>;

    /// Delete a stored file by path. Returns false if it was already gone.
    fn delete(&self, volume_id: u16, path: &Path) -> BlobStoreResult<bool>;
}

// ---------------------------------------------------------------------------
// FileBlobStore
// ---------------------------------------------------------------------------

/// Blob store over local volume directories.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    volumes: BTreeMap<u16, VolumeConfig>,
    bulk_enumeration: bool,
}

impl FileBlobStore {
    pub fn new(volumes: impl IntoIterator<Item = VolumeConfig>) -> BlobStoreResult<Self> {
        let mut map = BTreeMap::new();
        for volume in volumes {
            volume.validate()?;
            let id = volume.id;
            if map.insert(id, volume).is_some() {
                return Err(BlobStoreError::InvalidLayout(format!(
                    "volume id {id} configured twice"
                )));
            }
        }
        Ok(Self {
            volumes: map,
            bulk_enumeration: true,
        })
    }

    /// Turn directory enumeration (and with it `BulkDelete`) on or off.
    pub fn with_bulk_enumeration(mut self, enabled: bool) -> Self {
        self.bulk_enumeration = enabled;
        self
    }

    fn volume_or_err(&self, volume_id: u16) -> BlobStoreResult<&VolumeConfig> {
        self.volumes
            .get(&volume_id)
            .ok_or(BlobStoreError::UnknownVolume(volume_id))
    }

    fn walk(
        volume: &VolumeConfig,
        dir: &Path,
        found: &mut Vec<StoredBlob>,
    ) -> BlobStoreResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                Self::walk(volume, &path, found)?;
            } else if file_type.is_file() {
                found.push(StoredBlob {
                    volume_id: volume.id,
                    locator: volume.parse_blob_path(&path),
                    size: entry.metadata()?.len(),
                    path,
                });
            }
        }
        Ok(())
    }
}

impl StoreManager for FileBlobStore {
    fn name(&self) -> &str {
        "file"
    }

    fn supports(&self, feature: StoreFeature) -> bool {
        match feature {
            StoreFeature::BulkDelete => self.bulk_enumeration,
            StoreFeature::CentralizedStorage => false,
        }
    }

    fn volume(&self, volume_id: u16) -> Option<&VolumeConfig> {
        self.volumes.get(&volume_id)
    }

    fn volumes(&self) -> Vec<&VolumeConfig> {
        self.volumes.values().collect()
    }

    fn stat(&self, volume_id: u16, locator: &BlobLocator) -> BlobStoreResult<Option<BlobStat>> {
        let path = self.volume_or_err(volume_id)?.blob_path(locator);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(BlobStat {
                size: meta.len(),
                path,
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn digest(&self, volume_id: u16, locator: &BlobLocator) -> BlobStoreResult<String> {
        let path = self.volume_or_err(volume_id)?.blob_path(locator);
        crate::digest::digest_file(&path)
    }

    fn list(&self, volume_id: u16) -> BlobStoreResult<Vec<StoredBlob>> {
        if !self.bulk_enumeration {
            return Err(BlobStoreError::FeatureNotSupported {
                store: self.name().to_string(),
                feature: StoreFeature::BulkDelete,
            });
        }
        let volume = self.volume_or_err(volume_id)?;
        if !volume.root.is_dir() {
            warn!(volume_id, root = %volume.root.display(), "Volume root is not a directory");
        }
        let mut found = Vec::new();
        Self::walk(volume, &volume.root, &mut found)?;
        found.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(volume_id, blobs = found.len(), "Enumerated volume");
        Ok(found)
    }

    fn put(&self, volume_id: u16, locator: &BlobLocator, data: &[u8]) -> BlobStoreResult<BlobStat> {
        let path = self.volume_or_err(volume_id)?.blob_path(locator);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write beside the target and rename, so a reader never sees a partial blob.
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(BlobStat {
            path,
            size: data.len() as u64,
        })
    }

    fn delete(&self, volume_id: u16, path: &Path) -> BlobStoreResult<bool> {
        let volume = self.volume_or_err(volume_id)?;
        if !path.starts_with(&volume.root) {
            return Err(BlobStoreError::InvalidLayout(format!(
                "{} is outside volume {} root {}",
                path.display(),
                volume_id,
                volume.root.display()
            )));
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
