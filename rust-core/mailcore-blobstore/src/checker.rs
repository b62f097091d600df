// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blob consistency checker.
//
// Reconciles the logical item index against the physical blobs:
//
//   expected = every blob ref of every item (current content + revisions)
//   physical = every blob listed on every volume
//
// When the store supports `BulkDelete`, both sets are built and diffed both
// ways. Otherwise each expected blob is checked with `stat`, and unexpected
// blobs cannot be detected; the report records that with `enumerated: false`.
//
// Checking never changes the store. See `repair` for the operator action.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{BlobStoreError, BlobStoreResult};
use crate::item::{BlobRef, Item};
use crate::report::{ConsistencyReport, Finding, FindingKind};
use crate::store::{StoreFeature, StoreManager, StoredBlob};
use crate::volume::BlobLocator;

/// Where and how big a blob was found to be.
struct Located {
    volume_id: u16,
    size: u64,
}

pub struct BlobConsistencyChecker<'a> {
    store: &'a dyn StoreManager,
    check_digests: bool,
    mailbox_id: Option<i64>,
}

impl<'a> BlobConsistencyChecker<'a> {
    pub fn new(store: &'a dyn StoreManager) -> Self {
        Self {
            store,
            check_digests: false,
            mailbox_id: None,
        }
    }

    /// Also compare SHA-256 digests. Reads every referenced blob.
    pub fn check_digests(mut self, enabled: bool) -> Self {
        self.check_digests = enabled;
        self
    }

    /// Only consider items and blobs of one mailbox.
    pub fn for_mailbox(mut self, mailbox_id: Option<i64>) -> Self {
        self.mailbox_id = mailbox_id;
        self
    }

    fn in_scope(&self, mailbox_id: Option<i64>) -> bool {
        match self.mailbox_id {
            None => true,
            Some(wanted) => mailbox_id == Some(wanted),
        }
    }

    pub fn check(&self, items: &[Item]) -> BlobStoreResult<ConsistencyReport> {
        let started = std::time::Instant::now();
        let items: Vec<&Item> = items
            .iter()
            .filter(|item| self.in_scope(Some(item.mailbox_id)))
            .collect();
        let refs: Vec<BlobRef> = items.iter().flat_map(|item| item.blob_refs()).collect();
        let enumerated = self.store.supports(StoreFeature::BulkDelete);

        info!(
            store = self.store.name(),
            items = items.len(),
            blobs = refs.len(),
            mailbox_id = ?self.mailbox_id,
            strategy = if enumerated { "enumerate" } else { "per-item" },
            "Starting blob consistency check"
        );

        let mut findings = Vec::new();
        if enumerated {
            self.check_enumerated(&refs, &mut findings)?;
        } else {
            self.check_per_item(&refs, &mut findings)?;
        }

        let report = ConsistencyReport {
            generated_at: Utc::now(),
            mailbox_id: self.mailbox_id,
            items_checked: items.len(),
            blobs_checked: refs.len(),
            enumerated,
            digests_checked: self.check_digests,
            findings,
        };
        info!(
            findings = report.findings.len(),
            missing = report.count(FindingKind::MissingBlob),
            unexpected = report.count(FindingKind::UnexpectedBlob),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{}",
            report.summary()
        );
        Ok(report)
    }

    fn check_enumerated(&self, refs: &[BlobRef], findings: &mut Vec<Finding>) -> BlobStoreResult<()> {
        let mut physical: HashMap<(u16, BlobLocator), StoredBlob> = HashMap::new();
        let mut strays: Vec<StoredBlob> = Vec::new();
        for volume in self.store.volumes() {
            for blob in self.store.list(volume.id)? {
                match blob.locator {
                    Some(locator) => {
                        physical.insert((blob.volume_id, locator), blob);
                    }
                    None => strays.push(blob),
                }
            }
        }
        debug!(
            physical = physical.len(),
            strays = strays.len(),
            "Enumerated blob volumes"
        );

        let mut seen: HashSet<(u16, BlobLocator)> = HashSet::new();
        for blob_ref in refs {
            if self.store.volume(blob_ref.volume_id).is_none() {
                record(findings, unknown_volume(blob_ref));
                continue;
            }
            let key = (blob_ref.volume_id, blob_ref.locator);
            if let Some(stored) = physical.get(&key) {
                seen.insert(key);
                let located = Located {
                    volume_id: stored.volume_id,
                    size: stored.size,
                };
                self.compare(blob_ref, &located, findings)?;
                continue;
            }
            let elsewhere = physical
                .values()
                .filter(|b| b.locator == Some(blob_ref.locator))
                .map(|b| b.volume_id)
                .min();
            match elsewhere {
                Some(found) => {
                    seen.insert((found, blob_ref.locator));
                    record(findings, wrong_volume(blob_ref, found));
                }
                None => record(findings, missing(blob_ref)),
            }
        }

        let mut unexpected: Vec<&StoredBlob> = physical
            .iter()
            .filter(|(key, blob)| !seen.contains(*key) && self.in_scope(blob.locator.map(|l| l.mailbox_id)))
            .map(|(_, blob)| blob)
            .collect();
        // A stray file has no mailbox, so it is only reported by a whole-store check.
        if self.mailbox_id.is_none() {
            unexpected.extend(strays.iter());
        }
        unexpected.sort_by(|a, b| a.path.cmp(&b.path));
        for blob in unexpected {
            let mut finding = Finding::new(FindingKind::UnexpectedBlob, blob.volume_id, blob.locator.as_ref());
            finding.actual_size = Some(blob.size);
            finding.path = Some(blob.path.clone());
            record(findings, finding);
        }
        Ok(())
    }

    fn check_per_item(&self, refs: &[BlobRef], findings: &mut Vec<Finding>) -> BlobStoreResult<()> {
        let volume_ids: Vec<u16> = self.store.volumes().iter().map(|v| v.id).collect();
        for blob_ref in refs {
            if self.store.volume(blob_ref.volume_id).is_none() {
                record(findings, unknown_volume(blob_ref));
                continue;
            }
            if let Some(stat) = self.store.stat(blob_ref.volume_id, &blob_ref.locator)? {
                let located = Located {
                    volume_id: blob_ref.volume_id,
                    size: stat.size,
                };
                self.compare(blob_ref, &located, findings)?;
                continue;
            }
            let mut found = None;
            for &volume_id in volume_ids.iter().filter(|id| **id != blob_ref.volume_id) {
                if self.store.stat(volume_id, &blob_ref.locator)?.is_some() {
                    found = Some(volume_id);
                    break;
                }
            }
            match found {
                Some(found) => record(findings, wrong_volume(blob_ref, found)),
                None => record(findings, missing(blob_ref)),
            }
        }
        Ok(())
    }

    /// Size, then digest if enabled, of a blob found where the item expects it.
    fn compare(&self, blob_ref: &BlobRef, located: &Located, findings: &mut Vec<Finding>) -> BlobStoreResult<()> {
        if located.size != blob_ref.size {
            let mut finding = base(FindingKind::InconsistentSize, blob_ref);
            finding.expected_size = Some(blob_ref.size);
            finding.actual_size = Some(located.size);
            record(findings, finding);
            return Ok(());
        }
        if self.check_digests {
            let actual = match self.store.digest(located.volume_id, &blob_ref.locator) {
                Ok(actual) => actual,
                Err(BlobStoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Deleted between enumeration and the digest read.
                    record(findings, missing(blob_ref));
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            if !actual.eq_ignore_ascii_case(&blob_ref.digest) {
                let mut finding = base(FindingKind::InconsistentDigest, blob_ref);
                finding.expected_digest = Some(blob_ref.digest.clone());
                finding.actual_digest = Some(actual);
                record(findings, finding);
            }
        }
        Ok(())
    }
}

fn base(kind: FindingKind, blob_ref: &BlobRef) -> Finding {
    let mut finding = Finding::new(kind, blob_ref.volume_id, Some(&blob_ref.locator));
    finding.version = blob_ref.version;
    finding
}

fn missing(blob_ref: &BlobRef) -> Finding {
    let mut finding = base(FindingKind::MissingBlob, blob_ref);
    finding.expected_size = Some(blob_ref.size);
    finding.expected_digest = Some(blob_ref.digest.clone());
    finding
}

fn wrong_volume(blob_ref: &BlobRef, found: u16) -> Finding {
    let mut finding = base(FindingKind::WrongVolume, blob_ref);
    finding.found_volume_id = Some(found);
    finding
}

fn unknown_volume(blob_ref: &BlobRef) -> Finding {
    base(FindingKind::UnknownVolume, blob_ref)
}

fn record(findings: &mut Vec<Finding>, finding: Finding) {
    warn!(kind = %finding.kind, "{finding}");
    findings.push(finding);
}
