// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operator-invoked repair from a saved consistency report.

use tracing::{info, warn};

use crate::error::{BlobStoreError, BlobStoreResult};
use crate::report::{ConsistencyReport, FindingKind};
use crate::store::{StoreFeature, StoreManager};

/// Delete every `UNEXPECTED_BLOB` listed in `report`. Other findings are left
/// alone. Returns the number of files deleted.
pub fn repair_unexpected(store: &dyn StoreManager, report: &ConsistencyReport) -> BlobStoreResult<usize> {
    if !store.supports(StoreFeature::BulkDelete) {
        return Err(BlobStoreError::FeatureNotSupported {
            store: store.name().to_string(),
            feature: StoreFeature::BulkDelete,
        });
    }

    let mut deleted = 0;
    for finding in report.findings_of(FindingKind::UnexpectedBlob) {
        let Some(path) = &finding.path else {
            warn!(%finding, "Unexpected blob has no path, skipping");
            continue;
        };
        if store.delete(finding.volume_id, path)? {
            info!(volume_id = finding.volume_id, path = %path.display(), "Deleted unexpected blob");
            deleted += 1;
        } else {
            warn!(path = %path.display(), "Unexpected blob already gone");
        }
    }
    info!(deleted, "Repair finished");
    Ok(deleted)
}
