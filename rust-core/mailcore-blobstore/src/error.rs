// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blob store error types.
//
// Consistency findings are not errors; they are returned as report data.
// These variants cover failures to talk to the store or to read a report.

use thiserror::Error;

use crate::store::StoreFeature;

/// Errors from blob store access, consistency checks and repair.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// An I/O error reading or writing blob files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A volume id that the store has no configuration for.
    #[error("unknown volume id {0}")]
    UnknownVolume(u16),

    /// The store does not advertise a feature the caller needs.
    #[error("store '{store}' does not support {feature}")]
    FeatureNotSupported {
        /// Name of the store backend.
        store: String,
        /// The missing capability.
        feature: StoreFeature,
    },

    /// A consistency report or item index could not be read or written.
    #[error("report serialization error: {0}")]
    Report(#[from] serde_json::Error),

    /// A path or volume definition that does not fit the blob layout.
    #[error("invalid blob layout: {0}")]
    InvalidLayout(String),
}

/// Convenience type alias for blob store results.
pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_volume_display() {
        assert_eq!(BlobStoreError::UnknownVolume(3).to_string(), "unknown volume id 3");
    }

    #[test]
    fn test_feature_not_supported_display() {
        let err = BlobStoreError::FeatureNotSupported {
            store: "file".into(),
            feature: StoreFeature::BulkDelete,
        };
        assert_eq!(err.to_string(), "store 'file' does not support BULK_DELETE");
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: BlobStoreError = io.into();
        assert!(err.to_string().contains("denied"));
    }
}
