// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared-store error types.

use thiserror::Error;

/// Errors that can occur when talking to the shared store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred in the transport or the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested key was not found where one was required.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The native increment would pass `i64::MAX`.
    #[error("increment of key '{key}' would overflow")]
    IncrementOverflow {
        /// The counter key.
        key: String,
    },

    /// The value stored at the key is not a decimal integer.
    #[error("value of key '{key}' is not an integer: {value:?}")]
    NotAnInteger {
        /// The key holding the bad value.
        key: String,
        /// The raw stored value.
        value: String,
    },

    /// The store is not reachable (connection lost, cluster not OK).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Convenience type alias for shared-store results.
pub type StoreResult<T> = Result<T, StoreError>;
