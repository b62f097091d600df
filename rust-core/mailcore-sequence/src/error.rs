// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sequence generator error types.

use mailcore_storage::StoreError;
use thiserror::Error;

/// Errors that can occur while assigning or forcing sequence numbers.
#[derive(Debug, Error)]
pub enum SequenceError {
    /// The shared store failed.
    #[error("shared store error: {0}")]
    Store(#[from] StoreError),

    /// The bounded optimistic retry budget was exhausted.
    ///
    /// Fatal for the call, not for the process: the caller should treat the log
    /// as temporarily unavailable and retry the whole operation later.
    #[error("coordination failure for {operation}: gave up after {attempts} attempts")]
    CoordinationFailure {
        /// Description of the operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The shared counter holds something that is not a valid sequence number.
    #[error("corrupted sequence value in key '{key}': {value:?}")]
    CorruptedValue {
        /// The counter key.
        key: String,
        /// The raw stored value.
        value: String,
    },
}

/// Convenience type alias for sequence generator results.
pub type SequenceResult<T> = Result<T, SequenceError>;
