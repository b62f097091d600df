// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Error types
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Every hard failure carries the concrete numbers (lengths, versions, offsets,
// checksums) an operator needs to diagnose a bad segment from the message
// alone. Corruption and version errors are never downgraded to warnings.

use mailcore_sequence::SequenceError;
use thiserror::Error;

use crate::header::{Version, HEADER_LEN};
use crate::op::TransactionId;

/// Errors that can occur during redo log operations.
#[derive(Debug, Error)]
pub enum RedoError {
    /// An I/O error occurred while reading or writing a segment file.
    #[error("redo log I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer than `HEADER_LEN` bytes were available for the segment header.
    #[error("Redolog is smaller than header length of {expected} bytes (found {actual} bytes)")]
    CorruptHeader {
        /// Bytes actually available.
        actual: usize,
        /// Always `HEADER_LEN`.
        expected: usize,
    },

    /// The segment does not start with the redo log signature.
    #[error("not a redo log segment: bad magic {found:?}")]
    BadMagic {
        /// The bytes found where the signature should be.
        found: Vec<u8>,
    },

    /// The server id field of a header is malformed.
    #[error("invalid server id in redo log header: {0}")]
    InvalidServerId(String),

    /// The segment was written by a newer, incompatible format.
    #[error("{found} is higher than the highest known version {highest}")]
    UnsupportedVersion {
        /// The version decoded from the header.
        found: Version,
        /// The highest version this build understands.
        highest: Version,
    },

    /// A record names an operation type nobody registered a decoder for.
    #[error("unknown redo op type {0}")]
    UnknownOpType(u16),

    /// An engine tried to register a decoder under a built-in op type.
    #[error("op type {0} is reserved for built-in redo records")]
    ReservedOpType(u16),

    /// CRC32 checksum mismatch for a record.
    #[error("CRC mismatch for record at offset {offset}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Byte offset of the record in its segment.
        offset: u64,
        /// The CRC32 value stored in the record.
        expected: u32,
        /// The CRC32 value computed over the record body.
        actual: u32,
    },

    /// A record is truncated or structurally invalid.
    #[error("corrupt record at offset {offset}: {reason}")]
    CorruptRecord {
        /// Byte offset of the record in its segment.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A record is larger than the configured maximum.
    #[error("record of {length} bytes exceeds maximum {max_length}")]
    RecordTooLarge {
        /// The encoded record length.
        length: u64,
        /// The configured maximum.
        max_length: u64,
    },

    /// The sequence number generator failed.
    #[error("sequence generator error: {0}")]
    Sequence(#[from] SequenceError),

    /// The log is stopped or was shut down after a fatal error.
    #[error("redo log is not running")]
    NotRunning,

    /// The transaction is not in the active ops table.
    #[error("transaction {0} is not active")]
    UnknownTransaction(TransactionId),

    /// An op payload could not be encoded or decoded.
    #[error("op payload error: {0}")]
    Payload(String),

    /// Re-applying an op during recovery failed.
    #[error("replay of transaction {txn_id} failed: {reason}")]
    Replay {
        /// The transaction being replayed.
        txn_id: TransactionId,
        /// Why it failed.
        reason: String,
    },
}

impl RedoError {
    /// Build the short-header error for `actual` available bytes.
    pub fn short_header(actual: usize) -> Self {
        Self::CorruptHeader {
            actual,
            expected: HEADER_LEN,
        }
    }

    /// True for errors that make a segment unusable: appending must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::CorruptHeader { .. }
                | Self::BadMagic { .. }
                | Self::InvalidServerId(_)
                | Self::UnsupportedVersion { .. }
                | Self::UnknownOpType(_)
                | Self::CrcMismatch { .. }
                | Self::CorruptRecord { .. }
        )
    }
}

/// Convenience type alias for redo log results.
pub type RedoResult<T> = Result<T, RedoError>;

impl From<serde_json::Error> for RedoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}
