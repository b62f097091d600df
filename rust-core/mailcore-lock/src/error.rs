// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Mailbox lock error types.
//
// There is no timeout variant: a timed acquisition that runs out
// of time returns `false`, and a lock nobody releases is only ever reported
// through `MailboxLock::describe`.

use thiserror::Error;

use crate::lock::LockKind;

/// Misuse of a mailbox lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The caller holds a read lock and asked for the write lock.
    #[error("mailbox {mailbox_id}: cannot upgrade a read lock to a write lock, release the read lock first")]
    UpgradeNotSupported {
        /// The mailbox whose lock was requested.
        mailbox_id: i64,
    },

    /// The caller released a lock it does not hold.
    #[error("mailbox {mailbox_id}: {kind} lock is not held by the caller")]
    NotHeld {
        /// The mailbox whose lock was released.
        mailbox_id: i64,
        /// Which side of the lock was released.
        kind: LockKind,
    },
}

/// Convenience type alias for lock results.
pub type LockResult<T> = Result<T, LockError>;
