// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core shared-store trait for MailCore.
//
// Values are decimal or free-form strings, mirroring what a Redis-style store
// holds. Every call is a blocking round trip; implementations must be safe to
// share across threads (`Send + Sync`).

use std::sync::Arc;

use crate::error::StoreResult;

/// A snapshot of one key taken by [`SharedStore::watch`].
///
/// The `revision` is opaque to callers. [`SharedStore::exec_set`] only commits
/// if the key still carries the same revision, which is how optimistic locking
/// (watch / multi / exec) is expressed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watched {
    /// The watched key.
    pub key: String,
    /// The value observed at watch time, `None` if the key did not exist.
    pub value: Option<String>,
    /// Store-assigned revision of the key at watch time.
    pub revision: u64,
}

/// A cluster-wide key-value store reachable by every node.
pub trait SharedStore: Send + Sync {
    /// Read the current value of `key`, `Ok(None)` if absent.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Unconditionally overwrite `key`.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Atomically increment the signed 64-bit integer stored at `key` and return
    /// the new value. A missing key counts as `0`.
    ///
    /// Fails with [`crate::StoreError::IncrementOverflow`] instead of wrapping
    /// when the stored value is already `i64::MAX`.
    fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Start watching `key` for an optimistic transaction.
    fn watch(&self, key: &str) -> StoreResult<Watched>;

    /// Write `value` to the watched key only if nobody modified it since the
    /// watch. Returns `Ok(false)` when the transaction was discarded.
    fn exec_set(&self, watched: &Watched, value: &str) -> StoreResult<bool>;

    /// A human-readable name for this backend, used in logging.
    fn name(&self) -> &str;
}

impl<S: SharedStore + ?Sized> SharedStore for Arc<S> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        (**self).incr(key)
    }

    fn watch(&self, key: &str) -> StoreResult<Watched> {
        (**self).watch(key)
    }

    fn exec_set(&self, watched: &Watched, value: &str) -> StoreResult<bool> {
        (**self).exec_set(watched, value)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
