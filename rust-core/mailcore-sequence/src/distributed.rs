// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Cluster-shared sequence generator.
//
// The counter lives under a single well-known key in the shared store, as a
// decimal string. Increments use the store's native atomic increment, so the
// common path is one round trip. The two slow paths use optimistic locking:
//
// - Wraparound: once the stored value reaches `i64::MAX` the increment fails
//   and every node that observed the failure races to reset the key to 0. Only
//   the node whose watch / exec commits performs the reset; everybody else
//   falls back to one more plain increment.
// - `init_sequence`: forcing the counter to a value is a watch / exec loop
//   bounded by the configured `CasRetryPolicy`, never a blind write.

use mailcore_storage::{SharedStore, StoreError};
use tracing::{debug, info, warn};

use crate::error::{SequenceError, SequenceResult};
use crate::generator::{SequenceNumberGenerator, MAX_SEQUENCE};
use crate::retry::{with_optimistic_retry, CasRetryPolicy};

/// Default key holding the redo log sequence number.
pub const SEQUENCE_KEY: &str = "redoLogSeqNum";

/// A sequence generator whose counter is shared by every node of a cluster.
#[derive(Debug)]
pub struct DistributedSequenceGenerator<S: SharedStore> {
    store: S,
    key: String,
    policy: CasRetryPolicy,
}

impl<S: SharedStore> DistributedSequenceGenerator<S> {
    /// Create a generator over `store` using [`SEQUENCE_KEY`].
    pub fn new(store: S, policy: CasRetryPolicy) -> Self {
        Self::with_key(store, SEQUENCE_KEY, policy)
    }

    /// Create a generator over `store` using a custom key.
    pub fn with_key(store: S, key: impl Into<String>, policy: CasRetryPolicy) -> Self {
        Self {
            store,
            key: key.into(),
            policy,
        }
    }

    /// The key this generator increments.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn parse(&self, raw: &str) -> SequenceResult<u64> {
        raw.trim()
            .parse::<i64>()
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| SequenceError::CorruptedValue {
                key: self.key.clone(),
                value: raw.to_string(),
            })
    }

    fn from_incremented(&self, value: i64) -> SequenceResult<u64> {
        u64::try_from(value).map_err(|_| SequenceError::CorruptedValue {
            key: self.key.clone(),
            value: value.to_string(),
        })
    }

    fn reset_after_overflow(&self) -> SequenceResult<u64> {
        let watched = self.store.watch(&self.key)?;
        let still_at_max = match watched.value.as_deref() {
            Some(raw) => self.parse(raw)? >= MAX_SEQUENCE,
            None => false,
        };

        if still_at_max && self.store.exec_set(&watched, "0")? {
            info!(key = %self.key, backend = self.store.name(), "Shared sequence wrapped around to 0");
            return Ok(0);
        }

        debug!(key = %self.key, "Sequence already reset by another node, retrying increment");
        match self.store.incr(&self.key) {
            Ok(value) => self.from_incremented(value),
            Err(StoreError::IncrementOverflow { .. }) => {
                warn!(key = %self.key, "Sequence still at maximum after reset attempt");
                Err(SequenceError::CoordinationFailure {
                    operation: "increment_sequence".to_string(),
                    attempts: 2,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<S: SharedStore> SequenceNumberGenerator for DistributedSequenceGenerator<S> {
    fn current_sequence(&self) -> SequenceResult<u64> {
        match self.store.get(&self.key)? {
            Some(raw) => self.parse(&raw),
            None => Ok(0),
        }
    }

    fn init_sequence(&self, seq: u64) -> SequenceResult<()> {
        let target = seq.min(MAX_SEQUENCE).to_string();
        with_optimistic_retry(&self.policy, "init_sequence", |_| {
            let watched = self.store.watch(&self.key)?;
            Ok(self.store.exec_set(&watched, &target)?.then_some(()))
        })?;
        debug!(key = %self.key, sequence = %target, "Shared sequence initialised");
        Ok(())
    }

    fn increment_sequence(&self) -> SequenceResult<u64> {
        match self.store.incr(&self.key) {
            Ok(value) => self.from_incremented(value),
            Err(StoreError::IncrementOverflow { .. }) => self.reset_after_overflow(),
            Err(e) => Err(e.into()),
        }
    }
}
