// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metrics-collecting wrapper for MailCore shared stores.
//
// Wraps any `SharedStore` and counts calls, discarded optimistic transactions
// and cumulative latency. The sequence generator sits on the hot path of every
// redo log rollover, so these numbers are what an operator looks at when the
// cluster store is slow or contended.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use crate::backend::{SharedStore, Watched};
use crate::error::StoreResult;

/// Accumulated statistics for a shared store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    /// Number of `get` calls.
    pub get_count: u64,
    /// Number of `set` calls.
    pub set_count: u64,
    /// Number of `incr` calls.
    pub incr_count: u64,
    /// Number of `watch` calls.
    pub watch_count: u64,
    /// Number of `exec_set` calls.
    pub exec_count: u64,
    /// Number of `exec_set` calls that were discarded because the key changed.
    pub exec_conflicts: u64,
    /// Cumulative wall-clock latency of all calls, in milliseconds.
    pub latency_sum_ms: f64,
}

/// A shared store wrapper that collects operation metrics.
#[derive(Debug, Clone)]
pub struct MetricsStore<S: SharedStore> {
    inner: S,
    stats: Arc<Mutex<StoreStats>>,
}

impl<S: SharedStore> MetricsStore<S> {
    /// Wrap `inner` with metrics collection.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            stats: Arc::new(Mutex::new(StoreStats::default())),
        }
    }

    /// Return a snapshot of the current statistics.
    pub fn stats(&self) -> StoreStats {
        self.stats.lock().clone()
    }

    /// Reset all statistics to zero.
    pub fn reset_stats(&self) {
        *self.stats.lock() = StoreStats::default();
    }

    /// Return a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn record(&self, start: Instant, bump: impl FnOnce(&mut StoreStats)) {
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let mut stats = self.stats.lock();
        bump(&mut stats);
        stats.latency_sum_ms += elapsed_ms;
    }
}

impl<S: SharedStore> SharedStore for MetricsStore<S> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let start = Instant::now();
        let result = self.inner.get(key);
        self.record(start, |s| s.get_count += 1);
        result
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let start = Instant::now();
        let result = self.inner.set(key, value);
        self.record(start, |s| s.set_count += 1);
        result
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        let start = Instant::now();
        let result = self.inner.incr(key);
        self.record(start, |s| s.incr_count += 1);
        result
    }

    fn watch(&self, key: &str) -> StoreResult<Watched> {
        let start = Instant::now();
        let result = self.inner.watch(key);
        self.record(start, |s| s.watch_count += 1);
        result
    }

    fn exec_set(&self, watched: &Watched, value: &str) -> StoreResult<bool> {
        let start = Instant::now();
        let result = self.inner.exec_set(watched, value);
        let conflicted = matches!(result, Ok(false));
        if conflicted {
            debug!(key = %watched.key, backend = self.inner.name(), "Optimistic exec discarded");
        }
        self.record(start, |s| {
            s.exec_count += 1;
            if conflicted {
                s.exec_conflicts += 1;
            }
        });
        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
