// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// One `MailboxLock` per mailbox, created on demand, plus the stuck-lock
// watchdog. The watchdog only reports: a lock that is never released stays
// held until its owner releases it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::LockConfig;
use crate::lock::{LockSnapshot, MailboxLock};

/// Registry of mailbox locks keyed by mailbox id.
#[derive(Debug, Default)]
pub struct MailboxLockManager {
    config: LockConfig,
    locks: Mutex<HashMap<i64, Arc<MailboxLock>>>,
}

impl MailboxLockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// The lock for `mailbox_id`. Every caller gets the same instance.
    pub fn lock_for(&self, mailbox_id: i64) -> Arc<MailboxLock> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(mailbox_id).or_insert_with(|| {
            Arc::new(MailboxLock::with_config(mailbox_id, self.config.clone()))
        }))
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    /// Snapshots of every known lock, by mailbox id.
    pub fn describe_all(&self) -> Vec<LockSnapshot> {
        // Clone the handles first so no lock's state mutex is taken under ours.
        let locks: Vec<Arc<MailboxLock>> = self.locks.lock().values().cloned().collect();
        let mut snapshots: Vec<LockSnapshot> = locks.iter().map(|l| l.describe()).collect();
        snapshots.sort_by_key(|s| s.mailbox_id);
        snapshots
    }

    /// Locks with a hold older than `threshold`.
    pub fn stuck_locks(&self, threshold: Duration) -> Vec<LockSnapshot> {
        self.describe_all()
            .into_iter()
            .filter(|s| s.longest_hold().is_some_and(|held| held >= threshold))
            .collect()
    }

    /// Log a dump of every lock held past the configured threshold.
    /// Returns how many were reported.
    pub fn run_watchdog_pass(&self) -> usize {
        let threshold = self.config.watchdog_threshold();
        let stuck = self.stuck_locks(threshold);
        for snapshot in &stuck {
            warn!(
                mailbox_id = snapshot.mailbox_id,
                held_ms = snapshot.longest_hold().unwrap_or_default().as_millis() as u64,
                waiters = snapshot.waiters.len(),
                "Mailbox lock held past watchdog threshold\n{snapshot}"
            );
        }
        stuck.len()
    }

    /// Forget locks nobody holds, waits on or references.
    pub fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1 || !lock.describe().is_idle());
        let pruned = before - locks.len();
        if pruned > 0 {
            debug!(pruned, remaining = locks.len(), "Pruned idle mailbox locks");
        }
        pruned
    }
}
