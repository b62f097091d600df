// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The sequence generator capability and the process-local variant.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::error::SequenceResult;

/// Largest sequence number handed out before wrapping to 0.
pub const MAX_SEQUENCE: u64 = i64::MAX as u64;

/// Assigns the sequence number of the current redo log segment.
pub trait SequenceNumberGenerator: Send + Sync {
    /// The current sequence value, without changing it.
    fn current_sequence(&self) -> SequenceResult<u64>;

    /// Force the counter to `seq`, typically from the active segment's header
    /// at start-up.
    fn init_sequence(&self, seq: u64) -> SequenceResult<()>;

    /// Advance the counter and return the new value. After `MAX_SEQUENCE` the
    /// next value is 0.
    fn increment_sequence(&self) -> SequenceResult<u64>;
}

/// Next value after `current`, wrapping past `MAX_SEQUENCE`.
pub(crate) fn next_sequence(current: u64) -> u64 {
    if current >= MAX_SEQUENCE {
        0
    } else {
        current + 1
    }
}

/// An in-process counter.
///
/// Increments are atomic with respect to other threads in the same process
/// only; two processes each holding one of these will hand out duplicates.
#[derive(Debug, Default)]
pub struct LocalSequenceGenerator {
    current: AtomicU64,
}

impl LocalSequenceGenerator {
    /// Create a generator starting at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator starting at `seq`.
    pub fn starting_at(seq: u64) -> Self {
        Self {
            current: AtomicU64::new(seq.min(MAX_SEQUENCE)),
        }
    }
}

impl SequenceNumberGenerator for LocalSequenceGenerator {
    fn current_sequence(&self) -> SequenceResult<u64> {
        Ok(self.current.load(Ordering::SeqCst))
    }

    fn init_sequence(&self, seq: u64) -> SequenceResult<()> {
        self.current.store(seq.min(MAX_SEQUENCE), Ordering::SeqCst);
        Ok(())
    }

    fn increment_sequence(&self) -> SequenceResult<u64> {
        let previous = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                Some(next_sequence(cur))
            })
            .unwrap_or_else(|cur| cur);
        let next = next_sequence(previous);
        if next == 0 {
            info!("Local sequence wrapped around to 0");
        }
        Ok(next)
    }
}
