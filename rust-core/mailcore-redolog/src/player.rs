// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Redo player
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Replays sealed segments into the mailbox engine after a crash or while
// restoring. Segments are processed in ascending sequence order (continuing
// across a wrap of the sequence back to 0) and records
// in file order. A start op is buffered until its `CommitTxn` shows up and is
// applied at that point; aborted and never-committed transactions are not
// applied. A transaction that was already applied in this run (for example
// because rollover re-appended it into the next segment) is skipped.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mailcore_sequence::MAX_SEQUENCE;
use tracing::{debug, info};

use crate::error::{RedoError, RedoResult};
use crate::op::{is_builtin, LoggedOp, OpRegistry, TransactionId, OP_ABORT_TXN, OP_COMMIT_TXN};
use crate::record::DEFAULT_MAX_RECORD_SIZE;
use crate::segment::{read_segment, SegmentContents};

/// Counters from one replay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Segments read.
    pub segments: usize,
    /// Committed transactions applied.
    pub applied: usize,
    /// Records skipped because their transaction was already applied.
    pub duplicates: usize,
    /// Transactions dropped because of an abort marker.
    pub aborted: usize,
    /// Transactions still waiting for an end marker when replay finished.
    pub uncommitted: usize,
}

/// Reads segments back and re-applies committed ops.
#[derive(Debug, Clone)]
pub struct RedoPlayer {
    registry: Arc<OpRegistry>,
    max_record_size: u64,
}

impl RedoPlayer {
    pub fn new(registry: Arc<OpRegistry>) -> Self {
        Self {
            registry,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }

    /// Override the record size limit used while reading.
    pub fn with_max_record_size(mut self, max_record_size: u64) -> Self {
        self.max_record_size = max_record_size;
        self
    }

    /// Replay `paths`, handing each committed op to `apply` exactly once.
    pub fn replay<F>(&self, paths: &[PathBuf], mut apply: F) -> RedoResult<ReplayStats>
    where
        F: FnMut(&LoggedOp) -> RedoResult<()>,
    {
        let mut segments = paths
            .iter()
            .map(|path| read_segment(path, &self.registry, self.max_record_size))
            .collect::<RedoResult<Vec<_>>>()?;
        sort_for_replay(&mut segments);

        let mut stats = ReplayStats {
            segments: segments.len(),
            ..ReplayStats::default()
        };
        let mut pending: HashMap<TransactionId, LoggedOp> = HashMap::new();
        let mut applied: HashSet<TransactionId> = HashSet::new();

        for contents in &segments {
            debug!(
                sequence = contents.header.sequence(),
                records = contents.ops.len(),
                "Replaying redo segment"
            );
            for logged in &contents.ops {
                let txn_id = logged.txn_id;
                match logged.op_type() {
                    OP_COMMIT_TXN => {
                        if let Some(op) = pending.remove(&txn_id) {
                            apply(&op).map_err(|e| RedoError::Replay {
                                txn_id,
                                reason: e.to_string(),
                            })?;
                            applied.insert(txn_id);
                            stats.applied += 1;
                        }
                    }
                    OP_ABORT_TXN => {
                        if pending.remove(&txn_id).is_some() {
                            stats.aborted += 1;
                        }
                    }
                    op_type if is_builtin(op_type) => {}
                    _ => {
                        if applied.contains(&txn_id) {
                            stats.duplicates += 1;
                        } else {
                            pending.entry(txn_id).or_insert_with(|| logged.clone());
                        }
                    }
                }
            }
        }

        stats.uncommitted = pending.len();
        info!(
            segments = stats.segments,
            applied = stats.applied,
            duplicates = stats.duplicates,
            aborted = stats.aborted,
            uncommitted = stats.uncommitted,
            "Redo replay finished"
        );
        Ok(stats)
    }

    /// Replay `paths`, calling each committed op's own `redo`.
    pub fn replay_redo(&self, paths: &[PathBuf]) -> RedoResult<ReplayStats> {
        self.replay(paths, |logged| logged.op.redo())
    }

    /// Start ops in the segment at `path` that have no end marker, in file
    /// order.
    pub fn uncommitted(&self, path: &Path) -> RedoResult<Vec<LoggedOp>> {
        let contents = read_segment(path, &self.registry, self.max_record_size)?;
        Ok(uncommitted_ops(&contents))
    }
}

/// Sort by sequence on a circular sequence space. When the widest gap between
/// neighbouring sequences is wider than the gap across the wrap point, the
/// archive spans a wrap and the segments after that gap come first.
fn sort_for_replay(segments: &mut [SegmentContents]) {
    segments.sort_by_key(|contents| contents.header.sequence());
    let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
        return;
    };
    let wrap_gap = first.header.sequence() + MAX_SEQUENCE.saturating_sub(last.header.sequence()) + 1;

    let widest = segments
        .windows(2)
        .enumerate()
        .map(|(i, pair)| (pair[1].header.sequence() - pair[0].header.sequence(), i + 1))
        .max_by_key(|&(gap, _)| gap);
    if let Some((gap, start)) = widest {
        if gap > wrap_gap {
            segments.rotate_left(start);
        }
    }
}

/// Start ops in `contents` that have no end marker, in file order.
pub fn uncommitted_ops(contents: &SegmentContents) -> Vec<LoggedOp> {
    let ended: HashSet<TransactionId> = contents
        .ops
        .iter()
        .filter(|logged| logged.op_type() == OP_COMMIT_TXN || logged.op_type() == OP_ABORT_TXN)
        .map(|logged| logged.txn_id)
        .collect();

    let mut seen = HashSet::new();
    let mut ops: Vec<LoggedOp> = contents
        .ops
        .iter()
        .filter(|logged| !is_builtin(logged.op_type()) && !ended.contains(&logged.txn_id))
        .filter(|logged| seen.insert(logged.txn_id))
        .cloned()
        .collect();
    ops.sort_by_key(|logged| logged.offset);
    ops
}
