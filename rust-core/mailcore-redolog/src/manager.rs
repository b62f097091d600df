// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Redo log manager
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The manager owns the active segment and is the only interface the mailbox
// engine uses to log work:
//
//   submit(op)            -> CommitRef   (start marker appended)
//   wait_for_commit(ref)  -> op          (op durable, CommitTxn appended)
//   abort(ref)                           (AbortTxn appended and synced)
//
// Appends run under the shared side of `rw`, rollover and `quiesce` take the
// exclusive side. Lock order is always `rw`, then `writer`, then `active`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use mailcore_sequence::SequenceNumberGenerator;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::RedoConfig;
use crate::error::{RedoError, RedoResult};
use crate::header::HEADER_LEN;
use crate::op::{
    AbortTxn, Checkpoint, CommitTxn, LoggedOp, OpRegistry, RedoableOp, TransactionId,
    TxnIdGenerator,
};
use crate::player::uncommitted_ops;
use crate::segment::{archive_path, list_segments, list_segments_from, read_segment, SegmentInfo};
use crate::writer::LogWriter;

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Where a start marker was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpPosition {
    /// Sequence of the segment holding the record.
    pub sequence: u64,
    /// Byte offset of the record in that segment.
    pub offset: u64,
}

/// Handle returned by [`RedoLogManager::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub txn_id: TransactionId,
    pub position: OpPosition,
}

/// A logged op still waiting for its end marker.
#[derive(Debug)]
struct ActiveOp {
    logged: LoggedOp,
    /// Offset just past the start marker in the current segment.
    end_offset: u64,
}

/// Exclusive hold on the log. No thread logs or rolls over while it exists.
pub struct QuiesceGuard<'a> {
    _exclusive: RwLockWriteGuard<'a, ()>,
}

/// Write-ahead redo log for one mailbox server.
pub struct RedoLogManager {
    config: RedoConfig,
    sequence: Arc<dyn SequenceNumberGenerator>,
    registry: Arc<OpRegistry>,
    rw: RwLock<()>,
    writer: Mutex<Option<LogWriter>>,
    active: Mutex<BTreeMap<TransactionId, ActiveOp>>,
    txn_ids: TxnIdGenerator,
    running: AtomicBool,
    failed: AtomicBool,
    /// Segment size right after it was opened; soft-limit rollover needs
    /// the segment to have grown past it.
    initial_size: AtomicU64,
    logged_count: AtomicU64,
    logged_micros: AtomicU64,
}

impl fmt::Debug for RedoLogManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedoLogManager")
            .field("log_path", &self.config.log_path)
            .field("server_id", &self.config.server_id)
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("failed", &self.failed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl RedoLogManager {
    pub fn new(
        config: RedoConfig,
        sequence: Arc<dyn SequenceNumberGenerator>,
        registry: OpRegistry,
    ) -> Self {
        Self {
            config,
            sequence,
            registry: Arc::new(registry),
            rw: RwLock::new(()),
            writer: Mutex::new(None),
            active: Mutex::new(BTreeMap::new()),
            txn_ids: TxnIdGenerator::new(),
            running: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            initial_size: AtomicU64::new(HEADER_LEN as u64),
            logged_count: AtomicU64::new(0),
            logged_micros: AtomicU64::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open or create the active segment and run crash recovery.
    ///
    /// Ops left uncommitted by the previous run go back into the active table
    /// and are redone once the log accepts new work.
    pub fn start(&self) -> RedoResult<()> {
        let recovered = {
            let _exclusive = self.rw.write();
            if self.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            fs::create_dir_all(&self.config.archive_dir)?;

            let mut slot = self.writer.lock();
            let carried = self.open_log(&mut slot)?;
            let sequence = slot.as_ref().map_or(0, LogWriter::sequence);
            let mut recovered = Vec::with_capacity(carried.len());
            let mut active = self.active.lock();
            for entry in carried {
                let commit = CommitRef {
                    txn_id: entry.logged.txn_id,
                    position: OpPosition {
                        sequence,
                        offset: entry.logged.offset,
                    },
                };
                recovered.push((commit, Arc::clone(&entry.logged.op)));
                active.insert(commit.txn_id, entry);
            }
            drop(active);

            self.failed.store(false, Ordering::SeqCst);
            self.running.store(true, Ordering::SeqCst);
            if let Some(writer) = slot.as_ref() {
                info!(
                    path = %writer.path().display(),
                    sequence = writer.sequence(),
                    size = writer.size(),
                    server_id = %self.config.server_id,
                    "Redo log started"
                );
            }
            recovered
        };

        if !recovered.is_empty() {
            if let Err(e) = self.recover(&recovered) {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Roll over whatever is logged, then seal the empty active segment.
    pub fn stop(&self) -> RedoResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let _exclusive = self.rw.write();
        let mut slot = self.writer.lock();
        if slot.as_ref().is_some_and(LogWriter::has_records) {
            self.rollover_locked(&mut slot)?;
        }
        if let Some(mut writer) = slot.take() {
            writer.seal()?;
        }

        let items = self.logged_count.load(Ordering::SeqCst);
        let micros = self.logged_micros.load(Ordering::SeqCst);
        let ms_per_item = if items == 0 {
            0.0
        } else {
            micros as f64 / 1000.0 / items as f64
        };
        info!(items, ms_per_item, "Logged: {items} items, {ms_per_item:.3} ms/item");
        Ok(())
    }

    /// Returns the uncommitted ops found in an existing log, each present in
    /// the new active segment.
    fn open_log(&self, slot: &mut Option<LogWriter>) -> RedoResult<Vec<ActiveOp>> {
        let path = &self.config.log_path;
        let existing = match fs::metadata(path) {
            Ok(meta) => meta.len() > 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        if !existing {
            let sequence = self.first_sequence()?;
            let writer = LogWriter::create(
                path,
                sequence,
                &self.config.server_id,
                self.config.sync_mode.clone(),
                self.config.max_record_size,
            )?;
            self.initial_size.store(writer.size(), Ordering::SeqCst);
            *slot = Some(writer);
            return Ok(Vec::new());
        }

        let contents = self.check(read_segment(path, &self.registry, self.config.max_record_size))?;
        if let Some(last) = contents.ops.iter().map(|logged| logged.txn_id).max() {
            self.txn_ids.advance_past(last);
        }
        let recovered = if self.config.supports_crash_recovery {
            uncommitted_ops(&contents)
        } else {
            Vec::new()
        };

        let sequence = contents.header.sequence();
        self.sequence.init_sequence(sequence)?;

        let mut carried = Vec::with_capacity(recovered.len());
        let writer = if !contents.header.is_open() && !contents.is_empty() {
            let archived = archive_path(&self.config.archive_dir, sequence);
            fs::rename(path, &archived)?;
            warn!(
                path = %path.display(),
                archived = %archived.display(),
                sequence,
                "Archived sealed redo log left behind by an interrupted rollover"
            );
            let next = self.sequence.increment_sequence()?;
            let mut writer = LogWriter::create(
                path,
                next,
                &self.config.server_id,
                self.config.sync_mode.clone(),
                self.config.max_record_size,
            )?;
            for mut logged in recovered {
                let end_offset = self.check(writer.append(&mut logged))?;
                carried.push(ActiveOp { logged, end_offset });
            }
            self.check(writer.sync())?;
            writer
        } else {
            let writer = LogWriter::resume(
                path,
                &contents,
                self.config.sync_mode.clone(),
                self.config.max_record_size,
            )?;
            let end_offset = writer.size();
            carried.extend(
                recovered
                    .into_iter()
                    .map(|logged| ActiveOp { logged, end_offset }),
            );
            writer
        };
        self.initial_size.store(writer.size(), Ordering::SeqCst);
        *slot = Some(writer);
        Ok(carried)
    }

    /// Sequence for a brand-new active segment. Continues after the newest
    /// archived segment when there is one.
    fn first_sequence(&self) -> RedoResult<u64> {
        match list_segments(&self.config.archive_dir)?.last() {
            Some(newest) => {
                let current = self.sequence.current_sequence()?;
                self.sequence.init_sequence(newest.sequence.max(current))?;
                Ok(self.sequence.increment_sequence()?)
            }
            None => Ok(self.sequence.current_sequence()?),
        }
    }

    /// Redo each recovered op, then end it with an abort whether or not the
    /// redo succeeded. No manager lock is held while an op is redone, so a
    /// redo may log its effect through `submit`.
    fn recover(&self, recovered: &[(CommitRef, Arc<dyn RedoableOp>)]) -> RedoResult<()> {
        info!(count = recovered.len(), "Starting redo log crash recovery");
        let mut failed = 0usize;
        for (commit, op) in recovered {
            match op.redo() {
                Ok(()) => debug!(txn = %commit.txn_id, op_type = op.op_type(), "Redid uncommitted op"),
                Err(e) => {
                    failed += 1;
                    error!(
                        txn = %commit.txn_id,
                        op_type = op.op_type(),
                        error = %e,
                        "Redo of uncommitted op failed"
                    );
                }
            }
            self.abort(commit)?;
        }
        self.force_rollover()?;
        info!(count = recovered.len(), failed, "Finished redo log crash recovery");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Logging
    // -----------------------------------------------------------------------

    /// Log the start of `op` and return a handle to commit or abort it.
    pub fn submit(&self, op: Arc<dyn RedoableOp>) -> RedoResult<CommitRef> {
        self.ensure_running()?;
        let started = Instant::now();
        let commit_ref = {
            let _shared = self.rw.read();
            let mut slot = self.writer.lock();
            let writer = slot.as_mut().ok_or(RedoError::NotRunning)?;

            let mut logged = LoggedOp::new(self.txn_ids.next_id(), &self.config.server_id, op);
            logged.start(now_millis());
            let end_offset = self.check(writer.append(&mut logged))?;

            let commit_ref = CommitRef {
                txn_id: logged.txn_id,
                position: OpPosition {
                    sequence: logged.sequence,
                    offset: logged.offset,
                },
            };
            self.active
                .lock()
                .insert(logged.txn_id, ActiveOp { logged, end_offset });
            commit_ref
        };

        self.logged_count.fetch_add(1, Ordering::SeqCst);
        self.logged_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::SeqCst);

        self.rollover_after_append();
        Ok(commit_ref)
    }

    /// Make the op durable, log its commit and hand it back for applying.
    pub fn wait_for_commit(&self, commit: &CommitRef) -> RedoResult<Arc<dyn RedoableOp>> {
        self.ensure_running()?;
        let op = {
            let _shared = self.rw.read();
            let mut slot = self.writer.lock();
            let writer = slot.as_mut().ok_or(RedoError::NotRunning)?;
            let mut active = self.active.lock();
            let (end_offset, op) = active
                .get(&commit.txn_id)
                .map(|entry| (entry.end_offset, Arc::clone(&entry.logged.op)))
                .ok_or(RedoError::UnknownTransaction(commit.txn_id))?;

            self.check(writer.sync_through(end_offset))?;

            let mut marker = LoggedOp::new(
                commit.txn_id,
                &self.config.server_id,
                Arc::new(CommitTxn {
                    committed_type: op.op_type(),
                }),
            );
            marker.start(now_millis());
            self.check(writer.append(&mut marker))?;
            active.remove(&commit.txn_id);
            op
        };
        self.rollover_after_append();
        Ok(op)
    }

    /// Log an abort for the op so recovery never redoes it.
    pub fn abort(&self, commit: &CommitRef) -> RedoResult<()> {
        self.ensure_running()?;
        let _shared = self.rw.read();
        let mut slot = self.writer.lock();
        let writer = slot.as_mut().ok_or(RedoError::NotRunning)?;
        let mut active = self.active.lock();
        let op_type = active
            .get(&commit.txn_id)
            .map(|entry| entry.logged.op_type())
            .ok_or(RedoError::UnknownTransaction(commit.txn_id))?;

        let mut marker = LoggedOp::new(
            commit.txn_id,
            &self.config.server_id,
            Arc::new(AbortTxn {
                aborted_type: op_type,
            }),
        );
        marker.start(now_millis());
        self.check(writer.append(&mut marker))?;
        self.check(writer.sync())?;
        active.remove(&commit.txn_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rollover
    // -----------------------------------------------------------------------

    fn rollover_needed(&self, writer: &LogWriter) -> bool {
        let size = writer.size();
        if size >= self.config.rollover_hard_max_bytes {
            return true;
        }
        let age_ms = now_millis().saturating_sub(writer.header().create_time());
        size >= self.config.rollover_soft_max_bytes
            && size > self.initial_size.load(Ordering::SeqCst)
            && age_ms >= self.config.rollover_min_age_ms as i64
    }

    fn maybe_rollover(&self) -> RedoResult<()> {
        let needed = self
            .writer
            .lock()
            .as_ref()
            .is_some_and(|writer| self.rollover_needed(writer));
        if !needed {
            return Ok(());
        }

        let _exclusive = self.rw.write();
        let mut slot = self.writer.lock();
        // Another thread may have rolled over while we waited.
        if slot.as_ref().is_some_and(|writer| self.rollover_needed(writer)) {
            self.rollover_locked(&mut slot)?;
        }
        Ok(())
    }

    /// Rollover that follows an append. The record is already in the log, so
    /// a failure here is not returned to the caller: non-fatal errors are
    /// retried on the next append, fatal ones stop the manager.
    fn rollover_after_append(&self) {
        if let Err(e) = self.maybe_rollover() {
            if e.is_fatal() {
                if !self.has_failed() {
                    self.signal_fatal(&e);
                }
            } else {
                warn!(error = %e, "Redo log rollover failed, retrying on next append");
            }
        }
    }

    /// Roll over now if the active segment holds any records. Returns
    /// whether a rollover happened.
    pub fn force_rollover(&self) -> RedoResult<bool> {
        self.ensure_running()?;
        let _exclusive = self.rw.write();
        let mut slot = self.writer.lock();
        if !slot.as_ref().is_some_and(LogWriter::has_records) {
            return Ok(false);
        }
        self.rollover_locked(&mut slot)?;
        Ok(true)
    }

    /// Caller must hold the exclusive side of `rw`.
    fn rollover_locked(&self, slot: &mut Option<LogWriter>) -> RedoResult<()> {
        let started = Instant::now();
        let writer = slot.as_mut().ok_or(RedoError::NotRunning)?;
        let old_sequence = writer.sequence();
        let new_sequence = self.sequence.increment_sequence()?;
        let mut active = self.active.lock();

        let mut checkpoint = LoggedOp::new(
            self.txn_ids.next_id(),
            &self.config.server_id,
            Arc::new(Checkpoint {
                active: active.keys().copied().collect(),
            }),
        );
        checkpoint.start(now_millis());
        self.check(writer.append(&mut checkpoint))?;
        self.check(writer.seal())?;

        let archived = archive_path(&self.config.archive_dir, old_sequence);
        self.check(fs::rename(writer.path(), &archived).map_err(RedoError::from))?;

        let mut next = self.check(LogWriter::create(
            &self.config.log_path,
            new_sequence,
            &self.config.server_id,
            self.config.sync_mode.clone(),
            self.config.max_record_size,
        ))?;
        for entry in active.values_mut() {
            entry.end_offset = self.check(next.append(&mut entry.logged))?;
        }
        self.check(next.sync())?;
        self.initial_size.store(next.size(), Ordering::SeqCst);
        let carried = active.len();
        drop(active);
        *slot = Some(next);

        info!(
            old_sequence,
            new_sequence,
            archived = %archived.display(),
            carried,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Redo log rolled over"
        );
        Ok(())
    }

    /// Block all logging and rollover until the guard is dropped.
    ///
    /// Calling `submit` on the same thread while holding the guard deadlocks.
    pub fn quiesce(&self) -> QuiesceGuard<'_> {
        QuiesceGuard {
            _exclusive: self.rw.write(),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Sealed segments in the archive, sorted by sequence.
    pub fn archived_segments(&self) -> RedoResult<Vec<SegmentInfo>> {
        list_segments(&self.config.archive_dir)
    }

    /// Sealed segments with sequence `>= from_sequence`.
    pub fn archived_segments_from(&self, from_sequence: u64) -> RedoResult<Vec<SegmentInfo>> {
        list_segments_from(&self.config.archive_dir, from_sequence)
    }

    /// Sequence of the active segment, `None` when stopped.
    pub fn current_sequence(&self) -> Option<u64> {
        self.writer.lock().as_ref().map(LogWriter::sequence)
    }

    /// Number of ops logged but not yet committed or aborted.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &RedoConfig {
        &self.config
    }

    pub fn log_path(&self) -> &Path {
        &self.config.log_path
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.config.archive_dir.clone()
    }

    /// Registry used to decode segments written by this manager.
    pub fn registry(&self) -> Arc<OpRegistry> {
        Arc::clone(&self.registry)
    }

    // -----------------------------------------------------------------------
    // Failure handling
    // -----------------------------------------------------------------------

    /// Stop accepting work after an unrecoverable error.
    pub fn signal_fatal(&self, err: &RedoError) {
        error!(error = %err, path = %self.config.log_path.display(), "Fatal redo log error, refusing further appends");
        self.failed.store(true, Ordering::SeqCst);
    }

    fn check<T>(&self, result: RedoResult<T>) -> RedoResult<T> {
        result.inspect_err(|e| {
            if e.is_fatal() {
                self.signal_fatal(e);
            }
        })
    }

    fn ensure_running(&self) -> RedoResult<()> {
        if self.failed.load(Ordering::SeqCst) || !self.running.load(Ordering::SeqCst) {
            return Err(RedoError::NotRunning);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncMode;
    use crate::op::{OP_ABORT_TXN, OP_CHECKPOINT, OP_COMMIT_TXN};
    use crate::player::RedoPlayer;
    use crate::record::DEFAULT_MAX_RECORD_SIZE;
    use crate::testing::{self, DeliverOp, Journal, RejectOp, DELIVER_OP};
    use mailcore_sequence::{
        CasRetryPolicy, DistributedSequenceGenerator, LocalSequenceGenerator, SequenceError,
        SequenceResult,
    };
    use mailcore_storage::InMemoryStore;
    use std::sync::{mpsc, Weak};
    use std::time::Duration;
    use tempfile::TempDir;

    const RELOG_OP: u16 = 130;

    type ManagerSlot = Arc<Mutex<Weak<RedoLogManager>>>;

    /// Redoes itself by logging and committing a fresh delivery.
    #[derive(Debug)]
    struct RelogOp {
        mailbox_id: i64,
        item_id: u32,
        journal: Journal,
        manager: ManagerSlot,
    }

    impl RedoableOp for RelogOp {
        fn op_type(&self) -> u16 {
            RELOG_OP
        }

        fn mailbox_id(&self) -> Option<i64> {
            Some(self.mailbox_id)
        }

        fn serialize_payload(&self) -> RedoResult<Vec<u8>> {
            Ok(serde_json::to_vec(&(self.mailbox_id, self.item_id))?)
        }

        fn redo(&self) -> RedoResult<()> {
            let manager = self.manager.lock().upgrade().ok_or(RedoError::NotRunning)?;
            let commit = manager.submit(DeliverOp::new(self.mailbox_id, self.item_id, &self.journal))?;
            manager.wait_for_commit(&commit)?.redo()
        }
    }

    fn relog_registry(journal: &Journal, slot: &ManagerSlot) -> OpRegistry {
        let mut registry = testing::registry(journal);
        let (journal, slot) = (Arc::clone(journal), Arc::clone(slot));
        registry
            .register(RELOG_OP, move |payload| {
                let (mailbox_id, item_id): (i64, u32) = serde_json::from_slice(payload)?;
                Ok(Arc::new(RelogOp {
                    mailbox_id,
                    item_id,
                    journal: Arc::clone(&journal),
                    manager: Arc::clone(&slot),
                }) as Arc<dyn RedoableOp>)
            })
            .unwrap();
        registry
    }

    /// Counter whose increments always lose coordination.
    struct StuckSequence(LocalSequenceGenerator);

    impl SequenceNumberGenerator for StuckSequence {
        fn current_sequence(&self) -> SequenceResult<u64> {
            self.0.current_sequence()
        }

        fn init_sequence(&self, seq: u64) -> SequenceResult<()> {
            self.0.init_sequence(seq)
        }

        fn increment_sequence(&self) -> SequenceResult<u64> {
            Err(SequenceError::CoordinationFailure {
                operation: "increment_sequence".to_string(),
                attempts: 100,
            })
        }
    }

    fn manager_with(config: RedoConfig, journal: &Journal) -> RedoLogManager {
        RedoLogManager::new(
            config,
            Arc::new(LocalSequenceGenerator::new()),
            testing::registry(journal),
        )
    }

    fn started(dir: &Path, journal: &Journal) -> RedoLogManager {
        let manager = manager_with(RedoConfig::in_dir(dir, "node-1"), journal);
        manager.start().unwrap();
        manager
    }

    fn read_active(manager: &RedoLogManager) -> crate::segment::SegmentContents {
        read_segment(manager.log_path(), &manager.registry(), DEFAULT_MAX_RECORD_SIZE).unwrap()
    }

    fn archived_paths(manager: &RedoLogManager) -> Vec<PathBuf> {
        manager
            .archived_segments()
            .unwrap()
            .into_iter()
            .map(|s| s.path)
            .collect()
    }

    #[test]
    fn test_submit_before_start_fails() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let manager = manager_with(RedoConfig::in_dir(dir.path(), "node-1"), &journal);
        assert!(matches!(
            manager.submit(DeliverOp::new(1, 1, &journal)),
            Err(RedoError::NotRunning)
        ));
    }

    #[test]
    fn test_submit_and_commit() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let manager = started(dir.path(), &journal);

        let commit = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        assert_eq!(commit.position.offset, HEADER_LEN as u64);
        assert_eq!(Some(commit.position.sequence), manager.current_sequence());
        assert_eq!(manager.active_count(), 1);

        let op = manager.wait_for_commit(&commit).unwrap();
        assert_eq!(op.op_type(), DELIVER_OP);
        assert_eq!(op.mailbox_id(), Some(7));
        assert_eq!(manager.active_count(), 0);

        let contents = read_active(&manager);
        let types: Vec<u16> = contents.ops.iter().map(|o| o.op_type()).collect();
        assert_eq!(types, vec![DELIVER_OP, OP_COMMIT_TXN]);
        assert_eq!(contents.ops[0].txn_id, commit.txn_id);
        assert_eq!(contents.ops[1].txn_id, commit.txn_id);
        assert_eq!(contents.ops[0].server_id, "node-1");
        // Nothing is applied by logging; applying is the engine's job.
        assert!(journal.lock().is_empty());
    }

    #[test]
    fn test_commit_unknown_transaction() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let manager = started(dir.path(), &journal);

        let commit = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        manager.wait_for_commit(&commit).unwrap();
        assert!(matches!(
            manager.wait_for_commit(&commit),
            Err(RedoError::UnknownTransaction(id)) if id == commit.txn_id
        ));
    }

    #[test]
    fn test_abort_writes_marker() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let manager = started(dir.path(), &journal);

        let commit = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        manager.abort(&commit).unwrap();
        assert_eq!(manager.active_count(), 0);

        let contents = read_active(&manager);
        assert_eq!(contents.ops.last().unwrap().op_type(), OP_ABORT_TXN);
        assert!(uncommitted_ops(&contents).is_empty());
        assert_eq!(contents.header.file_size(), contents.valid_len);
    }

    #[test]
    fn test_force_rollover_archives_and_advances_sequence() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let manager = RedoLogManager::new(
            RedoConfig::in_dir(dir.path(), "node-1"),
            Arc::new(LocalSequenceGenerator::starting_at(5)),
            testing::registry(&journal),
        );
        manager.start().unwrap();
        assert_eq!(manager.current_sequence(), Some(5));

        let commit = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        manager.wait_for_commit(&commit).unwrap();
        assert!(manager.force_rollover().unwrap());
        assert_eq!(manager.current_sequence(), Some(6));

        let archived = manager.archived_segments().unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].sequence, 5);

        let sealed = read_segment(&archived[0].path, &manager.registry(), DEFAULT_MAX_RECORD_SIZE).unwrap();
        assert!(!sealed.header.is_open());
        assert_eq!(sealed.header.file_size(), archived[0].file_size);
        assert_eq!(sealed.ops.last().unwrap().op_type(), OP_CHECKPOINT);

        // Nothing logged since: no second rollover.
        assert!(!manager.force_rollover().unwrap());
        assert_eq!(manager.archived_segments_from(6).unwrap().len(), 0);
    }

    #[test]
    fn test_rollover_carries_active_ops() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let manager = started(dir.path(), &journal);

        let pending = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        manager.force_rollover().unwrap();

        let contents = read_active(&manager);
        assert_eq!(contents.ops.len(), 1);
        assert_eq!(contents.ops[0].txn_id, pending.txn_id);

        manager.wait_for_commit(&pending).unwrap();
        manager.stop().unwrap();

        let replayed = testing::journal();
        let player = RedoPlayer::new(Arc::new(testing::registry(&replayed)));
        let stats = player.replay_redo(&archived_paths(&manager)).unwrap();
        assert_eq!(*replayed.lock(), vec![(7, 1)]);
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.uncommitted, 0);
    }

    #[test]
    fn test_hard_limit_triggers_rollover() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let mut config = RedoConfig::in_dir(dir.path(), "node-1");
        config.rollover_hard_max_bytes = HEADER_LEN as u64 + 1;
        let manager = manager_with(config, &journal);
        manager.start().unwrap();

        let commit = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        assert_eq!(manager.archived_segments().unwrap().len(), 1);
        // The op was carried into the new segment and can still commit.
        manager.wait_for_commit(&commit).unwrap();
    }

    #[test]
    fn test_soft_limit_waits_for_min_age() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();

        let mut young = RedoConfig::in_dir(dir.path().join("young"), "node-1");
        young.rollover_soft_max_bytes = HEADER_LEN as u64 + 1;
        young.rollover_min_age_ms = 3_600_000;
        let manager = manager_with(young, &journal);
        manager.start().unwrap();
        manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        assert!(manager.archived_segments().unwrap().is_empty());

        let mut aged = RedoConfig::in_dir(dir.path().join("aged"), "node-1");
        aged.rollover_soft_max_bytes = HEADER_LEN as u64 + 1;
        aged.rollover_min_age_ms = 0;
        let manager = manager_with(aged, &journal);
        manager.start().unwrap();
        manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        assert_eq!(manager.archived_segments().unwrap().len(), 1);
    }

    #[test]
    fn test_stop_seals_empty_active_segment() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let manager = started(dir.path(), &journal);

        let commit = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        manager.wait_for_commit(&commit).unwrap();
        manager.stop().unwrap();
        assert!(!manager.is_running());
        assert_eq!(manager.current_sequence(), None);

        let contents =
            read_segment(manager.log_path(), &manager.registry(), DEFAULT_MAX_RECORD_SIZE).unwrap();
        assert!(!contents.header.is_open());
        assert!(contents.is_empty());
        assert_eq!(manager.archived_segments().unwrap().len(), 1);

        // Stopping twice is harmless.
        manager.stop().unwrap();
    }

    #[test]
    fn test_restart_after_clean_stop_resumes_sequence() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let first = started(dir.path(), &journal);
        let commit = first.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        first.wait_for_commit(&commit).unwrap();
        first.stop().unwrap();

        let second = started(dir.path(), &journal);
        assert_eq!(second.current_sequence(), Some(1));
        assert_eq!(second.archived_segments().unwrap().len(), 1);
        assert!(read_active(&second).header.is_open());
        assert!(journal.lock().is_empty());
    }

    #[test]
    fn test_crash_recovery_redoes_uncommitted() {
        let dir = TempDir::new().unwrap();
        let before_crash = testing::journal();
        {
            let manager = started(dir.path(), &before_crash);
            let done = manager.submit(DeliverOp::new(7, 1, &before_crash)).unwrap();
            manager.wait_for_commit(&done).unwrap();
            manager.submit(DeliverOp::new(7, 2, &before_crash)).unwrap();
            // Dropped without stop: the process died.
        }

        let recovered = testing::journal();
        let manager = started(dir.path(), &recovered);
        assert_eq!(*recovered.lock(), vec![(7, 2)]);
        assert_eq!(manager.active_count(), 0);

        // The crashed segment was rolled into the archive with an abort for
        // the redone op. DeliverOp does not log its redo, so a later replay
        // applies only the committed one.
        let replayed = testing::journal();
        let player = RedoPlayer::new(Arc::new(testing::registry(&replayed)));
        let stats = player.replay_redo(&archived_paths(&manager)).unwrap();
        assert_eq!(*replayed.lock(), vec![(7, 1)]);
        assert_eq!(stats.aborted, 1);

        // New ids never collide with ids from before the crash.
        let fresh = manager.submit(DeliverOp::new(7, 3, &recovered)).unwrap();
        let archived = read_segment(&archived_paths(&manager)[0], &manager.registry(), DEFAULT_MAX_RECORD_SIZE).unwrap();
        assert!(archived.ops.iter().all(|o| o.txn_id < fresh.txn_id));
    }

    #[test]
    fn test_crash_recovery_survives_failed_redo() {
        let dir = TempDir::new().unwrap();
        let before_crash = testing::journal();
        {
            let manager = started(dir.path(), &before_crash);
            manager.submit(RejectOp::new(7)).unwrap();
            manager.submit(DeliverOp::new(7, 2, &before_crash)).unwrap();
        }

        let recovered = testing::journal();
        let manager = started(dir.path(), &recovered);
        assert!(manager.is_running());
        assert_eq!(*recovered.lock(), vec![(7, 2)]);
        assert_eq!(manager.active_count(), 0);
        manager.stop().unwrap();

        // Both ops were ended, so the next start has nothing to redo.
        let later = testing::journal();
        let manager = started(dir.path(), &later);
        assert!(manager.is_running());
        assert!(later.lock().is_empty());
    }

    #[test]
    fn test_recovery_redo_can_log_through_manager() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let slot: ManagerSlot = Arc::new(Mutex::new(Weak::new()));
        let new_manager = || {
            Arc::new(RedoLogManager::new(
                RedoConfig::in_dir(dir.path(), "node-1"),
                Arc::new(LocalSequenceGenerator::new()),
                relog_registry(&journal, &slot),
            ))
        };
        {
            let manager = new_manager();
            manager.start().unwrap();
            let done = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
            manager.wait_for_commit(&done).unwrap();
            manager
                .submit(Arc::new(RelogOp {
                    mailbox_id: 7,
                    item_id: 2,
                    journal: Arc::clone(&journal),
                    manager: Arc::clone(&slot),
                }))
                .unwrap();
        }
        assert!(journal.lock().is_empty());

        let manager = new_manager();
        *slot.lock() = Arc::downgrade(&manager);
        let (tx, rx) = mpsc::channel();
        let starter = Arc::clone(&manager);
        std::thread::spawn(move || {
            let _ = tx.send(starter.start());
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

        assert_eq!(*journal.lock(), vec![(7, 2)]);
        assert_eq!(manager.active_count(), 0);
        manager.stop().unwrap();

        // The redo was logged under its own committed transaction, so the
        // archive replays to the same state as the live one.
        let replayed = testing::journal();
        let idle: ManagerSlot = Arc::new(Mutex::new(Weak::new()));
        let player = RedoPlayer::new(Arc::new(relog_registry(&replayed, &idle)));
        let stats = player.replay_redo(&archived_paths(&manager)).unwrap();
        assert_eq!(*replayed.lock(), vec![(7, 1), (7, 2)]);
        assert_eq!(stats.applied, 2);
        assert_eq!(stats.aborted, 1);
    }

    #[test]
    fn test_failed_rollover_does_not_fail_logged_op() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let mut config = RedoConfig::in_dir(dir.path(), "node-1");
        config.rollover_hard_max_bytes = 1;
        let manager = RedoLogManager::new(
            config,
            Arc::new(StuckSequence(LocalSequenceGenerator::new())),
            testing::registry(&journal),
        );
        manager.start().unwrap();

        let commit = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        assert_eq!(manager.active_count(), 1);
        let op = manager.wait_for_commit(&commit).unwrap();
        assert_eq!(op.mailbox_id(), Some(7));
        assert_eq!(manager.active_count(), 0);
        assert!(!manager.has_failed());
        assert!(manager.archived_segments().unwrap().is_empty());

        // Each op is in the log exactly once and nothing is left to recover.
        let contents = read_active(&manager);
        let types: Vec<u16> = contents.ops.iter().map(|o| o.op_type()).collect();
        assert_eq!(types, vec![DELIVER_OP, OP_COMMIT_TXN]);
        assert!(uncommitted_ops(&contents).is_empty());

        // The next append still works and retries the rollover.
        let next = manager.submit(DeliverOp::new(7, 2, &journal)).unwrap();
        manager.wait_for_commit(&next).unwrap();
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_crash_recovery_disabled() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        {
            let manager = started(dir.path(), &journal);
            manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
        }

        let mut config = RedoConfig::in_dir(dir.path(), "node-1");
        config.supports_crash_recovery = false;
        let manager = manager_with(config, &journal);
        manager.start().unwrap();
        assert!(journal.lock().is_empty());
        assert!(manager.archived_segments().unwrap().is_empty());
    }

    #[test]
    fn test_sealed_log_from_interrupted_rollover_is_archived() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let config = RedoConfig::in_dir(dir.path(), "node-1");
        {
            let mut writer = LogWriter::create(
                &config.log_path,
                3,
                "node-1",
                SyncMode::Fsync,
                DEFAULT_MAX_RECORD_SIZE,
            )
            .unwrap();
            let mut start = LoggedOp::new(TransactionId::new(10, 1), "node-1", DeliverOp::new(7, 1, &journal));
            start.start(1);
            writer.append(&mut start).unwrap();
            let mut commit = LoggedOp::new(
                TransactionId::new(10, 1),
                "node-1",
                Arc::new(CommitTxn { committed_type: DELIVER_OP }),
            );
            commit.start(2);
            writer.append(&mut commit).unwrap();
            writer.seal().unwrap();
        }

        let manager = manager_with(config, &journal);
        manager.start().unwrap();
        let archived = manager.archived_segments().unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].sequence, 3);
        assert_eq!(manager.current_sequence(), Some(4));
        assert!(read_active(&manager).is_empty());
    }

    #[test]
    fn test_new_log_continues_after_archive() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        {
            let manager = started(dir.path(), &journal);
            manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
            manager.force_rollover().unwrap();
            manager.force_rollover().unwrap();
        }
        fs::remove_file(dir.path().join("redo.log")).unwrap();

        // A fresh local generator starts at 0, but the archive already holds
        // segments 0 and 1.
        let manager = started(dir.path(), &journal);
        assert_eq!(manager.current_sequence(), Some(2));
    }

    #[test]
    fn test_torn_tail_truncated_on_start() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let good_len = {
            let manager = started(dir.path(), &journal);
            let commit = manager.submit(DeliverOp::new(7, 1, &journal)).unwrap();
            manager.wait_for_commit(&commit).unwrap();
            fs::metadata(manager.log_path()).unwrap().len()
        };
        let path = dir.path().join("redo.log");
        let mut data = fs::read(&path).unwrap();
        data.extend_from_slice(&[0x30, 0, 0, 0, 9, 9]);
        fs::write(&path, &data).unwrap();

        let manager = started(dir.path(), &journal);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
        assert_eq!(read_active(&manager).ops.len(), 2);
    }

    #[test]
    fn test_signal_fatal_blocks_further_submits() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let manager = started(dir.path(), &journal);

        manager.signal_fatal(&RedoError::UnknownOpType(999));
        assert!(manager.has_failed());
        assert!(matches!(
            manager.submit(DeliverOp::new(7, 1, &journal)),
            Err(RedoError::NotRunning)
        ));
    }

    #[test]
    fn test_quiesce_blocks_submit() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let manager = started(dir.path(), &journal);
        let (tx, rx) = mpsc::channel();

        std::thread::scope(|s| {
            let guard = manager.quiesce();
            let (submitter, journal) = (&manager, &journal);
            s.spawn(move || {
                let commit = submitter.submit(DeliverOp::new(7, 1, journal)).unwrap();
                tx.send(commit).unwrap();
            });
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(guard);
            let commit = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            manager.wait_for_commit(&commit).unwrap();
        });
    }

    #[test]
    fn test_concurrent_submits_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let journal = testing::journal();
        let mut config = RedoConfig::in_dir(dir.path(), "node-1");
        config.sync_mode = SyncMode::Async;
        let manager = manager_with(config, &journal);
        manager.start().unwrap();

        let ids = Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let manager = &manager;
                let journal = &journal;
                let ids = &ids;
                s.spawn(move || {
                    for i in 0..25u32 {
                        let commit = manager.submit(DeliverOp::new(i64::from(t), i, journal)).unwrap();
                        manager.wait_for_commit(&commit).unwrap();
                        ids.lock().push(commit.txn_id);
                    }
                });
            }
        });

        let mut ids = ids.into_inner();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 100);

        manager.stop().unwrap();
        let replayed = testing::journal();
        let player = RedoPlayer::new(Arc::new(testing::registry(&replayed)));
        let stats = player.replay_redo(&archived_paths(&manager)).unwrap();
        assert_eq!(stats.applied, 100);
    }

    #[test]
    fn test_distributed_sequence_orders_segments_across_nodes() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryStore::new();
        let journal = testing::journal();
        let node = |name: &str| {
            let manager = RedoLogManager::new(
                RedoConfig::in_dir(dir.path().join(name), name),
                Arc::new(DistributedSequenceGenerator::new(
                    store.clone(),
                    CasRetryPolicy::default(),
                )),
                testing::registry(&journal),
            );
            manager.start().unwrap();
            manager
        };
        let a = node("node-a");
        let b = node("node-b");

        a.submit(DeliverOp::new(1, 1, &journal)).unwrap();
        b.submit(DeliverOp::new(2, 1, &journal)).unwrap();
        a.force_rollover().unwrap();
        b.force_rollover().unwrap();

        assert_eq!(a.current_sequence(), Some(1));
        assert_eq!(b.current_sequence(), Some(2));
    }
}
