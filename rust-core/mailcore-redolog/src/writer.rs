// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Segment writer
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The `LogWriter` appends records to the active segment and keeps its header
// in step with what is durable. The header on disk is only rewritten after
// the record bytes it describes have been synced, so an append interrupted
// before its sync leaves `file_size` and `last_op_tstamp` untouched.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SyncMode;
use crate::error::RedoResult;
use crate::header::{LogHeader, HEADER_LEN};
use crate::op::LoggedOp;
use crate::record::RecordEnvelope;
use crate::segment::SegmentContents;

/// Appender for the active segment file.
#[derive(Debug)]
pub struct LogWriter {
    /// Path of the segment file.
    path: PathBuf,

    /// Open read/write handle.
    file: File,

    /// Header as last persisted.
    header: LogHeader,

    /// Bytes written, durable or not.
    size: u64,

    /// Bytes known to be on stable storage.
    durable_size: u64,

    /// Timestamp of the first record ever appended to the segment.
    first_tstamp: i64,

    /// Timestamp of the most recently appended record.
    last_tstamp: i64,

    /// Records appended through this writer.
    appended: u64,

    sync_mode: SyncMode,
    last_sync: Instant,
    max_record_size: u64,
}

impl LogWriter {
    /// Create a fresh, open segment at `path`, replacing any file there.
    pub fn create(
        path: impl AsRef<Path>,
        sequence: u64,
        server_id: &str,
        sync_mode: SyncMode,
        max_record_size: u64,
    ) -> RedoResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = LogHeader::new(server_id, sequence, Utc::now().timestamp_millis())?;
        header.set_open(true);
        header.set_file_size(HEADER_LEN as u64);
        header.write_to(&mut file)?;

        info!(path = %path.display(), sequence, "Created redo log segment");

        Ok(Self {
            path,
            file,
            header,
            size: HEADER_LEN as u64,
            durable_size: HEADER_LEN as u64,
            first_tstamp: 0,
            last_tstamp: 0,
            appended: 0,
            sync_mode,
            last_sync: Instant::now(),
            max_record_size,
        })
    }

    /// Reopen a segment that was just read, dropping any torn tail, and mark
    /// it open for appending.
    pub fn resume(
        path: impl AsRef<Path>,
        contents: &SegmentContents,
        sync_mode: SyncMode,
        max_record_size: u64,
    ) -> RedoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        if contents.torn_bytes > 0 {
            file.set_len(contents.valid_len)?;
            warn!(
                path = %path.display(),
                offset = contents.valid_len,
                dropped = contents.torn_bytes,
                "Truncated torn tail of redo log"
            );
        }
        file.sync_data()?;

        let mut header = contents.header.clone();
        let first_tstamp = contents.ops.first().map(|op| op.timestamp).unwrap_or(0);
        let last_tstamp = contents.ops.last().map(|op| op.timestamp).unwrap_or(0);
        header.set_open(true);
        header.set_file_size(contents.valid_len);
        if header.first_op_tstamp() == 0 {
            header.set_first_op_tstamp(first_tstamp);
        }
        header.set_last_op_tstamp(last_tstamp);
        header.write_to(&mut file)?;

        info!(
            path = %path.display(),
            sequence = header.sequence(),
            size = contents.valid_len,
            records = contents.ops.len(),
            "Resumed redo log segment"
        );

        Ok(Self {
            path,
            file,
            header,
            size: contents.valid_len,
            durable_size: contents.valid_len,
            first_tstamp,
            last_tstamp,
            appended: 0,
            sync_mode,
            last_sync: Instant::now(),
            max_record_size,
        })
    }

    /// Append `logged` to the segment.
    ///
    /// Fills in the record's sequence and offset, then syncs according to the
    /// configured mode. Returns the offset just past the record.
    pub fn append(&mut self, logged: &mut LoggedOp) -> RedoResult<u64> {
        logged.sequence = self.header.sequence();
        logged.offset = self.size;
        let bytes = RecordEnvelope::from_logged(logged)?.encode(self.max_record_size)?;

        self.file.seek(SeekFrom::Start(self.size))?;
        self.file.write_all(&bytes)?;
        self.size += bytes.len() as u64;
        self.appended += 1;
        if self.first_tstamp == 0 {
            self.first_tstamp = logged.timestamp;
        }
        self.last_tstamp = logged.timestamp;

        debug!(
            txn = %logged.txn_id,
            op_type = logged.op_type(),
            offset = logged.offset,
            "Appended redo record"
        );

        self.maybe_sync()?;
        Ok(self.size)
    }

    /// Sync the record bytes, then publish them through the header.
    pub fn sync(&mut self) -> RedoResult<()> {
        self.file.sync_data()?;
        self.durable_size = self.size;
        self.last_sync = Instant::now();

        self.header.set_file_size(self.size);
        if self.header.first_op_tstamp() == 0 {
            self.header.set_first_op_tstamp(self.first_tstamp);
        }
        self.header.set_last_op_tstamp(self.last_tstamp);
        self.header.write_to(&mut self.file)?;
        Ok(())
    }

    /// Sync only if something was appended since the last sync.
    pub fn sync_if_dirty(&mut self) -> RedoResult<()> {
        if self.size > self.durable_size {
            self.sync()?;
        }
        Ok(())
    }

    /// Make everything up to `end_offset` durable.
    pub fn sync_through(&mut self, end_offset: u64) -> RedoResult<()> {
        if end_offset > self.durable_size {
            self.sync()?;
        }
        Ok(())
    }

    /// Sync and mark the segment sealed.
    pub fn seal(&mut self) -> RedoResult<()> {
        self.sync()?;
        self.header.set_open(false);
        self.header.write_to(&mut self.file)?;
        debug!(path = %self.path.display(), size = self.size, "Sealed redo log segment");
        Ok(())
    }

    /// The header as last persisted.
    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Sequence of this segment.
    pub fn sequence(&self) -> u64 {
        self.header.sequence()
    }

    /// Current segment length, including bytes not yet synced.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Segment length known to be durable.
    pub fn durable_size(&self) -> u64 {
        self.durable_size
    }

    /// True if the segment contains any records.
    pub fn has_records(&self) -> bool {
        self.size > HEADER_LEN as u64
    }

    /// Records appended through this writer.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn maybe_sync(&mut self) -> RedoResult<()> {
        let due = match &self.sync_mode {
            SyncMode::Fsync => true,
            SyncMode::Periodic { interval_ms } => {
                self.last_sync.elapsed() >= Duration::from_millis(*interval_ms)
            }
            SyncMode::Async => false,
        };
        if due {
            self.sync()?;
        }
        Ok(())
    }
}
