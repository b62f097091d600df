// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Every mutating mailbox operation is recorded here before it is applied.
// After a crash the sealed segments are replayed, in sequence order, to bring
// mailbox state back to what was acknowledged.
//
// # Architecture
//
// The log is one active segment file (`redo.log`) plus an archive directory
// of sealed segments named `redo-{sequence:016}.log`. Each segment starts with
// a fixed-size `LogHeader` and is followed by length-prefixed, CRC32-protected
// records. The segment sequence comes from a `SequenceNumberGenerator`, local
// or cluster-shared.
//
// ## Header layout (all integers little-endian, `HEADER_LEN` = 180 bytes)
//
// ```text
// [7 bytes:   magic "ZM_REDO"]
// [1 byte:    open flag]
// [8 bytes:   file_size (u64)]       -- durable length of the segment
// [8 bytes:   sequence (u64)]
// [1 byte:    server_id_len (0-127)]
// [127 bytes: server_id, zero padded]
// [8 bytes:   first_op_tstamp (i64)] -- Unix milliseconds UTC
// [8 bytes:   last_op_tstamp (i64)]
// [8 bytes:   create_time (i64)]
// [4 bytes:   version major (u16), minor (u16)]
// ```
//
// ## Record layout
//
// ```text
// [4 bytes: record_length (u32)]  -- length of everything after the crc
// [4 bytes: crc32 checksum]       -- CRC32 of the envelope
// [8 bytes: sequence (u64)]
// [8 bytes: timestamp (i64)]
// [2 bytes: op_type (u16)]        -- 1=Commit, 2=Abort, 3=Checkpoint, >=100 engine ops
// [4 bytes: txn time (u32)]
// [4 bytes: txn counter (u32)]
// [8 bytes: mailbox_id (i64)]     -- -1 for server-wide ops
// [1 byte:  server_id_len] [N bytes: server_id]
// [4 bytes: payload_len (u32)] [M bytes: payload]
// ```
//
// ## Usage
//
// ```no_run
// use std::sync::Arc;
// use mailcore_redolog::{OpRegistry, RedoConfig, RedoLogManager};
// use mailcore_sequence::LocalSequenceGenerator;
//
// let registry = OpRegistry::new(); // engine registers its op decoders here
// let manager = RedoLogManager::new(
//     RedoConfig::in_dir("/var/mailcore/redolog", "node-1"),
//     Arc::new(LocalSequenceGenerator::new()),
//     registry,
// );
// manager.start().unwrap();
//
// // let commit = manager.submit(Arc::new(my_op)).unwrap();
// // let op = manager.wait_for_commit(&commit).unwrap();
//
// manager.stop().unwrap();
// ```

pub mod config;
pub mod error;
pub mod header;
pub mod manager;
pub mod op;
pub mod player;
pub mod record;
pub mod segment;
pub mod writer;

#[cfg(test)]
mod testing;

pub use config::{RedoConfig, SyncMode};
pub use error::{RedoError, RedoResult};
pub use header::{LogHeader, Version, CURRENT_VERSION, HEADER_LEN, MAGIC, MAX_SERVER_ID_LEN};
pub use manager::{CommitRef, OpPosition, QuiesceGuard, RedoLogManager};
pub use op::{
    AbortTxn, Checkpoint, CommitTxn, LoggedOp, OpRegistry, RedoableOp, TransactionId,
    TxnIdGenerator, FIRST_ENGINE_OP_TYPE, OP_ABORT_TXN, OP_CHECKPOINT, OP_COMMIT_TXN,
};
pub use player::{uncommitted_ops, RedoPlayer, ReplayStats};
pub use record::{RecordEnvelope, DEFAULT_MAX_RECORD_SIZE};
pub use segment::{
    archive_filename, archive_path, list_segments, list_segments_from, read_segment,
    SegmentContents, SegmentInfo,
};
pub use writer::LogWriter;
