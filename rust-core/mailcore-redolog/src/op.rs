// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Redoable operations
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The mailbox engine defines the concrete mutating operations; this module
// defines the contract they implement and the envelope the log wraps them in.
//
// Op type tags below `FIRST_ENGINE_OP_TYPE` are reserved for the log's own
// records: transaction end markers (`CommitTxn`, `AbortTxn`) and the
// `Checkpoint` written at rollover. Every other tag must be registered with an
// `OpRegistry` before a segment containing it can be read; an unknown tag is a
// fatal error for that segment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{RedoError, RedoResult};

/// Tag of the commit end marker.
pub const OP_COMMIT_TXN: u16 = 1;
/// Tag of the abort end marker.
pub const OP_ABORT_TXN: u16 = 2;
/// Tag of the rollover checkpoint.
pub const OP_CHECKPOINT: u16 = 3;
/// Smallest tag an engine may register.
pub const FIRST_ENGINE_OP_TYPE: u16 = 100;

/// Largest counter value before the generator re-seeds its time component.
const MAX_TXN_COUNTER: u32 = 0x7fff_ffff;

// ---------------------------------------------------------------------------
// TransactionId
// ---------------------------------------------------------------------------

/// Identifies one logged transaction. Ordered by `(time, counter)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// Seconds since the epoch when the generator was (re)seeded.
    pub time: u32,
    /// Counter within `time`, starting at 1.
    pub counter: u32,
}

impl TransactionId {
    pub const fn new(time: u32, counter: u32) -> Self {
        Self { time, counter }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.time, self.counter)
    }
}

/// Hands out increasing transaction ids for one redo log manager.
#[derive(Debug)]
pub struct TxnIdGenerator {
    state: Mutex<TransactionId>,
}

impl TxnIdGenerator {
    /// Seed from the current wall clock.
    pub fn new() -> Self {
        Self::seeded(Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32)
    }

    /// Seed with an explicit time component.
    pub fn seeded(time: u32) -> Self {
        Self {
            state: Mutex::new(TransactionId::new(time, 0)),
        }
    }

    /// The next id. Re-seeds the time component when the counter is spent.
    pub fn next_id(&self) -> TransactionId {
        let mut state = self.state.lock();
        if state.counter >= MAX_TXN_COUNTER {
            let now = Utc::now().timestamp().clamp(0, i64::from(u32::MAX)) as u32;
            state.time = now.max(state.time.saturating_add(1));
            state.counter = 0;
        }
        state.counter += 1;
        *state
    }

    /// Make sure every later id is greater than `seen`.
    pub fn advance_past(&self, seen: TransactionId) {
        let mut state = self.state.lock();
        if *state < seen {
            *state = seen;
        }
    }
}

impl Default for TxnIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RedoableOp
// ---------------------------------------------------------------------------

/// A mutating mailbox operation that can be logged and replayed.
///
/// Replaying the same op twice must be safe: either the op is idempotent or
/// the engine recognises the duplicate from the op's own identity.
pub trait RedoableOp: fmt::Debug + Send + Sync {
    /// The registered type tag.
    fn op_type(&self) -> u16;

    /// Mailbox the op mutates, `None` for server-wide ops.
    fn mailbox_id(&self) -> Option<i64> {
        None
    }

    /// Encode the op-specific payload. Must be deterministic.
    fn serialize_payload(&self) -> RedoResult<Vec<u8>>;

    /// Re-apply the op during recovery.
    fn redo(&self) -> RedoResult<()>;
}

/// True for records that are not replayable engine ops.
pub fn is_builtin(op_type: u16) -> bool {
    op_type < FIRST_ENGINE_OP_TYPE
}

/// True for commit and abort markers.
pub fn is_end_marker(op_type: u16) -> bool {
    op_type == OP_COMMIT_TXN || op_type == OP_ABORT_TXN
}

/// Marks a transaction as committed. Payload: the committed op's type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitTxn {
    pub committed_type: u16,
}

/// Marks a transaction as aborted. Payload: the aborted op's type tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortTxn {
    pub aborted_type: u16,
}

/// Lists the transactions that were active when a segment was sealed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Checkpoint {
    pub active: Vec<TransactionId>,
}

fn decode_tag(payload: &[u8], what: &str) -> RedoResult<u16> {
    let bytes: [u8; 2] = payload
        .try_into()
        .map_err(|_| RedoError::Payload(format!("{what} payload must be 2 bytes, got {}", payload.len())))?;
    Ok(u16::from_le_bytes(bytes))
}

impl RedoableOp for CommitTxn {
    fn op_type(&self) -> u16 {
        OP_COMMIT_TXN
    }
    fn serialize_payload(&self) -> RedoResult<Vec<u8>> {
        Ok(self.committed_type.to_le_bytes().to_vec())
    }
    fn redo(&self) -> RedoResult<()> {
        Ok(())
    }
}

impl RedoableOp for AbortTxn {
    fn op_type(&self) -> u16 {
        OP_ABORT_TXN
    }
    fn serialize_payload(&self) -> RedoResult<Vec<u8>> {
        Ok(self.aborted_type.to_le_bytes().to_vec())
    }
    fn redo(&self) -> RedoResult<()> {
        Ok(())
    }
}

impl RedoableOp for Checkpoint {
    fn op_type(&self) -> u16 {
        OP_CHECKPOINT
    }

    fn serialize_payload(&self) -> RedoResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(4 + self.active.len() * 8);
        buf.extend_from_slice(&(self.active.len() as u32).to_le_bytes());
        for txn in &self.active {
            buf.extend_from_slice(&txn.time.to_le_bytes());
            buf.extend_from_slice(&txn.counter.to_le_bytes());
        }
        Ok(buf)
    }

    fn redo(&self) -> RedoResult<()> {
        Ok(())
    }
}

impl Checkpoint {
    fn decode(payload: &[u8]) -> RedoResult<Self> {
        let bad = || RedoError::Payload("truncated checkpoint payload".to_string());
        let count_bytes: [u8; 4] = payload.get(..4).and_then(|b| b.try_into().ok()).ok_or_else(bad)?;
        let count = u32::from_le_bytes(count_bytes) as usize;
        let body = &payload[4..];
        if body.len() != count * 8 {
            return Err(bad());
        }
        let active = body
            .chunks_exact(8)
            .map(|chunk| {
                TransactionId::new(
                    u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                    u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
                )
            })
            .collect();
        Ok(Self { active })
    }
}

// ---------------------------------------------------------------------------
// OpRegistry
// ---------------------------------------------------------------------------

/// Decodes an op payload back into an op.
pub type OpDecoder = Box<dyn Fn(&[u8]) -> RedoResult<Arc<dyn RedoableOp>> + Send + Sync>;

/// Maps op type tags to payload decoders.
///
/// A fresh registry knows the built-in records. Decoders usually capture a
/// handle to the mailbox engine so the decoded op can `redo` itself.
pub struct OpRegistry {
    decoders: HashMap<u16, OpDecoder>,
}

impl fmt::Debug for OpRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        f.debug_struct("OpRegistry").field("op_types", &tags).finish()
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OpRegistry {
    /// A registry that only knows the built-in records.
    pub fn new() -> Self {
        let mut decoders: HashMap<u16, OpDecoder> = HashMap::new();
        decoders.insert(
            OP_COMMIT_TXN,
            Box::new(|payload: &[u8]| {
                Ok(Arc::new(CommitTxn {
                    committed_type: decode_tag(payload, "CommitTxn")?,
                }) as Arc<dyn RedoableOp>)
            }),
        );
        decoders.insert(
            OP_ABORT_TXN,
            Box::new(|payload: &[u8]| {
                Ok(Arc::new(AbortTxn {
                    aborted_type: decode_tag(payload, "AbortTxn")?,
                }) as Arc<dyn RedoableOp>)
            }),
        );
        decoders.insert(
            OP_CHECKPOINT,
            Box::new(|payload: &[u8]| Ok(Arc::new(Checkpoint::decode(payload)?) as Arc<dyn RedoableOp>)),
        );
        Self { decoders }
    }

    /// Register the decoder for an engine op type.
    pub fn register<F>(&mut self, op_type: u16, decoder: F) -> RedoResult<()>
    where
        F: Fn(&[u8]) -> RedoResult<Arc<dyn RedoableOp>> + Send + Sync + 'static,
    {
        if is_builtin(op_type) {
            return Err(RedoError::ReservedOpType(op_type));
        }
        self.decoders.insert(op_type, Box::new(decoder));
        Ok(())
    }

    /// True if `op_type` can be decoded.
    pub fn knows(&self, op_type: u16) -> bool {
        self.decoders.contains_key(&op_type)
    }

    /// Decode a payload of the given type.
    pub fn decode(&self, op_type: u16, payload: &[u8]) -> RedoResult<Arc<dyn RedoableOp>> {
        let decoder = self
            .decoders
            .get(&op_type)
            .ok_or(RedoError::UnknownOpType(op_type))?;
        decoder(payload)
    }
}

// ---------------------------------------------------------------------------
// LoggedOp
// ---------------------------------------------------------------------------

/// An op together with its log envelope.
#[derive(Debug, Clone)]
pub struct LoggedOp {
    /// Transaction the record belongs to.
    pub txn_id: TransactionId,
    /// Sequence of the segment the record was written to.
    pub sequence: u64,
    /// Commit timestamp (epoch millis), stamped by [`LoggedOp::start`].
    pub timestamp: i64,
    /// Node that logged the record.
    pub server_id: String,
    /// Byte offset of the record within its segment, 0 until written.
    pub offset: u64,
    /// The operation itself.
    pub op: Arc<dyn RedoableOp>,
}

impl LoggedOp {
    /// Wrap `op` for logging. Timestamp and position are filled in at append.
    pub fn new(txn_id: TransactionId, server_id: &str, op: Arc<dyn RedoableOp>) -> Self {
        Self {
            txn_id,
            sequence: 0,
            timestamp: 0,
            server_id: server_id.to_string(),
            offset: 0,
            op,
        }
    }

    /// Stamp the commit time immediately before the record is appended.
    pub fn start(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    pub fn op_type(&self) -> u16 {
        self.op.op_type()
    }

    pub fn mailbox_id(&self) -> Option<i64> {
        self.op.mailbox_id()
    }
}
