// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Test fixtures
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A tiny stand-in for the mailbox engine: `DeliverOp` records which
// `(mailbox, item)` pairs were redone into a shared journal, `RejectOp`
// always fails to redo.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{RedoError, RedoResult};
use crate::op::{OpRegistry, RedoableOp};

pub(crate) const DELIVER_OP: u16 = 120;
pub(crate) const REJECT_OP: u16 = 121;

pub(crate) type Journal = Arc<Mutex<Vec<(i64, u32)>>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeliverPayload {
    mailbox_id: i64,
    item_id: u32,
}

#[derive(Debug)]
pub(crate) struct DeliverOp {
    pub mailbox_id: i64,
    pub item_id: u32,
    journal: Journal,
}

impl DeliverOp {
    pub fn new(mailbox_id: i64, item_id: u32, journal: &Journal) -> Arc<dyn RedoableOp> {
        Arc::new(Self {
            mailbox_id,
            item_id,
            journal: Arc::clone(journal),
        })
    }
}

impl RedoableOp for DeliverOp {
    fn op_type(&self) -> u16 {
        DELIVER_OP
    }

    fn mailbox_id(&self) -> Option<i64> {
        Some(self.mailbox_id)
    }

    fn serialize_payload(&self) -> RedoResult<Vec<u8>> {
        Ok(serde_json::to_vec(&DeliverPayload {
            mailbox_id: self.mailbox_id,
            item_id: self.item_id,
        })?)
    }

    fn redo(&self) -> RedoResult<()> {
        self.journal.lock().push((self.mailbox_id, self.item_id));
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct RejectOp {
    pub mailbox_id: i64,
}

impl RejectOp {
    pub fn new(mailbox_id: i64) -> Arc<dyn RedoableOp> {
        Arc::new(Self { mailbox_id })
    }
}

impl RedoableOp for RejectOp {
    fn op_type(&self) -> u16 {
        REJECT_OP
    }

    fn mailbox_id(&self) -> Option<i64> {
        Some(self.mailbox_id)
    }

    fn serialize_payload(&self) -> RedoResult<Vec<u8>> {
        Ok(self.mailbox_id.to_le_bytes().to_vec())
    }

    fn redo(&self) -> RedoResult<()> {
        Err(RedoError::Payload("engine rejected".to_string()))
    }
}

pub(crate) fn registry(journal: &Journal) -> OpRegistry {
    let mut registry = OpRegistry::new();
    let journal = Arc::clone(journal);
    registry
        .register(DELIVER_OP, move |payload| {
            let decoded: DeliverPayload = serde_json::from_slice(payload)?;
            Ok(DeliverOp::new(decoded.mailbox_id, decoded.item_id, &journal))
        })
        .expect("engine op type is not reserved");
    registry
        .register(REJECT_OP, |payload| {
            let bytes: [u8; 8] = payload
                .try_into()
                .map_err(|_| RedoError::Payload("reject payload is not 8 bytes".to_string()))?;
            Ok(RejectOp::new(i64::from_le_bytes(bytes)))
        })
        .expect("engine op type is not reserved");
    registry
}

pub(crate) fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}
