// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Record framing
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Records follow the segment header back to back. Each one is a CRC32
// protected envelope around an op payload.
//
// On-disk format (all integers little-endian):
//   [4 bytes: record_length (u32)]  -- length of everything after this field
//   [4 bytes: crc32 checksum]       -- CRC32 of all bytes after this field
//   [8 bytes: sequence (u64)]       -- segment sequence the record was written to
//   [8 bytes: timestamp (i64)]      -- epoch millis, stamped at append
//   [2 bytes: op_type (u16)]
//   [4 bytes: txn time (u32)]
//   [4 bytes: txn counter (u32)]
//   [8 bytes: mailbox_id (i64)]     -- -1 when the op is not mailbox scoped
//   [1 byte:  server_id_len]
//   [N bytes: server_id]
//   [4 bytes: payload_len (u32)]
//   [M bytes: payload]

use crc32fast::Hasher as Crc32Hasher;

use crate::error::{RedoError, RedoResult};
use crate::header::MAX_SERVER_ID_LEN;
use crate::op::{LoggedOp, OpRegistry, TransactionId};

/// Size of the length and checksum prefix.
pub const RECORD_PREFIX_SIZE: usize = 4 + 4;

/// Size of the fixed envelope fields before the server id.
const FIXED_FIELDS_SIZE: usize = 8 + 8 + 2 + 4 + 4 + 8;

/// Default maximum encoded record size: 64 MiB.
pub const DEFAULT_MAX_RECORD_SIZE: u64 = 64 * 1024 * 1024;

const NO_MAILBOX: i64 = -1;

/// The decoded envelope of one record, payload still opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEnvelope {
    pub sequence: u64,
    pub timestamp: i64,
    pub op_type: u16,
    pub txn_id: TransactionId,
    pub mailbox_id: Option<i64>,
    pub server_id: String,
    pub payload: Vec<u8>,
}

impl RecordEnvelope {
    /// Build the envelope for a logged op.
    pub fn from_logged(logged: &LoggedOp) -> RedoResult<Self> {
        Ok(Self {
            sequence: logged.sequence,
            timestamp: logged.timestamp,
            op_type: logged.op_type(),
            txn_id: logged.txn_id,
            mailbox_id: logged.mailbox_id(),
            server_id: logged.server_id.clone(),
            payload: logged.op.serialize_payload()?,
        })
    }

    /// Turn the envelope back into a logged op found at `offset`.
    pub fn into_logged(self, registry: &OpRegistry, offset: u64) -> RedoResult<LoggedOp> {
        let op = registry.decode(self.op_type, &self.payload)?;
        Ok(LoggedOp {
            txn_id: self.txn_id,
            sequence: self.sequence,
            timestamp: self.timestamp,
            server_id: self.server_id,
            offset,
            op,
        })
    }

    /// Encode to the framed on-disk form.
    pub fn encode(&self, max_record_size: u64) -> RedoResult<Vec<u8>> {
        let server_id = self.server_id.as_bytes();
        if server_id.len() > MAX_SERVER_ID_LEN {
            return Err(RedoError::InvalidServerId(format!(
                "{} bytes exceeds {MAX_SERVER_ID_LEN}",
                server_id.len()
            )));
        }

        let inner_size = FIXED_FIELDS_SIZE + 1 + server_id.len() + 4 + self.payload.len();
        let record_length = (4 + inner_size) as u64;
        if RECORD_PREFIX_SIZE as u64 + inner_size as u64 > max_record_size
            || record_length > u64::from(u32::MAX)
        {
            return Err(RedoError::RecordTooLarge {
                length: RECORD_PREFIX_SIZE as u64 + inner_size as u64,
                max_length: max_record_size,
            });
        }

        let mut inner = Vec::with_capacity(inner_size);
        inner.extend_from_slice(&self.sequence.to_le_bytes());
        inner.extend_from_slice(&self.timestamp.to_le_bytes());
        inner.extend_from_slice(&self.op_type.to_le_bytes());
        inner.extend_from_slice(&self.txn_id.time.to_le_bytes());
        inner.extend_from_slice(&self.txn_id.counter.to_le_bytes());
        inner.extend_from_slice(&self.mailbox_id.unwrap_or(NO_MAILBOX).to_le_bytes());
        inner.push(server_id.len() as u8);
        inner.extend_from_slice(server_id);
        inner.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        inner.extend_from_slice(&self.payload);

        let crc = compute_crc32(&inner);

        let mut buffer = Vec::with_capacity(RECORD_PREFIX_SIZE + inner.len());
        buffer.extend_from_slice(&(record_length as u32).to_le_bytes());
        buffer.extend_from_slice(&crc.to_le_bytes());
        buffer.extend_from_slice(&inner);
        Ok(buffer)
    }

    /// Decode the record starting at `data[0]`, which sits at byte `offset`
    /// of its segment. Returns the envelope and the number of bytes consumed.
    pub fn decode(data: &[u8], offset: u64, max_record_size: u64) -> RedoResult<(Self, usize)> {
        let corrupt = |reason: String| RedoError::CorruptRecord { offset, reason };

        if data.len() < RECORD_PREFIX_SIZE {
            return Err(corrupt(format!("only {} bytes left for record prefix", data.len())));
        }
        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if record_length < 4 + FIXED_FIELDS_SIZE + 1 + 4 {
            return Err(corrupt(format!("record length {record_length} is too small")));
        }
        if (4 + record_length) as u64 > max_record_size {
            return Err(RedoError::RecordTooLarge {
                length: (4 + record_length) as u64,
                max_length: max_record_size,
            });
        }
        let end = 4 + record_length;
        if data.len() < end {
            return Err(corrupt(format!(
                "record needs {record_length} bytes, {} available",
                data.len() - 4
            )));
        }

        let stored_crc = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let inner = &data[RECORD_PREFIX_SIZE..end];
        let computed_crc = compute_crc32(inner);
        if stored_crc != computed_crc {
            return Err(RedoError::CrcMismatch {
                offset,
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let mut cursor = Cursor { data: inner, pos: 0 };
        let sequence = cursor.u64().ok_or_else(|| corrupt("missing sequence".into()))?;
        let timestamp = cursor.u64().ok_or_else(|| corrupt("missing timestamp".into()))? as i64;
        let op_type = cursor.u16().ok_or_else(|| corrupt("missing op type".into()))?;
        let time = cursor.u32().ok_or_else(|| corrupt("missing txn time".into()))?;
        let counter = cursor.u32().ok_or_else(|| corrupt("missing txn counter".into()))?;
        let mailbox = cursor.u64().ok_or_else(|| corrupt("missing mailbox id".into()))? as i64;

        let id_len = cursor.u8().ok_or_else(|| corrupt("missing server id length".into()))? as usize;
        let id_bytes = cursor
            .take(id_len)
            .ok_or_else(|| corrupt("server id overruns record".into()))?;
        let server_id = String::from_utf8(id_bytes.to_vec())
            .map_err(|e| corrupt(format!("server id is not UTF-8: {e}")))?;

        let payload_len = cursor.u32().ok_or_else(|| corrupt("missing payload length".into()))? as usize;
        let payload = cursor
            .take(payload_len)
            .ok_or_else(|| corrupt("payload overruns record".into()))?
            .to_vec();
        if cursor.pos != inner.len() {
            return Err(corrupt(format!(
                "{} trailing bytes after payload",
                inner.len() - cursor.pos
            )));
        }

        let envelope = Self {
            sequence,
            timestamp,
            op_type,
            txn_id: TransactionId::new(time, counter),
            mailbox_id: (mailbox != NO_MAILBOX).then_some(mailbox),
            server_id,
            payload,
        };
        Ok((envelope, end))
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let slice = self.data.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(b);
            u64::from_le_bytes(bytes)
        })
    }
}

/// Compute a CRC32 checksum over the given bytes.
pub fn compute_crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_envelope(payload: &[u8]) -> RecordEnvelope {
        RecordEnvelope {
            sequence: 9,
            timestamp: 1_700_000_000_123,
            op_type: 120,
            txn_id: TransactionId::new(1_700_000_000, 3),
            mailbox_id: Some(77),
            server_id: "node-1".to_string(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_encode_decode() {
        let envelope = test_envelope(br#"{"item":5}"#);
        let bytes = envelope.encode(DEFAULT_MAX_RECORD_SIZE).unwrap();
        let (decoded, consumed) = RecordEnvelope::decode(&bytes, 180, DEFAULT_MAX_RECORD_SIZE).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_no_mailbox_roundtrip() {
        let mut envelope = test_envelope(b"");
        envelope.mailbox_id = None;
        let bytes = envelope.encode(DEFAULT_MAX_RECORD_SIZE).unwrap();
        let (decoded, _) = RecordEnvelope::decode(&bytes, 0, DEFAULT_MAX_RECORD_SIZE).unwrap();
        assert_eq!(decoded.mailbox_id, None);
    }

    #[test]
    fn test_decode_consumes_only_one_record() {
        let first = test_envelope(b"one").encode(DEFAULT_MAX_RECORD_SIZE).unwrap();
        let second = test_envelope(b"two").encode(DEFAULT_MAX_RECORD_SIZE).unwrap();
        let mut data = first.clone();
        data.extend_from_slice(&second);

        let (_, consumed) = RecordEnvelope::decode(&data, 0, DEFAULT_MAX_RECORD_SIZE).unwrap();
        assert_eq!(consumed, first.len());
        let (decoded, _) =
            RecordEnvelope::decode(&data[consumed..], consumed as u64, DEFAULT_MAX_RECORD_SIZE).unwrap();
        assert_eq!(decoded.payload, b"two");
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut bytes = test_envelope(b"payload").encode(DEFAULT_MAX_RECORD_SIZE).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        match RecordEnvelope::decode(&bytes, 500, DEFAULT_MAX_RECORD_SIZE) {
            Err(RedoError::CrcMismatch { offset, expected, actual }) => {
                assert_eq!(offset, 500);
                assert_ne!(expected, actual);
            }
            other => panic!("Expected CrcMismatch, got: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_record_detected() {
        let bytes = test_envelope(b"payload").encode(DEFAULT_MAX_RECORD_SIZE).unwrap();
        for cut in [0, 3, RECORD_PREFIX_SIZE, bytes.len() - 1] {
            assert!(matches!(
                RecordEnvelope::decode(&bytes[..cut], 0, DEFAULT_MAX_RECORD_SIZE),
                Err(RedoError::CorruptRecord { .. })
            ));
        }
    }

    #[test]
    fn test_record_size_limit() {
        let envelope = test_envelope(&[0u8; 256]);
        assert!(matches!(
            envelope.encode(128),
            Err(RedoError::RecordTooLarge { max_length: 128, .. })
        ));

        let bytes = envelope.encode(DEFAULT_MAX_RECORD_SIZE).unwrap();
        assert!(matches!(
            RecordEnvelope::decode(&bytes, 0, 128),
            Err(RedoError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_crc32_deterministic() {
        let data = b"hello redo log";
        assert_eq!(compute_crc32(data), compute_crc32(data));
        assert_ne!(compute_crc32(data), compute_crc32(b"hello redo lag"));
    }
}
