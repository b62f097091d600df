// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Segment header
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Every segment file starts with a fixed-size header describing the segment.
// The header is rewritten in place after every durable flush and sealed
// (`open = false`) when the segment is rolled over or the server stops.
//
// On-disk layout (all integers little-endian, total `HEADER_LEN` = 180 bytes):
//
// ```text
// [  0.. 7] magic            "ZM_REDO"
// [  7..  8] open            0 = sealed, 1 = being appended to
// [  8.. 16] file_size       u64, segment length at last durable flush
// [ 16.. 24] sequence        u64, segment sequence number
// [ 24.. 25] server_id_len   u8, 0..=127
// [ 25..152] server_id       UTF-8, zero padded to 127 bytes
// [152..160] first_op_tstamp i64, epoch millis, 0 when empty
// [160..168] last_op_tstamp  i64, epoch millis, 0 when empty
// [168..176] create_time     i64, epoch millis
// [176..178] version major   u16
// [178..180] version minor   u16
// ```

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use serde::{Deserialize, Serialize};

use crate::error::{RedoError, RedoResult};

/// Signature at the start of every segment.
pub const MAGIC: &[u8; 7] = b"ZM_REDO";

/// Maximum encoded length of the server id.
pub const MAX_SERVER_ID_LEN: usize = 127;

/// Exact encoded size of a header.
pub const HEADER_LEN: usize = 7 + 1 + 8 + 8 + (1 + MAX_SERVER_ID_LEN) + 8 + 8 + 8 + 2 + 2;

/// Server id of a header nobody assigned one to.
pub const UNKNOWN_SERVER_ID: &str = "unknown";

/// Highest header version this build reads and the version it writes.
pub const CURRENT_VERSION: Version = Version::new(1, 0);

const OPEN_OFFSET: usize = 7;
const FILE_SIZE_OFFSET: usize = 8;
const SEQUENCE_OFFSET: usize = 16;
const SERVER_ID_OFFSET: usize = 24;
const FIRST_OP_OFFSET: usize = SERVER_ID_OFFSET + 1 + MAX_SERVER_ID_LEN;
const LAST_OP_OFFSET: usize = FIRST_OP_OFFSET + 8;
const CREATE_TIME_OFFSET: usize = LAST_OP_OFFSET + 8;

/// Byte offset of the version's major number within the header.
pub const VERSION_OFFSET: usize = CREATE_TIME_OFFSET + 8;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Header format version, ordered by `(major, minor)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Incompatible layout changes.
    pub major: u16,
    /// Compatible additions.
    pub minor: u16,
}

impl Version {
    /// Construct a version.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ---------------------------------------------------------------------------
// LogHeader
// ---------------------------------------------------------------------------

/// The header at the start of a redo log segment.
///
/// Mutators only change the in-memory value; nothing is persisted until
/// [`LogHeader::write_to`] is called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHeader {
    open: bool,
    file_size: u64,
    sequence: u64,
    server_id: String,
    first_op_tstamp: i64,
    last_op_tstamp: i64,
    create_time: i64,
    version: Version,
}

impl Default for LogHeader {
    fn default() -> Self {
        Self {
            open: false,
            file_size: 0,
            sequence: 0,
            server_id: UNKNOWN_SERVER_ID.to_string(),
            first_op_tstamp: 0,
            last_op_tstamp: 0,
            create_time: 0,
            version: CURRENT_VERSION,
        }
    }
}

impl LogHeader {
    /// A default header for a segment created by `server_id` at `create_time`.
    pub fn new(server_id: &str, sequence: u64, create_time: i64) -> RedoResult<Self> {
        let mut header = Self::default();
        header.set_server_id(server_id)?;
        header.sequence = sequence;
        header.create_time = create_time;
        Ok(header)
    }

    /// Write a fresh default header to the start of `file` and return it.
    pub fn init(file: &mut File) -> RedoResult<Self> {
        let header = Self::default();
        header.write_to(file)?;
        Ok(header)
    }

    /// Read and decode the header at the start of `reader`.
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> RedoResult<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            match reader.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Self::decode(&buf[..filled])
    }

    /// Persist the header at the start of `file`.
    ///
    /// The whole header goes out in one positional write followed by
    /// `sync_data`, so a reader holding the segment's writer lock sees either
    /// the old or the new header.
    pub fn write_to(&self, file: &mut File) -> RedoResult<()> {
        let bytes = self.encode();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&bytes)?;
        file.sync_data()?;
        Ok(())
    }

    /// Encode to exactly `HEADER_LEN` bytes.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..MAGIC.len()].copy_from_slice(MAGIC);
        buf[OPEN_OFFSET] = u8::from(self.open);
        buf[FILE_SIZE_OFFSET..FILE_SIZE_OFFSET + 8].copy_from_slice(&self.file_size.to_le_bytes());
        buf[SEQUENCE_OFFSET..SEQUENCE_OFFSET + 8].copy_from_slice(&self.sequence.to_le_bytes());

        let id = self.server_id.as_bytes();
        buf[SERVER_ID_OFFSET] = id.len() as u8;
        buf[SERVER_ID_OFFSET + 1..SERVER_ID_OFFSET + 1 + id.len()].copy_from_slice(id);

        buf[FIRST_OP_OFFSET..FIRST_OP_OFFSET + 8].copy_from_slice(&self.first_op_tstamp.to_le_bytes());
        buf[LAST_OP_OFFSET..LAST_OP_OFFSET + 8].copy_from_slice(&self.last_op_tstamp.to_le_bytes());
        buf[CREATE_TIME_OFFSET..CREATE_TIME_OFFSET + 8].copy_from_slice(&self.create_time.to_le_bytes());
        buf[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&self.version.major.to_le_bytes());
        buf[VERSION_OFFSET + 2..VERSION_OFFSET + 4].copy_from_slice(&self.version.minor.to_le_bytes());
        buf
    }

    /// Decode a header from the first `HEADER_LEN` bytes of `data`.
    pub fn decode(data: &[u8]) -> RedoResult<Self> {
        if data.len() < HEADER_LEN {
            return Err(RedoError::short_header(data.len()));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(RedoError::BadMagic {
                found: data[..MAGIC.len()].to_vec(),
            });
        }

        let version = Version::new(
            u16::from_le_bytes([data[VERSION_OFFSET], data[VERSION_OFFSET + 1]]),
            u16::from_le_bytes([data[VERSION_OFFSET + 2], data[VERSION_OFFSET + 3]]),
        );
        if version > CURRENT_VERSION {
            return Err(RedoError::UnsupportedVersion {
                found: version,
                highest: CURRENT_VERSION,
            });
        }

        let id_len = data[SERVER_ID_OFFSET] as usize;
        if id_len > MAX_SERVER_ID_LEN {
            return Err(RedoError::InvalidServerId(format!(
                "length {id_len} exceeds {MAX_SERVER_ID_LEN}"
            )));
        }
        let id_start = SERVER_ID_OFFSET + 1;
        let server_id = std::str::from_utf8(&data[id_start..id_start + id_len])
            .map_err(|e| RedoError::InvalidServerId(e.to_string()))?
            .to_string();

        Ok(Self {
            open: data[OPEN_OFFSET] != 0,
            file_size: read_u64(data, FILE_SIZE_OFFSET),
            sequence: read_u64(data, SEQUENCE_OFFSET),
            server_id,
            first_op_tstamp: read_u64(data, FIRST_OP_OFFSET) as i64,
            last_op_tstamp: read_u64(data, LAST_OP_OFFSET) as i64,
            create_time: read_u64(data, CREATE_TIME_OFFSET) as i64,
            version,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// True while the segment is being appended to.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Segment length at the last durable flush.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// The segment's sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The node that created the segment.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Timestamp of the first op in the segment, 0 when empty.
    pub fn first_op_tstamp(&self) -> i64 {
        self.first_op_tstamp
    }

    /// Timestamp of the last durable op in the segment, 0 when empty.
    pub fn last_op_tstamp(&self) -> i64 {
        self.last_op_tstamp
    }

    /// Segment creation time.
    pub fn create_time(&self) -> i64 {
        self.create_time
    }

    /// Format version the header was written with.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    pub fn set_file_size(&mut self, file_size: u64) {
        self.file_size = file_size;
    }

    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Set the server id; rejects ids longer than `MAX_SERVER_ID_LEN` bytes.
    pub fn set_server_id(&mut self, server_id: &str) -> RedoResult<()> {
        if server_id.len() > MAX_SERVER_ID_LEN {
            return Err(RedoError::InvalidServerId(format!(
                "{} bytes exceeds {MAX_SERVER_ID_LEN}",
                server_id.len()
            )));
        }
        self.server_id = server_id.to_string();
        Ok(())
    }

    pub fn set_first_op_tstamp(&mut self, tstamp: i64) {
        self.first_op_tstamp = tstamp;
    }

    pub fn set_last_op_tstamp(&mut self, tstamp: i64) {
        self.last_op_tstamp = tstamp;
    }

    pub fn set_create_time(&mut self, create_time: i64) {
        self.create_time = create_time;
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}
