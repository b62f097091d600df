// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Segment files
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// A segment is a `LogHeader` followed by records. The active segment lives at
// the configured log path; sealed segments are moved into the archive
// directory as `redo-{sequence:016}.log`.
//
// Reading follows the header: every record that starts inside the header's
// `file_size` was durable when the header was last written and must decode,
// otherwise the segment is corrupt. A record that fails to decode beyond that
// point is a torn tail from a crash mid-append and simply ends the segment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::error::{RedoError, RedoResult};
use crate::header::{LogHeader, HEADER_LEN};
use crate::op::{LoggedOp, OpRegistry};
use crate::record::RecordEnvelope;

/// The file extension used for segment files.
pub const SEGMENT_EXTENSION: &str = "log";

/// The prefix used for archived segment file names.
pub const ARCHIVE_PREFIX: &str = "redo-";

/// Metadata about an archived segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    /// The full path to the segment file on disk.
    pub path: PathBuf,

    /// The segment sequence encoded in the file name.
    pub sequence: u64,

    /// File size in bytes.
    pub file_size: u64,
}

impl PartialOrd for SegmentInfo {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentInfo {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.path.cmp(&other.path))
    }
}

/// Canonical archive file name for a segment.
///
/// Format: `redo-0000000000000001.log`
pub fn archive_filename(sequence: u64) -> String {
    format!("{ARCHIVE_PREFIX}{sequence:016}.{SEGMENT_EXTENSION}")
}

/// Full archive path for a segment.
pub fn archive_path(archive_dir: &Path, sequence: u64) -> PathBuf {
    archive_dir.join(archive_filename(sequence))
}

/// Parse the sequence from an archive file name.
///
/// Returns `None` if the name does not match the expected pattern.
pub fn parse_archive_filename(name: &str) -> Option<u64> {
    let stripped = name.strip_prefix(ARCHIVE_PREFIX)?;
    let num_str = stripped.strip_suffix(&format!(".{SEGMENT_EXTENSION}"))?;
    num_str.parse::<u64>().ok()
}

/// List archived segments, sorted by sequence (ascending).
///
/// Non-segment files are ignored. A missing directory is an error.
pub fn list_segments(archive_dir: &Path) -> RedoResult<Vec<SegmentInfo>> {
    if !archive_dir.is_dir() {
        return Err(RedoError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("archive directory not found: {}", archive_dir.display()),
        )));
    }

    let mut segments = Vec::new();
    for dir_entry in fs::read_dir(archive_dir)? {
        let dir_entry = dir_entry?;
        let file_name = dir_entry.file_name();
        let name = file_name.to_string_lossy();

        if let Some(sequence) = parse_archive_filename(&name) {
            segments.push(SegmentInfo {
                path: dir_entry.path(),
                sequence,
                file_size: dir_entry.metadata()?.len(),
            });
        }
    }
    segments.sort();

    debug!(
        count = segments.len(),
        dir = %archive_dir.display(),
        "Discovered archived redo segments"
    );
    Ok(segments)
}

/// List archived segments with sequence `>= from_sequence`.
pub fn list_segments_from(archive_dir: &Path, from_sequence: u64) -> RedoResult<Vec<SegmentInfo>> {
    let mut segments = list_segments(archive_dir)?;
    segments.retain(|s| s.sequence >= from_sequence);
    Ok(segments)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Everything read back from one segment file.
#[derive(Debug)]
pub struct SegmentContents {
    /// The decoded header.
    pub header: LogHeader,
    /// Records in file order.
    pub ops: Vec<LoggedOp>,
    /// Length of the header plus every record that decoded.
    pub valid_len: u64,
    /// Bytes after `valid_len` belonging to a torn tail.
    pub torn_bytes: u64,
}

impl SegmentContents {
    /// True when the segment holds no records.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Read a segment and decode its records with `registry`.
pub fn read_segment(
    path: &Path,
    registry: &OpRegistry,
    max_record_size: u64,
) -> RedoResult<SegmentContents> {
    let data = fs::read(path)?;
    let header = LogHeader::decode(&data).inspect_err(|e| {
        error!(path = %path.display(), error = %e, "Unreadable redo log header");
    })?;

    let durable_end = header.file_size();
    if durable_end > data.len() as u64 {
        let err = RedoError::CorruptRecord {
            offset: data.len() as u64,
            reason: format!(
                "segment is {} bytes but header records {durable_end}",
                data.len()
            ),
        };
        error!(path = %path.display(), error = %err, "Redo segment shorter than its header says");
        return Err(err);
    }

    let mut ops = Vec::new();
    let mut offset = HEADER_LEN;
    while offset < data.len() {
        match RecordEnvelope::decode(&data[offset..], offset as u64, max_record_size) {
            Ok((envelope, consumed)) => {
                ops.push(envelope.into_logged(registry, offset as u64)?);
                offset += consumed;
            }
            Err(e) if (offset as u64) < durable_end => {
                error!(
                    path = %path.display(),
                    offset,
                    error = %e,
                    "Corrupt record inside the durable part of a redo segment"
                );
                return Err(e);
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    offset,
                    dropped = data.len() - offset,
                    error = %e,
                    "Torn tail at end of redo segment (expected after crash)"
                );
                break;
            }
        }
    }

    Ok(SegmentContents {
        header,
        ops,
        valid_len: offset as u64,
        torn_bytes: (data.len() - offset) as u64,
    })
}
