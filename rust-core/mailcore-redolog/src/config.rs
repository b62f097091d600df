// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Redo Log - Configuration
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::record::DEFAULT_MAX_RECORD_SIZE;

/// Controls how aggressively the log writer calls `fsync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SyncMode {
    /// Call `fsync` after every append. Acknowledged ops survive a crash.
    Fsync,

    /// Call `fsync` at most once per interval. Ops appended since the last
    /// sync may be lost on crash until `wait_for_commit` forces them out.
    Periodic {
        /// Minimum time between syncs, in milliseconds.
        interval_ms: u64,
    },

    /// Never sync on append; only commits, rollovers and shutdown sync.
    Async,
}

/// Redo log manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedoConfig {
    /// Path of the active segment file.
    pub log_path: PathBuf,

    /// Directory that receives sealed segments.
    pub archive_dir: PathBuf,

    /// Identity written into every header and record.
    pub server_id: String,

    /// Fsync policy for appends.
    pub sync_mode: SyncMode,

    /// Minimum age of the active segment before a soft-limit rollover.
    pub rollover_min_age_ms: u64,

    /// Size at which rollover happens once the segment is old enough.
    pub rollover_soft_max_bytes: u64,

    /// Size at which rollover happens regardless of age.
    pub rollover_hard_max_bytes: u64,

    /// Redo uncommitted ops found in the active segment at start-up.
    pub supports_crash_recovery: bool,

    /// Largest encoded record accepted on append or read.
    pub max_record_size: u64,
}

impl Default for RedoConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("redolog/redo.log"),
            archive_dir: PathBuf::from("redolog/archive"),
            server_id: "localhost".to_string(),
            sync_mode: SyncMode::Fsync,
            rollover_min_age_ms: 60_000,
            rollover_soft_max_bytes: 1024 * 1024,
            rollover_hard_max_bytes: 100 * 1024 * 1024,
            supports_crash_recovery: true,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }
}

impl RedoConfig {
    /// A config rooted at `dir`, with `redo.log` and `archive/` inside it.
    pub fn in_dir(dir: impl Into<PathBuf>, server_id: &str) -> Self {
        let dir = dir.into();
        Self {
            log_path: dir.join("redo.log"),
            archive_dir: dir.join("archive"),
            server_id: server_id.to_string(),
            ..Self::default()
        }
    }
}
