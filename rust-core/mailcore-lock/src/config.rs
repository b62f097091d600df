// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Mailbox lock diagnostics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Record a stack trace when a hold is first taken. Costly; meant for
    /// chasing a stuck mailbox.
    pub capture_backtraces: bool,

    /// A hold older than this is reported by the watchdog.
    pub watchdog_threshold_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            capture_backtraces: false,
            watchdog_threshold_ms: 60_000,
        }
    }
}

impl LockConfig {
    pub fn watchdog_threshold(&self) -> Duration {
        Duration::from_millis(self.watchdog_threshold_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_and_partial_json() {
        let config: LockConfig = serde_json::from_str(r#"{"capture_backtraces":true}"#).unwrap();
        assert!(config.capture_backtraces);
        assert_eq!(config.watchdog_threshold(), Duration::from_secs(60));
        assert!(!LockConfig::default().capture_backtraces);
    }
}
