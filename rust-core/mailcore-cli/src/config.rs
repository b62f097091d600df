// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operator configuration file.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::Context;
use mailcore_blobstore::VolumeConfig;
use mailcore_redolog::RedoConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Overrides `redo.server_id` when set.
pub const SERVER_ID_ENV: &str = "MAILCORE_SERVER_ID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailcoreConfig {
    pub redo: RedoConfig,
    pub volumes: Vec<VolumeConfig>,
    /// Let the blob store enumerate volume directories.
    pub bulk_enumeration: bool,
}

impl Default for MailcoreConfig {
    fn default() -> Self {
        Self {
            redo: RedoConfig::default(),
            volumes: Vec::new(),
            bulk_enumeration: true,
        }
    }
}

impl MailcoreConfig {
    /// Read `path`, falling back to defaults if it does not exist, then apply
    /// the environment override.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing config file {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading config file {}", path.display()))
            }
        };
        Ok(config.with_server_id_override(std::env::var(SERVER_ID_ENV).ok()))
    }

    pub fn with_server_id_override(mut self, server_id: Option<String>) -> Self {
        if let Some(id) = server_id.filter(|id| !id.is_empty()) {
            self.redo.server_id = id;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = MailcoreConfig::load(&dir.path().join("absent.json")).unwrap();
        assert!(config.bulk_enumeration);
        assert!(config.volumes.is_empty());
    }

    #[test]
    fn test_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mailcore.json");
        fs::write(
            &path,
            r#"{"redo":{"server_id":"node-7"},"volumes":[{"id":1,"name":"message1","root":"/opt/store"}],"bulk_enumeration":false}"#,
        )
        .unwrap();
        let config = MailcoreConfig::load(&path).unwrap();
        assert!(!config.bulk_enumeration);
        assert_eq!(config.volumes, vec![VolumeConfig::new(1, "message1", "/opt/store")]);
        assert_eq!(config.redo.rollover_min_age_ms, 60_000);
    }

    #[test]
    fn test_bad_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mailcore.json");
        fs::write(&path, "{").unwrap();
        let err = MailcoreConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("parsing config file"));
    }

    #[test]
    fn test_server_id_override() {
        let config = MailcoreConfig::default().with_server_id_override(Some("node-9".into()));
        assert_eq!(config.redo.server_id, "node-9");
        let config = MailcoreConfig::default().with_server_id_override(Some(String::new()));
        assert_eq!(config.redo.server_id, RedoConfig::default().server_id);
    }
}
