// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subcommand implementations. Each writes its human-readable output to `out`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context};
use mailcore_blobstore::{
    load_items, repair_unexpected, BlobConsistencyChecker, ConsistencyReport, FileBlobStore,
};
use mailcore_redolog::{list_segments, LogHeader};
use tracing::info;

use crate::config::MailcoreConfig;

pub fn header_show(file: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let mut f = std::fs::File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let header = LogHeader::read_from(&mut f).with_context(|| format!("reading header of {}", file.display()))?;
    writeln!(out, "{}", serde_json::to_string_pretty(&header)?)?;
    Ok(())
}

/// Write a fresh header. Refuses to touch an existing non-empty file unless
/// `force` is set.
pub fn header_init(
    file: &Path,
    server_id: Option<&str>,
    force: bool,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    if !force && file.metadata().map(|m| m.len() > 0).unwrap_or(false) {
        bail!("{} already exists; pass --force to overwrite its header", file.display());
    }
    let mut f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(file)
        .with_context(|| format!("opening {}", file.display()))?;
    let mut header = LogHeader::init(&mut f)?;
    if let Some(id) = server_id {
        header.set_server_id(id)?;
        header.set_create_time(chrono::Utc::now().timestamp_millis());
        header.write_to(&mut f)?;
    }
    info!(path = %file.display(), server_id = header.server_id(), "Initialised redo log header");
    writeln!(out, "{}", serde_json::to_string_pretty(&header)?)?;
    Ok(())
}

pub fn segments(archive_dir: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let segments = list_segments(archive_dir)
        .with_context(|| format!("listing {}", archive_dir.display()))?;
    if segments.is_empty() {
        writeln!(out, "No archived segments in {}", archive_dir.display())?;
        return Ok(());
    }
    writeln!(out, "{:>20}  {:>12}  path", "sequence", "bytes")?;
    for segment in &segments {
        writeln!(
            out,
            "{:>20}  {:>12}  {}",
            segment.sequence,
            segment.file_size,
            segment.path.display()
        )?;
    }
    Ok(())
}

/// Run a consistency check. Returns the report so the caller can choose the
/// exit status.
pub fn check(
    config: &MailcoreConfig,
    items_file: &Path,
    mailbox: Option<i64>,
    digests: bool,
    report_file: Option<&Path>,
    out: &mut impl Write,
) -> anyhow::Result<ConsistencyReport> {
    if config.volumes.is_empty() {
        bail!("no volumes configured");
    }
    let store = FileBlobStore::new(config.volumes.clone())?.with_bulk_enumeration(config.bulk_enumeration);
    let items = load_items(items_file).with_context(|| format!("loading items from {}", items_file.display()))?;

    let report = BlobConsistencyChecker::new(&store)
        .check_digests(digests)
        .for_mailbox(mailbox)
        .check(&items)?;

    writeln!(out, "{report}")?;
    if let Some(path) = report_file {
        report.save(path).with_context(|| format!("saving report to {}", path.display()))?;
        writeln!(out, "Report saved to: {}", path.display())?;
    }
    Ok(report)
}

pub fn repair(config: &MailcoreConfig, report_file: &Path, out: &mut impl Write) -> anyhow::Result<usize> {
    let report = ConsistencyReport::load(report_file)
        .with_context(|| format!("loading report {}", report_file.display()))?;
    let store = FileBlobStore::new(config.volumes.clone())?.with_bulk_enumeration(config.bulk_enumeration);
    let deleted = repair_unexpected(&store, &report)?;
    writeln!(out, "Deleted {deleted} unexpected blob(s)")?;
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailcore_blobstore::{BlobLocator, FindingKind, Item, StoreManager, VolumeConfig};
    use mailcore_redolog::{CURRENT_VERSION, HEADER_LEN};
    use tempfile::TempDir;

    fn output(f: impl FnOnce(&mut Vec<u8>) -> anyhow::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_header_init_then_show() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("redo.log");
        output(|out| header_init(&path, Some("node-1"), false, out));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_LEN as u64);

        let shown = output(|out| header_show(&path, out));
        let header: LogHeader = serde_json::from_str(&shown).unwrap();
        assert_eq!(header.server_id(), "node-1");
        assert_eq!(header.version(), CURRENT_VERSION);
        assert!(!header.is_open());
    }

    #[test]
    fn test_header_init_default_server_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("redo.log");
        output(|out| header_init(&path, None, false, out));
        let mut f = std::fs::File::open(&path).unwrap();
        assert_eq!(LogHeader::read_from(&mut f).unwrap(), LogHeader::default());
    }

    #[test]
    fn test_header_init_refuses_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("redo.log");
        std::fs::write(&path, b"precious").unwrap();
        assert!(header_init(&path, None, false, &mut Vec::new()).is_err());
        assert!(header_init(&path, None, true, &mut Vec::new()).is_ok());
    }

    #[test]
    fn test_header_show_short_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("redo.log");
        std::fs::write(&path, b"ZM_REDO").unwrap();
        let err = header_show(&path, &mut Vec::new()).unwrap_err();
        assert!(format!("{err:#}").contains("Redolog is smaller than header length"));
    }

    #[test]
    fn test_segments_listing() {
        let dir = TempDir::new().unwrap();
        let text = output(|out| segments(dir.path(), out));
        assert!(text.starts_with("No archived segments"));

        std::fs::write(dir.path().join("redo-0000000000000002.log"), [0u8; 10]).unwrap();
        std::fs::write(dir.path().join("redo-0000000000000001.log"), [0u8; 5]).unwrap();
        let text = output(|out| segments(dir.path(), out));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].trim_start().starts_with("1 "));
        assert!(lines[2].trim_start().starts_with("2 "));
    }

    #[test]
    fn test_check_and_repair() {
        let dir = TempDir::new().unwrap();
        let config = MailcoreConfig {
            volumes: vec![VolumeConfig::new(1, "message1", dir.path().join("store"))],
            ..MailcoreConfig::default()
        };
        let store = FileBlobStore::new(config.volumes.clone()).unwrap();
        store.put(1, &BlobLocator::new(1, 10, 1), b"body").unwrap();
        let orphan = store.put(1, &BlobLocator::new(1, 11, 1), b"orphan").unwrap();
        let items_file = dir.path().join("items.json");
        std::fs::write(
            &items_file,
            serde_json::to_vec(&vec![Item::new(1, 10, 1, 4, "x", 1)]).unwrap(),
        )
        .unwrap();
        let report_file = dir.path().join("report.json");

        let mut out = Vec::new();
        let report = check(&config, &items_file, None, false, Some(&report_file), &mut out).unwrap();
        assert_eq!(report.count(FindingKind::UnexpectedBlob), 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("1 inconsistency found"));
        assert!(text.contains("Report saved to:"));

        let mut out = Vec::new();
        assert_eq!(repair(&config, &report_file, &mut out).unwrap(), 1);
        assert!(!orphan.path.exists());

        let mut out = Vec::new();
        let report = check(&config, &items_file, None, false, None, &mut out).unwrap();
        assert!(report.is_clean());
        assert!(String::from_utf8(out).unwrap().contains("No inconsistencies found"));
    }

    #[test]
    fn test_check_requires_volumes() {
        let dir = TempDir::new().unwrap();
        let err = check(
            &MailcoreConfig::default(),
            &dir.path().join("items.json"),
            None,
            false,
            None,
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("no volumes configured"));
    }
}
