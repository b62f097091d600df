// SPDX-License-Identifier: PMPL-1.0-or-later
//
// MailCore Blob Store crate
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Blob volumes, the store-manager abstraction, and the consistency checker
// that reconciles a mailbox's item index against the blobs on disk.
//
// # Architecture
//
// - [`volume`] -- `VolumeConfig` and the hashed directory layout of blobs.
// - [`store`] -- `StoreManager` trait with its `supports(StoreFeature)`
//   capability query, and the file-backed `FileBlobStore`.
// - [`item`] -- logical item and revision records (the expected side).
// - [`checker`] -- `BlobConsistencyChecker`, which diffs expected against
//   physical and produces findings.
// - [`report`] -- `ConsistencyReport`, persisted as JSON.
// - [`repair`] -- explicit deletion of unexpected blobs from a saved report.
//
// ## Usage
//
// ```no_run
// use mailcore_blobstore::{BlobConsistencyChecker, FileBlobStore, VolumeConfig};
//
// let store = FileBlobStore::new([VolumeConfig::new(1, "message1", "/opt/store")]).unwrap();
// let items = mailcore_blobstore::load_items("items.json".as_ref()).unwrap();
// let report = BlobConsistencyChecker::new(&store).check(&items).unwrap();
// println!("{}", report.summary());
// ```

pub mod checker;
pub mod digest;
pub mod error;
pub mod item;
pub mod repair;
pub mod report;
pub mod store;
pub mod volume;

pub use checker::BlobConsistencyChecker;
pub use digest::{digest_file, sha256_hex};
pub use error::{BlobStoreError, BlobStoreResult};
pub use item::{load_items, BlobRef, Item, Revision};
pub use repair::repair_unexpected;
pub use report::{ConsistencyReport, Finding, FindingKind};
pub use store::{BlobStat, FileBlobStore, StoreFeature, StoreManager, StoredBlob};
pub use volume::{BlobLocator, VolumeConfig};
