// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// MailCore Shared Store Abstraction
//
// This crate provides the interface MailCore uses to talk to the external,
// cluster-wide key-value store that holds shared counters (most importantly the
// redo log sequence number). The `SharedStore` trait exposes exactly the
// primitives the coordination code relies on: plain reads and writes, a native
// atomic increment, and an optimistic watch / conditional-exec pair.
//
// # Modules
//
// - [`backend`] -- The `SharedStore` trait and the `Watched` snapshot type.
// - [`error`] -- The `StoreError` enum covering all backend failure modes.
// - [`memory`] -- An in-process `BTreeMap` backend; clones share state, which
//   lets several generators in one test act like several cluster nodes.
// - [`metrics`] -- A transparent wrapper that counts operations and conflicts.
//
// # Example
//
// ```rust
// use mailcore_storage::{InMemoryStore, MetricsStore, SharedStore};
//
// let store = MetricsStore::new(InMemoryStore::new());
// assert_eq!(store.incr("redoLogSeqNum").unwrap(), 1);
// assert_eq!(store.incr("redoLogSeqNum").unwrap(), 2);
//
// let watched = store.watch("redoLogSeqNum").unwrap();
// assert!(store.exec_set(&watched, "0").unwrap());
// assert_eq!(store.get("redoLogSeqNum").unwrap().as_deref(), Some("0"));
// assert_eq!(store.stats().incr_count, 2);
// ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod metrics;

pub use backend::{SharedStore, Watched};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use metrics::{MetricsStore, StoreStats};
