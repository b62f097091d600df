// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// MailCore Sequence Number Generators
//
// Assigns the monotonically increasing sequence number that identifies the
// current redo log segment. Two interchangeable implementations sit behind the
// `SequenceNumberGenerator` trait:
//
// - [`LocalSequenceGenerator`] -- an in-process atomic counter for single-node
//   deployments.
// - [`DistributedSequenceGenerator`] -- a counter held in a cluster-wide
//   `SharedStore`, incremented with the store's native atomic increment and
//   reset / forced with bounded optimistic retries.
//
// The choice between them is made when the node constructs its generator; the
// redo log only ever sees `Arc<dyn SequenceNumberGenerator>`.
//
// Both variants wrap to 0 after `MAX_SEQUENCE`, which is `i64::MAX` so that the
// value always fits the shared store's signed 64-bit counters.

pub mod distributed;
pub mod error;
pub mod generator;
pub mod retry;

pub use distributed::{DistributedSequenceGenerator, SEQUENCE_KEY};
pub use error::{SequenceError, SequenceResult};
pub use generator::{LocalSequenceGenerator, SequenceNumberGenerator, MAX_SEQUENCE};
pub use retry::{with_optimistic_retry, CasRetryPolicy};
