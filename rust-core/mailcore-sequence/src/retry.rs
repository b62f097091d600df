// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded compare-and-swap retries against the shared store.
//
// Every optimistic write (watch, then conditional exec) goes through
// `with_optimistic_retry`. The bound and the backoff curve are configuration,
// owned by `CasRetryPolicy`. An `initial_backoff_ms` of 0 gives a tight retry
// loop with no sleeping at all.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{SequenceError, SequenceResult};

/// Retry budget and backoff curve for optimistic store transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CasRetryPolicy {
    /// Total attempts before giving up with `CoordinationFailure`.
    pub max_attempts: u32,
    /// Sleep after the first conflict, in milliseconds. Doubles per conflict.
    pub initial_backoff_ms: u64,
    /// Upper bound for the sleep between attempts, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for CasRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            initial_backoff_ms: 1,
            max_backoff_ms: 64,
        }
    }
}

impl CasRetryPolicy {
    /// A policy that retries immediately without sleeping.
    pub fn no_backoff(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }
}

/// Run `attempt` until it commits or the policy's budget is spent.
///
/// `attempt` receives the 1-based attempt number and returns `Ok(Some(value))`
/// once its transaction committed, `Ok(None)` when the transaction was
/// discarded because of a concurrent write, or an error which is returned
/// immediately without retrying.
pub fn with_optimistic_retry<T, F>(
    policy: &CasRetryPolicy,
    operation: &str,
    mut attempt: F,
) -> SequenceResult<T>
where
    F: FnMut(u32) -> SequenceResult<Option<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff_ms = policy.initial_backoff_ms;

    for n in 1..=max_attempts {
        if let Some(value) = attempt(n)? {
            return Ok(value);
        }
        debug!(operation, attempt = n, "Optimistic transaction conflicted");
        if n < max_attempts && backoff_ms > 0 {
            thread::sleep(Duration::from_millis(backoff_ms));
            backoff_ms = (backoff_ms * 2).min(policy.max_backoff_ms.max(policy.initial_backoff_ms));
        }
    }

    error!(operation, attempts = max_attempts, "Optimistic retries exhausted");
    Err(SequenceError::CoordinationFailure {
        operation: operation.to_string(),
        attempts: max_attempts,
    })
}
