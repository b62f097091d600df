// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lock owner identity.
//
// A hold is recorded against an `OwnerToken`, not a thread handle. Each OS
// thread gets one implicitly through `OwnerToken::current()`; task-based code
// creates its own with `OwnerToken::new` and passes it to the `*_as` methods,
// so the same logical owner can acquire on one thread and release on another.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use serde::{Deserialize, Serialize};

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: OwnerToken = OwnerToken::new(thread_label());
}

fn thread_label() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => format!("thread '{name}'"),
        None => format!("thread {:?}", current.id()),
    }
}

/// Identifies the logical owner of a lock hold.
///
/// Tokens compare by id only; the name is for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerToken {
    id: u64,
    name: String,
}

impl OwnerToken {
    /// A fresh owner with a process-unique id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
        }
    }

    /// The token of the calling thread. Stable for the thread's lifetime.
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for OwnerToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for OwnerToken {}

impl Hash for OwnerToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}
