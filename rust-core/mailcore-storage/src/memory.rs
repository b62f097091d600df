// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory shared store for MailCore.
//
// Uses a `BTreeMap` behind a `parking_lot::Mutex`. Each key carries a revision
// that is bumped on every write so watch / exec can detect interference.
// Cloning the store shares the same map, so two clones behave like two nodes
// talking to the same cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{SharedStore, Watched};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    revision: u64,
}

/// An in-process shared store backed by a sorted map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    data: Arc<Mutex<BTreeMap<String, Slot>>>,
}

impl InMemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the number of keys currently stored.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Return true if the store contains no keys.
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

fn write_slot(map: &mut BTreeMap<String, Slot>, key: &str, value: String) {
    let slot = map.entry(key.to_string()).or_insert_with(|| Slot {
        value: String::new(),
        revision: 0,
    });
    slot.value = value;
    slot.revision += 1;
}

impl SharedStore for InMemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.data.lock().get(key).map(|slot| slot.value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut map = self.data.lock();
        write_slot(&mut map, key, value.to_string());
        Ok(())
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut map = self.data.lock();
        let current = match map.get(key) {
            Some(slot) => slot
                .value
                .trim()
                .parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                    value: slot.value.clone(),
                })?,
            None => 0,
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::IncrementOverflow {
                key: key.to_string(),
            })?;
        write_slot(&mut map, key, next.to_string());
        Ok(next)
    }

    fn watch(&self, key: &str) -> StoreResult<Watched> {
        let map = self.data.lock();
        let (value, revision) = match map.get(key) {
            Some(slot) => (Some(slot.value.clone()), slot.revision),
            None => (None, 0),
        };
        Ok(Watched {
            key: key.to_string(),
            value,
            revision,
        })
    }

    fn exec_set(&self, watched: &Watched, value: &str) -> StoreResult<bool> {
        let mut map = self.data.lock();
        let current_revision = map.get(&watched.key).map(|slot| slot.revision).unwrap_or(0);
        if current_revision != watched.revision {
            return Ok(false);
        }
        write_slot(&mut map, &watched.key, value.to_string());
        Ok(true)
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_get_set() {
        let store = InMemoryStore::new();

        assert!(store.is_empty());
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v1").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v1".to_string()));

        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v2".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_incr_missing_key_starts_at_one() {
        let store = InMemoryStore::new();
        assert_eq!(store.incr("seq").unwrap(), 1);
        assert_eq!(store.incr("seq").unwrap(), 2);
        assert_eq!(store.get("seq").unwrap(), Some("2".to_string()));
    }

    #[test]
    fn test_incr_rejects_non_integer() {
        let store = InMemoryStore::new();
        store.set("seq", "twelve").unwrap();
        match store.incr("seq") {
            Err(StoreError::NotAnInteger { key, value }) => {
                assert_eq!(key, "seq");
                assert_eq!(value, "twelve");
            }
            other => panic!("Expected NotAnInteger, got: {other:?}"),
        }
    }

    #[test]
    fn test_incr_overflow_is_an_error() {
        let store = InMemoryStore::new();
        store.set("seq", &i64::MAX.to_string()).unwrap();
        assert!(matches!(
            store.incr("seq"),
            Err(StoreError::IncrementOverflow { .. })
        ));
        // The stored value is untouched.
        assert_eq!(store.get("seq").unwrap(), Some(i64::MAX.to_string()));
    }

    #[test]
    fn test_exec_set_succeeds_when_unchanged() {
        let store = InMemoryStore::new();
        store.set("seq", "5").unwrap();

        let watched = store.watch("seq").unwrap();
        assert_eq!(watched.value.as_deref(), Some("5"));
        assert!(store.exec_set(&watched, "9").unwrap());
        assert_eq!(store.get("seq").unwrap(), Some("9".to_string()));
    }

    #[test]
    fn test_exec_set_discarded_after_interference() {
        let store = InMemoryStore::new();
        store.set("seq", "5").unwrap();

        let watched = store.watch("seq").unwrap();
        store.incr("seq").unwrap();

        assert!(!store.exec_set(&watched, "0").unwrap());
        assert_eq!(store.get("seq").unwrap(), Some("6".to_string()));
    }

    #[test]
    fn test_watch_missing_key_then_create() {
        let store = InMemoryStore::new();
        let watched = store.watch("fresh").unwrap();
        assert_eq!(watched.value, None);
        assert!(store.exec_set(&watched, "42").unwrap());

        // A second exec with the stale snapshot must fail.
        assert!(!store.exec_set(&watched, "43").unwrap());
    }

    #[test]
    fn test_clone_shares_state() {
        let store = InMemoryStore::new();
        let clone = store.clone();

        store.incr("shared").unwrap();
        assert_eq!(clone.incr("shared").unwrap(), 2);
    }
}
