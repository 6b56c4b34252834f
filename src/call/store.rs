// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! In-process call-state store, keyed by call id.
//!
//! A sharded concurrent map gives per-key isolation: concurrent calls never
//! contend, and one call's task is the only writer for its key. Closures
//! passed to [`CallStore::with_state`] run under the entry lock and must
//! not await; call tasks do their mutations in a plan/execute/record shape
//! so provider awaits happen between closures, never inside one.
//!
//! Single-instance deployments keep everything here and rely on the TTL
//! sweep; running more than one replica means swapping this for an external
//! store behind the same surface.

use std::time::Duration;

use dashmap::DashMap;

use crate::call::state::CallState;

/// Default idle lifetime before a call's state is garbage collected.
pub const DEFAULT_CALL_TTL: Duration = Duration::from_secs(3600);

/// Concurrent map of call id to [`CallState`].
#[derive(Debug)]
pub struct CallStore {
    calls: DashMap<String, CallState>,
    ttl: Duration,
}

impl Default for CallStore {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TTL)
    }
}

impl CallStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            calls: DashMap::new(),
            ttl,
        }
    }

    /// Run `f` against the call's state, creating fresh state on first
    /// contact. The entry lock is held for the duration of `f`: keep the
    /// closure synchronous and quick.
    pub fn with_state<R>(&self, call_id: &str, f: impl FnOnce(&mut CallState) -> R) -> R {
        let mut entry = self
            .calls
            .entry(call_id.to_string())
            .or_insert_with(|| {
                tracing::info!(call_id = %call_id, "new call state created");
                CallState::new(call_id)
            });
        f(entry.value_mut())
    }

    /// Read-only peek that does not create state for unknown calls.
    pub fn peek<R>(&self, call_id: &str, f: impl FnOnce(&CallState) -> R) -> Option<R> {
        self.calls.get(call_id).map(|entry| f(entry.value()))
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    /// Drop a call's state. Returns whether anything was removed.
    pub fn delete(&self, call_id: &str) -> bool {
        let removed = self.calls.remove(call_id).is_some();
        if removed {
            tracing::info!(call_id = %call_id, "call state deleted");
        }
        removed
    }

    /// Remove every call idle longer than the TTL; returns how many went.
    pub fn cleanup_old(&self) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, state| state.idle_for() <= self.ttl);
        let removed = before - self.calls.len();
        if removed > 0 {
            tracing::info!(removed, remaining = self.calls.len(), "stale call states swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::state::BookingStage;

    #[test]
    fn test_first_contact_creates_state() {
        let store = CallStore::default();
        assert!(!store.contains("call-1"));
        let stage = store.with_state("call-1", |state| state.booking_stage);
        assert_eq!(stage, BookingStage::None);
        assert!(store.contains("call-1"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_peek_does_not_create() {
        let store = CallStore::default();
        assert!(store.peek("ghost", |state| state.call_id.clone()).is_none());
        assert!(!store.contains("ghost"));
    }

    #[test]
    fn test_mutations_persist_across_lookups() {
        let store = CallStore::default();
        store.with_state("call-1", |state| state.start_booking_flow());
        let stage = store
            .peek("call-1", |state| state.booking_stage)
            .expect("state exists");
        assert_eq!(stage, BookingStage::CollectingIssue);
    }

    #[test]
    fn test_delete_removes_state() {
        let store = CallStore::default();
        store.with_state("call-1", |_| ());
        assert!(store.delete("call-1"));
        assert!(!store.delete("call-1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_cleanup_removes_only_stale_calls() {
        let store = CallStore::new(Duration::from_millis(20));
        store.with_state("stale", |_| ());
        store.with_state("fresh", |_| ());
        std::thread::sleep(Duration::from_millis(30));
        // Renewed activity keeps "fresh" alive past the sweep.
        store.with_state("fresh", |state| state.touch());
        let removed = store.cleanup_old();
        assert_eq!(removed, 1);
        assert!(!store.contains("stale"));
        assert!(store.contains("fresh"));
    }
}
