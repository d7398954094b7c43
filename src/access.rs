//! In-memory access control store
//!
//! Two process-wide sets of client identifiers: an allow-list that skips
//! the judgment tiers and a deny-list that rejects outright. The store is
//! shared by every request handler, so mutation takes a write lock and a
//! reader never observes a partially applied union. Lists live only for
//! the lifetime of the process; a production deployment would back this
//! with a replicated store.

use std::collections::HashSet;
use std::sync::RwLock;

/// Concurrent allow/deny sets of client identifiers.
#[derive(Debug, Default)]
pub struct AccessControl {
    allow: RwLock<HashSet<String>>,
    deny: RwLock<HashSet<String>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_allow(&self, id: &str) -> bool {
        self.allow.read().expect("allow lock poisoned").contains(id)
    }

    pub fn contains_deny(&self, id: &str) -> bool {
        self.deny.read().expect("deny lock poisoned").contains(id)
    }

    /// Union the given identifiers into the allow-list and return the
    /// resulting list, sorted for deterministic admin responses.
    pub fn add_to_allow(&self, ids: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut guard = self.allow.write().expect("allow lock poisoned");
        guard.extend(ids);
        let mut current: Vec<String> = guard.iter().cloned().collect();
        current.sort();
        current
    }

    /// Union the given identifiers into the deny-list and return the
    /// resulting list, sorted.
    pub fn add_to_deny(&self, ids: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut guard = self.deny.write().expect("deny lock poisoned");
        guard.extend(ids);
        let mut current: Vec<String> = guard.iter().cloned().collect();
        current.sort();
        current
    }

    pub fn reset_allow(&self) {
        self.allow.write().expect("allow lock poisoned").clear();
    }

    pub fn reset_deny(&self) {
        self.deny.write().expect("deny lock poisoned").clear();
    }

    pub fn list_allow(&self) -> Vec<String> {
        let mut current: Vec<String> = self
            .allow
            .read()
            .expect("allow lock poisoned")
            .iter()
            .cloned()
            .collect();
        current.sort();
        current
    }

    pub fn list_deny(&self) -> Vec<String> {
        let mut current: Vec<String> = self
            .deny
            .read()
            .expect("deny lock poisoned")
            .iter()
            .cloned()
            .collect();
        current.sort();
        current
    }
}
