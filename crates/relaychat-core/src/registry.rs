//! Server-side handle registry.
//!
//! A bijection between handles and live connections, indexed both ways so
//! routing and disconnect cleanup are constant-time. Roster enumeration
//! walks entries in registration order via a point-in-time snapshot, so
//! callers never hold registry state across I/O.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::protocol::Handle;

/// Opaque token identifying one live connection.
pub type ConnId = u64;

/// The handle ↔ connection bijection.
///
/// Invariant: the two indices always describe the same entry set. An
/// `add` that would collide leaves both untouched. Entries are never
/// renamed in place; a handle change requires a reconnect.
#[derive(Debug, Default)]
pub struct Registry {
    by_handle: HashMap<Handle, ConnId>,
    by_conn: HashMap<ConnId, Handle>,
    order: Vec<ConnId>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `conn`.
    ///
    /// The caller must not re-register a connection that already holds a
    /// handle; the engine ignores repeat registration packets.
    pub fn add(&mut self, handle: Handle, conn: ConnId) -> Result<()> {
        if self.by_handle.contains_key(&handle) {
            return Err(Error::DuplicateHandle(handle.as_str().to_owned()));
        }
        debug_assert!(!self.by_conn.contains_key(&conn));
        self.by_conn.insert(conn, handle.clone());
        self.by_handle.insert(handle, conn);
        self.order.push(conn);
        Ok(())
    }

    /// Drop the entry for `conn`, returning its handle if one was
    /// registered.
    pub fn remove_by_conn(&mut self, conn: ConnId) -> Option<Handle> {
        let handle = self.by_conn.remove(&conn)?;
        self.by_handle.remove(&handle);
        self.order.retain(|&c| c != conn);
        Some(handle)
    }

    /// Connection registered under `handle`, if any.
    pub fn lookup_by_handle(&self, handle: &Handle) -> Option<ConnId> {
        self.by_handle.get(handle).copied()
    }

    /// Handle registered by `conn`, if any. Returns an owned copy so the
    /// caller is not tied to the registry's lifetime.
    pub fn lookup_by_conn(&self, conn: ConnId) -> Option<Handle> {
        self.by_conn.get(&conn).cloned()
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.by_conn.len()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }

    /// Point-in-time copy of all entries in registration order.
    ///
    /// Relays iterating the snapshot must tolerate connections that have
    /// closed since it was taken.
    pub fn snapshot(&self) -> Vec<(Handle, ConnId)> {
        self.order
            .iter()
            .filter_map(|&conn| self.by_conn.get(&conn).map(|h| (h.clone(), conn)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str) -> Handle {
        Handle::new(name).expect("valid handle")
    }

    fn assert_consistent(registry: &Registry) {
        assert_eq!(registry.by_handle.len(), registry.by_conn.len());
        for (h, &c) in &registry.by_handle {
            assert_eq!(registry.by_conn.get(&c), Some(h));
        }
    }

    #[test]
    fn add_and_lookup_both_ways() {
        let mut registry = Registry::new();
        registry.add(handle("alice"), 7).expect("add");

        assert_eq!(registry.lookup_by_handle(&handle("alice")), Some(7));
        assert_eq!(registry.lookup_by_conn(7), Some(handle("alice")));
        assert_eq!(registry.len(), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn duplicate_add_leaves_both_indices_unchanged() {
        let mut registry = Registry::new();
        registry.add(handle("alice"), 1).expect("add");

        let err = registry.add(handle("alice"), 2).expect_err("should fail");
        assert!(matches!(err, Error::DuplicateHandle(h) if h == "alice"));
        assert_eq!(registry.lookup_by_handle(&handle("alice")), Some(1));
        assert_eq!(registry.lookup_by_conn(2), None);
        assert_eq!(registry.len(), 1);
        assert_consistent(&registry);
    }

    #[test]
    fn handles_are_case_sensitive() {
        let mut registry = Registry::new();
        registry.add(handle("alice"), 1).expect("add");
        registry.add(handle("Alice"), 2).expect("distinct handle");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_cleans_both_indices() {
        let mut registry = Registry::new();
        registry.add(handle("alice"), 1).expect("add");
        registry.add(handle("bob"), 2).expect("add");

        assert_eq!(registry.remove_by_conn(1), Some(handle("alice")));
        assert_eq!(registry.lookup_by_handle(&handle("alice")), None);
        assert_eq!(registry.lookup_by_conn(1), None);
        assert_eq!(registry.len(), 1);
        assert_consistent(&registry);

        // A handle freed by removal can be registered again.
        registry.add(handle("alice"), 3).expect("re-add");
        assert_consistent(&registry);
    }

    #[test]
    fn remove_unknown_conn_is_none() {
        let mut registry = Registry::new();
        assert_eq!(registry.remove_by_conn(99), None);
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let mut registry = Registry::new();
        registry.add(handle("alice"), 3).expect("add");
        registry.add(handle("bob"), 1).expect("add");
        registry.add(handle("carol"), 2).expect("add");
        registry.remove_by_conn(1);
        registry.add(handle("dave"), 5).expect("add");

        let names: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|(h, _)| h.as_str().to_owned())
            .collect();
        assert_eq!(names, ["alice", "carol", "dave"]);
    }
}
