//! Concurrent registry of active proxy containers.

use crate::backend::BackendHandle;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::error;

/// Tracked state for one active forwarding container.
#[derive(Debug, Clone)]
pub struct ProxyRecord {
    /// Publicly reachable listen port; unique key in the registry.
    pub port: u32,
    /// Backend identifier used for the later stop/remove pair.
    pub handle: BackendHandle,
    /// Set once at insertion; the sweeper computes age from it.
    pub created_at: Instant,
}

/// Concurrent map of `port -> ProxyRecord`.
///
/// The single source of truth for which proxies are active. A port present
/// here implies its container is, as far as this service knows, running;
/// absence implies nothing is tracked, though the physical container may
/// still exist briefly while a winning remover tears it down.
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    entries: DashMap<u32, ProxyRecord>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert a freshly provisioned record.
    ///
    /// The allocator never repeats a port while older records are live, so a
    /// key collision here is a bug. It is logged and the new record replaces
    /// the old one, leaking the displaced handle.
    pub fn insert(&self, record: ProxyRecord) {
        let port = record.port;
        if let Some(old) = self.entries.insert(port, record) {
            error!(
                port,
                displaced_handle = %old.handle,
                "duplicate port in registry, replacing record"
            );
        }
    }

    /// Atomically remove and return the record for `port`.
    ///
    /// Whichever caller wins this removal owns the backend teardown for the
    /// returned handle; every other racing caller sees `None`. This is what
    /// makes teardown at-most-once per container.
    pub fn remove_if_present(&self, port: u32) -> Option<ProxyRecord> {
        self.entries.remove(&port).map(|(_, record)| record)
    }

    /// Point-in-time snapshot of all records.
    ///
    /// Holds each shard lock only for the duration of the clone, so inserts
    /// and removes proceed concurrently with the iteration.
    pub fn snapshot_all(&self) -> Vec<ProxyRecord> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    /// Number of active proxies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(port: u32) -> ProxyRecord {
        ProxyRecord {
            port,
            handle: BackendHandle(format!("container-{}", port)),
            created_at: Instant::now(),
        }
    }

    #[test]
    fn test_insert_and_remove() {
        let registry = ProxyRegistry::new();
        assert!(registry.is_empty());

        registry.insert(record(40001));
        registry.insert(record(40002));
        assert_eq!(registry.len(), 2);

        let removed = registry.remove_if_present(40001).expect("record present");
        assert_eq!(removed.port, 40001);
        assert_eq!(removed.handle, BackendHandle("container-40001".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_absent_port_returns_none() {
        let registry = ProxyRegistry::new();
        assert!(registry.remove_if_present(40001).is_none());

        registry.insert(record(40001));
        assert!(registry.remove_if_present(40001).is_some());
        // Second removal loses the race by definition.
        assert!(registry.remove_if_present(40001).is_none());
    }

    #[test]
    fn test_collision_keeps_newest_record() {
        let registry = ProxyRegistry::new();
        registry.insert(record(40001));

        let mut newer = record(40001);
        newer.handle = BackendHandle("container-replacement".to_string());
        registry.insert(newer);

        assert_eq!(registry.len(), 1);
        let kept = registry.remove_if_present(40001).expect("record present");
        assert_eq!(
            kept.handle,
            BackendHandle("container-replacement".to_string())
        );
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let registry = ProxyRegistry::new();
        registry.insert(record(40001));
        registry.insert(record(40002));

        let snapshot = registry.snapshot_all();
        assert_eq!(snapshot.len(), 2);

        // Mutations after the snapshot do not affect it.
        registry.remove_if_present(40001);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }
}
