//! Addressing of the four per-database connection collections

use deskline_core::ConnectionRole;
use serde::Serialize;

/// One of {sync, async} × {primary, replica}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub role: ConnectionRole,
    pub replica: bool,
}

impl CollectionKey {
    pub const ALL: [CollectionKey; 4] = [
        CollectionKey::new(ConnectionRole::Sync, false),
        CollectionKey::new(ConnectionRole::Sync, true),
        CollectionKey::new(ConnectionRole::Async, false),
        CollectionKey::new(ConnectionRole::Async, true),
    ];

    pub const fn new(role: ConnectionRole, replica: bool) -> Self {
        Self { role, replica }
    }

    /// `sync/primary`, `async/replica`, ...
    pub fn label(&self) -> String {
        format!("{}/{}", self.role, if self.replica { "replica" } else { "primary" })
    }
}

impl std::fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// A value for each collection of a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerCollection<T> {
    pub sync_primary: T,
    pub sync_replica: T,
    pub async_primary: T,
    pub async_replica: T,
}

impl<T> PerCollection<T> {
    pub fn get(&self, key: CollectionKey) -> &T {
        match (key.role, key.replica) {
            (ConnectionRole::Sync, false) => &self.sync_primary,
            (ConnectionRole::Sync, true) => &self.sync_replica,
            (ConnectionRole::Async, false) => &self.async_primary,
            (ConnectionRole::Async, true) => &self.async_replica,
        }
    }

    pub fn get_mut(&mut self, key: CollectionKey) -> &mut T {
        match (key.role, key.replica) {
            (ConnectionRole::Sync, false) => &mut self.sync_primary,
            (ConnectionRole::Sync, true) => &mut self.sync_replica,
            (ConnectionRole::Async, false) => &mut self.async_primary,
            (ConnectionRole::Async, true) => &mut self.async_replica,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (CollectionKey, &T)> {
        CollectionKey::ALL.into_iter().map(move |key| (key, self.get(key)))
    }

    pub fn map<U>(&self, mut f: impl FnMut(CollectionKey, &T) -> U) -> PerCollection<U> {
        PerCollection {
            sync_primary: f(CollectionKey::ALL[0], &self.sync_primary),
            sync_replica: f(CollectionKey::ALL[1], &self.sync_replica),
            async_primary: f(CollectionKey::ALL[2], &self.async_primary),
            async_replica: f(CollectionKey::ALL[3], &self.async_replica),
        }
    }
}
