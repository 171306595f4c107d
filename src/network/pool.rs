use std::sync::Arc;

use dashmap::DashMap;
use tonic::transport::Channel;
use tracing::trace;

use crate::DiscoveredInstance;

/// Open channel to the instance that was first observed for a dependency
#[derive(Clone, Debug)]
pub struct PooledConnection {
    pub instance: DiscoveredInstance,
    pub channel: Channel,
}

/// Dependency name -> connection.
///
/// Clones share the same entries. Only the dependency watcher inserts and
/// removes; everybody else reads.
#[derive(Clone, Debug, Default)]
pub struct ConnectionPool {
    entries: Arc<DashMap<String, PooledConnection>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel for `name`, if a live instance is pooled
    pub fn get(
        &self,
        name: &str,
    ) -> Option<Channel> {
        self.entries.get(name).map(|entry| entry.channel.clone())
    }

    /// Instance backing the pooled channel for `name`
    pub fn instance(
        &self,
        name: &str,
    ) -> Option<DiscoveredInstance> {
        self.entries.get(name).map(|entry| entry.instance.clone())
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pooled dependency names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Inserts unless an entry already exists. Returns whether it was inserted.
    pub(crate) fn insert(
        &self,
        name: &str,
        connection: PooledConnection,
    ) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        trace!(name, instance = %connection.instance.id, "Pool entry added");
        self.entries.insert(name.to_string(), connection);
        true
    }

    pub(crate) fn remove(
        &self,
        name: &str,
    ) -> Option<PooledConnection> {
        let removed = self.entries.remove(name).map(|(_, connection)| connection);
        if removed.is_some() {
            trace!(name, "Pool entry removed");
        }
        removed
    }
}
