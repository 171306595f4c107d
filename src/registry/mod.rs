//! Registry backend interface.
//!
//! The registry is an external catalog + key/value store providing discovery,
//! TTL health checks and blocking watches. [`Registry`] is the seam every other
//! component talks to; [`ConsulRegistry`] is the production implementation.

mod consul;
pub use consul::*;


use std::collections::HashMap;
use std::time::Duration;

use futures::stream::BoxStream;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;
use tonic::async_trait;

use crate::Result;

/// Stream of raw values produced by a key watch.
///
/// `Err` items are transient failures; the stream keeps going after them.
pub type WatchStream = BoxStream<'static, Result<Vec<u8>>>;

/// One healthy instance of a named service, as returned by a single poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredInstance {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

/// What this instance announces to the registry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceRecord {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub meta: HashMap<String, String>,
}

/// A [`ServiceRecord`] bound to a generated instance id and TTL check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub record: ServiceRecord,
    pub ttl: Duration,
    pub deregister_after: Duration,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Returns `None` when the key does not exist
    async fn kv_get(
        &self,
        key: &str,
    ) -> Result<Option<Vec<u8>>>;

    async fn kv_put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()>;

    /// Instances currently passing their health checks, in registry order.
    /// `tag` restricts the result to instances carrying it.
    async fn healthy_instances(
        &self,
        service_name: &str,
        tag: Option<String>,
    ) -> Result<Vec<DiscoveredInstance>>;

    async fn register_service(
        &self,
        registration: &Registration,
    ) -> Result<()>;

    async fn deregister_service(
        &self,
        id: &str,
    ) -> Result<()>;

    /// Pushes a TTL check status (`passing`, `warning`, `critical`)
    async fn update_health_status(
        &self,
        id: &str,
        status: &str,
        note: &str,
    ) -> Result<()>;

    /// Long-lived stream of values written to `key`. Dropping the stream
    /// cancels the underlying blocking query.
    async fn watch_key(
        &self,
        key: &str,
    ) -> Result<WatchStream>;
}
