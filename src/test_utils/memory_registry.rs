use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::async_trait;

use crate::DiscoveredInstance;
use crate::Registration;
use crate::Registry;
use crate::RegistryError;
use crate::Result;
use crate::WatchStream;

#[derive(Default)]
struct MemoryState {
    kv: HashMap<String, Vec<u8>>,
    kv_writes: Vec<(String, Vec<u8>)>,
    instances: HashMap<String, Vec<DiscoveredInstance>>,
    health_queries: Vec<(String, Option<String>)>,
    failing_queries: HashSet<String>,
    failing_kv: bool,
    failing_health_updates: bool,
    stalled_health_updates: bool,
    registrations: Vec<Registration>,
    deregistered: Vec<String>,
    health_updates: Vec<(String, String, String)>,
    watchers: HashMap<String, Vec<mpsc::UnboundedSender<Result<Vec<u8>>>>>,
    watch_calls: HashMap<String, usize>,
}

/// In-process registry: discovery answers, KV and watches are all driven by
/// the test. Watches only see writes made after they were opened.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<MemoryState>>,
}

fn simulated_failure(path: &str) -> crate::Error {
    RegistryError::Status {
        path: path.to_string(),
        status: 500,
        body: "simulated failure".to_string(),
    }
    .into()
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_instances(
        &self,
        name: &str,
        instances: Vec<DiscoveredInstance>,
    ) {
        self.state.lock().instances.insert(name.to_string(), instances);
    }

    pub fn clear_instances(
        &self,
        name: &str,
    ) {
        self.state.lock().instances.remove(name);
    }

    pub fn fail_queries(
        &self,
        name: &str,
        failing: bool,
    ) {
        let mut state = self.state.lock();
        if failing {
            state.failing_queries.insert(name.to_string());
        } else {
            state.failing_queries.remove(name);
        }
    }

    pub fn fail_kv(
        &self,
        failing: bool,
    ) {
        self.state.lock().failing_kv = failing;
    }

    pub fn fail_health_updates(
        &self,
        failing: bool,
    ) {
        self.state.lock().failing_health_updates = failing;
    }

    /// Health pushes never complete while set
    pub fn stall_health_updates(
        &self,
        stalled: bool,
    ) {
        self.state.lock().stalled_health_updates = stalled;
    }

    /// Stores `value` under `key` without recording a client write
    pub fn seed_json(
        &self,
        key: &str,
        value: Value,
    ) {
        let bytes = serde_json::to_vec(&value).expect("serializable");
        self.state.lock().kv.insert(key.to_string(), bytes);
    }

    /// Remote write by another party: stored and pushed to open watches
    pub fn write_remote(
        &self,
        key: &str,
        bytes: Vec<u8>,
    ) {
        let mut state = self.state.lock();
        state.kv.insert(key.to_string(), bytes.clone());
        Self::notify(&mut state, key, bytes);
    }

    pub fn write_remote_json(
        &self,
        key: &str,
        value: Value,
    ) {
        self.write_remote(key, serde_json::to_vec(&value).expect("serializable"));
    }

    /// Pushes a transient error to every open watch on `key`
    pub fn push_watch_error(
        &self,
        key: &str,
    ) {
        let mut state = self.state.lock();
        if let Some(senders) = state.watchers.get_mut(key) {
            senders.retain(|tx| tx.send(Err(simulated_failure(key))).is_ok());
        }
    }

    /// Ends every open watch stream on `key`
    pub fn close_watches(
        &self,
        key: &str,
    ) {
        self.state.lock().watchers.remove(key);
    }

    fn notify(
        state: &mut MemoryState,
        key: &str,
        bytes: Vec<u8>,
    ) {
        if let Some(senders) = state.watchers.get_mut(key) {
            senders.retain(|tx| tx.send(Ok(bytes.clone())).is_ok());
        }
    }

    pub fn kv(
        &self,
        key: &str,
    ) -> Option<Vec<u8>> {
        self.state.lock().kv.get(key).cloned()
    }

    pub fn kv_json(
        &self,
        key: &str,
    ) -> Option<Value> {
        self.kv(key).map(|bytes| serde_json::from_slice(&bytes).expect("stored JSON"))
    }

    /// Writes issued through [`Registry::kv_put`]
    pub fn kv_writes(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().kv_writes.clone()
    }

    pub fn health_queries(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().health_queries.clone()
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.state.lock().registrations.clone()
    }

    pub fn deregistered(&self) -> Vec<String> {
        self.state.lock().deregistered.clone()
    }

    /// `(id, status, note)` in push order
    pub fn health_updates(&self) -> Vec<(String, String, String)> {
        self.state.lock().health_updates.clone()
    }

    /// Number of `watch_key` calls made for `key`
    pub fn watch_calls(
        &self,
        key: &str,
    ) -> usize {
        self.state.lock().watch_calls.get(key).copied().unwrap_or(0)
    }

    pub fn watched_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().watch_calls.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn kv_get(
        &self,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock();
        if state.failing_kv {
            return Err(simulated_failure(key));
        }
        Ok(state.kv.get(key).cloned())
    }

    async fn kv_put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_kv {
            return Err(simulated_failure(key));
        }
        state.kv_writes.push((key.to_string(), value.clone()));
        state.kv.insert(key.to_string(), value.clone());
        Self::notify(&mut state, key, value);
        Ok(())
    }

    async fn healthy_instances(
        &self,
        service_name: &str,
        tag: Option<String>,
    ) -> Result<Vec<DiscoveredInstance>> {
        let mut state = self.state.lock();
        state.health_queries.push((service_name.to_string(), tag.clone()));
        if state.failing_queries.contains(service_name) {
            return Err(simulated_failure(service_name));
        }
        let instances = state.instances.get(service_name).cloned().unwrap_or_default();
        Ok(match tag {
            Some(tag) => instances.into_iter().filter(|i| i.tags.contains(&tag)).collect(),
            None => instances,
        })
    }

    async fn register_service(
        &self,
        registration: &Registration,
    ) -> Result<()> {
        self.state.lock().registrations.push(registration.clone());
        Ok(())
    }

    async fn deregister_service(
        &self,
        id: &str,
    ) -> Result<()> {
        self.state.lock().deregistered.push(id.to_string());
        Ok(())
    }

    async fn update_health_status(
        &self,
        id: &str,
        status: &str,
        note: &str,
    ) -> Result<()> {
        let stalled = self.state.lock().stalled_health_updates;
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        if state.failing_health_updates {
            return Err(simulated_failure(id));
        }
        state
            .health_updates
            .push((id.to_string(), status.to_string(), note.to_string()));
        Ok(())
    }

    async fn watch_key(
        &self,
        key: &str,
    ) -> Result<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        *state.watch_calls.entry(key.to_string()).or_default() += 1;
        state.watchers.entry(key.to_string()).or_default().push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
