use std::sync::Arc;

use futures::StreamExt;
use serde_json::Map;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::merge::merge_missing;
use super::ConfigStore;
use crate::metrics::CONFIG_UPDATES;
use crate::metrics::REGISTRY_QUERY_FAILURES;
use crate::update::EventPublisher;
use crate::utils::async_task::jittered;
use crate::ConfigSyncConfig;
use crate::Error;
use crate::Registry;
use crate::Result;
use crate::Update;

/// Reconciles local defaults with the registry KV store and keeps
/// [`ConfigStore`] in step with remote writes.
#[derive(Clone)]
pub(crate) struct ConfigSynchronizer {
    registry: Arc<dyn Registry>,
    store: ConfigStore,
    publisher: EventPublisher,
    config: ConfigSyncConfig,
}

fn decode_object(
    key: &str,
    bytes: &[u8],
) -> Result<Map<String, Value>> {
    serde_json::from_slice(bytes).map_err(|source| Error::Decode {
        key: key.to_string(),
        source,
    })
}

impl ConfigSynchronizer {
    pub(crate) fn new(
        registry: Arc<dyn Registry>,
        store: ConfigStore,
        publisher: EventPublisher,
        config: ConfigSyncConfig,
    ) -> Self {
        Self {
            registry,
            store,
            publisher,
            config,
        }
    }

    /// Merges every top-level key of `defaults` once.
    ///
    /// Returns the keys that should be watched from now on.
    ///
    /// # Errors
    /// Any fetch, decode or write failure, and a template that is not an
    /// object of objects
    pub(crate) async fn synchronize(
        &self,
        defaults: &Value,
    ) -> Result<Vec<String>> {
        let template = defaults.as_object().ok_or_else(|| Error::InvalidTemplate {
            key: String::new(),
            reason: "configuration template must be a JSON object".to_string(),
        })?;

        let mut watched = Vec::new();
        for (key, local) in template {
            let local = local.as_object().ok_or_else(|| Error::InvalidTemplate {
                key: key.clone(),
                reason: "top-level values must be JSON objects".to_string(),
            })?;

            let existed = self.reconcile_key(key, local).await?;
            if existed || self.config.watch_seeded_keys {
                watched.push(key.clone());
            }
        }
        Ok(watched)
    }

    /// Returns whether the key already existed remotely
    async fn reconcile_key(
        &self,
        key: &str,
        local: &Map<String, Value>,
    ) -> Result<bool> {
        match self.registry.kv_get(key).await? {
            None => {
                let value = Value::Object(local.clone());
                self.put(key, &value).await?;
                self.store.insert(key, value);
                info!(key, "Seeded remote configuration from defaults");
                Ok(false)
            }
            Some(bytes) => {
                let mut remote = decode_object(key, &bytes)?;
                let added = merge_missing(&mut remote, local);
                let value = Value::Object(remote);

                if !added.is_empty() {
                    self.put(key, &value).await?;
                    info!(key, "Added missing fields to remote configuration: {:?}", added);
                } else {
                    debug!(key, "Remote configuration already complete");
                }
                self.store.insert(key, value);
                Ok(true)
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        value: &Value,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|source| Error::Decode {
            key: key.to_string(),
            source,
        })?;
        self.registry.kv_put(key, bytes).await
    }

    /// Follows remote writes to `key` until cancelled, reopening the watch
    /// whenever it ends or cannot be opened.
    pub(crate) async fn watch(
        self,
        key: String,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                opened = self.registry.watch_key(&key) => opened,
            };

            match opened {
                Ok(mut stream) => loop {
                    let item = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        item = stream.next() => item,
                    };
                    match item {
                        Some(Ok(bytes)) => self.apply(&key, &bytes, &cancel).await,
                        Some(Err(e)) => {
                            if e.is_transient() {
                                warn!(key = %key, "Watch error: {:?}", e);
                            } else {
                                error!(key = %key, "Watch rejected by registry: {:?}", e);
                            }
                            REGISTRY_QUERY_FAILURES.with_label_values(&["watch_key"]).inc();
                        }
                        None => {
                            debug!(key = %key, "Watch ended");
                            break;
                        }
                    }
                },
                Err(e) => {
                    warn!(key = %key, "Failed to open watch: {:?}", e);
                    REGISTRY_QUERY_FAILURES.with_label_values(&["watch_key"]).inc();
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(jittered(self.config.resubscribe_delay())) => {}
            }
        }

        debug!(key = %key, "Configuration watch stopped");
        Ok(())
    }

    async fn apply(
        &self,
        key: &str,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) {
        let value = match decode_object(key, bytes) {
            Ok(remote) => Value::Object(remote),
            Err(e) => {
                warn!(key, "Dropping undecodable notification: {}", e);
                return;
            }
        };

        if self.store.current(key).as_ref() == Some(&value) {
            trace!(key, "Notification matches cached value");
            return;
        }

        self.store.insert(key, value);
        CONFIG_UPDATES.with_label_values(&[key]).inc();
        info!(key, "Remote configuration changed");
        self.publisher.publish(Update::config(key), cancel).await;
    }
}
