use std::sync::Arc;
use std::sync::OnceLock;

use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::metrics::DEPENDENCY_EVENTS;
use crate::metrics::POOL_SIZE;
use crate::metrics::REGISTRY_QUERY_FAILURES;
use crate::update::EventPublisher;
use crate::ConnectionPool;
use crate::Dialer;
use crate::DiscoveryConfig;
use crate::Error;
use crate::PooledConnection;
use crate::ReadinessEmission;
use crate::Registry;
use crate::Result;
use crate::Update;

/// Reconciles the [`ConnectionPool`] against the registry.
///
/// Each cycle visits the declared names in order: a name with no healthy
/// instance loses its entry, a name without an entry gets one to the first
/// instance returned. Query and dial failures leave the pool untouched.
pub struct DependencyWatcher {
    registry: Arc<dyn Registry>,
    dialer: Arc<dyn Dialer>,
    pool: ConnectionPool,
    declared: OnceLock<Vec<String>>,
    readiness: watch::Sender<bool>,
    config: DiscoveryConfig,
}

impl DependencyWatcher {
    pub(crate) fn new(
        registry: Arc<dyn Registry>,
        dialer: Arc<dyn Dialer>,
        readiness: watch::Sender<bool>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            registry,
            dialer,
            pool: ConnectionPool::new(),
            declared: OnceLock::new(),
            readiness,
            config,
        }
    }

    /// Declares the dependencies this instance needs. Duplicates collapse to
    /// their first occurrence.
    ///
    /// # Errors
    /// [`Error::DependenciesAlreadyDeclared`] on any call after the first
    pub fn set_dependencies<I, S>(
        &self,
        names: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut declared: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !declared.contains(&name) {
                declared.push(name);
            }
        }

        self.declared
            .set(declared)
            .map_err(|_| Error::DependenciesAlreadyDeclared(self.dependencies().to_vec()))?;

        info!("Dependencies declared: {:?}", self.dependencies());
        self.emit_readiness();
        Ok(())
    }

    /// Declared names, empty until [`set_dependencies`](Self::set_dependencies)
    pub fn dependencies(&self) -> &[String] {
        self.declared.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_declared(&self) -> bool {
        self.declared.get().is_some()
    }

    /// Readiness snapshots: true while every declared dependency is pooled
    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.readiness.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.is_declared() && self.pool.len() == self.dependencies().len()
    }

    pub fn connection(
        &self,
        name: &str,
    ) -> Option<Channel> {
        self.pool.get(name)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Polls immediately, then every `poll_interval`, until cancelled.
    /// `publisher` is dropped on exit.
    pub(crate) async fn run(
        self: Arc<Self>,
        publisher: EventPublisher,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.poll_once(&publisher, &cancel) => {}
            }
        }

        debug!("Dependency watcher stopped");
        Ok(())
    }

    /// One reconciliation cycle over every declared name
    pub(crate) async fn poll_once(
        &self,
        publisher: &EventPublisher,
        cancel: &CancellationToken,
    ) {
        for name in self.dependencies() {
            if cancel.is_cancelled() {
                return;
            }
            self.reconcile(name, publisher, cancel).await;

            if self.config.readiness_emission == ReadinessEmission::PerDependency {
                self.emit_readiness();
            }
        }

        if self.config.readiness_emission == ReadinessEmission::PerCycle {
            self.emit_readiness();
        }
    }

    async fn reconcile(
        &self,
        name: &str,
        publisher: &EventPublisher,
        cancel: &CancellationToken,
    ) {
        let instances = match self
            .registry
            .healthy_instances(name, self.config.required_tag.clone())
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                if e.is_transient() {
                    warn!(dependency = name, "Failed to query instances: {:?}", e);
                } else {
                    error!(dependency = name, "Registry rejected instance query: {:?}", e);
                }
                REGISTRY_QUERY_FAILURES.with_label_values(&["healthy_instances"]).inc();
                return;
            }
        };

        match instances.into_iter().next() {
            None => {
                if self.pool.remove(name).is_some() {
                    info!(dependency = name, "Dependency disconnected");
                    self.record_change(name, "removed");
                    publisher.publish(Update::dependency(name), cancel).await;
                }
            }
            Some(instance) if !self.pool.contains(name) => {
                let channel = match self.dialer.dial(&instance.address, instance.port).await {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!(dependency = name, instance = %instance.id, "Dial failed: {:?}", e);
                        return;
                    }
                };

                info!(
                    dependency = name,
                    "Dependency connected at {}:{}", instance.address, instance.port
                );
                self.pool.insert(name, PooledConnection { instance, channel });
                self.record_change(name, "added");
                publisher.publish(Update::dependency(name), cancel).await;
            }
            Some(_) => {}
        }
    }

    fn record_change(
        &self,
        name: &str,
        change: &str,
    ) {
        DEPENDENCY_EVENTS.with_label_values(&[name, change]).inc();
        POOL_SIZE.set(self.pool.len() as i64);
    }

    fn emit_readiness(&self) {
        let ready = self.is_ready();
        self.readiness.send_if_modified(|current| {
            if *current == ready {
                return false;
            }
            *current = ready;
            true
        });
    }
}

impl std::fmt::Debug for DependencyWatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DependencyWatcher")
            .field("declared", &self.dependencies())
            .field("pool", &self.pool.names())
            .finish()
    }
}
