use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::Channel;
use tracing::debug;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use super::HostedServer;
use crate::remote_config::ConfigSynchronizer;
use crate::update::EventPublisher;
use crate::utils::async_task::spawn_task;
use crate::utils::net::free_port;
use crate::utils::net::local_ip;
use crate::ConfigStore;
use crate::DependencyWatcher;
use crate::Error;
use crate::Finder;
use crate::Registrar;
use crate::RegistrationHandle;
use crate::Registry;
use crate::Result;
use crate::ServiceConfig;
use crate::ServiceRecord;
use crate::Update;
use crate::UpdateHandlers;
use crate::UpdateKind;

/// A running service instance.
///
/// Built by [`ServiceBuilder`](super::ServiceBuilder). Background work starts
/// as features are enabled (`with_dependencies`, `with_config`) and everything
/// stops on [`shutdown`](Self::shutdown), which `run` calls on exit.
pub struct Service {
    pub(super) name: String,
    pub(super) tags: Vec<String>,
    pub(super) meta: HashMap<String, String>,
    pub(super) config: ServiceConfig,
    pub(super) registry: Arc<dyn Registry>,
    pub(super) registrar: Registrar,
    pub(super) watcher: Arc<DependencyWatcher>,
    pub(super) store: ConfigStore,
    pub(super) handlers: Arc<UpdateHandlers>,
    /// Taken on shutdown so the bus can close
    pub(super) publisher: Mutex<Option<EventPublisher>>,
    pub(super) cancel: CancellationToken,
    /// Tasks that publish on the bus
    pub(super) producers: Mutex<Vec<JoinHandle<()>>>,
    pub(super) dispatcher: Mutex<Option<JoinHandle<()>>>,
    /// Hosted server, metrics server, heartbeat
    pub(super) auxiliary: Mutex<Vec<JoinHandle<()>>>,
    pub(super) server: Mutex<Option<HostedServer>>,
    pub(super) registration: Mutex<Option<RegistrationHandle>>,
    pub(super) stopped: AtomicBool,
}

impl Service {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ServiceConfig {
        &self.config
    }

    fn publisher(&self) -> Result<EventPublisher> {
        self.publisher
            .lock()
            .clone()
            .ok_or_else(|| Error::Fatal(format!("service {} is shut down", self.name)))
    }

    /// Declares the dependencies and starts polling for them.
    ///
    /// # Errors
    /// [`Error::DependenciesAlreadyDeclared`] if called twice
    pub fn with_dependencies<I, S>(
        &self,
        names: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let publisher = self.publisher()?;
        self.watcher.set_dependencies(names)?;

        let watcher = self.watcher.clone();
        let cancel = self.cancel.child_token();
        let handle = spawn_task(
            "dependency_watcher",
            info_span!("dependency_watcher", service = %self.name),
            move || watcher.run(publisher, cancel),
        );
        self.producers.lock().push(handle);
        Ok(())
    }

    /// Merges `defaults` (an object of objects) into the remote store and
    /// keeps the returned [`ConfigStore`] up to date.
    ///
    /// # Errors
    /// Registry failures, undecodable remote values, or a malformed template
    pub async fn with_config(
        &self,
        defaults: Value,
    ) -> Result<ConfigStore> {
        let synchronizer = ConfigSynchronizer::new(
            self.registry.clone(),
            self.store.clone(),
            self.publisher()?,
            self.config.config_sync.clone(),
        );

        let watched = synchronizer.synchronize(&defaults).await?;

        let mut handles = Vec::with_capacity(watched.len());
        for key in watched {
            let synchronizer = synchronizer.clone();
            let cancel = self.cancel.child_token();
            handles.push(spawn_task(
                "config_watch",
                info_span!("config_watch", service = %self.name, key = %key),
                move || synchronizer.watch(key, cancel),
            ));
        }
        self.producers.lock().extend(handles);

        Ok(self.store.clone())
    }

    /// Hosts a gRPC server on this host's outbound address and a free port.
    ///
    /// Serving and registration start in [`run`](Self::run).
    pub fn with_server<F>(
        &self,
        router_fn: F,
    ) -> Result<SocketAddr>
    where
        F: FnOnce(Router) -> Router + Send + 'static,
    {
        let ip = local_ip()?;
        let addr = SocketAddr::new(ip, free_port(ip)?);
        self.with_server_at(addr, router_fn)
    }

    /// Like [`with_server`](Self::with_server) on an explicit address
    pub fn with_server_at<F>(
        &self,
        addr: SocketAddr,
        router_fn: F,
    ) -> Result<SocketAddr>
    where
        F: FnOnce(Router) -> Router + Send + 'static,
    {
        let server = HostedServer::new(addr, Box::new(router_fn), self.config.transport.clone());
        *self.server.lock() = Some(server);
        Ok(addr)
    }

    pub fn on_config_update<F>(
        &self,
        handler: F,
    ) where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.handlers.set(UpdateKind::Config, handler);
    }

    pub fn on_dependency_update<F>(
        &self,
        handler: F,
    ) where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.handlers.set(UpdateKind::Dependency, handler);
    }

    pub fn discovery(&self) -> Finder {
        Finder::new(self.registry.clone(), self.config.discovery.required_tag.clone())
    }

    pub fn connection(
        &self,
        name: &str,
    ) -> Option<Channel> {
        self.watcher.connection(name)
    }

    pub fn readiness(&self) -> watch::Receiver<bool> {
        self.watcher.readiness()
    }

    pub fn config(&self) -> ConfigStore {
        self.store.clone()
    }

    /// Registered instance id, once `run` registered the server
    pub fn instance_id(&self) -> Option<String> {
        self.registration.lock().as_ref().map(|handle| handle.id().to_string())
    }

    /// Runs until SIGINT or SIGTERM, then shuts down
    pub async fn run(&self) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::SignalFailed(e.to_string()))?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::SignalFailed(e.to_string()))?;

        self.run_until(async move {
            tokio::select! {
                _ = sigint.recv() => info!("SIGINT detected."),
                _ = sigterm.recv() => info!("SIGTERM detected."),
            }
        })
        .await
    }

    /// Waits for readiness, registers and serves, then shuts down once
    /// `shutdown_signal` completes.
    pub async fn run_until<F>(
        &self,
        shutdown_signal: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown_signal);

        if self.watcher.is_declared() {
            info!("waiting for all dependencies to be online");
            let mut readiness = self.watcher.readiness();
            tokio::select! {
                _ = &mut shutdown_signal => return self.shutdown().await,
                ready = async { readiness.wait_for(|ready| *ready).await.is_ok() } => {
                    if !ready {
                        return Err(Error::Fatal("readiness channel closed".to_string()));
                    }
                }
            }
            info!("all dependencies are online");
        }

        let server = self.server.lock().take();
        if let Some(server) = server {
            if let Err(e) = self.start_server(server).await {
                let _ = self.shutdown().await;
                return Err(e);
            }
        }

        shutdown_signal.await;
        self.shutdown().await
    }

    async fn start_server(
        &self,
        server: HostedServer,
    ) -> Result<()> {
        let addr = server.addr;
        let listener = HostedServer::bind(addr).await?;

        let record = ServiceRecord {
            name: self.name.clone(),
            address: addr.ip().to_string(),
            port: addr.port(),
            tags: self.tags.clone(),
            meta: self.meta.clone(),
        };
        let handle = self.registrar.register(record, self.cancel.child_token()).await?;
        *self.registration.lock() = Some(handle);

        let cancel = self.cancel.child_token();
        let task = spawn_task(
            "grpc_server",
            info_span!("grpc_server", service = %self.name),
            move || server.serve(listener, cancel),
        );
        self.auxiliary.lock().push(task);

        info!("service running at {}", addr);
        Ok(())
    }

    /// Cancels every task, stops the heartbeat before deregistering, waits
    /// for producers, closes the bus
    /// and waits for the dispatcher and servers. Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down {}", self.name);
        self.cancel.cancel();

        // Every stage runs even if an earlier task failed; the first failure
        // is reported once everything is joined
        let mut first_error = None;
        let mut record = |joined: std::result::Result<(), tokio::task::JoinError>| {
            if let Err(e) = joined {
                warn!("Background task failed during shutdown: {:?}", e);
                first_error.get_or_insert(Error::TaskFailed(e));
            }
        };

        // No renewal may reach the registry after deregistration
        let registration = self.registration.lock().take();
        if let Some(handle) = registration {
            let id = handle.id().to_string();
            record(handle.into_heartbeat().await);
            if let Err(e) = self.registrar.deregister(&id).await {
                warn!("Deregistration failed, TTL will expire it: {:?}", e);
            }
        }

        let producers = std::mem::take(&mut *self.producers.lock());
        for producer in producers {
            record(producer.await);
        }

        // Last sender: the dispatcher sees the bus close
        drop(self.publisher.lock().take());
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            record(dispatcher.await);
        }

        let auxiliary = std::mem::take(&mut *self.auxiliary.lock());
        for task in auxiliary {
            record(task.await);
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        debug!("Shutdown of {} complete", self.name);
        Ok(())
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Service {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("watcher", &self.watcher)
            .field("handlers", &self.handlers)
            .finish()
    }
}
