use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::info_span;

use super::Service;
use crate::metrics;
use crate::update::bus;
use crate::update::Dispatcher;
use crate::utils::async_task::spawn_task;
use crate::ConfigStore;
use crate::ConsulRegistry;
use crate::DependencyWatcher;
use crate::Dialer;
use crate::GrpcDialer;
use crate::Registrar;
use crate::Registry;
use crate::Result;
use crate::ServiceConfig;
use crate::UpdateHandlers;

/// Assembles a [`Service`].
///
/// Without an injected registry, [`build`](Self::build) connects to the Consul
/// agent named by the configuration and fails if it does not answer.
pub struct ServiceBuilder {
    name: String,
    tags: Vec<String>,
    meta: HashMap<String, String>,
    config: Option<ServiceConfig>,
    registry: Option<Arc<dyn Registry>>,
    dialer: Option<Arc<dyn Dialer>>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Vec::new(),
            meta: HashMap::new(),
            config: None,
            registry: None,
            dialer: None,
        }
    }

    pub fn tags<I, S>(
        mut self,
        tags: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn meta(
        mut self,
        meta: HashMap<String, String>,
    ) -> Self {
        self.meta = meta;
        self
    }

    /// Settings to use instead of loading them from file and environment
    pub fn config(
        mut self,
        config: ServiceConfig,
    ) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(
        mut self,
        registry: Arc<dyn Registry>,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn dialer(
        mut self,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Validates settings, resolves the registry and starts the dispatcher
    pub async fn build(self) -> Result<Service> {
        let config = match self.config {
            Some(config) => config,
            None => ServiceConfig::new()?,
        };
        config.validate()?;

        let registry: Arc<dyn Registry> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(ConsulRegistry::connect(config.registry.clone()).await?),
        };
        let dialer: Arc<dyn Dialer> = match self.dialer {
            Some(dialer) => dialer,
            None => Arc::new(GrpcDialer::new(config.transport.clone())),
        };

        let cancel = CancellationToken::new();
        let (publisher, rx) = bus(config.bus.capacity);
        let (ready_tx, ready_rx) = watch::channel(false);
        let handlers = Arc::new(UpdateHandlers::new());

        let watcher = Arc::new(DependencyWatcher::new(
            registry.clone(),
            dialer,
            ready_tx,
            config.discovery.clone(),
        ));

        let dispatcher = Dispatcher::new(rx, handlers.clone(), ready_rx, cancel.child_token());
        let dispatcher = spawn_task(
            "dispatcher",
            info_span!("dispatcher", service = %self.name),
            move || dispatcher.run(),
        );

        let mut auxiliary = Vec::new();
        if config.monitoring.prometheus_enabled {
            let port = config.monitoring.prometheus_port;
            let shutdown = cancel.child_token();
            auxiliary.push(spawn_task(
                "metrics",
                info_span!("metrics", service = %self.name),
                move || metrics::start_server(port, shutdown),
            ));
        }

        info!("Service {} built", self.name);
        let registrar = Registrar::new(registry.clone(), config.heartbeat.clone());

        Ok(Service {
            name: self.name,
            tags: self.tags,
            meta: self.meta,
            config,
            registry,
            registrar,
            watcher,
            store: ConfigStore::new(),
            handlers,
            publisher: Mutex::new(Some(publisher)),
            cancel,
            producers: Mutex::new(Vec::new()),
            dispatcher: Mutex::new(Some(dispatcher)),
            auxiliary: Mutex::new(auxiliary),
            server: Mutex::new(None),
            registration: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }
}
