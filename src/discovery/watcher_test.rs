use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_utils::enable_logger;
use crate::test_utils::instance;
use crate::test_utils::lazy_channel;
use crate::test_utils::LazyDialer;
use crate::test_utils::MemoryRegistry;
use crate::update::bus;
use crate::update::EventPublisher;
use crate::Dialer;
use crate::DiscoveryConfig;
use crate::Error;
use crate::MockDialer;
use crate::ReadinessEmission;
use crate::Update;

struct TestContext {
    registry: MemoryRegistry,
    watcher: Arc<DependencyWatcher>,
    publisher: EventPublisher,
    updates: mpsc::Receiver<Update>,
    readiness: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl TestContext {
    fn drain(&mut self) -> Vec<Update> {
        let mut drained = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            drained.push(update);
        }
        drained
    }

    async fn poll(&self) {
        self.watcher.poll_once(&self.publisher, &self.cancel).await;
    }
}

fn setup_with(
    dialer: Arc<dyn Dialer>,
    config: DiscoveryConfig,
) -> TestContext {
    enable_logger();
    let registry = MemoryRegistry::new();
    let (publisher, updates) = bus(64);
    let (ready_tx, readiness) = watch::channel(false);
    let watcher = Arc::new(DependencyWatcher::new(
        Arc::new(registry.clone()),
        dialer,
        ready_tx,
        config,
    ));
    TestContext {
        registry,
        watcher,
        publisher,
        updates,
        readiness,
        cancel: CancellationToken::new(),
    }
}

fn setup() -> TestContext {
    setup_with(Arc::new(LazyDialer::default()), DiscoveryConfig::default())
}

#[tokio::test]
async fn test_dependency_appearing_yields_one_event_and_one_readiness_change() {
    let mut ctx = setup();
    ctx.watcher.set_dependencies(["auth"]).unwrap();
    ctx.readiness.borrow_and_update();

    // t0: nothing registered
    ctx.poll().await;
    assert!(ctx.watcher.pool().is_empty());
    assert!(ctx.drain().is_empty());
    assert!(!ctx.readiness.has_changed().unwrap());

    // t1: one instance
    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);
    ctx.poll().await;

    assert_eq!(ctx.drain(), vec![Update::dependency("auth")]);
    assert!(ctx.readiness.has_changed().unwrap());
    assert!(*ctx.readiness.borrow_and_update());
    assert!(ctx.watcher.connection("auth").is_some());

    // steady state
    ctx.poll().await;
    assert!(ctx.drain().is_empty());
    assert!(!ctx.readiness.has_changed().unwrap());
}

#[tokio::test]
async fn test_dependency_vanishing_yields_one_removal() {
    let mut ctx = setup();
    ctx.watcher.set_dependencies(["auth"]).unwrap();
    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);
    ctx.poll().await;
    ctx.drain();
    assert!(*ctx.readiness.borrow_and_update());

    ctx.registry.clear_instances("auth");
    ctx.poll().await;
    ctx.poll().await;

    assert_eq!(ctx.drain(), vec![Update::dependency("auth")]);
    assert!(ctx.watcher.connection("auth").is_none());
    assert!(ctx.readiness.has_changed().unwrap());
    assert!(!*ctx.readiness.borrow_and_update());
}

#[tokio::test]
async fn test_pool_converges_to_available_dependencies() {
    let mut ctx = setup();
    ctx.watcher.set_dependencies(["users", "auth", "billing"]).unwrap();
    ctx.registry.set_instances("users", vec![instance("users", 7003)]);
    ctx.registry.set_instances("billing", vec![instance("billing", 7002)]);

    ctx.poll().await;

    assert_eq!(ctx.watcher.pool().len(), 2);
    assert!(!ctx.watcher.is_ready());
    assert!(!*ctx.readiness.borrow());
    // declared order
    assert_eq!(
        ctx.drain(),
        vec![Update::dependency("users"), Update::dependency("billing")]
    );

    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);
    ctx.poll().await;
    assert!(ctx.watcher.is_ready());
    assert!(*ctx.readiness.borrow());
}

#[tokio::test]
async fn test_first_returned_instance_is_pooled() {
    let ctx = setup();
    ctx.watcher.set_dependencies(["auth"]).unwrap();
    ctx.registry
        .set_instances("auth", vec![instance("auth", 7001), instance("auth", 7002)]);

    ctx.poll().await;
    ctx.registry.set_instances("auth", vec![instance("auth", 7002)]);
    ctx.poll().await;

    // still the first instance seen
    assert_eq!(ctx.watcher.pool().instance("auth").unwrap().port, 7001);
}

#[tokio::test]
async fn test_query_error_keeps_existing_entry() {
    let mut ctx = setup();
    ctx.watcher.set_dependencies(["auth"]).unwrap();
    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);
    ctx.poll().await;
    ctx.drain();

    ctx.registry.fail_queries("auth", true);
    ctx.poll().await;

    assert!(ctx.watcher.connection("auth").is_some());
    assert!(ctx.watcher.is_ready());
    assert!(ctx.drain().is_empty());
}

#[tokio::test]
async fn test_dial_failure_is_a_miss_for_the_cycle() {
    let dialer = LazyDialer {
        refused_ports: vec![7001],
    };
    let mut ctx = setup_with(Arc::new(dialer), DiscoveryConfig::default());
    ctx.watcher.set_dependencies(["auth"]).unwrap();
    // only the first instance is tried
    ctx.registry
        .set_instances("auth", vec![instance("auth", 7001), instance("auth", 7002)]);

    ctx.poll().await;
    assert!(ctx.watcher.pool().is_empty());
    assert!(ctx.drain().is_empty());

    ctx.registry.set_instances("auth", vec![instance("auth", 7002)]);
    ctx.poll().await;
    assert_eq!(ctx.drain(), vec![Update::dependency("auth")]);
}

#[tokio::test]
async fn test_dials_only_when_entry_missing() {
    let mut dialer = MockDialer::new();
    dialer
        .expect_dial()
        .withf(|address, port| address == "127.0.0.1" && *port == 7001)
        .times(1)
        .returning(|_, port| Ok(lazy_channel(port)));

    let ctx = setup_with(Arc::new(dialer), DiscoveryConfig::default());
    ctx.watcher.set_dependencies(["auth"]).unwrap();
    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);

    ctx.poll().await;
    ctx.poll().await;
    ctx.poll().await;
    assert!(ctx.watcher.is_ready());
}

#[tokio::test]
async fn test_required_tag_is_forwarded_to_registry() {
    let config = DiscoveryConfig {
        required_tag: Some("core".to_string()),
        ..Default::default()
    };
    let ctx = setup_with(Arc::new(LazyDialer::default()), config);
    ctx.watcher.set_dependencies(["auth"]).unwrap();
    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);

    ctx.poll().await;

    assert_eq!(
        ctx.registry.health_queries(),
        vec![("auth".to_string(), Some("core".to_string()))]
    );
    // untagged instance filtered out
    assert!(ctx.watcher.pool().is_empty());
}

#[tokio::test]
async fn test_dependencies_declared_once_and_deduplicated() {
    let ctx = setup();
    ctx.watcher.set_dependencies(["auth", "users", "auth"]).unwrap();
    assert_eq!(ctx.watcher.dependencies(), ["auth".to_string(), "users".to_string()]);

    let result = ctx.watcher.set_dependencies(["billing"]);
    assert!(matches!(result, Err(Error::DependenciesAlreadyDeclared(ref names)) if names.len() == 2));
    assert_eq!(ctx.watcher.dependencies().len(), 2);
}

#[tokio::test]
async fn test_empty_declaration_is_immediately_ready() {
    let ctx = setup();
    assert!(!ctx.watcher.is_ready());

    ctx.watcher.set_dependencies(Vec::<String>::new()).unwrap();
    assert!(ctx.watcher.is_ready());
    assert!(*ctx.readiness.borrow());
}

#[tokio::test]
async fn test_per_cycle_emission_converges_the_same() {
    let config = DiscoveryConfig {
        readiness_emission: ReadinessEmission::PerCycle,
        ..Default::default()
    };
    let mut ctx = setup_with(Arc::new(LazyDialer::default()), config);
    ctx.watcher.set_dependencies(["auth", "users"]).unwrap();
    ctx.readiness.borrow_and_update();
    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);
    ctx.registry.set_instances("users", vec![instance("users", 7002)]);

    ctx.poll().await;

    assert!(ctx.readiness.has_changed().unwrap());
    assert!(*ctx.readiness.borrow_and_update());
    assert_eq!(ctx.drain().len(), 2);
}

#[tokio::test]
async fn test_cancelled_cycle_publishes_nothing() {
    let mut ctx = setup();
    ctx.watcher.set_dependencies(["auth"]).unwrap();
    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);

    ctx.cancel.cancel();
    ctx.poll().await;

    assert!(ctx.drain().is_empty());
    assert!(ctx.watcher.pool().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_polls_immediately_then_on_interval_until_cancelled() {
    let mut ctx = setup();
    let interval = DiscoveryConfig::default().poll_interval();
    ctx.watcher.set_dependencies(["auth"]).unwrap();
    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);

    let handle = tokio::spawn(ctx.watcher.clone().run(ctx.publisher.clone(), ctx.cancel.clone()));

    let mut readiness = ctx.watcher.readiness();
    tokio::time::timeout(Duration::from_millis(10), readiness.wait_for(|ready| *ready))
        .await
        .expect("first poll runs without waiting an interval")
        .unwrap();
    assert_eq!(ctx.updates.recv().await, Some(Update::dependency("auth")));

    ctx.registry.clear_instances("auth");
    tokio::time::sleep(interval + Duration::from_millis(1)).await;
    assert_eq!(ctx.updates.recv().await, Some(Update::dependency("auth")));

    ctx.cancel.cancel();
    tokio::time::timeout(interval, handle)
        .await
        .expect("watcher exits within one interval")
        .unwrap()
        .unwrap();

    ctx.registry.set_instances("auth", vec![instance("auth", 7001)]);
    tokio::time::sleep(interval * 2).await;
    assert!(ctx.drain().is_empty());
}
