//! Prometheus instrumentation.
//!
//! Collectors live in a crate-local [`REGISTRY`]; the optional scrape server
//! exposes it together with the default registry on `/metrics`.

use std::net::Ipv4Addr;
use std::net::SocketAddr;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

use crate::Error;
use crate::Result;

lazy_static! {
    /// Pool transitions, labelled by dependency and `added` / `removed`
    pub static ref DEPENDENCY_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("dependency_events", "Dependency pool transitions"),
        &["dependency", "change"]
    )
    .expect("metric can not be created");

    pub static ref CONFIG_UPDATES: IntCounterVec = IntCounterVec::new(
        Opts::new("config_updates", "Remote configuration changes applied"),
        &["key"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY_QUERY_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("registry_query_failures", "Failed registry calls in background tasks"),
        &["operation"]
    )
    .expect("metric can not be created");

    pub static ref HEARTBEAT_FAILURES: IntCounter =
        IntCounter::new("heartbeat_failures", "Failed TTL check renewals")
            .expect("metric can not be created");

    pub static ref DISPATCHED_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("dispatched_events", "Update events taken off the bus"),
        &["kind", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref POOL_SIZE: IntGauge =
        IntGauge::new("connection_pool_size", "Dependencies with an open connection")
            .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(DEPENDENCY_EVENTS.clone()),
        Box::new(CONFIG_UPDATES.clone()),
        Box::new(REGISTRY_QUERY_FAILURES.clone()),
        Box::new(HEARTBEAT_FAILURES.clone()),
        Box::new(DISPATCHED_EVENTS.clone()),
        Box::new(POOL_SIZE.clone()),
    ];
    for collector in collectors {
        // AlreadyReg on a second server start is harmless
        if let Err(e) = registry.register(collector) {
            warn!("collector not registered: {}", e);
        }
    }
}

/// Serves `/metrics` on `port` until `shutdown` fires
pub async fn start_server(
    port: u16,
    shutdown: CancellationToken,
) -> Result<()> {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let (bound, server) = warp::serve(metrics_route)
        .try_bind_with_graceful_shutdown(addr, async move { shutdown.cancelled().await })
        .map_err(|e| Error::Initialization(format!("metrics server bind {}: {}", addr, e)))?;

    info!("Metrics server listening on {}", bound);
    server.await;
    Ok(())
}

async fn metrics_handler() -> std::result::Result<impl Reply, Rejection> {
    Ok(gather_text())
}

/// Text exposition of the crate registry followed by the default one
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut res = encode(&encoder, &REGISTRY.gather());
    res.push_str(&encode(&encoder, &prometheus::gather()));
    res
}

fn encode(
    encoder: &TextEncoder,
    families: &[prometheus::proto::MetricFamily],
) -> String {
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(families, &mut buffer) {
        warn!("could not encode metrics: {}", e);
        return String::default();
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        warn!("metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}
