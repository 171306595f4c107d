use std::env;

use serde_json::json;
use serde_json::Map;
use serde_json::Value;
use svc_companion::Result;
use svc_companion::ServiceBuilder;
use tracing::error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Demo settings, read straight from the environment
const NAME_ENV: &str = "SERVICE_NAME";
const DEPENDENCIES_ENV: &str = "SERVICE_DEPENDENCIES";

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();

    let name = env::var(NAME_ENV).unwrap_or_else(|_| "companion-demo".to_string());
    let dependencies: Vec<String> = env::var(DEPENDENCIES_ENV)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|dep| !dep.is_empty())
        .map(String::from)
        .collect();

    let service = ServiceBuilder::new(name.clone()).tags(["demo"]).build().await?;

    service.on_dependency_update(|update| info!(dependency = %update.key, "Dependency changed"));
    service.on_config_update(|update| info!(key = %update.key, "Configuration changed"));

    if !dependencies.is_empty() {
        service.with_dependencies(dependencies)?;
    }

    let mut defaults = Map::new();
    defaults.insert(name.clone(), json!({ "greeting": "hello", "workers": 4 }));
    let config = service.with_config(Value::Object(defaults)).await?;
    info!(
        "Starting with greeting={} workers={}",
        config.get_string(&format!("{}.greeting", name)),
        config.get_int(&format!("{}.workers", name))
    );

    let addr = service.with_server(|router| router)?;
    info!("Application will listen on {}. Waiting for CTRL+C signal...", addr);

    if let Err(e) = service.run().await {
        error!("service stops: {:?}", e);
    }

    println!("Exiting program.");
    Ok(())
}

fn init_observability() {
    let base_subscriber = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();
}
