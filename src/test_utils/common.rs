use std::future::Future;
use std::time::Duration;

use tonic::async_trait;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tracing_subscriber::EnvFilter;

use crate::DiscoveredInstance;
use crate::Dialer;
use crate::NetworkError;
use crate::Result;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
    println!("setup logger for unit test.");
}

pub fn instance(
    name: &str,
    port: u16,
) -> DiscoveredInstance {
    DiscoveredInstance {
        id: format!("{}-{}", name, port),
        name: name.to_string(),
        address: "127.0.0.1".to_string(),
        port,
        tags: vec![],
        meta: Default::default(),
    }
}

/// Channel that never connects until first used
pub fn lazy_channel(port: u16) -> Channel {
    Endpoint::from_shared(format!("http://127.0.0.1:{}", port))
        .expect("valid uri")
        .connect_lazy()
}

/// Dialer that hands out lazy channels, failing for the given ports
#[derive(Debug, Default, Clone)]
pub struct LazyDialer {
    pub refused_ports: Vec<u16>,
}

#[async_trait]
impl Dialer for LazyDialer {
    async fn dial(
        &self,
        address: &str,
        port: u16,
    ) -> Result<Channel> {
        if self.refused_ports.contains(&port) {
            return Err(NetworkError::InvalidURI(format!("{}:{} refused", address, port)).into());
        }
        Ok(lazy_channel(port))
    }
}

/// Polls `condition` every 10ms until it holds, panicking after `timeout`
pub async fn wait_until<F, Fut>(
    timeout: Duration,
    mut condition: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
