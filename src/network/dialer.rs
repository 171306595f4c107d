use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tracing::debug;

use crate::utils::net::address_str;
use crate::NetworkError;
use crate::Result;
use crate::TransportConfig;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Opens a connection to `address:port`
    async fn dial(
        &self,
        address: &str,
        port: u16,
    ) -> Result<Channel>;
}

/// Eager gRPC dialer: a channel is only handed out once the TCP/HTTP2
/// handshake succeeded.
#[derive(Debug, Clone, Default)]
pub struct GrpcDialer {
    config: TransportConfig,
}

impl GrpcDialer {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    /// Pre-configured endpoint for `address:port`
    pub(crate) fn endpoint(
        &self,
        address: &str,
        port: u16,
    ) -> Result<Endpoint> {
        let uri = address_str(&format!("{}:{}", address, port));
        let endpoint = Endpoint::try_from(uri.clone()).map_err(|_| NetworkError::InvalidURI(uri))?;

        Ok(endpoint
            .connect_timeout(Duration::from_millis(self.config.connect_timeout_in_ms))
            .timeout(Duration::from_millis(self.config.request_timeout_in_ms))
            .tcp_keepalive(Some(Duration::from_secs(self.config.tcp_keepalive_in_secs)))
            .http2_keep_alive_interval(Duration::from_secs(self.config.http2_keep_alive_interval_in_secs))
            .keep_alive_timeout(Duration::from_secs(self.config.http2_keep_alive_timeout_in_secs)))
    }
}

#[async_trait]
impl Dialer for GrpcDialer {
    async fn dial(
        &self,
        address: &str,
        port: u16,
    ) -> Result<Channel> {
        debug!("dial, addr = {}:{}", address, port);
        self.endpoint(address, port)?.connect().await.map_err(|e| {
            NetworkError::ConnectError {
                address: format!("{}:{}", address, port),
                source: Box::new(e),
            }
            .into()
        })
    }
}
