use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tonic_health::ServingStatus;
use tracing::debug;
use tracing::info;

use crate::NetworkError;
use crate::Result;
use crate::TransportConfig;

/// Adds the caller's gRPC services to a router that already carries the
/// standard health service
pub type RouterFn = Box<dyn FnOnce(Router) -> Router + Send + 'static>;

/// gRPC server hosted by the service once it is ready
pub(crate) struct HostedServer {
    pub(crate) addr: SocketAddr,
    router_fn: RouterFn,
    transport: TransportConfig,
}

impl HostedServer {
    pub(crate) fn new(
        addr: SocketAddr,
        router_fn: RouterFn,
        transport: TransportConfig,
    ) -> Self {
        Self {
            addr,
            router_fn,
            transport,
        }
    }

    /// Binds before registration so the advertised address already accepts
    pub(crate) async fn bind(addr: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(addr).await.map_err(|source| {
            NetworkError::Bind {
                address: addr.to_string(),
                source,
            }
            .into()
        })
    }

    /// Serves on `listener` until `shutdown` fires
    pub(crate) async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let (mut health_reporter, health_service) = health_reporter();
        // Empty name reports on the server as a whole
        health_reporter.set_service_status("", ServingStatus::Serving).await;

        let mut server_builder = Server::builder()
            .tcp_keepalive(Some(Duration::from_secs(self.transport.tcp_keepalive_in_secs)))
            .http2_keepalive_interval(Some(Duration::from_secs(
                self.transport.http2_keep_alive_interval_in_secs,
            )))
            .http2_keepalive_timeout(Some(Duration::from_secs(
                self.transport.http2_keep_alive_timeout_in_secs,
            )));

        let router = (self.router_fn)(server_builder.add_service(health_service));

        info!("gRPC server listening on {}", self.addr);
        router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await;
            })
            .await
            .map_err(|e| NetworkError::TonicError(Box::new(e)))?;

        debug!("gRPC server stopped");
        Ok(())
    }
}
