use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Low-level parameters for channels opened to discovered dependencies
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportConfig {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// gRPC request completion timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_in_secs: u64,

    #[serde(default = "default_h2_keep_alive_interval")]
    pub http2_keep_alive_interval_in_secs: u64,

    #[serde(default = "default_h2_keep_alive_timeout")]
    pub http2_keep_alive_timeout_in_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: default_request_timeout(),
            tcp_keepalive_in_secs: default_tcp_keepalive(),
            http2_keep_alive_interval_in_secs: default_h2_keep_alive_interval(),
            http2_keep_alive_timeout_in_secs: default_h2_keep_alive_timeout(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "transport.connect_timeout_in_ms must be > 0".into(),
            )));
        }

        if self.request_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "transport.request_timeout_in_ms must be > 0".into(),
            )));
        }

        if self.http2_keep_alive_timeout_in_secs >= self.http2_keep_alive_interval_in_secs {
            return Err(Error::Config(ConfigError::Message(format!(
                "http2_keep_alive_timeout {}s must be less than http2_keep_alive_interval {}s",
                self.http2_keep_alive_timeout_in_secs, self.http2_keep_alive_interval_in_secs
            ))));
        }
        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    1000
}
fn default_request_timeout() -> u64 {
    3000
}
fn default_tcp_keepalive() -> u64 {
    300
}
fn default_h2_keep_alive_interval() -> u64 {
    60
}
fn default_h2_keep_alive_timeout() -> u64 {
    20
}
