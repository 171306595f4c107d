use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_REGISTRY_ADDRESS;
use crate::Error;
use crate::Result;

/// Registry (Consul agent) connection settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Agent address, `host:port` or a full `http(s)://` URL
    #[serde(default = "default_address")]
    pub address: String,

    /// ACL token sent with every request
    #[serde(default)]
    pub token: Option<String>,

    /// Timeout for non-blocking registry calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Max time the agent may hold a blocking KV query open
    #[serde(default = "default_watch_wait_secs")]
    pub watch_wait_secs: u64,

    /// Base delay before a failed blocking query is retried (jittered)
    #[serde(default = "default_watch_retry_delay_ms")]
    pub watch_retry_delay_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            token: None,
            request_timeout_ms: default_request_timeout_ms(),
            watch_wait_secs: default_watch_wait_secs(),
            watch_retry_delay_ms: default_watch_retry_delay_ms(),
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message("registry.address cannot be empty".into())));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "registry.request_timeout_ms must be > 0".into(),
            )));
        }
        if self.watch_wait_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "registry.watch_wait_secs must be > 0".into(),
            )));
        }
        Ok(())
    }

    /// Base URL with scheme, without trailing slash
    pub fn base_url(&self) -> String {
        let address = self.address.trim().trim_end_matches('/');
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn watch_wait(&self) -> Duration {
        Duration::from_secs(self.watch_wait_secs)
    }

    pub fn watch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.watch_retry_delay_ms)
    }
}

fn default_address() -> String {
    DEFAULT_REGISTRY_ADDRESS.to_string()
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_watch_wait_secs() -> u64 {
    60
}
fn default_watch_retry_delay_ms() -> u64 {
    1000
}
