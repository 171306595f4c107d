//! Consul agent backend for [`Registry`].
//!
//! Speaks the agent HTTP API directly:
//! - KV reads/writes go through `/v1/kv` using raw values
//! - discovery uses `/v1/health/service` filtered on passing checks
//! - registration attaches a TTL check whose id equals the instance id
//! - key watches are blocking queries driven by `X-Consul-Index`

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Method;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use tonic::async_trait;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::DiscoveredInstance;
use super::Registration;
use super::Registry;
use super::WatchStream;
use crate::constants::CONSUL_INDEX_HEADER;
use crate::constants::CONSUL_TOKEN_HEADER;
use crate::utils::async_task::jittered;
use crate::RegistryConfig;
use crate::RegistryError;
use crate::Result;

/// HTTP client for a Consul agent
#[derive(Clone, Debug)]
pub struct ConsulRegistry {
    http: reqwest::Client,
    base_url: String,
    config: RegistryConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: HealthNode,
    service: AgentService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthNode {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    tags: &'a [String],
    address: &'a str,
    port: u16,
    meta: &'a HashMap<String, String>,
    check: TtlCheck,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TtlCheck {
    #[serde(rename = "CheckID")]
    check_id: String,
    #[serde(rename = "TTL")]
    ttl: String,
    deregister_critical_service_after: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckUpdate<'a> {
    status: &'a str,
    output: &'a str,
}

/// Result of one blocking KV query
#[derive(Debug, PartialEq, Eq)]
enum WatchPoll {
    /// Value written since the last seen index
    Changed(Vec<u8>),
    /// Wait elapsed without change, or the key is gone
    Unchanged,
}

/// Per-stream state of a key watch
struct WatchState {
    registry: ConsulRegistry,
    key: String,
    index: u64,
    retry_delay: Option<Duration>,
}

impl ConsulRegistry {
    /// Builds the client without contacting the agent
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(RegistryError::from)?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            config,
        })
    }

    /// Builds the client and verifies that the agent answers
    ///
    /// # Errors
    /// [`RegistryError::Unreachable`] when the agent cannot be contacted
    pub async fn connect(config: RegistryConfig) -> Result<Self> {
        let registry = Self::new(config)?;
        registry.ping().await?;
        info!("Connected to registry at {}", registry.base_url);
        Ok(registry)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn ping(&self) -> Result<()> {
        let path = "/v1/status/leader";
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|source| RegistryError::Unreachable {
                address: self.base_url.clone(),
                source,
            })?;
        Self::ensure_success(path, response).await?;
        Ok(())
    }

    fn request(
        &self,
        method: Method,
        path: &str,
    ) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, url).timeout(self.config.request_timeout());

        if let Some(ref token) = self.config.token {
            request = request.header(CONSUL_TOKEN_HEADER, token);
        }
        request
    }

    async fn ensure_success(
        path: &str,
        response: Response,
    ) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(Self::status_error(path, response).await)
    }

    async fn status_error(
        path: &str,
        response: Response,
    ) -> crate::Error {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        RegistryError::Status {
            path: path.to_string(),
            status,
            body,
        }
        .into()
    }

    /// One blocking query on `key` starting after `index`.
    ///
    /// Returns the next index to wait on.
    async fn poll_key(
        &self,
        key: &str,
        index: u64,
    ) -> Result<(WatchPoll, u64)> {
        let path = format!("/v1/kv/{}", key);
        let wait = self.config.watch_wait();
        let query = [
            ("index", index.to_string()),
            ("wait", format!("{}s", wait.as_secs())),
        ];

        // Agent adds up to wait/16 of jitter to the hold time
        let timeout = wait + wait / 16 + self.config.request_timeout();
        let response = self
            .request(Method::GET, &path)
            .query(&[("raw", "")])
            .query(&query)
            .timeout(timeout)
            .send()
            .await
            .map_err(RegistryError::from)?;

        let status = response.status();
        if status != StatusCode::NOT_FOUND && !status.is_success() {
            return Err(Self::status_error(&path, response).await);
        }

        let next_index = Self::consul_index(&path, &response)?;

        let next_index = if next_index < index {
            // Index went backwards (agent restart or snapshot restore)
            debug!(key, index, next_index, "Consul index reset");
            0
        } else {
            next_index
        };

        if response.status() == StatusCode::NOT_FOUND {
            trace!(key, "Watched key does not exist");
            return Ok((WatchPoll::Unchanged, next_index));
        }

        if next_index != 0 && next_index == index {
            return Ok((WatchPoll::Unchanged, next_index));
        }

        let body = response.bytes().await.map_err(RegistryError::from)?;
        Ok((WatchPoll::Changed(body.to_vec()), next_index))
    }

    fn consul_index(
        path: &str,
        response: &Response,
    ) -> Result<u64> {
        response
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| {
                RegistryError::InvalidResponse {
                    path: path.to_string(),
                    reason: format!("missing or malformed {} header", CONSUL_INDEX_HEADER),
                }
                .into()
            })
    }

    fn retry_delay(&self) -> Duration {
        jittered(self.config.watch_retry_delay())
    }
}

impl WatchState {
    async fn next(mut self) -> Option<(Result<Vec<u8>>, Self)> {
        loop {
            if let Some(delay) = self.retry_delay.take() {
                tokio::time::sleep(delay).await;
            }

            match self.registry.poll_key(&self.key, self.index).await {
                Ok((WatchPoll::Changed(value), next_index)) => {
                    self.index = next_index;
                    return Some((Ok(value), self));
                }
                Ok((WatchPoll::Unchanged, next_index)) => {
                    self.index = next_index;
                }
                Err(e) => {
                    warn!(key = %self.key, "Blocking query failed: {:?}", e);
                    self.retry_delay = Some(self.registry.retry_delay());
                    return Some((Err(e), self));
                }
            }
        }
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn kv_get(
        &self,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let path = format!("/v1/kv/{}", key);
        let response = self
            .request(Method::GET, &path)
            .query(&[("raw", "")])
            .send()
            .await
            .map_err(RegistryError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::ensure_success(&path, response).await?;
        let body = response.bytes().await.map_err(RegistryError::from)?;
        Ok(Some(body.to_vec()))
    }

    async fn kv_put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        let path = format!("/v1/kv/{}", key);
        let response = self
            .request(Method::PUT, &path)
            .body(value)
            .send()
            .await
            .map_err(RegistryError::from)?;
        let response = Self::ensure_success(&path, response).await?;

        let accepted = response.text().await.map_err(RegistryError::from)?;
        if accepted.trim() != "true" {
            return Err(RegistryError::InvalidResponse {
                path,
                reason: format!("write not accepted: {}", accepted.trim()),
            }
            .into());
        }
        Ok(())
    }

    async fn healthy_instances(
        &self,
        service_name: &str,
        tag: Option<String>,
    ) -> Result<Vec<DiscoveredInstance>> {
        let path = format!("/v1/health/service/{}", service_name);
        let mut request = self.request(Method::GET, &path).query(&[("passing", "true")]);
        if let Some(tag) = tag {
            request = request.query(&[("tag", tag)]);
        }

        let response = request.send().await.map_err(RegistryError::from)?;
        let response = Self::ensure_success(&path, response).await?;
        let entries: Vec<HealthEntry> = response.json().await.map_err(|e| RegistryError::InvalidResponse {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let address = if entry.service.address.is_empty() {
                    entry.node.address
                } else {
                    entry.service.address
                };
                DiscoveredInstance {
                    id: entry.service.id,
                    name: entry.service.service,
                    address,
                    port: entry.service.port,
                    tags: entry.service.tags.unwrap_or_default(),
                    meta: entry.service.meta.unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn register_service(
        &self,
        registration: &Registration,
    ) -> Result<()> {
        let path = "/v1/agent/service/register";
        let record = &registration.record;
        let body = ServiceRegistration {
            id: &registration.id,
            name: &record.name,
            tags: &record.tags,
            address: &record.address,
            port: record.port,
            meta: &record.meta,
            check: TtlCheck {
                check_id: registration.id.clone(),
                ttl: format!("{}ms", registration.ttl.as_millis()),
                deregister_critical_service_after: format!("{}ms", registration.deregister_after.as_millis()),
            },
        };

        let response = self
            .request(Method::PUT, path)
            .json(&body)
            .send()
            .await
            .map_err(RegistryError::from)?;
        Self::ensure_success(path, response).await?;
        Ok(())
    }

    async fn deregister_service(
        &self,
        id: &str,
    ) -> Result<()> {
        let path = format!("/v1/agent/service/deregister/{}", id);
        let response = self
            .request(Method::PUT, &path)
            .send()
            .await
            .map_err(RegistryError::from)?;
        Self::ensure_success(&path, response).await?;
        Ok(())
    }

    async fn update_health_status(
        &self,
        id: &str,
        status: &str,
        note: &str,
    ) -> Result<()> {
        let path = format!("/v1/agent/check/update/{}", id);
        let response = self
            .request(Method::PUT, &path)
            .json(&CheckUpdate { status, output: note })
            .send()
            .await
            .map_err(RegistryError::from)?;
        Self::ensure_success(&path, response).await?;
        Ok(())
    }

    async fn watch_key(
        &self,
        key: &str,
    ) -> Result<WatchStream> {
        let state = WatchState {
            registry: self.clone(),
            key: key.to_string(),
            index: 0,
            retry_delay: None,
        };
        Ok(futures::stream::unfold(state, WatchState::next).boxed())
    }
}
