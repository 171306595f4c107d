use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::warn;

use super::HealthStatus;
use crate::constants::HEARTBEAT_NOTE;
use crate::metrics::HEARTBEAT_FAILURES;
use crate::utils::async_task::spawn_task;
use crate::Error;
use crate::HeartbeatConfig;
use crate::Registration;
use crate::Registry;
use crate::Result;
use crate::ServiceRecord;

/// Length of generated instance ids
const INSTANCE_ID_LEN: usize = 16;

/// Live registration plus its heartbeat task
#[derive(Debug)]
pub struct RegistrationHandle {
    registration: Registration,
    heartbeat: JoinHandle<()>,
}

impl RegistrationHandle {
    pub fn id(&self) -> &str {
        &self.registration.id
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// True once the heartbeat loop gave up or was cancelled
    pub fn heartbeat_stopped(&self) -> bool {
        self.heartbeat.is_finished()
    }

    pub(crate) fn into_heartbeat(self) -> JoinHandle<()> {
        self.heartbeat
    }
}

/// Registers instances and keeps their TTL checks passing
#[derive(Clone)]
pub struct Registrar {
    registry: Arc<dyn Registry>,
    config: HeartbeatConfig,
}

impl Registrar {
    pub fn new(
        registry: Arc<dyn Registry>,
        config: HeartbeatConfig,
    ) -> Self {
        Self { registry, config }
    }

    /// Registers `record` under a fresh instance id and starts the heartbeat.
    ///
    /// # Errors
    /// [`Error::Registration`] when the registry rejects the record
    pub async fn register(
        &self,
        record: ServiceRecord,
        cancel: CancellationToken,
    ) -> Result<RegistrationHandle> {
        let registration = Registration {
            id: nanoid::nanoid!(INSTANCE_ID_LEN),
            ttl: self.config.ttl(),
            deregister_after: self.config.deregister_after(),
            record,
        };

        self.registry
            .register_service(&registration)
            .await
            .map_err(|e| Error::Registration(format!("{} ({}): {}", registration.record.name, registration.id, e)))?;

        info!(
            id = %registration.id,
            "Registered {} at {}:{}", registration.record.name, registration.record.address, registration.record.port
        );

        let registrar = self.clone();
        let id = registration.id.clone();
        let heartbeat = spawn_task(
            "heartbeat",
            info_span!("heartbeat", service = %registration.record.name, id = %registration.id),
            move || registrar.heartbeat(id, cancel),
        );

        Ok(RegistrationHandle { registration, heartbeat })
    }

    /// Removes the registration; the heartbeat should be cancelled first
    pub async fn deregister(
        &self,
        id: &str,
    ) -> Result<()> {
        self.registry.deregister_service(id).await?;
        info!(id, "Deregistered");
        Ok(())
    }

    /// Pushes an explicit status outside of the heartbeat cadence
    pub async fn set_health(
        &self,
        id: &str,
        status: HealthStatus,
        note: &str,
    ) -> Result<()> {
        self.registry.update_health_status(id, status.as_str(), note).await
    }

    async fn heartbeat(
        self,
        id: String,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let pushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                pushed = self.set_health(&id, HealthStatus::Passing, HEARTBEAT_NOTE) => pushed,
            };

            match pushed {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    HEARTBEAT_FAILURES.inc();
                    warn!(failures, "Heartbeat push failed: {:?}", e);

                    if failures >= self.config.max_consecutive_failures {
                        error!("Heartbeat stopped after {} consecutive failures", failures);
                        return Err(e);
                    }
                }
            }
        }

        debug!("Heartbeat cancelled");
        Ok(())
    }
}

impl std::fmt::Debug for Registrar {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Registrar").field("config", &self.config).finish()
    }
}
