//! Settings for the service companion.
//!
//! Provides hierarchical loading with the following priority (later wins):
//! 1. Type defaults
//! 2. Settings file named by `CONFIG_PATH` (if set)
//! 3. Environment variables with `SERVICE__` prefix, `__` as separator
//! 4. `SERVICE_DISCOVERY_ADDRESS` for the registry endpoint
//!
//! Loading does not validate; call [`ServiceConfig::validate`] once every
//! override has been applied.

mod discovery;
mod heartbeat;
mod monitoring;
mod registry;
mod sync;
mod transport;
pub use discovery::*;
pub use heartbeat::*;
pub use monitoring::*;
pub use registry::*;
pub use sync::*;
pub use transport::*;


use std::env;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::REGISTRY_ADDRESS_ENV;
use crate::constants::SETTINGS_ENV_PREFIX;
use crate::constants::SETTINGS_PATH_ENV;
use crate::Error;
use crate::Result;

/// Main settings container, one section per collaborator.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ServiceConfig {
    /// Registry endpoint and request tuning
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Dependency polling
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Remote configuration merge and subscriptions
    #[serde(default)]
    pub config_sync: ConfigSyncConfig,
    /// TTL check renewal
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Dialing discovered dependencies
    #[serde(default)]
    pub transport: TransportConfig,
    /// Update event bus
    #[serde(default)]
    pub bus: BusConfig,
    /// Metrics exposition
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Update event bus sizing
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
    /// Max number of undelivered updates before producers wait
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}
impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}
fn default_bus_capacity() -> usize {
    128
}

impl ServiceConfig {
    /// Loads settings from hierarchical sources without validation.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(SETTINGS_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(SETTINGS_ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let mut config: Self = builder.build()?.try_deserialize()?;
        config.apply_address_override();
        Ok(config)
    }

    /// Applies an extra settings file on top of the current values.
    ///
    /// Environment variables keep the highest priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let mut config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(SETTINGS_ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.apply_address_override();
        Ok(config)
    }

    /// Validates every section
    pub fn validate(&self) -> Result<()> {
        self.registry.validate()?;
        self.discovery.validate()?;
        self.config_sync.validate()?;
        self.heartbeat.validate()?;
        self.transport.validate()?;
        self.monitoring.validate()?;

        if self.bus.capacity == 0 {
            return Err(Error::Config(ConfigError::Message("bus.capacity must be > 0".into())));
        }
        Ok(())
    }

    fn apply_address_override(&mut self) {
        if let Ok(address) = env::var(REGISTRY_ADDRESS_ENV) {
            if !address.trim().is_empty() {
                self.registry.address = address.trim().to_string();
            }
        }
    }
}
