use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// How often readiness is published while reconciling the pool
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessEmission {
    /// After every declared dependency is processed
    #[default]
    PerDependency,
    /// Once per completed poll cycle
    PerCycle,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Interval between two dependency poll cycles
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Only instances carrying this tag are considered
    #[serde(default)]
    pub required_tag: Option<String>,

    #[serde(default)]
    pub readiness_emission: ReadinessEmission,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            required_tag: None,
            readiness_emission: ReadinessEmission::default(),
        }
    }
}

impl DiscoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "discovery.poll_interval_ms must be > 0".into(),
            )));
        }
        if let Some(tag) = &self.required_tag {
            if tag.trim().is_empty() {
                return Err(Error::Config(ConfigError::Message(
                    "discovery.required_tag cannot be blank".into(),
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    5000
}
