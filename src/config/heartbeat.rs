use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// TTL check renewal policy
///
/// The TTL announced to the registry is twice the heartbeat interval and the
/// registry drops the instance after twice the TTL without a renewal.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HeartbeatConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Consecutive failed pushes after which the heartbeat loop stops.
    /// `1` stops on the first failure.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl HeartbeatConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "heartbeat.interval_ms must be > 0".into(),
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::Config(ConfigError::Message(
                "heartbeat.max_consecutive_failures must be > 0".into(),
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn ttl(&self) -> Duration {
        self.interval() * 2
    }

    pub fn deregister_after(&self) -> Duration {
        self.ttl() * 2
    }
}

fn default_interval_ms() -> u64 {
    1000
}
fn default_max_consecutive_failures() -> u32 {
    1
}
