use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Remote configuration merge and subscription settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConfigSyncConfig {
    /// Also subscribe keys that did not exist remotely and were seeded from
    /// the local template
    #[serde(default)]
    pub watch_seeded_keys: bool,

    /// Pause before a subscription whose watch stream ended is reopened
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,
}

impl Default for ConfigSyncConfig {
    fn default() -> Self {
        Self {
            watch_seeded_keys: false,
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
        }
    }
}

impl ConfigSyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resubscribe_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "config_sync.resubscribe_delay_ms must be > 0".into(),
            )));
        }
        Ok(())
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}

fn default_resubscribe_delay_ms() -> u64 {
    1000
}
