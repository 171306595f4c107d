// -
// Registry

/// Environment variable selecting the registry endpoint
pub const REGISTRY_ADDRESS_ENV: &str = "SERVICE_DISCOVERY_ADDRESS";

/// Registry endpoint used when no override is present
pub(crate) const DEFAULT_REGISTRY_ADDRESS: &str = "127.0.0.1:8500";

/// Consul blocking-query index header
pub(crate) const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";

/// Consul ACL token header
pub(crate) const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";

// -
// Health statuses understood by TTL checks

pub(crate) const HEALTH_PASSING: &str = "passing";
pub(crate) const HEALTH_WARNING: &str = "warning";
pub(crate) const HEALTH_CRITICAL: &str = "critical";

/// Output attached to every heartbeat push
pub(crate) const HEARTBEAT_NOTE: &str = "running";

// -
// Settings

/// Environment prefix for settings overrides, e.g. `SERVICE__DISCOVERY__POLL_INTERVAL_MS`
pub(crate) const SETTINGS_ENV_PREFIX: &str = "SERVICE";

/// Optional settings file location
pub(crate) const SETTINGS_PATH_ENV: &str = "CONFIG_PATH";
