//! Self-registration with a TTL health check, renewed by a heartbeat task.

mod registrar;
pub use registrar::*;


use std::fmt;

use crate::constants::HEALTH_CRITICAL;
use crate::constants::HEALTH_PASSING;
use crate::constants::HEALTH_WARNING;

/// Status pushed to a TTL check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Passing => HEALTH_PASSING,
            HealthStatus::Warning => HEALTH_WARNING,
            HealthStatus::Critical => HEALTH_CRITICAL,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
