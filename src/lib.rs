//! Runtime companion for networked service instances.
//!
//! A [`Service`] keeps live gRPC connections to the dependencies it declares,
//! merges its default configuration into the registry's key/value store and
//! follows remote changes, registers itself with a TTL health check, and
//! delivers [`Update`] events to user callbacks on a single dispatcher task.
//!
//! ```no_run
//! use serde_json::json;
//! use svc_companion::ServiceBuilder;
//!
//! # async fn demo() -> svc_companion::Result<()> {
//! let service = ServiceBuilder::new("billing").tags(["core"]).build().await?;
//! service.with_dependencies(["auth", "users"])?;
//! let config = service.with_config(json!({"billing": {"timeout": 30}})).await?;
//! service.on_config_update(|update| println!("{} changed", update.key));
//! service.with_server(|router| router)?;
//!
//! println!("timeout = {}", config.get_int("billing.timeout"));
//! service.run().await
//! # }
//! ```

mod config;
mod discovery;
mod errors;
mod network;
mod registration;
mod registry;
mod remote_config;
mod service;
mod update;

pub mod constants;
pub mod metrics;
pub(crate) mod utils;

pub use self::config::*;
pub use discovery::*;
pub use errors::*;
pub use network::*;
pub use registration::*;
pub use registry::*;
pub use remote_config::*;
pub use service::*;
pub use update::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
