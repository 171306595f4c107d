//! Shared test components: logger bootstrap, fixtures and an in-memory
//! [`Registry`](crate::Registry) that tests can steer and inspect.
mod common;
mod memory_registry;

pub use common::*;
pub use memory_registry::*;
