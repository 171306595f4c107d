//! Service facade tying discovery, remote configuration, registration and
//! the event dispatcher to one process lifecycle.

mod builder;
mod server;
mod service;
pub use builder::*;
pub use server::*;
pub use service::*;
