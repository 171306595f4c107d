//! Remote configuration.
//!
//! Local defaults are merged into the registry KV store once at startup (new
//! keys only, remote values always win), then each key is kept current by a
//! blocking watch feeding the in-memory [`ConfigStore`].

mod merge;
mod store;
mod synchronizer;
pub use store::*;
pub(crate) use synchronizer::*;

#[cfg(test)]
mod store_test;
