//! Transport seam between the watcher and discovered dependencies.
//!
//! [`Dialer`] opens a channel to one discovered instance; [`ConnectionPool`]
//! keeps at most one open channel per dependency name.

mod dialer;
mod pool;
pub use dialer::*;
pub use pool::*;
