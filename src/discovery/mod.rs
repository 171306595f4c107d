//! Dependency discovery.
//!
//! [`DependencyWatcher`] keeps one pooled connection per declared dependency
//! and publishes readiness; [`Finder`] answers ad-hoc lookups.

mod finder;
mod watcher;
pub use finder::*;
pub use watcher::*;

#[cfg(test)]
mod watcher_test;
