//! Event bus between the producers (dependency watcher, config subscriptions)
//! and the single dispatcher that runs user callbacks.

mod dispatcher;
mod handlers;
pub(crate) use dispatcher::*;
pub use handlers::*;


use std::fmt;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// A remote configuration key changed
    Config,
    /// A dependency gained or lost its pooled connection
    Dependency,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Config => "config",
            UpdateKind::Dependency => "dependency",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change notification; `key` is the dependency name or the top-level
/// configuration key that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub kind: UpdateKind,
    pub key: String,
}

impl Update {
    pub fn config(key: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Config,
            key: key.into(),
        }
    }

    pub fn dependency(key: impl Into<String>) -> Self {
        Self {
            kind: UpdateKind::Dependency,
            key: key.into(),
        }
    }
}

/// Bounded bus: one sender per producer, one receiver for the dispatcher
pub(crate) fn bus(capacity: usize) -> (EventPublisher, mpsc::Receiver<Update>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventPublisher { tx }, rx)
}

/// Producer side of the bus.
///
/// Every producer owns a clone; the bus closes once all clones are dropped.
#[derive(Debug, Clone)]
pub(crate) struct EventPublisher {
    tx: mpsc::Sender<Update>,
}

impl EventPublisher {
    /// Sends `update` unless `cancel` fired, waiting for capacity if the bus
    /// is full. Returns whether the event was enqueued.
    pub(crate) async fn publish(
        &self,
        update: Update,
        cancel: &CancellationToken,
    ) -> bool {
        if cancel.is_cancelled() {
            trace!(?update, "Cancelled, event not published");
            return false;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = self.tx.send(update) => sent.is_ok(),
        }
    }
}
