use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::DispatchOutcome;
use super::Update;
use super::UpdateHandlers;
use crate::metrics::DISPATCHED_EVENTS;
use crate::Result;

/// Single consumer of the event bus
pub(crate) struct Dispatcher {
    rx: mpsc::Receiver<Update>,
    handlers: Arc<UpdateHandlers>,
    readiness: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        rx: mpsc::Receiver<Update>,
        handlers: Arc<UpdateHandlers>,
        readiness: watch::Receiver<bool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            handlers,
            readiness,
            cancel,
        }
    }

    /// Delivers events in publish order until cancelled, then discards
    /// whatever still arrives until every producer has dropped its sender.
    pub(crate) async fn run(mut self) -> Result<()> {
        let mut readiness_open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Dispatcher cancelled");
                    break;
                }
                changed = self.readiness.changed(), if readiness_open => {
                    match changed {
                        Ok(()) => {
                            let ready = *self.readiness.borrow_and_update();
                            info!(ready, "Readiness changed");
                        }
                        Err(_) => readiness_open = false,
                    }
                }
                update = self.rx.recv() => match update {
                    Some(update) => self.deliver(&update),
                    None => {
                        debug!("Event bus closed");
                        return Ok(());
                    }
                }
            }
        }

        let mut discarded = 0usize;
        while let Some(update) = self.rx.recv().await {
            trace!(?update, "Discarding event after cancellation");
            DISPATCHED_EVENTS
                .with_label_values(&[update.kind.as_str(), "discarded"])
                .inc();
            discarded += 1;
        }
        debug!(discarded, "Event bus drained");
        Ok(())
    }

    fn deliver(
        &self,
        update: &Update,
    ) {
        let outcome = self.handlers.dispatch(update);
        if outcome == DispatchOutcome::Dropped {
            trace!(?update, "No handler registered");
        }
        DISPATCHED_EVENTS
            .with_label_values(&[update.kind.as_str(), outcome.as_str()])
            .inc();
    }
}
