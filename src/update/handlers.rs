use std::any::Any;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::error;

use super::Update;
use super::UpdateKind;

/// User callback for one [`UpdateKind`]. Runs on the dispatcher task, so it
/// should return quickly.
pub type UpdateHandler = Box<dyn Fn(&Update) + Send + Sync + 'static>;

/// What happened to one update handed to [`UpdateHandlers::dispatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// No handler registered for the kind
    Dropped,
    /// The handler panicked; the panic was contained and logged
    Panicked,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Delivered => "delivered",
            DispatchOutcome::Dropped => "dropped",
            DispatchOutcome::Panicked => "panicked",
        }
    }
}

/// At most one callback per kind; replaceable at any time
#[derive(Default)]
pub struct UpdateHandlers {
    config: ArcSwapOption<UpdateHandler>,
    dependency: ArcSwapOption<UpdateHandler>,
}

impl UpdateHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(
        &self,
        kind: UpdateKind,
    ) -> &ArcSwapOption<UpdateHandler> {
        match kind {
            UpdateKind::Config => &self.config,
            UpdateKind::Dependency => &self.dependency,
        }
    }

    /// Installs `handler` for `kind`, replacing any previous one
    pub fn set<F>(
        &self,
        kind: UpdateKind,
        handler: F,
    ) where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        let handler: UpdateHandler = Box::new(handler);
        self.slot(kind).store(Some(Arc::new(handler)));
    }

    pub fn clear(
        &self,
        kind: UpdateKind,
    ) {
        self.slot(kind).store(None);
    }

    pub fn is_set(
        &self,
        kind: UpdateKind,
    ) -> bool {
        self.slot(kind).load().is_some()
    }

    /// Runs the handler for `update.kind`. A panicking handler does not
    /// unwind past this call.
    pub fn dispatch(
        &self,
        update: &Update,
    ) -> DispatchOutcome {
        let Some(handler) = self.slot(update.kind).load_full() else {
            return DispatchOutcome::Dropped;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(update))) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(panic_info) => {
                error!(
                    kind = %update.kind,
                    key = %update.key,
                    "Update handler panicked: {}",
                    panic_message(panic_info.as_ref())
                );
                DispatchOutcome::Panicked
            }
        }
    }
}

fn panic_message(panic_info: &(dyn Any + Send)) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for UpdateHandlers {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("UpdateHandlers")
            .field("config", &self.is_set(UpdateKind::Config))
            .field("dependency", &self.is_set(UpdateKind::Dependency))
            .finish()
    }
}
