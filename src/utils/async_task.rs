use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::Instrument;
use tracing::Span;

use crate::Result;

/// Adds up to 50% random jitter on top of `base`
pub(crate) fn jittered(base: Duration) -> Duration {
    let spread = base.as_millis() as u64 / 2;
    if spread == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

/// Spawns a background task inside `span`, logging its error on exit
pub(crate) fn spawn_task<F, Fut>(
    name: &str,
    span: Span,
    task_fn: F,
) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(
        async move {
            if let Err(e) = task_fn().await {
                error!("spawned task: {name} stopped or encountered an error: {:?}", e);
            }
        }
        .instrument(span),
    )
}
