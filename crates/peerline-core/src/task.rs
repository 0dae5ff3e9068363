//! Background task helpers.

use tokio::task::JoinHandle;
use tracing::warn;

/// Abort a background task and wait until its future has been dropped,
/// so every resource it owned is released when this returns.
pub(crate) async fn cancel_task(handle: JoinHandle<()>) {
    handle.abort();
    if let Err(e) = handle.await {
        if e.is_panic() {
            warn!(error = %e, "background task panicked");
        }
    }
}
