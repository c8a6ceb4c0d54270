//! Garbage Collection Task
//!
//! Background task that periodically removes expired items.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::LockerState;

/// Handle to a running garbage collector.
///
/// Dropping the handle cancels the task.
#[derive(Debug)]
pub(crate) struct GcHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl GcHandle {
    /// Cancels the task and waits for it to stop. A sweep in progress is
    /// allowed to finish first.
    pub(crate) async fn shutdown(&mut self) {
        self.token.cancel();
        let _ = (&mut self.handle).await;
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawns a task that sweeps expired items every `interval`.
///
/// Each sweep is awaited before the next tick is taken, and missed ticks
/// are delayed rather than bursted, so sweeps never overlap.
pub(crate) fn spawn_gc_task(state: Arc<LockerState>, interval: Duration) -> GcHandle {
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let handle = tokio::spawn(async move {
        info!(
            parent: state.logger.span(),
            interval_ms = interval.as_millis() as u64,
            "starting garbage collection task"
        );

        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match state.clear_garbage().await {
                Ok(reclaimed) if reclaimed.items > 0 => {
                    info!(
                        parent: state.logger.span(),
                        items = reclaimed.items,
                        bytes = reclaimed.bytes,
                        "garbage collection removed expired items"
                    );
                }
                Ok(_) => {
                    if state.logger.is_debug() {
                        debug!(parent: state.logger.span(), "garbage collection found nothing");
                    }
                }
                Err(e) => {
                    warn!(parent: state.logger.span(), error = %e, "garbage collection failed");
                }
            }
        }

        if state.logger.is_debug() {
            debug!(parent: state.logger.span(), "garbage collection task stopped");
        }
    });

    GcHandle { token, handle }
}
