//! Retention loop: evicts terminal chains once the retention window elapses.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ports::{Clock, TaskStore};

/// Periodically prunes terminal chains older than `retention`.
pub struct RetentionLoop {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl RetentionLoop {
    /// Spawn the loop; it ticks every `interval` until [`RetentionLoop::shutdown`].
    pub fn spawn(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let pruned = prune_once(store.as_ref(), clock.as_ref(), retention).await;
                        if pruned > 0 {
                            info!(pruned, "evicted expired chains");
                        }
                    }
                }
            }
            debug!("retention loop stopped");
        });
        Self { token, join }
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

/// One pruning pass. Returns the number of chains evicted.
pub async fn prune_once(store: &dyn TaskStore, clock: &dyn Clock, retention: Duration) -> usize {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let cutoff = clock
        .now()
        .checked_sub_signed(retention)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC);
    store.prune_terminal(cutoff).await
}
