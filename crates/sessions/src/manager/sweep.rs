use std::sync::Weak;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{Inner, RetireReason};
use crate::store::SessionEntry;

/// What a single health sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub evicted: Vec<String>,
    pub pruned_recency: usize,
}

pub(super) async fn run_sweeper(inner: Weak<Inner>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let report = inner.sweep().await;
        if !report.evicted.is_empty() || report.pruned_recency > 0 {
            tracing::info!(
                evicted = report.evicted.len(),
                pruned_recency = report.pruned_recency,
                "health sweep"
            );
        }
    }
    tracing::debug!("health sweeper stopped");
}

impl Inner {
    /// Evict every session idle for longer than the staleness window and
    /// drop orphaned recency slots.
    pub(super) async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let (stale, pruned_recency) = {
            let mut store = self.store.lock();
            let stale: Vec<SessionEntry> = store
                .stale_keys(now, self.config.staleness())
                .into_iter()
                .filter_map(|(key, instance)| store.remove_instance(&key, instance))
                .collect();
            (stale, store.prune_recency())
        };

        let mut evicted = Vec::with_capacity(stale.len());
        for entry in stale {
            self.forget_markers(&entry.session_key);
            evicted.push(entry.session_key.clone());
            self.retire(entry, RetireReason::Idle).await;
        }
        SweepReport {
            evicted,
            pruned_recency,
        }
    }
}
