//! Background drain of the propagation outbox.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::propagation::{RelationshipPropagator, SettleReport};

/// Polls the outbox and applies due relationship changes.
///
/// Picks up everything inline settlement left behind: timeouts, oracle
/// outages, and jobs committed by a process that died before settling.
/// Applied jobs past their retention are pruned every `prune_interval`.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    propagator: RelationshipPropagator,
    poll_interval: Duration,
    prune_interval: Duration,
}

const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

impl Dispatcher {
    pub fn new(propagator: RelationshipPropagator) -> Self {
        let poll_interval = propagator.config().poll_interval();
        Self {
            propagator,
            poll_interval,
            prune_interval: DEFAULT_PRUNE_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    /// Delete applied jobs older than the retention window.
    pub fn prune(&self) -> Result<usize> {
        self.propagator.prune_done()
    }

    /// One pass: claim a batch of due jobs and apply them.
    pub async fn run_once(&self) -> Result<SettleReport> {
        let report = self.propagator.apply_jobs(None).await?;
        if report.claimed() > 0 {
            debug!(
                applied = report.applied,
                retried = report.retried,
                failed = report.failed,
                skipped = report.skipped,
                "Dispatcher pass complete"
            );
        }
        Ok(report)
    }

    /// Loop until `cancel` fires. A full batch is followed immediately by
    /// another pass; otherwise the dispatcher sleeps for the poll interval.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Outbox dispatcher started"
        );
        let batch = self.propagator.config().batch_size;
        let mut last_prune: Option<Instant> = None;
        loop {
            if last_prune.is_none_or(|at| at.elapsed() >= self.prune_interval) {
                if let Err(e) = self.prune() {
                    warn!(error = %e, "Outbox prune failed");
                }
                last_prune = Some(Instant::now());
            }
            let busy = match self.run_once().await {
                Ok(report) => report.claimed() >= batch,
                Err(e) => {
                    warn!(error = %e, "Outbox dispatcher pass failed");
                    false
                }
            };
            if busy {
                if cancel.is_cancelled() {
                    break;
                }
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("Outbox dispatcher stopped");
    }

    /// Run on the tokio runtime until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use quire_authz::InMemoryOracle;
    use quire_config::PropagationConfig;
    use quire_store::{Repositories, SqliteStore};

    fn dispatcher() -> Dispatcher {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let propagator = RelationshipPropagator::new(
            store,
            Arc::new(InMemoryOracle::new()),
            PropagationConfig::default(),
        );
        Dispatcher::new(propagator).with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_run_once_on_empty_outbox() {
        let report = dispatcher().run_once().await.unwrap();
        assert_eq!(report, SettleReport::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let handle = dispatcher().spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher stops")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_prunes_applied_jobs_past_retention() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let config = PropagationConfig {
            done_retention_secs: 60,
            ..PropagationConfig::default()
        };
        let propagator =
            RelationshipPropagator::new(store.clone(), Arc::new(InMemoryOracle::new()), config);
        let old = quire_types::now() - chrono::Duration::hours(1);
        let (stale, fresh) = store
            .run_in_transaction("seed", |tx| -> quire_store::Result<_> {
                let change = crate::propagation::RelationshipChange::RemoveEntryRelations {
                    entry_id: quire_types::EntryId::new(),
                };
                let stale = tx.outbox().enqueue(&change, old)?;
                let fresh = tx.outbox().enqueue(&change, old)?;
                tx.outbox().mark_done(stale, old)?;
                tx.outbox().mark_done(fresh, quire_types::now())?;
                Ok((stale, fresh))
            })
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = Dispatcher::new(propagator)
            .with_poll_interval(Duration::from_millis(5))
            .spawn(cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(store.read(|c| c.outbox().find_by_id(stale)).unwrap().is_none());
        assert!(store.read(|c| c.outbox().find_by_id(fresh)).unwrap().is_some());
        assert_eq!(store.read(|c| c.outbox().counts()).unwrap().done, 1);
    }
}
