use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::integrity::engine::{CancellationFlag, ReconciliationEngine, RunOptions};

/// Periodic reconciliation cycle: repair, backfill, verify, then orphan detection.
///
/// Each step runs even if the previous one failed. Errors are logged and the
/// cycle is retried on the next tick. Setting `shutdown` stops the cycle from
/// starting new records and ends the loop.
pub struct ReconciliationScheduler {
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
    shutdown: CancellationFlag,
}

impl ReconciliationScheduler {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        interval: Duration,
        shutdown: CancellationFlag,
    ) -> Self {
        Self {
            engine,
            interval,
            shutdown,
        }
    }

    /// Start the scheduler (runs in background)
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Let the service finish starting before the first pass.
            ticker.tick().await;

            info!(interval_secs = self.interval.as_secs(), "Reconciliation scheduler started");
            loop {
                ticker.tick().await;
                if self.shutdown.is_cancelled() {
                    info!("Reconciliation scheduler stopped");
                    return;
                }
                self.run_cycle().await;
            }
        })
    }

    pub async fn run_cycle(&self) {
        info!("Starting scheduled reconciliation cycle");
        let options = RunOptions {
            cancel: self.shutdown.clone(),
            ..RunOptions::default()
        };

        if let Err(e) = self.engine.repair_invalid_fingerprints(&options).await {
            error!(error = %e, "Scheduled fingerprint repair failed");
        }
        if let Err(e) = self.engine.backfill_missing_registrations(&options).await {
            error!(error = %e, "Scheduled registration backfill failed");
        }
        if let Err(e) = self.engine.verify_all(&options).await {
            error!(error = %e, "Scheduled verification failed");
        }
        if self.shutdown.is_cancelled() {
            info!("Reconciliation cycle interrupted by shutdown");
            return;
        }
        if let Err(e) = self.engine.detect_orphans().await {
            error!(error = %e, "Scheduled orphan detection failed");
        }

        info!("Reconciliation cycle completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::InMemoryLedger;
    use crate::integrity::engine::EngineConfig;
    use crate::integrity::fingerprint::SENTINEL_FINGERPRINT;
    use crate::records::memory::InMemoryRecordStore;
    use crate::records::models::{fixtures, IntegrityStatus};

    #[tokio::test]
    async fn test_cycle_takes_sentinel_record_to_confirmed() {
        let record = fixtures::with_fingerprint(SENTINEL_FINGERPRINT);
        let id = record.id;
        let store = Arc::new(InMemoryRecordStore::with_records(vec![record]));
        let ledger = Arc::new(InMemoryLedger::new());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            ledger.clone(),
            EngineConfig::default(),
        ));

        ReconciliationScheduler::new(engine, Duration::from_secs(60), CancellationFlag::default())
            .run_cycle()
            .await;

        let after = store.snapshot(id).unwrap();
        assert_eq!(after.integrity_status, IntegrityStatus::Confirmed);
        assert_eq!(ledger.total_submits(), 1);
    }

    #[tokio::test]
    async fn test_cycle_survives_unreachable_store() {
        let store = Arc::new(InMemoryRecordStore::new());
        store.set_listing_down(true);
        let ledger = Arc::new(InMemoryLedger::new());
        let engine = Arc::new(ReconciliationEngine::new(
            store,
            ledger.clone(),
            EngineConfig::default(),
        ));

        ReconciliationScheduler::new(engine, Duration::from_secs(60), CancellationFlag::default())
            .run_cycle()
            .await;
        assert_eq!(ledger.total_submits(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_cycle_and_loop() {
        let record = fixtures::with_fingerprint(SENTINEL_FINGERPRINT);
        let id = record.id;
        let store = Arc::new(InMemoryRecordStore::with_records(vec![record]));
        let ledger = Arc::new(InMemoryLedger::new());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            ledger.clone(),
            EngineConfig::default(),
        ));
        let shutdown = CancellationFlag::default();
        shutdown.cancel();

        let scheduler =
            ReconciliationScheduler::new(engine, Duration::from_millis(10), shutdown);
        scheduler.run_cycle().await;
        assert_eq!(ledger.total_submits(), 0);
        assert_eq!(ledger.exists_calls(), 0);
        assert_eq!(
            store.snapshot(id).unwrap().fingerprint.as_deref(),
            Some(SENTINEL_FINGERPRINT)
        );

        let handle = scheduler.start();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler loop should exit after shutdown")
            .unwrap();
    }
}
