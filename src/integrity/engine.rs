use chrono::Utc;
use futures::{future, stream, Future, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::chain::traits::LedgerGateway;
use crate::error::{AppError, AppResult, IntegrityError};
use crate::integrity::classifier::classify;
use crate::integrity::fingerprint::{self, Fingerprint, FingerprintState};
use crate::integrity::summary::{
    DataQualityAlert, Operation, OrphanReport, RecordOutcome, RecordReport,
    ReconciliationSummary,
};
use crate::records::models::{IntegrityStatus, IntegrityUpdate, ServiceRecord};
use crate::records::store::RecordStore;

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Records reconciled concurrently within one pass
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Caller-owned stop signal for a bulk pass.
///
/// Once set, no new record is started; records already in flight finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides `EngineConfig::concurrency` for one pass
    pub concurrency: Option<usize>,
    pub cancel: CancellationFlag,
}

/// Keeps the record store and the fingerprint ledger in agreement.
///
/// Every operation is idempotent and fault-isolated: a failing record is
/// reported in the summary and never aborts the pass. Only a failure to load
/// the candidate set is returned as an error.
pub struct ReconciliationEngine {
    store: Arc<dyn RecordStore>,
    ledger: Arc<dyn LedgerGateway>,
    config: EngineConfig,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<dyn LedgerGateway>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    /// Re-derives the integrity status of every fingerprinted record
    #[instrument(skip(self, options))]
    pub async fn verify_all(&self, options: &RunOptions) -> AppResult<ReconciliationSummary> {
        let records = self.store.list_fingerprinted().await?;
        info!(candidates = records.len(), "Starting verification pass");

        let summary = self
            .run_batch(Operation::VerifyAll, records, options, |record| {
                self.verify_one(record)
            })
            .await;
        log_summary(&summary);
        Ok(summary)
    }

    /// Computes, persists and anchors fingerprints for sentinel records
    #[instrument(skip(self, options))]
    pub async fn repair_invalid_fingerprints(
        &self,
        options: &RunOptions,
    ) -> AppResult<ReconciliationSummary> {
        let records = self.store.list_sentinel().await?;
        info!(candidates = records.len(), "Starting fingerprint repair");

        let summary = self
            .run_batch(Operation::RepairInvalidFingerprints, records, options, |record| {
                self.repair_one(record)
            })
            .await;
        log_summary(&summary);
        Ok(summary)
    }

    /// Submits well-formed fingerprints the ledger has never confirmed.
    /// Records awaiting confirmation of an earlier submission are left alone.
    #[instrument(skip(self, options))]
    pub async fn backfill_missing_registrations(
        &self,
        options: &RunOptions,
    ) -> AppResult<ReconciliationSummary> {
        let records = self.store.list_backfill_candidates().await?;
        info!(candidates = records.len(), "Starting registration backfill");

        let summary = self
            .run_batch(
                Operation::BackfillMissingRegistrations,
                records,
                options,
                |record| self.backfill_one(record),
            )
            .await;
        log_summary(&summary);
        Ok(summary)
    }

    /// Compares the ledger's registration count with local distinct fingerprints.
    /// An unreachable ledger yields a report carrying the error.
    #[instrument(skip(self))]
    pub async fn detect_orphans(&self) -> AppResult<OrphanReport> {
        let local = self.store.count_distinct_fingerprints().await?;

        let report = match self.ledger.stats().await {
            Ok(stats) => OrphanReport::compare(stats.total_registered, stats.verified_count, local),
            Err(e) => {
                warn!(error = %e, "Orphan detection could not read ledger stats");
                return Ok(OrphanReport::ledger_unreachable(local, e.to_string()));
            }
        };

        match report.orphan_count {
            Some(orphans) if orphans > 0 => warn!(
                orphans,
                ledger_total = report.ledger_total_registered,
                local,
                "Ledger holds fingerprints with no local record"
            ),
            _ => info!(local, ledger_total = report.ledger_total_registered, "No orphans detected"),
        }
        if let Some(missing) = report.unregistered_local.filter(|n| *n > 0) {
            warn!(missing, "Local fingerprints not counted by the ledger");
        }

        Ok(report)
    }

    /// Verifies one record, as a verification pass would
    #[instrument(skip(self))]
    pub async fn verify_record(&self, id: Uuid) -> AppResult<RecordReport> {
        let record = self.load(id).await?;
        let outcome = self.verify_one(record).await;
        self.report(id, outcome).await
    }

    /// Fingerprints and anchors one record, checking the ledger before submitting
    #[instrument(skip(self))]
    pub async fn register_record(&self, id: Uuid) -> AppResult<RecordReport> {
        let record = self.load(id).await?;

        let outcome = match FingerprintState::of_record(&record) {
            FingerprintState::Absent | FingerprintState::Sentinel => self.repair_one(record).await,
            FingerprintState::WellFormed(_) if record.is_ledger_confirmed() => {
                RecordOutcome::Skipped {
                    status: record.integrity_status,
                    reason: "already_confirmed",
                }
            }
            FingerprintState::WellFormed(_)
                if record.integrity_status == IntegrityStatus::Submitted =>
            {
                RecordOutcome::Skipped {
                    status: IntegrityStatus::Submitted,
                    reason: "awaiting_confirmation",
                }
            }
            FingerprintState::WellFormed(_) => self.backfill_one(record).await,
            FingerprintState::Malformed(value) => RecordOutcome::failed(
                id,
                IntegrityError::MalformedFingerprint {
                    record_id: id,
                    value,
                },
            ),
        };

        self.report(id, outcome).await
    }

    async fn run_batch<F, Fut>(
        &self,
        operation: Operation,
        records: Vec<ServiceRecord>,
        options: &RunOptions,
        work: F,
    ) -> ReconciliationSummary
    where
        F: FnMut(ServiceRecord) -> Fut,
        Fut: Future<Output = RecordOutcome>,
    {
        let candidates = records.len();
        let concurrency = options.concurrency.unwrap_or(self.config.concurrency).max(1);
        let cancel = &options.cancel;

        let mut summary = ReconciliationSummary::new(operation);
        let mut outcomes = stream::iter(records)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(work)
            .buffer_unordered(concurrency);

        while let Some(outcome) = outcomes.next().await {
            summary.absorb(outcome);
        }

        let summary = summary.finish(candidates);
        if summary.cancelled > 0 {
            warn!(
                operation = operation.as_str(),
                cancelled = summary.cancelled,
                "Pass cancelled before all records were started"
            );
        }
        summary
    }

    async fn verify_one(&self, record: ServiceRecord) -> RecordOutcome {
        let id = record.id;
        self.verify_inner(&record)
            .await
            .unwrap_or_else(|e| record_failed(id, "verify", e))
    }

    async fn repair_one(&self, record: ServiceRecord) -> RecordOutcome {
        let id = record.id;
        self.repair_inner(&record)
            .await
            .unwrap_or_else(|e| record_failed(id, "repair", e))
    }

    async fn backfill_one(&self, record: ServiceRecord) -> RecordOutcome {
        let id = record.id;
        self.backfill_inner(&record)
            .await
            .unwrap_or_else(|e| record_failed(id, "backfill", e))
    }

    async fn verify_inner(&self, record: &ServiceRecord) -> Result<RecordOutcome, IntegrityError> {
        let (exists, alert) = match FingerprintState::of_record(record) {
            FingerprintState::Absent | FingerprintState::Sentinel => (false, None),
            FingerprintState::Malformed(value) => {
                warn!(
                    record_id = %record.id,
                    fingerprint = %value,
                    "Malformed fingerprint on record"
                );
                (false, Some(DataQualityAlert::MalformedFingerprint))
            }
            FingerprintState::WellFormed(fingerprint) => {
                let exists = self.ledger.exists(&fingerprint).await?;
                (exists, content_mismatch(record, &fingerprint))
            }
        };

        let status = classify(record, exists);
        let confirmed_at = if exists {
            record.ledger_confirmed_at.or_else(|| Some(Utc::now()))
        } else {
            None
        };

        if status != record.integrity_status || confirmed_at != record.ledger_confirmed_at {
            let update = IntegrityUpdate::status(status, confirmed_at);
            if !self.write(record, record.integrity_revision, &update).await? {
                return Ok(RecordOutcome::Conflict);
            }
            debug!(record_id = %record.id, from = %record.integrity_status, to = %status, "Integrity status changed");
        }

        Ok(RecordOutcome::Updated { status, alert })
    }

    async fn repair_inner(&self, record: &ServiceRecord) -> Result<RecordOutcome, IntegrityError> {
        if record.workflow_status.is_closed_unsuccessfully() {
            let status = classify(record, false);
            if status != record.integrity_status {
                let update = IntegrityUpdate::status(status, None);
                if !self.write(record, record.integrity_revision, &update).await? {
                    return Ok(RecordOutcome::Conflict);
                }
            }
            return Ok(RecordOutcome::Skipped {
                status,
                reason: "workflow_closed",
            });
        }

        let fingerprint = fingerprint::compute(record)?;
        let update = IntegrityUpdate::status(IntegrityStatus::Pending, None)
            .with_fingerprint(fingerprint.as_str());
        if !self.write(record, record.integrity_revision, &update).await? {
            return Ok(RecordOutcome::Conflict);
        }
        debug!(record_id = %record.id, fingerprint = %fingerprint, "Fingerprint persisted");

        self.anchor(record, record.integrity_revision + 1, &fingerprint)
            .await
    }

    async fn backfill_inner(&self, record: &ServiceRecord) -> Result<RecordOutcome, IntegrityError> {
        match FingerprintState::of_record(record) {
            FingerprintState::WellFormed(fingerprint) => {
                self.anchor(record, record.integrity_revision, &fingerprint)
                    .await
            }
            _ => Ok(RecordOutcome::Skipped {
                status: record.integrity_status,
                reason: "not_well_formed",
            }),
        }
    }

    /// Check-before-submit. A fingerprint already on the ledger is confirmed
    /// without a second submission.
    async fn anchor(
        &self,
        record: &ServiceRecord,
        revision: i64,
        fingerprint: &Fingerprint,
    ) -> Result<RecordOutcome, IntegrityError> {
        if self.ledger.exists(fingerprint).await? {
            return self.confirm_registered(record, revision).await;
        }

        let Some(transaction_ref) = self.ledger.submit(fingerprint).await?.transaction_ref else {
            info!(
                record_id = %record.id,
                fingerprint = %fingerprint,
                "Submission unacknowledged but fingerprint is registered"
            );
            return self.confirm_registered(record, revision).await;
        };
        info!(
            record_id = %record.id,
            fingerprint = %fingerprint,
            tx = %transaction_ref,
            "Fingerprint submitted to ledger"
        );

        let update = IntegrityUpdate::status(IntegrityStatus::Submitted, None)
            .with_tx_ref(transaction_ref.clone());
        if !self.write(record, revision, &update).await? {
            warn!(
                record_id = %record.id,
                tx = %transaction_ref,
                "Submission accepted but status write lost to a concurrent writer"
            );
            return Ok(RecordOutcome::Conflict);
        }

        Ok(RecordOutcome::Submitted { transaction_ref })
    }

    async fn confirm_registered(
        &self,
        record: &ServiceRecord,
        revision: i64,
    ) -> Result<RecordOutcome, IntegrityError> {
        let update = IntegrityUpdate::status(IntegrityStatus::Confirmed, Some(Utc::now()));
        if !self.write(record, revision, &update).await? {
            return Ok(RecordOutcome::Conflict);
        }
        Ok(RecordOutcome::Skipped {
            status: IntegrityStatus::Confirmed,
            reason: "already_registered",
        })
    }

    async fn write(
        &self,
        record: &ServiceRecord,
        revision: i64,
        update: &IntegrityUpdate,
    ) -> Result<bool, IntegrityError> {
        let written = self
            .store
            .update_integrity(record.id, revision, update)
            .await
            .map_err(IntegrityError::store)?;
        if !written {
            debug!(record_id = %record.id, revision, "Compare-and-set missed");
        }
        Ok(written)
    }

    async fn load(&self, id: Uuid) -> AppResult<ServiceRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("service record {}", id)))
    }

    async fn report(&self, id: Uuid, outcome: RecordOutcome) -> AppResult<RecordReport> {
        let record = self.load(id).await?;
        Ok(RecordReport {
            record_id: id,
            outcome,
            integrity_status: record.integrity_status,
            fingerprint: record.fingerprint,
            ledger_confirmed_at: record.ledger_confirmed_at,
            ledger_tx_ref: record.ledger_tx_ref,
        })
    }
}

fn content_mismatch(record: &ServiceRecord, stored: &Fingerprint) -> Option<DataQualityAlert> {
    match fingerprint::compute(record) {
        Ok(current) if &current != stored => {
            warn!(
                record_id = %record.id,
                stored = %stored,
                current = %current,
                "Record content no longer matches its fingerprint"
            );
            Some(DataQualityAlert::ContentMismatch)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(record_id = %record.id, error = %e, "Could not recompute fingerprint");
            None
        }
    }
}

fn record_failed(id: Uuid, step: &'static str, error: IntegrityError) -> RecordOutcome {
    warn!(record_id = %id, step, kind = error.kind(), error = %error, "Record reconciliation failed");
    RecordOutcome::failed(id, error)
}

fn log_summary(summary: &ReconciliationSummary) {
    info!(
        operation = summary.operation.as_str(),
        processed = summary.processed,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        conflicts = summary.conflicts,
        cancelled = summary.cancelled,
        content_mismatches = summary.content_mismatches,
        malformed = summary.malformed_fingerprints,
        "Reconciliation pass finished"
    );
}
