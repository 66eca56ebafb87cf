use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::IntegrityError;
use crate::records::models::IntegrityStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    VerifyAll,
    RepairInvalidFingerprints,
    BackfillMissingRegistrations,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::VerifyAll => "verify_all",
            Operation::RepairInvalidFingerprints => "repair_invalid_fingerprints",
            Operation::BackfillMissingRegistrations => "backfill_missing_registrations",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityAlert {
    /// Stored fingerprint is neither a digest nor the sentinel
    MalformedFingerprint,
    /// Content no longer hashes to the stored fingerprint
    ContentMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub record_id: Uuid,
    pub error_kind: String,
    pub message: String,
}

impl RecordFailure {
    pub fn new(record_id: Uuid, error: &IntegrityError) -> Self {
        Self {
            record_id,
            error_kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result of reconciling one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordOutcome {
    Updated {
        status: IntegrityStatus,
        alert: Option<DataQualityAlert>,
    },
    Submitted {
        transaction_ref: String,
    },
    /// No ledger write was needed
    Skipped {
        status: IntegrityStatus,
        reason: &'static str,
    },
    /// Lost the compare-and-set to another writer
    Conflict,
    Failed(RecordFailure),
}

impl RecordOutcome {
    pub fn failed(record_id: Uuid, error: IntegrityError) -> Self {
        RecordOutcome::Failed(RecordFailure::new(record_id, &error))
    }

    /// Integrity status this outcome left on the record, if any
    pub fn status(&self) -> Option<IntegrityStatus> {
        match self {
            RecordOutcome::Updated { status, .. } | RecordOutcome::Skipped { status, .. } => {
                Some(*status)
            }
            RecordOutcome::Submitted { .. } => Some(IntegrityStatus::Submitted),
            RecordOutcome::Conflict | RecordOutcome::Failed(_) => None,
        }
    }
}

/// Aggregate of one bulk reconciliation pass.
///
/// `processed = succeeded + skipped + conflicts + failed`. Records never
/// started because the pass was cancelled are counted in `cancelled` only.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationSummary {
    pub operation: Operation,
    pub processed: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub conflicts: u64,
    pub cancelled: u64,
    pub content_mismatches: u64,
    pub malformed_fingerprints: u64,
    pub by_status: BTreeMap<IntegrityStatus, u64>,
    pub failures: Vec<RecordFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReconciliationSummary {
    pub fn new(operation: Operation) -> Self {
        let now = Utc::now();
        Self {
            operation,
            processed: 0,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            conflicts: 0,
            cancelled: 0,
            content_mismatches: 0,
            malformed_fingerprints: 0,
            by_status: BTreeMap::new(),
            failures: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn absorb(&mut self, outcome: RecordOutcome) {
        self.processed += 1;
        if let Some(status) = outcome.status() {
            *self.by_status.entry(status).or_insert(0) += 1;
        }

        match outcome {
            RecordOutcome::Updated { alert, .. } => {
                self.succeeded += 1;
                match alert {
                    Some(DataQualityAlert::ContentMismatch) => self.content_mismatches += 1,
                    Some(DataQualityAlert::MalformedFingerprint) => {
                        self.malformed_fingerprints += 1
                    }
                    None => {}
                }
            }
            RecordOutcome::Submitted { .. } => self.succeeded += 1,
            RecordOutcome::Skipped { .. } => self.skipped += 1,
            RecordOutcome::Conflict => self.conflicts += 1,
            RecordOutcome::Failed(failure) => {
                self.failed += 1;
                self.failures.push(failure);
            }
        }
    }

    /// Closes the pass over `candidates` records
    pub fn finish(mut self, candidates: usize) -> Self {
        self.cancelled = (candidates as u64).saturating_sub(self.processed);
        self.finished_at = Utc::now();
        self
    }
}

/// Ledger-wide count comparison. Detection only: orphans are never enumerated.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanReport {
    pub ledger_total_registered: Option<u64>,
    pub ledger_verified_count: Option<u64>,
    pub local_distinct_fingerprints: u64,
    /// Ledger fingerprints with no local record
    pub orphan_count: Option<u64>,
    /// Local fingerprints the ledger does not count
    pub unregistered_local: Option<u64>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl OrphanReport {
    pub fn compare(ledger_total: u64, verified: u64, local: u64) -> Self {
        Self {
            ledger_total_registered: Some(ledger_total),
            ledger_verified_count: Some(verified),
            local_distinct_fingerprints: local,
            orphan_count: Some(ledger_total.saturating_sub(local)),
            unregistered_local: Some(local.saturating_sub(ledger_total)),
            error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn ledger_unreachable(local: u64, error: String) -> Self {
        Self {
            ledger_total_registered: None,
            ledger_verified_count: None,
            local_distinct_fingerprints: local,
            orphan_count: None,
            unregistered_local: None,
            error: Some(error),
            checked_at: Utc::now(),
        }
    }
}

/// Single-record reconciliation result with the record's state afterwards
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub record_id: Uuid,
    pub outcome: RecordOutcome,
    pub integrity_status: IntegrityStatus,
    pub fingerprint: Option<String>,
    pub ledger_confirmed_at: Option<DateTime<Utc>>,
    pub ledger_tx_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;

    #[test]
    fn test_summary_counts_add_up() {
        let mut summary = ReconciliationSummary::new(Operation::VerifyAll);
        summary.absorb(RecordOutcome::Updated {
            status: IntegrityStatus::Confirmed,
            alert: None,
        });
        summary.absorb(RecordOutcome::Updated {
            status: IntegrityStatus::Failed,
            alert: Some(DataQualityAlert::MalformedFingerprint),
        });
        summary.absorb(RecordOutcome::Conflict);
        summary.absorb(RecordOutcome::failed(
            Uuid::new_v4(),
            IntegrityError::Ledger(LedgerError::Timeout("slow".into())),
        ));

        let summary = summary.finish(6);
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.conflicts, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cancelled, 2);
        assert_eq!(summary.malformed_fingerprints, 1);
        assert_eq!(summary.failures[0].error_kind, "ledger_timeout");
        assert_eq!(summary.by_status.get(&IntegrityStatus::Confirmed), Some(&1));
    }

    #[test]
    fn test_orphan_report_clamps_negative_difference() {
        let report = OrphanReport::compare(105, 90, 100);
        assert_eq!(report.orphan_count, Some(5));
        assert_eq!(report.unregistered_local, Some(0));

        let report = OrphanReport::compare(97, 90, 100);
        assert_eq!(report.orphan_count, Some(0));
        assert_eq!(report.unregistered_local, Some(3));
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let json = serde_json::to_value(RecordOutcome::Submitted {
            transaction_ref: "0xabc".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "submitted");
        assert_eq!(json["transaction_ref"], "0xabc");
    }
}
