use crate::integrity::fingerprint::FingerprintState;
use crate::records::models::{IntegrityStatus, ServiceRecord};

/// Maps a record and a ledger membership answer to its verification state.
///
/// Pure and memoryless: every call recomputes from current inputs, which is
/// what lets a reconciliation pass detect drift. `Submitted` is never produced
/// here; only the engine writes it, right after an accepted submission.
pub fn classify(record: &ServiceRecord, exists_on_ledger: bool) -> IntegrityStatus {
    match FingerprintState::of_record(record) {
        FingerprintState::Absent | FingerprintState::Sentinel => {
            if record.workflow_status.is_closed_unsuccessfully() {
                IntegrityStatus::Failed
            } else {
                IntegrityStatus::Pending
            }
        }
        // A malformed value cannot have been registered.
        FingerprintState::Malformed(_) => IntegrityStatus::Failed,
        FingerprintState::WellFormed(_) if exists_on_ledger => IntegrityStatus::Confirmed,
        FingerprintState::WellFormed(_) => IntegrityStatus::Failed,
    }
}
