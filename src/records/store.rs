use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::records::models::{IntegrityUpdate, ServiceRecord};

/// Record store seam used by the reconciliation engine.
///
/// INVARIANTS:
/// - `update_integrity` is a compare-and-set on `integrity_revision`; it returns
///   `false` (and writes nothing) when another writer got there first
/// - a fingerprint that is already ledger-confirmed is never replaced
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: Uuid) -> AppResult<Option<ServiceRecord>>;

    /// Records whose fingerprint is neither NULL nor empty
    async fn list_fingerprinted(&self) -> AppResult<Vec<ServiceRecord>>;

    /// Records whose fingerprint equals the repair sentinel
    async fn list_sentinel(&self) -> AppResult<Vec<ServiceRecord>>;

    /// Records with a real fingerprint that is neither confirmed nor awaiting
    /// confirmation of an earlier submission
    async fn list_backfill_candidates(&self) -> AppResult<Vec<ServiceRecord>>;

    /// Number of distinct well-formed fingerprints held locally
    async fn count_distinct_fingerprints(&self) -> AppResult<u64>;

    async fn update_integrity(
        &self,
        id: Uuid,
        expected_revision: i64,
        update: &IntegrityUpdate,
    ) -> AppResult<bool>;

    async fn ping(&self) -> AppResult<()>;
}
