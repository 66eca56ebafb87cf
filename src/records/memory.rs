use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::models::*;
use super::store::RecordStore;
use crate::error::{AppError, AppResult};
use crate::integrity::fingerprint::{Fingerprint, SENTINEL_FINGERPRINT};

#[derive(Default)]
struct State {
    records: HashMap<Uuid, ServiceRecord>,
    failing_updates: HashSet<Uuid>,
    listing_down: bool,
    writes: u64,
}

/// In-memory record store with the same CAS rules as the Postgres one
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<State>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ServiceRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&self, record: ServiceRecord) {
        self.state.lock().records.insert(record.id, record);
    }

    pub fn snapshot(&self, id: Uuid) -> Option<ServiceRecord> {
        self.state.lock().records.get(&id).cloned()
    }

    pub fn fail_updates_for(&self, id: Uuid) {
        self.state.lock().failing_updates.insert(id);
    }

    pub fn set_listing_down(&self, down: bool) {
        self.state.lock().listing_down = down;
    }

    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    /// Simulates a concurrent writer bumping the revision
    pub fn bump_revision(&self, id: Uuid) {
        if let Some(record) = self.state.lock().records.get_mut(&id) {
            record.integrity_revision += 1;
        }
    }

    fn list(&self, predicate: impl Fn(&ServiceRecord) -> bool) -> AppResult<Vec<ServiceRecord>> {
        let state = self.state.lock();
        if state.listing_down {
            return Err(AppError::Internal("record store unreachable".to_string()));
        }
        let mut records: Vec<ServiceRecord> =
            state.records.values().filter(|r| predicate(r)).cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

fn has_fingerprint(record: &ServiceRecord) -> bool {
    record.fingerprint.as_deref().map_or(false, |f| !f.is_empty())
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get(&self, id: Uuid) -> AppResult<Option<ServiceRecord>> {
        Ok(self.snapshot(id))
    }

    async fn list_fingerprinted(&self) -> AppResult<Vec<ServiceRecord>> {
        self.list(has_fingerprint)
    }

    async fn list_sentinel(&self) -> AppResult<Vec<ServiceRecord>> {
        self.list(|r| r.fingerprint.as_deref() == Some(SENTINEL_FINGERPRINT))
    }

    async fn list_backfill_candidates(&self) -> AppResult<Vec<ServiceRecord>> {
        self.list(|r| {
            has_fingerprint(r)
                && r.fingerprint.as_deref() != Some(SENTINEL_FINGERPRINT)
                && r.ledger_confirmed_at.is_none()
                && r.integrity_status != IntegrityStatus::Submitted
        })
    }

    async fn count_distinct_fingerprints(&self) -> AppResult<u64> {
        let state = self.state.lock();
        let distinct: HashSet<Fingerprint> = state
            .records
            .values()
            .filter_map(|r| r.fingerprint.as_deref())
            .filter_map(|f| Fingerprint::parse(f).ok())
            .collect();
        Ok(distinct.len() as u64)
    }

    async fn update_integrity(
        &self,
        id: Uuid,
        expected_revision: i64,
        update: &IntegrityUpdate,
    ) -> AppResult<bool> {
        let mut state = self.state.lock();
        if state.failing_updates.contains(&id) {
            return Err(AppError::Internal(format!("write to record {} failed", id)));
        }
        let Some(record) = state.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.integrity_revision != expected_revision {
            return Ok(false);
        }
        if let Some(fingerprint) = &update.fingerprint {
            if record.ledger_confirmed_at.is_some()
                && record.fingerprint.as_deref() != Some(fingerprint.as_str())
            {
                return Ok(false);
            }
            record.fingerprint = Some(fingerprint.clone());
        }
        record.integrity_status = update.integrity_status;
        record.ledger_confirmed_at = update.ledger_confirmed_at;
        if let Some(tx_ref) = &update.ledger_tx_ref {
            record.ledger_tx_ref = Some(tx_ref.clone());
        }
        record.integrity_revision += 1;
        record.updated_at = chrono::Utc::now();
        state.writes += 1;
        Ok(true)
    }

    async fn ping(&self) -> AppResult<()> {
        if self.state.lock().listing_down {
            return Err(AppError::Internal("record store unreachable".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::models::fixtures;

    #[tokio::test]
    async fn test_update_is_compare_and_set() {
        let record = fixtures::service_record();
        let id = record.id;
        let store = InMemoryRecordStore::with_records(vec![record]);

        let update = IntegrityUpdate::status(IntegrityStatus::Failed, None);
        assert!(store.update_integrity(id, 0, &update).await.unwrap());
        // stale revision
        assert!(!store.update_integrity(id, 0, &update).await.unwrap());
        assert_eq!(store.snapshot(id).unwrap().integrity_revision, 1);
    }

    #[tokio::test]
    async fn test_confirmed_fingerprint_is_never_replaced() {
        let original = "a".repeat(64);
        let mut record = fixtures::with_fingerprint(&original);
        record.ledger_confirmed_at = Some(chrono::Utc::now());
        record.integrity_status = IntegrityStatus::Confirmed;
        let id = record.id;
        let store = InMemoryRecordStore::with_records(vec![record]);

        let update = IntegrityUpdate::status(IntegrityStatus::Pending, None)
            .with_fingerprint("b".repeat(64));
        assert!(!store.update_integrity(id, 0, &update).await.unwrap());
        assert_eq!(store.snapshot(id).unwrap().fingerprint, Some(original));
    }
}
