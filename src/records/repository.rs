use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::*;
use super::store::RecordStore;
use crate::error::AppResult;
use crate::integrity::fingerprint::SENTINEL_FINGERPRINT;

const RECORD_COLUMNS: &str = r#"
    id, vehicle_id, service_type, description, mileage, cost, service_date,
    workflow_status, fingerprint, ledger_confirmed_at, integrity_status,
    ledger_tx_ref, integrity_revision, created_at, updated_at
"#;

/// Postgres-backed record store
pub struct RecordRepository {
    pub pool: PgPool,
}

impl RecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, predicate: &str, binds: &[&str]) -> AppResult<Vec<ServiceRecord>> {
        let sql = format!(
            "SELECT {} FROM service_records WHERE {} ORDER BY created_at",
            RECORD_COLUMNS, predicate
        );
        let mut query = sqlx::query_as::<_, ServiceRecord>(&sql);
        for bind in binds {
            query = query.bind(*bind);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl RecordStore for RecordRepository {
    async fn get(&self, id: Uuid) -> AppResult<Option<ServiceRecord>> {
        let sql = format!("SELECT {} FROM service_records WHERE id = $1", RECORD_COLUMNS);
        let record = sqlx::query_as::<_, ServiceRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn list_fingerprinted(&self) -> AppResult<Vec<ServiceRecord>> {
        self.fetch_where("fingerprint IS NOT NULL AND fingerprint <> ''", &[])
            .await
    }

    async fn list_sentinel(&self) -> AppResult<Vec<ServiceRecord>> {
        self.fetch_where("fingerprint = $1", &[SENTINEL_FINGERPRINT])
            .await
    }

    async fn list_backfill_candidates(&self) -> AppResult<Vec<ServiceRecord>> {
        self.fetch_where(
            r#"
            fingerprint IS NOT NULL
              AND fingerprint <> ''
              AND fingerprint <> $1
              AND ledger_confirmed_at IS NULL
              AND integrity_status <> 'submitted'
            "#,
            &[SENTINEL_FINGERPRINT],
        )
        .await
    }

    async fn count_distinct_fingerprints(&self) -> AppResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT lower(regexp_replace(fingerprint, '^0[xX]', '')))
            FROM service_records
            WHERE fingerprint ~ '^(0[xX])?[0-9a-fA-F]{64}$'
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn update_integrity(
        &self,
        id: Uuid,
        expected_revision: i64,
        update: &IntegrityUpdate,
    ) -> AppResult<bool> {
        // A confirmed fingerprint may only be "rewritten" with itself.
        let result = sqlx::query(
            r#"
            UPDATE service_records
            SET fingerprint = COALESCE($3, fingerprint),
                integrity_status = $4,
                ledger_confirmed_at = $5,
                ledger_tx_ref = COALESCE($6, ledger_tx_ref),
                integrity_revision = integrity_revision + 1,
                updated_at = NOW()
            WHERE id = $1
              AND integrity_revision = $2
              AND ($3::text IS NULL
                   OR ledger_confirmed_at IS NULL
                   OR fingerprint IS NOT DISTINCT FROM $3)
            "#,
        )
        .bind(id)
        .bind(expected_revision)
        .bind(update.fingerprint.as_deref())
        .bind(update.integrity_status)
        .bind(update.ledger_confirmed_at)
        .bind(update.ledger_tx_ref.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
