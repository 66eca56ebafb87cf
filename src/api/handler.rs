use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::api::models::{ComponentHealth, HealthResponse, ReconcileRequest};
use crate::chain::probe::{HealthStatus, NetworkHealth, NetworkProbe};
use crate::error::AppResult;
use crate::integrity::{
    engine::{CancellationFlag, ReconciliationEngine},
    summary::{OrphanReport, RecordReport, ReconciliationSummary},
};
use crate::middleware::ValidatedJson;
use crate::records::store::RecordStore;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub probe: Arc<NetworkProbe>,
    pub store: Arc<dyn RecordStore>,
    /// Set when the server starts shutting down
    pub shutdown: CancellationFlag,
}

/// POST /admin/integrity/verify
pub async fn verify_all(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ReconcileRequest>,
) -> AppResult<Json<ReconciliationSummary>> {
    info!(concurrency = ?request.concurrency, "Verification requested");
    let summary = state.engine.verify_all(&request.run_options(&state.shutdown)).await?;
    Ok(Json(summary))
}

/// POST /admin/integrity/repair
pub async fn repair_invalid_fingerprints(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ReconcileRequest>,
) -> AppResult<Json<ReconciliationSummary>> {
    info!(concurrency = ?request.concurrency, "Fingerprint repair requested");
    let summary = state
        .engine
        .repair_invalid_fingerprints(&request.run_options(&state.shutdown))
        .await?;
    Ok(Json(summary))
}

/// POST /admin/integrity/backfill
pub async fn backfill_missing_registrations(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<ReconcileRequest>,
) -> AppResult<Json<ReconciliationSummary>> {
    info!(concurrency = ?request.concurrency, "Registration backfill requested");
    let summary = state
        .engine
        .backfill_missing_registrations(&request.run_options(&state.shutdown))
        .await?;
    Ok(Json(summary))
}

/// GET /admin/integrity/orphans
pub async fn detect_orphans(State(state): State<AppState>) -> AppResult<Json<OrphanReport>> {
    Ok(Json(state.engine.detect_orphans().await?))
}

/// GET /admin/integrity/network
pub async fn network_health(State(state): State<AppState>) -> Json<NetworkHealth> {
    Json(state.probe.network_health().await)
}

/// GET /admin/integrity/records/:id
pub async fn verify_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RecordReport>> {
    Ok(Json(state.engine.verify_record(id).await?))
}

/// POST /admin/integrity/records/:id/register
pub async fn register_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RecordReport>> {
    info!(record_id = %id, "Registration requested");
    Ok(Json(state.engine.register_record(id).await?))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let record_store = match state.store.ping().await {
        Ok(()) => ComponentHealth {
            ok: true,
            error: None,
        },
        Err(e) => ComponentHealth {
            ok: false,
            error: Some(e.to_string()),
        },
    };
    let ledger = state.probe.network_health().await;

    let status = match (record_store.ok, ledger.status) {
        (false, _) => "unhealthy",
        (true, HealthStatus::Healthy) => "healthy",
        (true, _) => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now(),
        record_store,
        ledger,
    })
}
