use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::chain::probe::NetworkHealth;
use crate::integrity::engine::{CancellationFlag, RunOptions};

// ========== REQUEST MODELS ==========

/// Optional body of the bulk reconciliation endpoints
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReconcileRequest {
    /// Overrides the configured per-pass concurrency
    #[validate(range(min = 1, max = 64, message = "must be between 1 and 64"))]
    pub concurrency: Option<usize>,
}

impl ReconcileRequest {
    /// Passes started over HTTP stop picking up records once the server shuts down
    pub fn run_options(&self, shutdown: &CancellationFlag) -> RunOptions {
        RunOptions {
            concurrency: self.concurrency,
            cancel: shutdown.clone(),
        }
    }
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Service health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub record_store: ComponentHealth,
    pub ledger: NetworkHealth,
}
