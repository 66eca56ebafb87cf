use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("External error: {0}")]
    ExternalError(String),
}

/// Failures of the remote fingerprint registry.
///
/// `Unavailable` and `Timeout` are transient and retried with backoff.
/// `Rejected` means the contract reverted and is never retried blindly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger rejected call: {0}")]
    Rejected(String),

    #[error("Ledger call timed out: {0}")]
    Timeout(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_) | LedgerError::Timeout(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::Unavailable(_) => "ledger_unavailable",
            LedgerError::Rejected(_) => "ledger_rejected",
            LedgerError::Timeout(_) => "ledger_timeout",
        }
    }
}

/// Per-record reconciliation failures. Never abort a batch.
#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Record store error: {0}")]
    RecordStore(String),

    #[error("Malformed fingerprint {value:?} on record {record_id}")]
    MalformedFingerprint { record_id: Uuid, value: String },

    #[error("Could not canonicalize record {record_id}: {message}")]
    Canonicalization { record_id: Uuid, message: String },
}

impl IntegrityError {
    /// Stable identifier used in reconciliation summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            IntegrityError::Ledger(e) => e.kind(),
            IntegrityError::RecordStore(_) => "record_store_error",
            IntegrityError::MalformedFingerprint { .. } => "malformed_fingerprint",
            IntegrityError::Canonicalization { .. } => "malformed_fingerprint",
        }
    }

    pub fn store(error: AppError) -> Self {
        IntegrityError::RecordStore(error.to_string())
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Missing or invalid admin token".to_string(),
                None,
            ),
            AppError::Ledger(err) => {
                let status = match err {
                    LedgerError::Rejected(_) => StatusCode::CONFLICT,
                    LedgerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    LedgerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (
                    status,
                    "LEDGER_ERROR",
                    err.to_string(),
                    Some(serde_json::json!({ "kind": err.kind() })),
                )
            }
            AppError::Integrity(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INTEGRITY_ERROR",
                err.to_string(),
                Some(serde_json::json!({ "kind": err.kind() })),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
