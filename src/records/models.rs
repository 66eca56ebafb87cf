use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;
use uuid::Uuid;

/// Business lifecycle of a service record. Owned by the booking workflow,
/// independent of ledger state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "workflow_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl WorkflowStatus {
    /// Rejected and expired records can never be anchored retroactively.
    pub fn is_closed_unsuccessfully(&self) -> bool {
        matches!(self, WorkflowStatus::Rejected | WorkflowStatus::Expired)
    }
}

/// Derived verification state of a record against the ledger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type,
)]
#[sqlx(type_name = "integrity_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IntegrityStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl IntegrityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityStatus::Pending => "pending",
            IntegrityStatus::Submitted => "submitted",
            IntegrityStatus::Confirmed => "confirmed",
            IntegrityStatus::Failed => "failed",
        }
    }

    #[cfg(test)]
    pub fn all() -> Vec<IntegrityStatus> {
        vec![
            IntegrityStatus::Pending,
            IntegrityStatus::Submitted,
            IntegrityStatus::Confirmed,
            IntegrityStatus::Failed,
        ]
    }
}

impl fmt::Display for IntegrityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Vehicle service record.
///
/// Content fields (`vehicle_id` .. `service_date`) are written by the booking
/// workflow. The integrity fields (`fingerprint`, `ledger_confirmed_at`,
/// `integrity_status`, `ledger_tx_ref`, `integrity_revision`) are written only by
/// the reconciliation engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceRecord {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub service_type: String,
    pub description: String,
    pub mileage: i32,
    #[serde(with = "rust_decimal::serde::float")]
    pub cost: Decimal,
    pub service_date: NaiveDate,
    pub workflow_status: WorkflowStatus,

    pub fingerprint: Option<String>,
    pub ledger_confirmed_at: Option<DateTime<Utc>>,
    pub integrity_status: IntegrityStatus,
    pub ledger_tx_ref: Option<String>,
    /// Compare-and-set token, bumped on every integrity write
    pub integrity_revision: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRecord {
    pub fn is_ledger_confirmed(&self) -> bool {
        self.ledger_confirmed_at.is_some()
    }
}

/// Integrity fields to write in a single conditional update.
///
/// `integrity_status` and `ledger_confirmed_at` are always written.
/// `fingerprint` and `ledger_tx_ref` are only written when `Some`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityUpdate {
    pub fingerprint: Option<String>,
    pub integrity_status: IntegrityStatus,
    pub ledger_confirmed_at: Option<DateTime<Utc>>,
    pub ledger_tx_ref: Option<String>,
}

impl IntegrityUpdate {
    pub fn status(integrity_status: IntegrityStatus, ledger_confirmed_at: Option<DateTime<Utc>>) -> Self {
        Self {
            fingerprint: None,
            integrity_status,
            ledger_confirmed_at,
            ledger_tx_ref: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_tx_ref(mut self, tx_ref: impl Into<String>) -> Self {
        self.ledger_tx_ref = Some(tx_ref.into());
        self
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn service_record() -> ServiceRecord {
        let now = Utc::now();
        ServiceRecord {
            id: Uuid::new_v4(),
            vehicle_id: Uuid::new_v4(),
            service_type: "oil_change".to_string(),
            description: "Synthetic 5W-30, filter replaced".to_string(),
            mileage: 48_210,
            cost: dec!(89.90),
            service_date: NaiveDate::from_ymd_opt(2024, 3, 14).unwrap(),
            workflow_status: WorkflowStatus::Confirmed,
            fingerprint: None,
            ledger_confirmed_at: None,
            integrity_status: IntegrityStatus::Pending,
            ledger_tx_ref: None,
            integrity_revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_fingerprint(fingerprint: &str) -> ServiceRecord {
        ServiceRecord {
            fingerprint: Some(fingerprint.to_string()),
            ..service_record()
        }
    }
}
