use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::IntegrityError;
use crate::records::models::ServiceRecord;

/// Placeholder stored on records whose fingerprint was never properly computed.
pub const SENTINEL_FINGERPRINT: &str = "unset";

const DIGEST_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 digest of a record's canonical content.
///
/// Always lower-case, 64 characters, no `0x` prefix. This exact string is the
/// value registered on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accepts an optional `0x` prefix and either case, normalizes both away
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if hex_part.len() != DIGEST_HEX_LEN {
            return Err(format!(
                "expected {} hex characters, got {}",
                DIGEST_HEX_LEN,
                hex_part.len()
            ));
        }
        if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("contains non-hex characters".to_string());
        }

        Ok(Self(hex_part.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the `fingerprint` column of a record currently holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintState {
    Absent,
    Sentinel,
    WellFormed(Fingerprint),
    Malformed(String),
}

impl FingerprintState {
    pub fn of(raw: Option<&str>) -> Self {
        match raw {
            None => FingerprintState::Absent,
            Some(value) if value.trim().is_empty() => FingerprintState::Absent,
            Some(SENTINEL_FINGERPRINT) => FingerprintState::Sentinel,
            Some(value) => match Fingerprint::parse(value) {
                Ok(fingerprint) => FingerprintState::WellFormed(fingerprint),
                Err(_) => FingerprintState::Malformed(value.to_string()),
            },
        }
    }

    pub fn of_record(record: &ServiceRecord) -> Self {
        Self::of(record.fingerprint.as_deref())
    }
}

/// Canonical form of a service event. Field order is the serialization order.
#[derive(Serialize)]
struct CanonicalServiceEvent<'a> {
    id: String,
    vehicle_id: String,
    #[serde(rename = "type")]
    service_type: &'a str,
    description: &'a str,
    cost: String,
    service_date: String,
}

impl<'a> CanonicalServiceEvent<'a> {
    fn from_record(record: &'a ServiceRecord) -> Self {
        Self {
            id: record.id.hyphenated().to_string(),
            vehicle_id: record.vehicle_id.hyphenated().to_string(),
            service_type: &record.service_type,
            description: &record.description,
            // 89.9 and 89.90 are the same cost
            cost: record.cost.normalize().to_string(),
            service_date: record.service_date.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Computes the content fingerprint of a service record.
///
/// Deterministic and free of I/O: the same content always yields the same
/// fingerprint, so a registered fingerprint can be recomputed and compared later.
pub fn compute(record: &ServiceRecord) -> Result<Fingerprint, IntegrityError> {
    let canonical = serde_json::to_vec(&CanonicalServiceEvent::from_record(record)).map_err(|e| {
        IntegrityError::Canonicalization {
            record_id: record.id,
            message: e.to_string(),
        }
    })?;

    let digest = Sha256::digest(&canonical);
    Ok(Fingerprint(hex::encode(digest)))
}
