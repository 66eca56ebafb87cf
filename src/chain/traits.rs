use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::integrity::fingerprint::Fingerprint;

/// Returned when the ledger accepted a submission for inclusion.
/// Acceptance is not finality: `exists` may still report false for a while.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// `None` when the send's acknowledgement was lost but the registry
    /// already reports the fingerprint
    pub transaction_ref: Option<String>,
}

/// Aggregate counters kept by the registry contract
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LedgerStats {
    pub total_registered: u64,
    pub verified_count: u64,
    /// Unix seconds of the latest registration, 0 when nothing is registered
    pub last_registered_at: u64,
}

/// Chain metadata reported by the node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainStatus {
    pub chain_id: u64,
    pub block_number: u64,
    pub gas_price_wei: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEndpoint {
    pub rpc_url: String,
    pub contract_address: String,
}

/// Fingerprint registry seam. Injected into the engine, never looked up globally.
///
/// INVARIANTS:
/// - all mutation goes through `submit`
/// - every call is bounded by a deadline; none of them hangs
/// - `exists` and `stats` are read-only and safe to retry freely
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn submit(&self, fingerprint: &Fingerprint) -> Result<SubmitReceipt, LedgerError>;

    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, LedgerError>;

    async fn stats(&self) -> Result<LedgerStats, LedgerError>;

    async fn registered_count(&self) -> Result<u64, LedgerError> {
        Ok(self.stats().await?.total_registered)
    }

    async fn chain_status(&self) -> Result<ChainStatus, LedgerError>;

    /// Drops the current connection and establishes a new one.
    /// The supervisor is the only caller.
    async fn reconnect(&self) -> Result<(), LedgerError>;

    fn is_connected(&self) -> bool;

    fn endpoint(&self) -> LedgerEndpoint;
}
