use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::chain::traits::LedgerGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Node reachable but the registry contract could not be read
    Degraded,
    Unhealthy,
}

/// Ledger connectivity report for operators
#[derive(Debug, Clone, Serialize)]
pub struct NetworkHealth {
    pub status: HealthStatus,
    pub connected: bool,
    pub chain_id: Option<u64>,
    pub block_number: Option<u64>,
    /// Decimal string; wei values overflow JSON numbers
    pub gas_price_wei: Option<String>,
    pub registered_count: Option<u64>,
    pub rpc_url: String,
    pub contract_address: String,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Read-only ledger probe. Never returns an error: failures become an
/// `Unhealthy` or `Degraded` report.
pub struct NetworkProbe {
    gateway: Arc<dyn LedgerGateway>,
}

impl NetworkProbe {
    pub fn new(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self { gateway }
    }

    pub async fn network_health(&self) -> NetworkHealth {
        let started = Instant::now();
        let endpoint = self.gateway.endpoint();
        let mut health = NetworkHealth {
            status: HealthStatus::Unhealthy,
            connected: self.gateway.is_connected(),
            chain_id: None,
            block_number: None,
            gas_price_wei: None,
            registered_count: None,
            rpc_url: endpoint.rpc_url,
            contract_address: endpoint.contract_address,
            latency_ms: 0,
            error: None,
            checked_at: Utc::now(),
        };

        if !health.connected {
            health.error = Some("ledger gateway is not connected".to_string());
            return health;
        }

        match self.gateway.chain_status().await {
            Ok(chain) => {
                health.chain_id = Some(chain.chain_id);
                health.block_number = Some(chain.block_number);
                health.gas_price_wei = Some(chain.gas_price_wei.to_string());
            }
            Err(e) => {
                warn!(error = %e, "Ledger node unreachable");
                health.error = Some(e.to_string());
                health.latency_ms = started.elapsed().as_millis() as u64;
                return health;
            }
        }

        match self.gateway.registered_count().await {
            Ok(count) => {
                health.registered_count = Some(count);
                health.status = HealthStatus::Healthy;
            }
            Err(e) => {
                warn!(error = %e, "Registry contract read failed");
                health.error = Some(e.to_string());
                health.status = HealthStatus::Degraded;
            }
        }

        health.latency_ms = started.elapsed().as_millis() as u64;
        health
    }
}
