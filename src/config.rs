use config::{builder::DefaultState, ConfigBuilder, ConfigError};
use serde::Deserialize;

use crate::chain::{retry::RetryPolicy, rpc::RpcLedgerConfig};
use std::time::Duration;

/// Service configuration, read from the environment (and `.env` via dotenv).
///
/// Every field maps to the upper-cased environment variable of the same name,
/// e.g. `ledger_rpc_url` <- `LEDGER_RPC_URL`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,

    pub ledger_rpc_url: String,
    pub ledger_contract_address: String,
    pub ledger_sender_address: String,
    pub ledger_chain_id: Option<u64>,
    pub ledger_max_attempts: u32,
    pub ledger_initial_backoff_ms: u64,
    pub ledger_max_backoff_ms: u64,
    pub ledger_call_deadline_ms: u64,
    pub ledger_request_timeout_ms: u64,
    pub ledger_submit_deadline_ms: u64,
    pub ledger_receipt_poll_ms: u64,

    pub reconcile_concurrency: usize,
    /// 0 disables the background reconciliation cycle
    pub reconcile_interval_secs: u64,
    pub supervisor_interval_secs: u64,

    pub admin_token: Option<String>,
    pub admin_rate_limit_per_minute: u32,
    /// Comma-separated origins, or `*`
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::with_defaults()?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    fn with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("database_url", "postgresql://localhost/vehicle_integrity")?
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("ledger_rpc_url", "http://127.0.0.1:8545")?
            .set_default("ledger_contract_address", "")?
            .set_default("ledger_sender_address", "")?
            .set_default("ledger_max_attempts", 4)?
            .set_default("ledger_initial_backoff_ms", 250)?
            .set_default("ledger_max_backoff_ms", 5_000)?
            .set_default("ledger_call_deadline_ms", 20_000)?
            .set_default("ledger_request_timeout_ms", 10_000)?
            .set_default("ledger_submit_deadline_ms", 60_000)?
            .set_default("ledger_receipt_poll_ms", 1_000)?
            .set_default("reconcile_concurrency", 8)?
            .set_default("reconcile_interval_secs", 900)?
            .set_default("supervisor_interval_secs", 30)?
            .set_default("admin_rate_limit_per_minute", 30)?
            .set_default("cors_allowed_origins", "http://localhost:3000")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.ledger_max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.ledger_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.ledger_max_backoff_ms),
            call_deadline: Duration::from_millis(self.ledger_call_deadline_ms),
        }
    }

    pub fn ledger_config(&self) -> RpcLedgerConfig {
        RpcLedgerConfig {
            rpc_url: self.ledger_rpc_url.clone(),
            contract_address: self.ledger_contract_address.clone(),
            sender_address: self.ledger_sender_address.clone(),
            expected_chain_id: self.ledger_chain_id,
            request_timeout: Duration::from_millis(self.ledger_request_timeout_ms),
            submit_deadline: Duration::from_millis(self.ledger_submit_deadline_ms),
            receipt_poll_interval: Duration::from_millis(self.ledger_receipt_poll_ms),
            retry: self.retry_policy(),
        }
    }
}

#[cfg(test)]
impl Config {
    /// Defaults only, ignoring the process environment
    pub fn defaults() -> Self {
        Self::with_defaults()
            .and_then(|builder| builder.build())
            .and_then(|config| config.try_deserialize())
            .unwrap()
    }
}
