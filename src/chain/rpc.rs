use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::chain::abi;
use crate::chain::retry::RetryPolicy;
use crate::chain::traits::{ChainStatus, LedgerEndpoint, LedgerGateway, LedgerStats, SubmitReceipt};
use crate::error::LedgerError;
use crate::integrity::fingerprint::Fingerprint;

#[derive(Debug, Clone)]
pub struct RpcLedgerConfig {
    pub rpc_url: String,
    pub contract_address: String,
    /// Node-managed account that signs `registerHash` transactions
    pub sender_address: String,
    pub expected_chain_id: Option<u64>,
    pub request_timeout: Duration,
    /// Bounds a whole `submit`: gas estimate, send and receipt wait together.
    /// Reads are bounded by `retry.call_deadline` instead.
    pub submit_deadline: Duration,
    pub receipt_poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for RpcLedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract_address: String::new(),
            sender_address: String::new(),
            expected_chain_id: None,
            request_timeout: Duration::from_secs(10),
            submit_deadline: Duration::from_secs(60),
            receipt_poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC adapter for the fingerprint registry contract on an EVM node.
///
/// The HTTP client lives in a single slot filled by `connect` and emptied by
/// `close`. Calls made while disconnected fail fast with `LedgerUnavailable`;
/// reconnecting is the supervisor's job, never the call site's.
pub struct RpcLedgerGateway {
    config: RpcLedgerConfig,
    client: RwLock<Option<Client>>,
    request_id: AtomicU64,
}

impl RpcLedgerGateway {
    pub fn new(config: RpcLedgerConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
            request_id: AtomicU64::new(1),
        }
    }

    /// Opens the connection and checks that the node serves the expected chain
    /// and that the registry contract is deployed.
    #[instrument(skip(self), fields(rpc_url = %redact_url(&self.config.rpc_url)))]
    pub async fn connect(&self) -> Result<(), LedgerError> {
        let client = Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        let chain_id = as_quantity(self.call_with(&client, "eth_chainId", json!([])).await?)? as u64;
        if let Some(expected) = self.config.expected_chain_id {
            if expected != chain_id {
                return Err(LedgerError::Unavailable(format!(
                    "node serves chain {} but {} is configured",
                    chain_id, expected
                )));
            }
        }

        let code = as_string(
            self.call_with(
                &client,
                "eth_getCode",
                json!([self.config.contract_address, "latest"]),
            )
            .await?,
        )?;
        if code.trim_start_matches("0x").is_empty() {
            return Err(LedgerError::Unavailable(format!(
                "no contract code at {}",
                self.config.contract_address
            )));
        }

        *self.client.write() = Some(client);
        info!(chain_id, contract = %self.config.contract_address, "✅ Ledger gateway connected");
        Ok(())
    }

    pub fn close(&self) {
        if self.client.write().take().is_some() {
            info!("Ledger gateway connection closed");
        }
    }

    fn client(&self) -> Result<Client, LedgerError> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| LedgerError::Unavailable("ledger gateway is not connected".to_string()))
    }

    async fn call_with(&self, client: &Client, method: &str, params: Value) -> Result<Value, LedgerError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!("Ledger RPC call: {} id={}", method, id);

        let response = client
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Unavailable(format!("HTTP {} - {}", status, body)));
        }

        let rpc_response: RpcResponse = response.json().await.map_err(transport_error)?;

        if let Some(error) = rpc_response.error {
            return Err(rpc_error(error.code, &error.message));
        }

        Ok(rpc_response.result.unwrap_or(Value::Null))
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let client = self.client()?;
        self.call_with(&client, method, params).await
    }

    async fn eth_call(&self, data: &str) -> Result<String, LedgerError> {
        let result = self
            .call(
                "eth_call",
                json!([{ "to": self.config.contract_address, "data": data }, "latest"]),
            )
            .await?;
        as_string(result)
    }

    /// Estimate, send once, then wait for the receipt.
    ///
    /// `eth_sendTransaction` is never repeated: a send whose response was lost
    /// may still be mined, and a second send of the same fingerprint reverts.
    async fn register(&self, fingerprint: &Fingerprint) -> Result<SubmitReceipt, LedgerError> {
        let tx = json!({
            "from": self.config.sender_address,
            "to": self.config.contract_address,
            "data": abi::encode_string_call(abi::REGISTER_HASH, fingerprint.as_str()),
        });
        let tx = &tx;

        // A duplicate reverts here, before anything is broadcast.
        let gas = self
            .config
            .retry
            .run("estimateGas", move || async move {
                self.call("eth_estimateGas", json!([tx])).await
            })
            .await?;

        let mut with_gas = tx.clone();
        with_gas["gas"] = gas;
        let tx_hash = match self
            .call("eth_sendTransaction", json!([with_gas]))
            .await
            .and_then(as_string)
        {
            Ok(tx_hash) => tx_hash,
            Err(e) if e.is_retryable() => return self.settle_lost_send(fingerprint, e).await,
            Err(e) => return Err(e),
        };

        info!(tx_hash = %tx_hash, "Fingerprint submitted, waiting for receipt");
        self.wait_for_receipt(&tx_hash).await?;

        Ok(SubmitReceipt {
            transaction_ref: Some(tx_hash),
        })
    }

    /// The send may or may not have reached the node. Polls the registry until
    /// the fingerprint shows up; the caller's deadline ends the wait otherwise.
    async fn settle_lost_send(
        &self,
        fingerprint: &Fingerprint,
        error: LedgerError,
    ) -> Result<SubmitReceipt, LedgerError> {
        warn!(
            error = %error,
            "registerHash response lost, checking the registry instead of resending"
        );

        loop {
            if self.exists(fingerprint).await? {
                info!("Fingerprint registered by the unacknowledged transaction");
                return Ok(SubmitReceipt {
                    transaction_ref: None,
                });
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<(), LedgerError> {
        loop {
            match self.call("eth_getTransactionReceipt", json!([tx_hash])).await {
                Ok(Value::Null) => {}
                Ok(receipt) => {
                    let status = receipt.get("status").and_then(Value::as_str);
                    if status == Some("0x0") {
                        return Err(LedgerError::Rejected(format!(
                            "transaction {} reverted",
                            tx_hash
                        )));
                    }
                    return Ok(());
                }
                Err(e) if e.is_retryable() => {
                    debug!(tx_hash, error = %e, "Receipt poll failed, polling again");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
    }
}

#[async_trait]
impl LedgerGateway for RpcLedgerGateway {
    #[instrument(skip(self, fingerprint), fields(fingerprint = %fingerprint))]
    async fn submit(&self, fingerprint: &Fingerprint) -> Result<SubmitReceipt, LedgerError> {
        let deadline = self.config.submit_deadline;
        match tokio::time::timeout(deadline, self.register(fingerprint)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(format!(
                "registerHash not settled within {}ms",
                deadline.as_millis()
            ))),
        }
    }

    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, LedgerError> {
        let data = abi::encode_string_call(abi::HASH_EXISTS, fingerprint.as_str());
        let data = &data;

        self.config
            .retry
            .run("hashExists", move || async move {
                abi::decode_bool(&self.eth_call(data).await?)
            })
            .await
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let data = abi::encode_call(abi::GET_STATS);
        let data = &data;

        self.config
            .retry
            .run("getStats", move || async move {
                abi::decode_stats(&self.eth_call(data).await?)
            })
            .await
    }

    async fn registered_count(&self) -> Result<u64, LedgerError> {
        let data = abi::encode_call(abi::GET_REGISTERED_HASHES_COUNT);
        let data = &data;

        self.config
            .retry
            .run("getRegisteredHashesCount", move || async move {
                abi::decode_uint(&self.eth_call(data).await?)
            })
            .await
    }

    async fn chain_status(&self) -> Result<ChainStatus, LedgerError> {
        self.config
            .retry
            .run("chainStatus", move || async move {
                let (chain_id, block_number, gas_price) = tokio::try_join!(
                    self.call("eth_chainId", json!([])),
                    self.call("eth_blockNumber", json!([])),
                    self.call("eth_gasPrice", json!([])),
                )?;

                Ok(ChainStatus {
                    chain_id: as_quantity(chain_id)? as u64,
                    block_number: as_quantity(block_number)? as u64,
                    gas_price_wei: as_quantity(gas_price)?,
                })
            })
            .await
    }

    async fn reconnect(&self) -> Result<(), LedgerError> {
        warn!("Reconnecting ledger gateway");
        self.close();
        self.connect().await
    }

    fn is_connected(&self) -> bool {
        self.client.read().is_some()
    }

    fn endpoint(&self) -> LedgerEndpoint {
        LedgerEndpoint {
            rpc_url: redact_url(&self.config.rpc_url),
            contract_address: self.config.contract_address.clone(),
        }
    }
}

fn transport_error(error: reqwest::Error) -> LedgerError {
    if error.is_timeout() {
        LedgerError::Timeout(error.to_string())
    } else {
        LedgerError::Unavailable(error.to_string())
    }
}

/// Maps a JSON-RPC error object onto the ledger taxonomy
fn rpc_error(code: i64, message: &str) -> LedgerError {
    let reverted = code == 3 || message.to_ascii_lowercase().contains("revert");
    let malformed_request = matches!(code, -32600 | -32601 | -32602);

    if reverted || malformed_request {
        LedgerError::Rejected(format!("{} (code {})", message, code))
    } else {
        LedgerError::Unavailable(format!("{} (code {})", message, code))
    }
}

fn as_string(value: Value) -> Result<String, LedgerError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| LedgerError::Unavailable(format!("expected hex string, got {}", value)))
}

fn as_quantity(value: Value) -> Result<u128, LedgerError> {
    abi::parse_quantity(&as_string(value)?)
}

/// Strips credentials from an RPC URL before it is logged or reported
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}
