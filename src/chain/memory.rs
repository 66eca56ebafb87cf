use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::chain::traits::{ChainStatus, LedgerEndpoint, LedgerGateway, LedgerStats, SubmitReceipt};
use crate::error::LedgerError;
use crate::integrity::fingerprint::Fingerprint;

#[derive(Default)]
struct State {
    registered: HashSet<String>,
    /// fingerprint -> `exists` queries left before it becomes visible
    in_flight: HashMap<String, u32>,
    failing: HashMap<String, LedgerError>,
    submit_calls: HashMap<String, u32>,
    exists_calls: u64,
    verified: u64,
    tx_counter: u64,
    down: bool,
    reconnects: u32,
}

/// Set-semantics ledger for tests.
///
/// Duplicate submissions revert like the real contract does. With a mining
/// delay of `n`, a submission stays invisible to the next `n` `exists` calls.
pub struct InMemoryLedger {
    state: Mutex<State>,
    mining_delay: u32,
    lose_receipts: bool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_mining_delay(0)
    }

    pub fn with_mining_delay(mining_delay: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            mining_delay,
            lose_receipts: false,
        }
    }

    /// Submissions register but come back without a transaction hash
    pub fn losing_receipts() -> Self {
        Self {
            lose_receipts: true,
            ..Self::new()
        }
    }

    /// Registration made outside the engine's lifetime
    pub fn register_external(&self, fingerprint: &str) {
        self.state.lock().registered.insert(fingerprint.to_string());
    }

    pub fn fail_for(&self, fingerprint: &Fingerprint, error: LedgerError) {
        self.state
            .lock()
            .failing
            .insert(fingerprint.as_str().to_string(), error);
    }

    pub fn set_down(&self, down: bool) {
        self.state.lock().down = down;
    }

    pub fn submit_count(&self, fingerprint: &Fingerprint) -> u32 {
        self.state
            .lock()
            .submit_calls
            .get(fingerprint.as_str())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_submits(&self) -> u32 {
        self.state.lock().submit_calls.values().sum()
    }

    pub fn exists_calls(&self) -> u64 {
        self.state.lock().exists_calls
    }

    pub fn reconnects(&self) -> u32 {
        self.state.lock().reconnects
    }

    fn check_reachable(state: &State, fingerprint: Option<&Fingerprint>) -> Result<(), LedgerError> {
        if state.down {
            return Err(LedgerError::Unavailable("connection refused".to_string()));
        }
        if let Some(error) = fingerprint.and_then(|f| state.failing.get(f.as_str())) {
            return Err(error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerGateway for InMemoryLedger {
    async fn submit(&self, fingerprint: &Fingerprint) -> Result<SubmitReceipt, LedgerError> {
        let mut state = self.state.lock();
        Self::check_reachable(&state, Some(fingerprint))?;

        *state
            .submit_calls
            .entry(fingerprint.as_str().to_string())
            .or_insert(0) += 1;

        let key = fingerprint.as_str().to_string();
        if state.registered.contains(&key) || state.in_flight.contains_key(&key) {
            return Err(LedgerError::Rejected(
                "execution reverted: Hash already registered".to_string(),
            ));
        }

        if self.mining_delay == 0 {
            state.registered.insert(key);
        } else {
            state.in_flight.insert(key, self.mining_delay);
        }

        state.tx_counter += 1;
        let transaction_ref = if self.lose_receipts {
            None
        } else {
            Some(format!("0x{:064x}", state.tx_counter))
        };
        Ok(SubmitReceipt { transaction_ref })
    }

    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool, LedgerError> {
        let mut state = self.state.lock();
        Self::check_reachable(&state, Some(fingerprint))?;
        state.exists_calls += 1;

        let key = fingerprint.as_str().to_string();
        if let Some(remaining) = state.in_flight.get_mut(&key) {
            if *remaining == 0 {
                state.in_flight.remove(&key);
                state.registered.insert(key.clone());
            } else {
                *remaining -= 1;
            }
        }

        let found = state.registered.contains(&key);
        if found {
            state.verified += 1;
        }
        Ok(found)
    }

    async fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let state = self.state.lock();
        Self::check_reachable(&state, None)?;
        Ok(LedgerStats {
            total_registered: state.registered.len() as u64,
            verified_count: state.verified,
            last_registered_at: 0,
        })
    }

    async fn chain_status(&self) -> Result<ChainStatus, LedgerError> {
        let state = self.state.lock();
        Self::check_reachable(&state, None)?;
        Ok(ChainStatus {
            chain_id: 1337,
            block_number: state.tx_counter + 1,
            gas_price_wei: 1_000_000_000,
        })
    }

    async fn reconnect(&self) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        state.reconnects += 1;
        Self::check_reachable(&state, None)
    }

    fn is_connected(&self) -> bool {
        !self.state.lock().down
    }

    fn endpoint(&self) -> LedgerEndpoint {
        LedgerEndpoint {
            rpc_url: "memory://ledger".to_string(),
            contract_address: "0x0000000000000000000000000000000000000000".to_string(),
        }
    }
}
