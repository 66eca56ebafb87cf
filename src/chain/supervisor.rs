use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::chain::probe::{HealthStatus, NetworkProbe};
use crate::chain::traits::LedgerGateway;

/// Background task that keeps the ledger connection alive.
///
/// Probes the node on a fixed interval and reconnects when the probe reports
/// `Unhealthy`. A failed reconnect is logged and retried on the next tick.
pub struct LedgerSupervisor {
    gateway: Arc<dyn LedgerGateway>,
    probe: Arc<NetworkProbe>,
    interval: Duration,
}

impl LedgerSupervisor {
    pub fn new(
        gateway: Arc<dyn LedgerGateway>,
        probe: Arc<NetworkProbe>,
        interval: Duration,
    ) -> Self {
        Self {
            gateway,
            probe,
            interval,
        }
    }

    /// Start the supervisor (runs in background)
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick fires immediately; bootstrap has just connected.
            ticker.tick().await;

            info!(interval_secs = self.interval.as_secs(), "Ledger supervisor started");
            loop {
                ticker.tick().await;
                self.check_once().await;
            }
        })
    }

    pub async fn check_once(&self) -> HealthStatus {
        let health = self.probe.network_health().await;

        match health.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded => {
                warn!(
                    error = health.error.as_deref().unwrap_or_default(),
                    "Ledger degraded, registry reads failing"
                );
            }
            HealthStatus::Unhealthy => {
                warn!(
                    error = health.error.as_deref().unwrap_or_default(),
                    rpc_url = %health.rpc_url,
                    "Ledger unhealthy, reconnecting"
                );
                match self.gateway.reconnect().await {
                    Ok(()) => info!("Ledger connection re-established"),
                    Err(e) => error!(error = %e, "Ledger reconnect failed"),
                }
            }
        }

        health.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::InMemoryLedger;

    fn supervisor(ledger: Arc<InMemoryLedger>) -> LedgerSupervisor {
        let probe = Arc::new(NetworkProbe::new(ledger.clone()));
        LedgerSupervisor::new(ledger, probe, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_healthy_ledger_is_left_alone() {
        let ledger = Arc::new(InMemoryLedger::new());
        let status = supervisor(ledger.clone()).check_once().await;

        assert_eq!(status, HealthStatus::Healthy);
        assert_eq!(ledger.reconnects(), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_ledger_triggers_reconnect() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_down(true);
        let supervisor = supervisor(ledger.clone());

        assert_eq!(supervisor.check_once().await, HealthStatus::Unhealthy);
        assert_eq!(ledger.reconnects(), 1);

        ledger.set_down(false);
        assert_eq!(supervisor.check_once().await, HealthStatus::Healthy);
        assert_eq!(ledger.reconnects(), 1);
    }
}
