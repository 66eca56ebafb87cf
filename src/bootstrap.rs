use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::{
    api::handler::AppState,
    chain::{LedgerGateway, LedgerSupervisor, NetworkProbe, RpcLedgerGateway},
    config::Config,
    error::AppResult,
    integrity::{CancellationFlag, EngineConfig, ReconciliationEngine, ReconciliationScheduler},
    records::{RecordRepository, RecordStore},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;
    let store: Arc<dyn RecordStore> = Arc::new(RecordRepository::new(pool));

    // Ledger gateway: an unreachable node at startup is not fatal, the
    // supervisor keeps trying to reconnect.
    let gateway = Arc::new(RpcLedgerGateway::new(config.ledger_config()));
    match gateway.connect().await {
        Ok(()) => info!("✅ Ledger gateway ready"),
        Err(e) => error!(error = %e, "⚠️  Ledger gateway unavailable at startup - reconnect deferred to supervisor"),
    }
    let ledger: Arc<dyn LedgerGateway> = gateway;

    let probe = Arc::new(NetworkProbe::new(ledger.clone()));
    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        ledger.clone(),
        EngineConfig {
            concurrency: config.reconcile_concurrency.max(1),
        },
    ));

    // Set by the server's shutdown signal; stops scheduled and HTTP-started passes
    let shutdown = CancellationFlag::default();

    // Background tasks
    let supervisor = Arc::new(LedgerSupervisor::new(
        ledger,
        probe.clone(),
        Duration::from_secs(config.supervisor_interval_secs.max(1)),
    ));
    supervisor.start();
    info!("✅ Ledger supervisor started");

    if config.reconcile_interval_secs > 0 {
        ReconciliationScheduler::new(
            engine.clone(),
            Duration::from_secs(config.reconcile_interval_secs),
            shutdown.clone(),
        )
        .start();
        info!(
            interval_secs = config.reconcile_interval_secs,
            "✅ Reconciliation scheduler started"
        );
    } else {
        warn!("RECONCILE_INTERVAL_SECS is 0 - scheduled reconciliation disabled");
    }

    Ok(AppState {
        engine,
        probe,
        store,
        shutdown,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
