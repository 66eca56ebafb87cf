use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use http::{HeaderName, HeaderValue, StatusCode};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, set_header::SetResponseHeaderLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::api::handler::{
    backfill_missing_registrations, detect_orphans, health_check, network_health,
    register_record, repair_invalid_fingerprints, verify_all, verify_record, AppState,
};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::integrity::CancellationFlag;
use crate::middleware::{
    create_cors_layer, rate_limit_middleware, require_admin_token, AdminToken, RateLimitLayer,
};

/// Bulk passes over large tables are slow; the cap only guards against hangs.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub fn create_app(state: AppState, config: &Config) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let admin_token = AdminToken::new(config.admin_token.clone());
    if !admin_token.is_enabled() {
        warn!("ADMIN_TOKEN not set - admin routes are unauthenticated");
    }

    let admin = Router::new()
        .route("/verify", post(verify_all))
        .route("/repair", post(repair_invalid_fingerprints))
        .route("/backfill", post(backfill_missing_registrations))
        .route("/orphans", get(detect_orphans))
        .route("/network", get(network_health))
        .route("/records/:id", get(verify_record))
        .route("/records/:id/register", post(register_record))
        .route_layer(from_fn_with_state(
            RateLimitLayer::per_minute(config.admin_rate_limit_per_minute),
            rate_limit_middleware,
        ))
        .route_layer(from_fn_with_state(admin_token, require_admin_token));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/admin/integrity", admin)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    REQUEST_TIMEOUT,
                ))
                .layer(CompressionLayer::new())
                .layer(SetResponseHeaderLayer::if_not_present(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(create_cors_layer(&config.cors_allowed_origins)),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(
    app: Router,
    bind_address: &str,
    shutdown: CancellationFlag,
) -> AppResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| AppError::Config(format!("cannot bind {}: {}", bind_address, e)))?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| AppError::Internal(format!("server error: {}", e)))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationFlag) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, cancelling reconciliation passes");
    shutdown.cancel();
}
