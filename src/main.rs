//! Tablebook - restaurant table booking service

use anyhow::Result;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tablebook::{
    api::{self, AppState},
    config::Config,
    db,
    services::{create_email_notifier, create_payment_issuer, BookingLedger},
    store::create_store,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablebook=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tablebook...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    let applied = db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed ({} applied)", applied);

    // Shared store for revocations, rate windows and OTP codes
    let store = create_store(&config.store).await?;
    tracing::info!("Store initialized: {:?}", config.store.driver);

    let email = create_email_notifier(&config.email)?;
    let payments = create_payment_issuer(&config.payment)?;

    let sweep_every = config.bookings.execute_sweep_seconds;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::build(config, pool, store, email, payments)?;
    if !state.gate.is_enabled() {
        tracing::warn!("Rate limiting is disabled (rate_limit.enabled = false)");
    }

    if sweep_every > 0 {
        spawn_execution_sweep(state.ledger.clone(), Duration::from_secs(sweep_every));
    } else {
        tracing::warn!("Booking execution sweep is disabled");
    }

    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically mark past confirmed bookings as executed
fn spawn_execution_sweep(ledger: std::sync::Arc<BookingLedger>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match ledger.execute_due(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Execution sweep marked {} booking(s) executed", n),
                Err(e) => tracing::warn!("Execution sweep failed: {}", e),
            }
        }
    });
}
