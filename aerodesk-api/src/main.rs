use aerodesk_api::{
    app, events,
    state::{AppState, AuthConfig},
};
use aerodesk_core::ReservationEngine;
use aerodesk_store::{app_config::Config, Database, PostgresInventoryRepository};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "aerodesk_api=debug,aerodesk_core=info,aerodesk_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Aerodesk API on port {}", config.server.port);

    let db = Database::new(&config.database)
        .await
        .context("Failed to open database pool")?;
    db.migrate().await.context("Failed to run migrations")?;

    let repo = Arc::new(PostgresInventoryRepository::new(db.pool.clone()));
    let (events_tx, events_rx) = tokio::sync::broadcast::channel(100);
    tokio::spawn(events::log_booking_events(events_rx));
    let engine = ReservationEngine::new(repo).with_events(events_tx);

    let pool = db.pool.clone();
    let app_state = AppState {
        engine,
        pool_status: Arc::new(move || pool.status()),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped, closing database pool");
    db.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
