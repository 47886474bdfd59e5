//! FleetSync Server - Main entry point

use anyhow::Result;
use fleetsync_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::{info, warn};

use fleetsync_server::{
    api::{self, AppState},
    config::Config,
    health::{HealthMonitor, HealthStatus},
    import::{HttpPlatformClient, ImportOrchestrator, PgStore, Stores},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::default()
        .with_file_prefix("fleetsync-server")
        .with_filter("fleetsync_server=debug,tower_http=debug,sqlx=info")
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting FleetSync Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let client = HttpPlatformClient::new(&config.platform)
        .map_err(|e| anyhow::anyhow!("Failed to create platform client: {}", e))?;
    info!(base_url = %config.platform.base_url, "Platform client initialized");

    let monitor = HealthMonitor::new(config.import.health.clone());
    monitor
        .subscribe(|metrics| match metrics.status {
            HealthStatus::Healthy => info!(
                success_rate = metrics.success_rate,
                "Platform health: healthy"
            ),
            status => warn!(
                status = ?status,
                success_rate = metrics.success_rate,
                consecutive_failures = metrics.consecutive_failures,
                issues = ?metrics.issues,
                "Platform health changed"
            ),
        })
        .detach();

    let orchestrator = ImportOrchestrator::new(
        config.import.clone(),
        Stores::shared(Arc::new(PgStore::new(Arc::new(db_pool)))),
        Arc::new(client),
        monitor,
    );

    let state = AppState {
        orchestrator: orchestrator.clone(),
    };
    let app = api::create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.server.shutdown_timeout_secs))
        .await?;

    // Running imports are paused so they resume from their last committed chunk
    let active = orchestrator.active_runs();
    if active > 0 {
        info!(active, "Pausing active imports");
        orchestrator.shutdown().await;
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    info!("Waiting up to {} seconds for connections to close", timeout_secs);
    tokio::time::sleep(Duration::from_secs(timeout_secs.min(5))).await;
}
