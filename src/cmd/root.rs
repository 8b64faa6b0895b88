//! Main daemon command - starts the daemon server

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use apiaryd::config::Configuration;
use apiaryd::engine::ContainerEngine;
use apiaryd::executor::AdaptiveExecutor;
use apiaryd::registry::BotRegistry;
use apiaryd::router::{self, AppState};
use apiaryd::supervisor::{BotSupervisor, IncidentLog};

/// Run the daemon until interrupted
pub async fn run(config_path: &str) -> Result<()> {
    info!("Loading configuration from: {}", config_path);
    let config = Arc::new(Configuration::load(Some(Path::new(config_path)))?);

    info!("Configuration loaded successfully");
    info!("  API: {}:{}", config.api.host, config.api.port);
    info!("  Bots directory: {}", config.system.bots_directory.display());
    info!("  Registry file: {}", config.system.registry_file.display());
    info!("  Container storage: {}", config.system.container_storage_dir.display());

    // Core components
    let registry = Arc::new(BotRegistry::new(&config.system.registry_file));
    let engine = Arc::new(ContainerEngine::new(&config.system.container_storage_dir)?);
    let executor = Arc::new(AdaptiveExecutor::new(
        registry.clone(),
        engine.clone(),
        config.clone(),
    ));
    let incidents = Arc::new(IncidentLog::new(&config.system.incident_log_file));

    let supervisor = Arc::new(BotSupervisor::new(
        registry.clone(),
        executor.clone(),
        incidents.clone(),
        Duration::from_secs(config.monitoring.health_check_interval_sec),
        config.monitoring.max_heal_failures,
    ));
    supervisor.start();

    // HTTP/WS control plane
    let state = AppState {
        registry,
        executor: executor.clone(),
        supervisor: supervisor.clone(),
        incidents,
        config: config.clone(),
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
        .parse()
        .with_context(|| "Invalid bind address")?;

    info!("Apiary daemon listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Shutdown: stop supervision first so it doesn't fight the cleanup.
    info!("Shutting down...");
    supervisor.stop().await;
    let stopped = executor.cleanup_all_bots().await;
    info!("Stopped {} bots during shutdown", stopped);
    engine.cleanup_all().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install shutdown signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
