use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use orbitshield_backend::config;
use orbitshield_backend::model::JsonCatalog;
use orbitshield_backend::module::{
    CycleConfig, CycleScheduler, RiskScorer, ScheduledTaskManager, Sgp4Propagator,
    SubscriberRegistry, TokenAuthority,
};
use orbitshield_backend::service::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::read_config()?;

    // Initialize logging
    let _logging_guard = orbitshield_backend::logging::init_logging(
        &config.log_dir,
        "orbitshield-backend",
        &config.log_level,
    )?;

    tracing::info!("OrbitShield backend starting...");
    tracing::info!("Server will listen on {}", config.server_address());

    let catalog = Arc::new(
        JsonCatalog::open(&config.catalog_path)
            .await
            .with_context(|| format!("Failed to open catalog {}", config.catalog_path.display()))?,
    );
    let scorer = Arc::new(RiskScorer::from_artifact(config.model_path.as_deref()));
    let tokens = Arc::new(TokenAuthority::new(Duration::from_secs(config.token_ttl_secs))?);
    let registry = Arc::new(SubscriberRegistry::new());

    let scheduler = Arc::new(CycleScheduler::new(
        CycleConfig::from_backend(config),
        catalog.clone(),
        Arc::new(Sgp4Propagator),
        scorer.clone(),
        registry.clone(),
    ));

    let mut task_manager = ScheduledTaskManager::new(scheduler, tokens.clone());
    task_manager.start_all();

    let state = AppState {
        tokens,
        registry,
        catalog,
        scorer,
        allowed_origin: config.allowed_origin.clone(),
        subscriber_queue: config.subscriber_queue,
    };

    let listener = TcpListener::bind(config.server_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.server_address()))?;
    tracing::info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, service::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    task_manager.shutdown().await;
    tracing::info!("OrbitShield backend stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
