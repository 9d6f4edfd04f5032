use anyhow::Result;
use fleet_api::{create_app, Config};
use fleet_orchestrator::{Dependencies, EventBus, LifecycleCoordinator, SystemClock};
use fleet_provider::{get_backend, HttpActivityProbe, LocalSettings};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = fleet_logging::init_subscriber();

    info!("Starting fleet-api service...");

    // Load configuration
    let config = Config::from_env();
    let orchestrator_config = config.to_orchestrator_config()?;
    info!(
        "Configuration loaded: bind_addr={}, provider={}, inactivity_threshold={}min",
        config.bind_addr, config.provider, config.inactivity_threshold_minutes
    );

    // Backend and lifecycle wiring
    let backend = get_backend(&config.provider, LocalSettings::default())?;
    let deps = Dependencies {
        provisioner: backend.provisioner,
        registry: backend.registry,
        probe: Arc::new(HttpActivityProbe::new()),
        clock: Arc::new(SystemClock),
    };
    let coordinator = Arc::new(LifecycleCoordinator::start(
        orchestrator_config,
        deps,
        EventBus::new(),
    ));

    coordinator.reconcile().await;
    info!("Startup reconciliation complete");

    let sweep = coordinator.sweep().spawn();
    info!("Standby sweep scheduled");

    // Create app
    let app = create_app(Arc::clone(&coordinator));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweep.abort();
    coordinator.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
