use anyhow::Context;
use kubegate_api::kubernetes::KubeConnector;
use kubegate_api::shutdown::ShutdownCoordinator;
use kubegate_api::{logging, router, AppState, GatewayConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "--print-config") {
        print!("{}", GatewayConfig::generate_sample());
        return Ok(());
    }

    let config = GatewayConfig::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let _log_guard = logging::init(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let connector = KubeConnector {
        connect_timeout: Duration::from_secs(10),
        watch_timeout_secs: config.watch.upstream_timeout_secs,
    };
    let state = AppState::new(config.clone(), Arc::new(connector));

    for cluster in config.clusters.iter().cloned() {
        let name = cluster.name.clone();
        match state.registry.register(cluster).await {
            Ok(info) => info!(
                cluster = %name,
                endpoint = %info.endpoint,
                version = ?info.server_version,
                "Registered cluster from configuration"
            ),
            Err(e) => warn!(cluster = %name, error = %e, "Failed to register configured cluster"),
        }
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Kubegate API listening on {}", addr);

    let coordinator = ShutdownCoordinator::new();
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.wait_for_signal().await {
                error!("Failed to install signal handlers: {}", e);
            }
        });
    }

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(coordinator.signal())
        .await
        .context("Server error")?;

    info!("Server stopped, running cleanup...");
    coordinator.drain(&state.registry).await;

    Ok(())
}
