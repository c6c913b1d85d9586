use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use tracker_gateway::bus::{EventPublisher, MessageBus};
use tracker_gateway::config::Config;
use tracker_gateway::logging;
use tracker_gateway::server::GatewayServer;
use tracker_gateway::store::{GatewayStore, PgStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;
    logging::init_logging(&config.logging);

    info!("Starting tracker gateway v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&config.pool_config()).await?;
    let store: Arc<dyn GatewayStore> = Arc::new(PgStore::new(pool.clone()));

    let mut bus = MessageBus::connect(&config.bus.url).await?;
    bus.declare_queues(config.bus.queue_ttl_ms, &config.bus.sidecar_queue)
        .await?;
    let publisher: Arc<dyn EventPublisher> = Arc::new(bus);

    let server = GatewayServer::new(config, store, publisher);
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    server.run().await?;

    pool.close().await;
    info!("tracker gateway stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
