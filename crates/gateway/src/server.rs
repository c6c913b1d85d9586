//! Gateway server: listener, background jobs, consumers, shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::EventPublisher;
use crate::config::Config;
use crate::dispatcher::CommandDispatcher;
use crate::error::GatewayError;
use crate::jobs::{CacheCompactionTask, ExpireCommandsTask, MaintenanceRunner, OfflineSweepTask};
use crate::registry::DeviceRegistry;
use crate::session::{run_session, SessionContext, SessionSettings};
use crate::sidecar::DirectTcpBridge;
use crate::store::GatewayStore;

pub struct GatewayServer {
    config: Config,
    store: Arc<dyn GatewayStore>,
    publisher: Arc<dyn EventPublisher>,
    registry: Arc<DeviceRegistry>,
    shutdown: CancellationToken,
}

impl GatewayServer {
    /// Wires the server from its collaborators; nothing is global, so
    /// tests can construct one with in-memory doubles.
    pub fn new(
        config: Config,
        store: Arc<dyn GatewayStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new(store.clone()));
        Self {
            config,
            store,
            publisher,
            registry,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// Token that stops the listener, the consumers and every session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept loop plus background tasks; returns after a graceful stop.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "tracker gateway listening");

        let mut maintenance = MaintenanceRunner::new();
        maintenance.register(OfflineSweepTask::new(self.registry.clone()));
        maintenance.register(CacheCompactionTask::new(self.registry.clone()));
        maintenance.register(ExpireCommandsTask::new(
            self.store.clone(),
            self.config.bus.command_expiry_mins,
        ));
        maintenance.start();

        let dispatcher =
            CommandDispatcher::new(self.registry.clone(), self.store.clone());
        let dispatcher_shutdown = self.shutdown.clone();
        let dispatcher_url = self.config.bus.url.clone();
        let dispatcher_handle = tokio::spawn(async move {
            dispatcher.run(dispatcher_url, dispatcher_shutdown).await;
        });

        let bridge = DirectTcpBridge::new(self.config.bus.sidecar_queue.clone());
        let bridge_shutdown = self.shutdown.clone();
        let bridge_url = self.config.bus.url.clone();
        let bridge_handle = tokio::spawn(async move {
            bridge.run(bridge_url, bridge_shutdown).await;
        });

        let ctx = Arc::new(SessionContext {
            registry: self.registry.clone(),
            store: self.store.clone(),
            publisher: self.publisher.clone(),
            settings: SessionSettings {
                auth_timeout: Duration::from_secs(self.config.server.auth_timeout_secs),
            },
        });

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            debug!(%peer, "connection accepted");
                            let ctx = ctx.clone();
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                run_session(socket, peer, ctx, shutdown).await;
                            });
                        }
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                        }
                    }
                }
            }
        }

        info!(
            sessions = self.registry.session_count(),
            "shutting down: closing sessions, maintenance and consumers"
        );
        self.registry.cancel_all_sessions();
        maintenance.shutdown();
        maintenance.wait_for_shutdown(Duration::from_secs(10)).await;
        let _ = dispatcher_handle.await;
        let _ = bridge_handle.await;
        Ok(())
    }
}
