//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::DaemonConfig;
use crate::engine::Broker;
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::Scheduler;
use crate::storage::{self, Store};
use osb_upstream::{ProvisioningApi, UpstreamClient};
use std::sync::Arc;
use tokio::net::TcpListener;

/// OSB daemon server
pub struct Server {
    config: DaemonConfig,
    broker: Arc<Broker>,
    scheduler: Arc<Scheduler>,
}

impl Server {
    /// Connect the store and build the upstream client and engine
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let store: Arc<dyn Store> = storage::connect(&config.storage).await?;

        let client = UpstreamClient::new(&config.upstream)
            .map_err(|e| DaemonError::Config(format!("Invalid upstream client: {}", e)))?;
        tracing::info!(base_url = %client.base_url(), "Upstream client ready");
        let upstream: Arc<dyn ProvisioningApi> = Arc::new(client);

        let broker = Arc::new(Broker::new(
            store.clone(),
            upstream,
            config.broker.clone(),
        ));
        let scheduler = Scheduler::new(config.scheduler.clone(), store);

        Ok(Self {
            config,
            broker,
            scheduler,
        })
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let state = AppState::new(self.broker.clone(), self.config.catalog.clone());
        let app = create_router(state, &self.config.server);

        let listener = TcpListener::bind(addr).await?;

        tracing::info!("OSB daemon listening on {}", addr);
        tracing::info!(async_mode = ?self.config.broker.async_mode, "Broker ready");

        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            scheduler.start().await;
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("OSB daemon shutting down");

        self.scheduler.stop().await;

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
