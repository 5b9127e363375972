//! API server using Axum
//!
//! Serves run status, proxy status and account management while batches
//! run on their own tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::error::{AutosignError, Result};
use crate::proxy::{AccountProxyBinding, ProxyPool, ProxySource};
use crate::repository::{AccountRepository, StatusRepository};
use crate::services::BatchOrchestrator;

use super::middleware::cors_layer;
use super::routes;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<BatchOrchestrator>,
    pub accounts: Arc<AccountRepository>,
    pub statuses: Arc<StatusRepository>,
    pub pool: Arc<ProxyPool>,
    /// Absent when accounts connect directly
    pub binding: Option<Arc<AccountProxyBinding>>,
    /// Absent when no provider is configured
    pub source: Option<Arc<dyn ProxySource>>,
    /// Provider attempts used by a manual pool update
    pub replenish_tries: u32,
    pub started_at: Instant,
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router
    fn build_router(&self) -> Router {
        let cors = cors_layer(&self.config.cors_origins);

        routes::create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| AutosignError::InvalidConfig(format!("invalid API address: {}", e)))?;

        let router = self.build_router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on {}", addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| AutosignError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
