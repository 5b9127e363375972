//! Autosign - Entry Point
//!
//! Starts the daily scheduler and the status API with graceful shutdown support.

use std::sync::Arc;
use std::time::Instant;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use autosign::api::{ApiServer, AppState};
use autosign::client::{HttpTransport, ResilientClient};
use autosign::proxy::{
    AccountProxyBinding, DirectResolver, ProviderProxySource, ProxyPool, ProxyResolver,
    ProxySource,
};
use autosign::repository::{AccountRepository, StatusRepository};
use autosign::services::{BatchOrchestrator, BatchSettings, DailyScheduler, SchedulerHandle};
use autosign::storage::{JsonFileStore, Store};
use autosign::Config;

#[tokio::main]
async fn main() -> autosign::Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("autosign={},tower_http=info", config.log.level).into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if config.log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting Autosign");

    // Open storage
    let store = Store::new(Arc::new(JsonFileStore::open(&config.storage.data_dir).await?));

    // Proxy provider, pool and per-account bindings
    let source: Option<Arc<dyn ProxySource>> = match ProviderProxySource::from_config(&config.provider)? {
        Some(source) => Some(Arc::new(source)),
        None => {
            warn!("No proxy provider configured, accounts will connect directly");
            None
        }
    };
    let pool = Arc::new(ProxyPool::load(store.clone(), config.engine.disable_threshold).await?);
    let binding = match &source {
        Some(source) => Some(Arc::new(
            AccountProxyBinding::load(
                store.clone(),
                source.clone(),
                config.engine.account_fail_threshold,
            )
            .await?,
        )),
        None => None,
    };
    let resolver: Arc<dyn ProxyResolver> = match &binding {
        Some(binding) => binding.clone(),
        None => Arc::new(DirectResolver),
    };
    info!("Using proxy resolver: {}", resolver.name());

    // Create shutdown channels
    let (shutdown_tx, _) = watch::channel(false);

    // Remote client and batch orchestration
    let transport = Arc::new(HttpTransport::new(&config.remote, config.engine.request_timeout)?);
    let client = ResilientClient::new(transport, resolver, shutdown_tx.subscribe());

    let accounts = Arc::new(AccountRepository::load(store.clone()).await?);
    let statuses = Arc::new(StatusRepository::load(store.clone()).await?);
    info!("Loaded {} accounts", accounts.list().await.len());

    let orchestrator = Arc::new(BatchOrchestrator::new(
        client,
        accounts.clone(),
        statuses.clone(),
        pool.clone(),
        source.clone(),
        BatchSettings::from_config(&config),
    ));

    // Start scheduler
    let (scheduler_handle, scheduler_shutdown) = SchedulerHandle::new();
    let scheduler = DailyScheduler::new(orchestrator.clone(), &config.schedule);
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    // Start API server
    let api_server = ApiServer::new(
        config.api.clone(),
        AppState {
            orchestrator,
            accounts,
            statuses,
            pool,
            binding,
            source,
            replenish_tries: config.schedule.pool_topup_tries,
            started_at: Instant::now(),
        },
    );
    let api_shutdown = shutdown_tx.subscribe();
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!(
        "Autosign started - API: {}, daily run at {:02}:{:02} ({})",
        config.api_addr(),
        config.schedule.hour,
        config.schedule.minute,
        config.schedule.retry_mode.as_str()
    );

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    // Send shutdown signal to all services
    let _ = shutdown_tx.send(true);
    scheduler_handle.shutdown();

    // Wait for all tasks to complete
    let _ = tokio::join!(scheduler_task, api_task);

    info!("Autosign stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
