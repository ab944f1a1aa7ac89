//! `fleetd serve`: the API server plus the leader-elected reconcilers.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use fleet_api::{ApiState, build_router};
use fleet_core::{Clock, FleetConfig, SystemClock};
use fleet_metrics::FleetMetrics;
use fleet_placement::CapacityStrategy;
use fleet_providers::{InMemoryDns, InMemoryIdp, quota_service_from_config};
use fleet_reconcile::{LeaderElector, LogLabeler, ReconcileContext, StoreLeaseLock, WorkScheduler};

use crate::open_store;

pub async fn run(config: FleetConfig) -> anyhow::Result<()> {
    info!("fleet control plane starting");

    let store = open_store(&config)?;
    store.ensure_schema_current()?;

    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ctx = ReconcileContext {
        store: store.clone(),
        clock: Arc::clone(&clock),
        quota: quota_service_from_config(&config.quota, store.clone()),
        dns: Arc::new(InMemoryDns::new()),
        idp: Arc::new(InMemoryIdp::new()),
        placement: Arc::new(CapacityStrategy::new(store.clone())),
        metrics: FleetMetrics::new(),
        config: Arc::clone(&config),
    };
    info!(quota = ?config.quota.kind, "drivers initialized");

    // ── Reconcilers ────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = Arc::new(WorkScheduler::from_context(&ctx, Arc::new(LogLabeler)));
    let elector = if config.leader.enabled {
        let lock = Arc::new(StoreLeaseLock::from_config(
            store.clone(),
            Arc::clone(&clock),
            &config.leader,
        ));
        let elector = LeaderElector::from_config(lock, &config.leader);
        info!(identity = elector.identity(), lease = %config.leader.lease_name, "leader election enabled");
        Some(elector)
    } else {
        None
    };
    let scheduler_handle = tokio::spawn(scheduler.run(elector, shutdown_rx));

    // ── API server ─────────────────────────────────────────────

    let router = build_router(ApiState::from_context(&ctx));
    let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
    info!(addr = %config.server.bind, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Leadership is released and in-flight ticks finish before exit.
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }

    info!("fleet control plane stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
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
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
