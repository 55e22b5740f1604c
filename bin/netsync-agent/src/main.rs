use anyhow::{Context, Result};
use netsync_cluster::KubeStore;
use netsync_core::{run_periodic, Config};
use netsync_link::IpCommandLink;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

mod error;
mod metrics;
mod router_id_reconciler;
mod service_route_reconciler;
mod telemetry;

#[cfg(test)]
mod test_support;

use metrics::Metrics;
use router_id_reconciler::{AsnPool, NodeRouterIdReconciler};
use service_route_reconciler::ServiceRouteReconciler;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::path_from_env();
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    telemetry::init(&config.logging)?;
    info!("Starting netsync-agent...");

    let metrics = Arc::new(Metrics::new()?);
    let store = Arc::new(
        KubeStore::try_default()
            .await
            .context("failed to create Kubernetes client")?,
    );
    info!("Kubernetes client initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    if let Some(host_routes) = &config.host_route_assignment {
        let allowed = host_routes.allowed_networks()?;
        info!(
            "Service route reconciler managing {} with {} allowed networks",
            host_routes.interface,
            allowed.len()
        );
        let reconciler = ServiceRouteReconciler::new(
            store.clone(),
            Arc::new(IpCommandLink::new()),
            host_routes.interface.clone(),
            allowed,
            metrics.clone(),
        );
        let interval = host_routes.interval();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            run_periodic(&reconciler, interval, shutdown).await;
        }));
    }

    if let Some(router_ids) = &config.router_id_assignment {
        let pools = AsnPool::from_config(router_ids)?;
        for pool in &pools {
            info!("Router IDs for ASN {} drawn from {} ({})", pool.asn, pool.pool, pool.annotation_key);
        }
        let reconciler = NodeRouterIdReconciler::new(store.clone(), pools, metrics.clone());
        let interval = router_ids.interval();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            run_periodic(&reconciler, interval, shutdown).await;
        }));
    }

    if let Some(metrics_config) = &config.metrics {
        let addr = metrics_config.listen_address;
        let metrics = metrics.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, metrics, shutdown).await {
                error!("Metrics server error: {}", e);
            }
        }));
    }

    wait_for_shutdown().await?;
    info!("Shutdown signal received, stopping reconcilers...");

    // Errors only when every receiver is gone.
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            error!("Task ended abnormally: {}", e);
        }
    }

    info!("netsync-agent stopped");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
