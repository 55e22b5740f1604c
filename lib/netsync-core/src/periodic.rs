//! Fixed-interval reconciliation loop with cooperative shutdown

use async_trait::async_trait;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// One reconciliation concern, driven a pass at a time.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Summary of a completed pass
    type Report: Display + Send;
    /// Failure that aborted a pass
    type Error: Display + Send;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Run exactly one pass
    async fn reconcile_once(&self) -> Result<Self::Report, Self::Error>;
}

/// Run `reconciler` every `interval` until `shutdown` turns true or its sender is dropped.
///
/// Pass failures are logged and the next pass runs on schedule. The shutdown
/// signal interrupts the sleep between passes but never a pass in flight.
/// Returns the number of passes run.
pub async fn run_periodic<R>(
    reconciler: &R,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64
where
    R: Reconciler + ?Sized,
{
    let name = reconciler.name();
    info!("Starting {} loop with interval {:?}", name, interval);

    let mut passes = 0;
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        passes += 1;
        match reconciler.reconcile_once().await {
            Ok(report) => info!(reconciler = name, "Pass completed: {}", report),
            Err(e) => error!(reconciler = name, "Pass failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("{} loop stopped after {} pass(es)", name, passes);
    passes
}
