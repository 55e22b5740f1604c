//! Service route reconciler: mirrors load-balancer addresses onto a dummy interface
//!
//! The desired set is every IPv6 ingress address of every Service that falls
//! inside an allowed network. Each pass converges the interface to exactly
//! that set.

use crate::error::ReconcileError;
use crate::metrics::{Metrics, PassOutcome};
use async_trait::async_trait;
use ipnetwork::Ipv6Network;
use k8s_openapi::api::core::v1::Service;
use netsync_cluster::ClusterStore;
use netsync_core::Reconciler;
use netsync_link::LinkManager;
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const RECONCILER_NAME: &str = "service-route";

/// Collect the ingress addresses of `services` that fall inside one of `allowed`.
pub fn desired_addresses(services: &[Service], allowed: &[Ipv6Network]) -> BTreeSet<Ipv6Addr> {
    let mut desired = BTreeSet::new();

    for service in services {
        let ingresses = service
            .status
            .as_ref()
            .and_then(|status| status.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref());
        let Some(ingresses) = ingresses else {
            continue;
        };
        let key = format!(
            "{}/{}",
            service.metadata.namespace.as_deref().unwrap_or_default(),
            service.metadata.name.as_deref().unwrap_or_default()
        );

        for ingress in ingresses {
            let Some(raw) = ingress.ip.as_deref() else {
                debug!(service = %key, "Skipping ingress without an IP");
                continue;
            };
            let addr = match raw.parse::<IpAddr>() {
                Ok(IpAddr::V6(addr)) => addr,
                Ok(IpAddr::V4(_)) => {
                    debug!(service = %key, address = %raw, "Skipping IPv4 ingress address");
                    continue;
                }
                Err(e) => {
                    warn!(service = %key, address = %raw, "Ignoring invalid ingress address: {}", e);
                    continue;
                }
            };

            if allowed.iter().any(|network| network.contains(addr)) {
                desired.insert(addr);
            } else {
                debug!(service = %key, address = %addr, "Ingress address outside allowed networks");
            }
        }
    }

    desired
}

/// Changes needed to turn one address set into another
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InterfaceDiff {
    pub remove: Vec<Ipv6Addr>,
    pub add: Vec<Ipv6Addr>,
}

impl InterfaceDiff {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

pub fn diff(actual: &BTreeSet<Ipv6Addr>, desired: &BTreeSet<Ipv6Addr>) -> InterfaceDiff {
    InterfaceDiff {
        remove: actual.difference(desired).copied().collect(),
        add: desired.difference(actual).copied().collect(),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceRouteReport {
    pub desired: usize,
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
}

impl fmt::Display for ServiceRouteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} desired addresses, {} added, {} removed, {} failed",
            self.desired, self.added, self.removed, self.failed
        )
    }
}

pub struct ServiceRouteReconciler<S, L> {
    store: Arc<S>,
    link: Arc<L>,
    interface: String,
    allowed: Vec<Ipv6Network>,
    metrics: Arc<Metrics>,
}

impl<S: ClusterStore, L: LinkManager> ServiceRouteReconciler<S, L> {
    pub fn new(
        store: Arc<S>,
        link: Arc<L>,
        interface: impl Into<String>,
        allowed: Vec<Ipv6Network>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            link,
            interface: interface.into(),
            allowed,
            metrics,
        }
    }

    async fn pass(&self) -> Result<ServiceRouteReport, ReconcileError> {
        debug!("Fetching services");
        let services = self.store.list_services().await?;
        let desired = desired_addresses(&services, &self.allowed);
        self.metrics.desired_addresses.set(desired.len() as i64);

        self.converge(&desired).await
    }

    /// Bring the interface to exactly `desired`, removals first
    pub async fn converge(
        &self,
        desired: &BTreeSet<Ipv6Addr>,
    ) -> Result<ServiceRouteReport, ReconcileError> {
        self.link.ensure_link(&self.interface).await?;
        let actual = self.link.list_addresses(&self.interface).await?;
        let changes = diff(&actual, desired);

        let mut report = ServiceRouteReport {
            desired: desired.len(),
            ..Default::default()
        };
        if changes.is_empty() {
            return Ok(report);
        }

        for addr in changes.remove {
            match self.link.remove_address(&self.interface, addr).await {
                Ok(()) => {
                    info!(interface = %self.interface, address = %addr, "Removed address");
                    report.removed += 1;
                    self.metrics.record_interface_change("remove", true);
                }
                Err(e) => {
                    error!(interface = %self.interface, address = %addr, "Failed to remove address: {}", e);
                    report.failed += 1;
                    self.metrics.record_interface_change("remove", false);
                }
            }
        }

        for addr in changes.add {
            match self.link.add_address(&self.interface, addr).await {
                Ok(()) => {
                    info!(interface = %self.interface, address = %addr, "Added address");
                    report.added += 1;
                    self.metrics.record_interface_change("add", true);
                }
                Err(e) => {
                    error!(interface = %self.interface, address = %addr, "Failed to add address: {}", e);
                    report.failed += 1;
                    self.metrics.record_interface_change("add", false);
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl<S: ClusterStore, L: LinkManager> Reconciler for ServiceRouteReconciler<S, L> {
    type Report = ServiceRouteReport;
    type Error = ReconcileError;

    fn name(&self) -> &'static str {
        RECONCILER_NAME
    }

    async fn reconcile_once(&self) -> Result<ServiceRouteReport, ReconcileError> {
        let result = self.pass().await;
        let outcome = match &result {
            Ok(report) if report.failed == 0 => PassOutcome::Success,
            Ok(_) => PassOutcome::Partial,
            Err(_) => PassOutcome::Error,
        };
        self.metrics.record_pass(RECONCILER_NAME, outcome);
        result
    }
}
