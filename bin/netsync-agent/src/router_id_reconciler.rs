//! Router ID reconciler: assigns each node a stable address per ASN
//!
//! Every pass lists all nodes, decodes the per-ASN annotation, hands out free
//! pool addresses to nodes lacking a `router-id` and writes back only the
//! annotations whose encoded value changed. A router ID, once persisted, is
//! never reassigned.

use crate::error::ReconcileError;
use crate::metrics::{Metrics, PassOutcome};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use netsync_cluster::{node_name, ClusterStore};
use netsync_core::annotation::{self, AnnotationState, ROUTER_ID_KEY};
use netsync_core::config::RouterIdAssignmentConfig;
use netsync_core::{AddressPool, CoreError, Reconciler};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const RECONCILER_NAME: &str = "router-id";

/// One configured ASN with its pool and annotation key
#[derive(Clone, Debug)]
pub struct AsnPool {
    pub asn: String,
    pub annotation_key: String,
    pub pool: AddressPool,
}

impl AsnPool {
    pub fn from_config(config: &RouterIdAssignmentConfig) -> Result<Vec<Self>, CoreError> {
        config
            .asns
            .iter()
            .map(|entry| {
                Ok(Self {
                    asn: entry.asn.clone(),
                    annotation_key: entry.annotation_key(&config.annotation_prefix),
                    pool: entry.pool()?,
                })
            })
            .collect()
    }
}

/// A node whose annotation must be written
#[derive(Clone, Debug)]
pub struct NodeUpdate {
    pub name: String,
    /// Encoded annotation value to store
    pub value: String,
    /// Router ID handed out in this pass, if any
    pub allocated: Option<IpAddr>,
    /// The listed node with the new annotation applied
    pub node: Node,
}

/// Changes computed for one ASN
#[derive(Debug, Default)]
pub struct AsnPlan {
    /// Writes in node-name order
    pub updates: Vec<NodeUpdate>,
    /// Nodes left without a router ID because the pool ran out
    pub unserved: Vec<String>,
}

/// Compute the annotation writes for one ASN.
///
/// Nodes are processed in name order so allocation does not depend on the
/// order the API server happened to list them in.
pub fn plan_asn(pool: &AsnPool, nodes: &[Node]) -> AsnPlan {
    let mut named: Vec<(&str, &Node)> = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node_name(node) {
            Some(name) => named.push((name, node)),
            None => warn!(asn = %pool.asn, "Skipping node without a name"),
        }
    }
    named.sort_by(|a, b| a.0.cmp(b.0));

    let states: Vec<(&str, &Node, Option<&String>, AnnotationState)> = named
        .into_iter()
        .map(|(name, node)| {
            let stored = node
                .metadata
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(&pool.annotation_key));
            let state = stored.map(|raw| annotation::decode(raw)).unwrap_or_default();
            debug!(node = %name, asn = %pool.asn, ?state, "Decoded router annotation");
            (name, node, stored, state)
        })
        .collect();

    let mut used = HashSet::new();
    for (name, _, _, state) in &states {
        let Some(router_id) = state.get(ROUTER_ID_KEY) else {
            continue;
        };
        match router_id.parse::<IpAddr>() {
            Ok(addr) => {
                if !used.insert(addr) {
                    warn!(node = %name, asn = %pool.asn, router_id = %addr, "Router ID is shared with another node");
                }
            }
            Err(_) => {
                warn!(node = %name, asn = %pool.asn, router_id = %router_id, "Ignoring invalid router ID");
            }
        }
    }

    let mut available = pool.pool.available(&used);
    let mut plan = AsnPlan::default();

    for (name, node, stored, mut state) in states {
        let mut allocated = None;
        if !state.contains_key(ROUTER_ID_KEY) {
            match available.next() {
                Some(addr) => {
                    debug!(node = %name, asn = %pool.asn, router_id = %addr, "Allocating router ID");
                    state.insert(ROUTER_ID_KEY.to_string(), addr.to_string());
                    allocated = Some(addr);
                }
                None => {
                    plan.unserved.push(name.to_string());
                    continue;
                }
            }
        }

        let value = annotation::encode(&state);
        let changed = match stored {
            Some(current) => *current != value,
            None => !value.is_empty(),
        };
        if !changed {
            continue;
        }

        let mut node = node.clone();
        node.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(pool.annotation_key.clone(), value.clone());
        plan.updates.push(NodeUpdate {
            name: name.to_string(),
            value,
            allocated,
            node,
        });
    }

    plan
}

/// Counts for one pass across all ASNs
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouterIdReport {
    pub nodes: usize,
    pub allocated: usize,
    pub updated: usize,
    pub failed_updates: usize,
    pub failed_asns: usize,
}

impl fmt::Display for RouterIdReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} router IDs allocated, {} annotations updated, {} updates failed, {} ASNs failed",
            self.nodes, self.allocated, self.updated, self.failed_updates, self.failed_asns
        )
    }
}

pub struct NodeRouterIdReconciler<S> {
    store: Arc<S>,
    pools: Vec<AsnPool>,
    metrics: Arc<Metrics>,
}

impl<S: ClusterStore> NodeRouterIdReconciler<S> {
    pub fn new(store: Arc<S>, pools: Vec<AsnPool>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            pools,
            metrics,
        }
    }

    async fn pass(&self) -> Result<RouterIdReport, ReconcileError> {
        debug!("Fetching existing nodes");
        let mut nodes = self.store.list_nodes().await?;

        let mut report = RouterIdReport {
            nodes: nodes.len(),
            ..Default::default()
        };
        for pool in &self.pools {
            if let Err(e) = self.reconcile_asn(pool, &mut nodes, &mut report).await {
                error!(asn = %pool.asn, "Router ID assignment failed: {}", e);
                report.failed_asns += 1;
            }
        }
        Ok(report)
    }

    /// Apply one ASN's plan. Successfully written nodes replace their listed
    /// copy in `nodes`, so later ASNs build on the stored resourceVersion.
    async fn reconcile_asn(
        &self,
        pool: &AsnPool,
        nodes: &mut [Node],
        report: &mut RouterIdReport,
    ) -> Result<(), ReconcileError> {
        let plan = plan_asn(pool, nodes);

        for update in &plan.updates {
            info!(node = %update.name, asn = %pool.asn, annotation = %update.value, "Updating virtual router annotation");
            match self.store.replace_node(&update.node).await {
                Ok(stored) => {
                    if let Some(listed) = nodes
                        .iter_mut()
                        .find(|n| node_name(n) == Some(update.name.as_str()))
                    {
                        *listed = stored;
                    }
                    report.updated += 1;
                    self.metrics.record_node_update(&pool.asn, true);
                    if update.allocated.is_some() {
                        report.allocated += 1;
                        self.metrics
                            .router_ids_allocated_total
                            .with_label_values(&[pool.asn.as_str()])
                            .inc();
                    }
                }
                Err(e) => {
                    report.failed_updates += 1;
                    self.metrics.record_node_update(&pool.asn, false);
                    if e.is_conflict() {
                        warn!(node = %update.name, asn = %pool.asn, "Node changed since listing, retrying next pass: {}", e);
                    } else {
                        error!(node = %update.name, asn = %pool.asn, "Failed to update node: {}", e);
                    }
                }
            }
        }

        if !plan.unserved.is_empty() {
            self.metrics
                .pool_exhausted_total
                .with_label_values(&[pool.asn.as_str()])
                .inc();
            warn!(asn = %pool.asn, pool = %pool.pool, nodes = ?plan.unserved, "Nodes left without a router ID");
            return Err(CoreError::PoolExhausted {
                asn: pool.asn.clone(),
                pending: plan.unserved.len(),
            }
            .into());
        }

        Ok(())
    }
}

#[async_trait]
impl<S: ClusterStore> Reconciler for NodeRouterIdReconciler<S> {
    type Report = RouterIdReport;
    type Error = ReconcileError;

    fn name(&self) -> &'static str {
        RECONCILER_NAME
    }

    async fn reconcile_once(&self) -> Result<RouterIdReport, ReconcileError> {
        let result = self.pass().await;
        let outcome = match &result {
            Ok(report) if report.failed_updates == 0 && report.failed_asns == 0 => {
                PassOutcome::Success
            }
            Ok(_) => PassOutcome::Partial,
            Err(_) => PassOutcome::Error,
        };
        self.metrics.record_pass(RECONCILER_NAME, outcome);
        result
    }
}
