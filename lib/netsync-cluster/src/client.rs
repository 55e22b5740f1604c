//! Kubernetes-backed cluster store

use crate::store::{node_name, ClusterStore};
use crate::{ClusterError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::{ListParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// KubeStore wraps the Kubernetes client for Service and Node operations
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Build a store from the ambient configuration.
    ///
    /// In-cluster service account credentials are tried first, then
    /// `KUBECONFIG` or `~/.kube/config`.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn list_services(&self) -> Result<Vec<Service>> {
        let services: Api<Service> = Api::all(self.client.clone());
        let list = services.list(&ListParams::default()).await?;

        debug!("Listed {} services", list.items.len());
        Ok(list.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;

        debug!("Listed {} nodes", list.items.len());
        Ok(list.items)
    }

    async fn replace_node(&self, node: &Node) -> Result<Node> {
        let name = node_name(node).ok_or(ClusterError::MissingName)?;
        let nodes: Api<Node> = Api::all(self.client.clone());
        let updated = nodes.replace(name, &PostParams::default(), node).await?;

        debug!(node = %name, "Replaced node");
        Ok(updated)
    }
}
