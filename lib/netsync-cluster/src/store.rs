//! The cluster operations the reconcilers depend on

use crate::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};

/// Read and update access to the objects netsync reconciles against.
///
/// Updates use optimistic concurrency: replacing a node that changed since it
/// was listed fails, and the caller retries on its next pass.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// List Services across all namespaces
    async fn list_services(&self) -> Result<Vec<Service>>;

    /// List all Nodes
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// Replace a Node with the given object, returning the stored result
    async fn replace_node(&self, node: &Node) -> Result<Node>;
}

/// Name of a node, if it has one
pub fn node_name(node: &Node) -> Option<&str> {
    node.metadata.name.as_deref()
}
