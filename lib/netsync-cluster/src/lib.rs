//! Kubernetes object access for netsync
pub mod client;
pub mod error;
pub mod store;

pub use client::KubeStore;
pub use error::{ClusterError, Result};
pub use store::{node_name, ClusterStore};
