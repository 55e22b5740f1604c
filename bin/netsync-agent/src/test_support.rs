//! In-memory cluster and interface fakes for reconciler tests

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Node, Service, ServiceStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::error::ErrorResponse;
use netsync_cluster::{node_name, ClusterError, ClusterStore};
use netsync_link::{LinkError, LinkManager};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub fn api_error(code: u16, reason: &str) -> ClusterError {
    ClusterError::Kubernetes(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

pub fn node(name: &str, annotations: &[(&str, &str)]) -> Node {
    let annotations = if annotations.is_empty() {
        None
    } else {
        Some(
            annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    };
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            resource_version: Some("1".to_string()),
            annotations,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn service(namespace: &str, name: &str, ingress_ips: &[&str]) -> Service {
    let ingress = ingress_ips
        .iter()
        .map(|ip| LoadBalancerIngress {
            ip: Some(ip.to_string()),
            ..Default::default()
        })
        .collect();
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        status: Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(ingress),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn v6(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

/// Cluster store holding nodes and services in memory
#[derive(Default)]
pub struct FakeStore {
    pub nodes: Mutex<Vec<Node>>,
    pub services: Mutex<Vec<Service>>,
    /// Every node passed to `replace_node`, successful or not
    pub replaced: Mutex<Vec<Node>>,
    pub fail_listing: AtomicBool,
    /// Node names whose replace fails with a conflict
    pub conflicting: Mutex<HashSet<String>>,
}

impl FakeStore {
    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes: Mutex::new(nodes),
            ..Default::default()
        }
    }

    pub fn with_services(services: Vec<Service>) -> Self {
        Self {
            services: Mutex::new(services),
            ..Default::default()
        }
    }

    pub fn add_node(&self, node: Node) {
        self.nodes.lock().unwrap().push(node);
    }

    pub fn annotation(&self, name: &str, key: &str) -> Option<String> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|n| node_name(n) == Some(name))
            .and_then(|n| n.metadata.annotations.as_ref())
            .and_then(|a| a.get(key).cloned())
    }

    pub fn replaced_names(&self) -> Vec<String> {
        self.replaced
            .lock()
            .unwrap()
            .iter()
            .filter_map(|n| node_name(n).map(str::to_string))
            .collect()
    }

    pub fn resource_version(&self, name: &str) -> Option<String> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|n| node_name(n) == Some(name))
            .and_then(|n| n.metadata.resource_version.clone())
    }

    pub fn clear_replaced(&self) {
        self.replaced.lock().unwrap().clear();
    }
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn list_services(&self) -> netsync_cluster::Result<Vec<Service>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(api_error(503, "ServiceUnavailable"));
        }
        Ok(self.services.lock().unwrap().clone())
    }

    async fn list_nodes(&self) -> netsync_cluster::Result<Vec<Node>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(api_error(503, "ServiceUnavailable"));
        }
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn replace_node(&self, node: &Node) -> netsync_cluster::Result<Node> {
        self.replaced.lock().unwrap().push(node.clone());
        let name = node_name(node).ok_or(ClusterError::MissingName)?;
        if self.conflicting.lock().unwrap().contains(name) {
            return Err(api_error(409, "Conflict"));
        }

        let mut nodes = self.nodes.lock().unwrap();
        let Some(stored) = nodes.iter_mut().find(|n| node_name(n) == Some(name)) else {
            return Err(api_error(404, "NotFound"));
        };
        if stored.metadata.resource_version != node.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }

        let next = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        *stored = node.clone();
        stored.metadata.resource_version = Some(next.to_string());
        Ok(stored.clone())
    }
}

/// Interface holding addresses in memory and journaling every mutation
#[derive(Default)]
pub struct FakeLink {
    pub exists: AtomicBool,
    pub addresses: Mutex<BTreeSet<Ipv6Addr>>,
    /// Mutations in call order, e.g. `add 2001:db8::1`
    pub journal: Mutex<Vec<String>>,
    pub failing_adds: Mutex<HashSet<Ipv6Addr>>,
    pub fail_listing: AtomicBool,
}

impl FakeLink {
    pub fn with_addresses(addresses: &[&str]) -> Self {
        let link = Self::default();
        link.exists.store(true, Ordering::SeqCst);
        *link.addresses.lock().unwrap() = addresses.iter().map(|a| v6(a)).collect();
        link
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn current(&self) -> BTreeSet<Ipv6Addr> {
        self.addresses.lock().unwrap().clone()
    }

    fn command_failed(command: String) -> LinkError {
        LinkError::CommandFailed {
            command,
            status: "exit status: 2".to_string(),
            stderr: "RTNETLINK answers: Operation not permitted".to_string(),
        }
    }
}

#[async_trait]
impl LinkManager for FakeLink {
    async fn ensure_link(&self, name: &str) -> netsync_link::Result<()> {
        if !self.exists.swap(true, Ordering::SeqCst) {
            self.journal.lock().unwrap().push(format!("create {}", name));
        }
        Ok(())
    }

    async fn list_addresses(&self, name: &str) -> netsync_link::Result<BTreeSet<Ipv6Addr>> {
        if !self.exists.load(Ordering::SeqCst) {
            return Err(LinkError::NotFound(name.to_string()));
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Self::command_failed(format!("ip -j -6 addr show dev {}", name)));
        }
        Ok(self.current())
    }

    async fn add_address(&self, name: &str, addr: Ipv6Addr) -> netsync_link::Result<()> {
        self.journal.lock().unwrap().push(format!("add {}", addr));
        if self.failing_adds.lock().unwrap().contains(&addr) {
            return Err(Self::command_failed(format!("ip -6 addr add {}/128 dev {}", addr, name)));
        }
        self.addresses.lock().unwrap().insert(addr);
        Ok(())
    }

    async fn remove_address(&self, _name: &str, addr: Ipv6Addr) -> netsync_link::Result<()> {
        self.journal.lock().unwrap().push(format!("remove {}", addr));
        self.addresses.lock().unwrap().remove(&addr);
        Ok(())
    }
}
