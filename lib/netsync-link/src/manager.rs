use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::net::Ipv6Addr;

/// Operations on a named local interface.
///
/// Each operation reports its own failure so callers can keep going after a
/// single address fails to apply.
#[async_trait]
pub trait LinkManager: Send + Sync {
    /// Create the interface if it does not exist and make sure it is up
    async fn ensure_link(&self, name: &str) -> Result<()>;

    /// Global-scope IPv6 addresses currently assigned to the interface
    async fn list_addresses(&self, name: &str) -> Result<BTreeSet<Ipv6Addr>>;

    /// Assign `addr` as a /128
    async fn add_address(&self, name: &str, addr: Ipv6Addr) -> Result<()>;

    /// Remove the /128 assignment of `addr`
    async fn remove_address(&self, name: &str, addr: Ipv6Addr) -> Result<()>;
}
