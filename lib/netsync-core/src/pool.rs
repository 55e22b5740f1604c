//! Deterministic address allocation from a CIDR pool

use crate::{CoreError, Result};
use ipnetwork::IpNetwork;
use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;

/// A CIDR prefix whose host addresses can be handed out in numeric order.
///
/// The pool is never persisted. It is rebuilt from configuration on every pass
/// and the only state that matters is the set of addresses already in use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddressPool {
    network: IpNetwork,
}

impl AddressPool {
    /// Parse a pool from CIDR notation. Host bits are masked off.
    pub fn parse(cidr: &str) -> Result<Self> {
        let parsed = IpNetwork::from_str(cidr.trim()).map_err(|source| CoreError::InvalidCidr {
            cidr: cidr.to_string(),
            source,
        })?;
        let network = IpNetwork::new(parsed.network(), parsed.prefix()).map_err(|source| {
            CoreError::InvalidCidr {
                cidr: cidr.to_string(),
                source,
            }
        })?;
        Ok(Self { network })
    }

    /// Check whether an address lies inside the pool
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.network.contains(addr)
    }

    /// Every address in the pool, network address first, ascending.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> {
        self.network.iter()
    }

    /// Addresses of the pool that are not in `used`, in pool order.
    ///
    /// The iterator is lazy, so callers that only need the first few
    /// candidates never walk the whole prefix.
    pub fn available<'a>(&self, used: &'a HashSet<IpAddr>) -> impl Iterator<Item = IpAddr> + 'a {
        self.network.iter().filter(move |addr| !used.contains(addr))
    }
}

impl std::fmt::Display for AddressPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.network)
    }
}

/// Parse `cidr` and collect every address of it that is not in `used`.
pub fn available_addresses(cidr: &str, used: &HashSet<IpAddr>) -> Result<Vec<IpAddr>> {
    let pool = AddressPool::parse(cidr)?;
    Ok(pool.available(used).collect())
}
