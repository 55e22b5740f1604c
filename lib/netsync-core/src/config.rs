//! Daemon configuration loaded once from a YAML document

use crate::annotation::{annotation_key, DEFAULT_ANNOTATION_PREFIX};
use crate::pool::AddressPool;
use crate::{CoreError, Result};
use ipnetwork::{IpNetwork, Ipv6Network};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "NETSYNC_CONFIG";

/// Configuration file used when `NETSYNC_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const DEFAULT_INTERFACE: &str = "netsync0";
const DEFAULT_INTERVAL_SECONDS: u64 = 10;
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Top-level configuration document
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Mirroring of service load-balancer addresses onto a local interface
    #[serde(default)]
    pub host_route_assignment: Option<HostRouteAssignmentConfig>,

    /// Per-ASN router ID allocation
    #[serde(default)]
    pub router_id_assignment: Option<RouterIdAssignmentConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics and health endpoint; disabled when absent
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRouteAssignmentConfig {
    /// Name of the dummy interface holding service addresses
    #[serde(default = "default_interface")]
    pub interface: String,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// IPv6 networks whose service addresses may be mirrored
    #[serde(default)]
    pub service_networks: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterIdAssignmentConfig {
    #[serde(default = "default_annotation_prefix")]
    pub annotation_prefix: String,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    #[serde(default)]
    pub asns: Vec<AsnPoolConfig>,
}

/// One ASN and the pool its router IDs are drawn from
#[derive(Clone, Debug, Deserialize)]
pub struct AsnPoolConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub asn: String,
    pub network: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    pub listen_address: SocketAddr,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_interface() -> String {
    DEFAULT_INTERFACE.to_string()
}

fn default_interval_seconds() -> u64 {
    DEFAULT_INTERVAL_SECONDS
}

fn default_annotation_prefix() -> String {
    DEFAULT_ANNOTATION_PREFIX.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// ASNs are opaque identifiers, but YAML authors tend to write them unquoted.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

impl Config {
    /// Read, parse and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        debug!("Read configuration from {}", path.as_ref().display());
        Self::from_yaml(&raw)
    }

    /// Parse and validate a configuration document
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path from `NETSYNC_CONFIG`, or `config.yaml`
    pub fn path_from_env() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_route_assignment.is_none() && self.router_id_assignment.is_none() {
            return Err(CoreError::InvalidConfiguration(
                "neither hostRouteAssignment nor routerIdAssignment is configured".to_string(),
            ));
        }
        if let Some(host_routes) = &self.host_route_assignment {
            host_routes.validate()?;
        }
        if let Some(router_ids) = &self.router_id_assignment {
            router_ids.validate()?;
        }
        Ok(())
    }
}

impl HostRouteAssignmentConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Parsed service networks. Every entry must be an IPv6 CIDR.
    pub fn allowed_networks(&self) -> Result<Vec<Ipv6Network>> {
        self.service_networks
            .iter()
            .map(|cidr| parse_ipv6_network(cidr))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        validate_interface_name(&self.interface)?;
        validate_interval("hostRouteAssignment", self.interval_seconds)?;
        self.allowed_networks()?;
        Ok(())
    }
}

impl RouterIdAssignmentConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    fn validate(&self) -> Result<()> {
        validate_interval("routerIdAssignment", self.interval_seconds)?;
        let mut seen = HashSet::new();
        for entry in &self.asns {
            if entry.asn.trim().is_empty() {
                return Err(CoreError::InvalidConfiguration(
                    "ASN identifier must not be empty".to_string(),
                ));
            }
            if !seen.insert(entry.asn.as_str()) {
                return Err(CoreError::InvalidConfiguration(format!(
                    "ASN {} is configured more than once",
                    entry.asn
                )));
            }
            entry.pool()?;
        }
        Ok(())
    }
}

impl AsnPoolConfig {
    pub fn pool(&self) -> Result<AddressPool> {
        AddressPool::parse(&self.network)
    }

    pub fn annotation_key(&self, prefix: &str) -> String {
        annotation_key(prefix, &self.asn)
    }
}

fn parse_ipv6_network(cidr: &str) -> Result<Ipv6Network> {
    match IpNetwork::from_str(cidr.trim()) {
        Ok(IpNetwork::V6(network)) => Ok(network),
        Ok(IpNetwork::V4(_)) => Err(CoreError::InvalidConfiguration(format!(
            "service network {} is not an IPv6 network",
            cidr
        ))),
        Err(source) => Err(CoreError::InvalidCidr {
            cidr: cidr.to_string(),
            source,
        }),
    }
}

fn validate_interface_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.len() > MAX_INTERFACE_NAME_LEN
        || name.contains('/')
        || name.chars().any(char::is_whitespace)
    {
        return Err(CoreError::InvalidConfiguration(format!(
            "invalid interface name '{}'",
            name
        )));
    }
    Ok(())
}

fn validate_interval(section: &str, seconds: u64) -> Result<()> {
    if seconds == 0 {
        return Err(CoreError::InvalidConfiguration(format!(
            "{}.intervalSeconds must be greater than zero",
            section
        )));
    }
    Ok(())
}
