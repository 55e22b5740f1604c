//! Interface management through iproute2
//!
//! Requires the `ip` binary and CAP_NET_ADMIN. Output is requested as JSON
//! (`ip -j`) so no text scraping is needed for address listings.

use crate::manager::LinkManager;
use crate::{LinkError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::Ipv6Addr;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DEFAULT_IP_BINARY: &str = "ip";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const GLOBAL_SCOPE: &str = "global";
const INET6_FAMILY: &str = "inet6";

/// Link manager that shells out to `ip`
#[derive(Clone, Debug)]
pub struct IpCommandLink {
    binary: String,
    /// Upper bound for a single `ip` invocation; the child is killed when it expires
    timeout: Duration,
}

/// One entry of `ip -j addr show`
#[derive(Debug, Deserialize)]
struct LinkAddresses {
    #[serde(default)]
    addr_info: Vec<AddrInfo>,
}

#[derive(Debug, Deserialize)]
struct AddrInfo {
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    local: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl IpCommandLink {
    /// Use `ip` from `PATH`
    pub fn new() -> Self {
        Self::with_binary(DEFAULT_IP_BINARY)
    }

    /// Use a specific `ip` binary
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let command = format!("{} {}", self.binary, args.join(" "));
        debug!("Running {}", command);

        let mut cmd = Command::new(&self.binary);
        cmd.args(args).kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| LinkError::Timeout {
                command: command.clone(),
                timeout: self.timeout,
            })?
            .map_err(|source| LinkError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(LinkError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    async fn link_exists(&self, name: &str) -> Result<bool> {
        match self.run(&["-j", "link", "show", "dev", name]).await {
            Ok(_) => Ok(true),
            Err(e) if is_missing_device(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn address_arg(addr: Ipv6Addr) -> String {
        format!("{}/128", addr)
    }
}

impl Default for IpCommandLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LinkManager for IpCommandLink {
    async fn ensure_link(&self, name: &str) -> Result<()> {
        if !self.link_exists(name).await? {
            info!(interface = %name, "Creating dummy interface");
            self.run(&["link", "add", name, "type", "dummy"]).await?;
        }
        self.run(&["link", "set", name, "up"]).await?;
        Ok(())
    }

    async fn list_addresses(&self, name: &str) -> Result<BTreeSet<Ipv6Addr>> {
        let stdout = match self.run(&["-j", "-6", "addr", "show", "dev", name]).await {
            Ok(stdout) => stdout,
            Err(e) if is_missing_device(&e) => return Err(LinkError::NotFound(name.to_string())),
            Err(e) => return Err(e),
        };
        parse_global_addresses(&stdout)
    }

    async fn add_address(&self, name: &str, addr: Ipv6Addr) -> Result<()> {
        let address = Self::address_arg(addr);
        self.run(&["-6", "addr", "add", address.as_str(), "dev", name]).await?;
        Ok(())
    }

    async fn remove_address(&self, name: &str, addr: Ipv6Addr) -> Result<()> {
        let address = Self::address_arg(addr);
        self.run(&["-6", "addr", "del", address.as_str(), "dev", name]).await?;
        Ok(())
    }
}

fn is_missing_device(error: &LinkError) -> bool {
    match error {
        LinkError::CommandFailed { stderr, .. } => {
            stderr.contains("does not exist") || stderr.contains("Cannot find device")
        }
        _ => false,
    }
}

/// Extract global-scope IPv6 addresses from `ip -j -6 addr show` output
fn parse_global_addresses(stdout: &[u8]) -> Result<BTreeSet<Ipv6Addr>> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeSet::new());
    }

    let links: Vec<LinkAddresses> = serde_json::from_slice(stdout)?;
    let mut addresses = BTreeSet::new();
    for info in links.iter().flat_map(|link| link.addr_info.iter()) {
        if info.family.as_deref().is_some_and(|f| f != INET6_FAMILY) {
            continue;
        }
        if info.scope.as_deref() != Some(GLOBAL_SCOPE) {
            continue;
        }
        let Some(local) = info.local.as_deref() else {
            continue;
        };
        match local.parse::<Ipv6Addr>() {
            Ok(addr) => {
                addresses.insert(addr);
            }
            Err(e) => warn!(address = %local, "Ignoring unparsable interface address: {}", e),
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_SHOW: &str = r#"[{"ifindex":7,"ifname":"netsync0","flags":["BROADCAST","NOARP","UP","LOWER_UP"],"mtu":1500,"qdisc":"noqueue","operstate":"UNKNOWN","group":"default","txqlen":1000,"link_type":"ether","address":"d6:3e:1a:9f:0b:22","broadcast":"ff:ff:ff:ff:ff:ff","addr_info":[{"family":"inet6","local":"2001:db8:1::10","prefixlen":128,"scope":"global","valid_life_time":4294967295,"preferred_life_time":4294967295},{"family":"inet6","local":"2001:db8:1::11","prefixlen":128,"scope":"global","valid_life_time":4294967295,"preferred_life_time":4294967295},{"family":"inet6","local":"fe80::d43e:1aff:fe9f:b22","prefixlen":64,"scope":"link","valid_life_time":4294967295,"preferred_life_time":4294967295}]}]"#;

    #[test]
    fn test_parse_keeps_only_global_addresses() {
        let addresses = parse_global_addresses(ADDR_SHOW.as_bytes()).unwrap();
        let expected: BTreeSet<Ipv6Addr> = ["2001:db8:1::10", "2001:db8:1::11"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(addresses, expected);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_global_addresses(b"").unwrap().is_empty());
        assert!(parse_global_addresses(b"[]\n").unwrap().is_empty());
        assert!(parse_global_addresses(b"[{}]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_tolerates_empty_addr_info_entries() {
        let raw = r#"[{"ifname":"netsync0","addr_info":[{},{"family":"inet6","local":"2001:db8::1","scope":"global"}]}]"#;
        let addresses = parse_global_addresses(raw.as_bytes()).unwrap();
        assert_eq!(addresses.len(), 1);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_global_addresses(b"Device \"x\" does not exist."),
            Err(LinkError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_device_detection() {
        let missing = LinkError::CommandFailed {
            command: "ip -j link show dev netsync0".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "Device \"netsync0\" does not exist.".to_string(),
        };
        let denied = LinkError::CommandFailed {
            command: "ip link add netsync0 type dummy".to_string(),
            status: "exit status: 2".to_string(),
            stderr: "RTNETLINK answers: Operation not permitted".to_string(),
        };
        assert!(is_missing_device(&missing));
        assert!(!is_missing_device(&denied));
    }

    #[test]
    fn test_address_arg_is_host_route() {
        let addr: Ipv6Addr = "2001:db8:1::10".parse().unwrap();
        assert_eq!(IpCommandLink::address_arg(addr), "2001:db8:1::10/128");
    }

    #[tokio::test]
    async fn test_hung_command_times_out() {
        let link = IpCommandLink::with_binary("sleep").with_timeout(Duration::from_millis(50));
        let err = link.run(&["5"]).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_spawn_error() {
        let link = IpCommandLink::with_binary("/nonexistent/netsync-ip");
        let err = link.list_addresses("netsync0").await.unwrap_err();
        assert!(matches!(err, LinkError::Spawn { .. }));
    }
}
