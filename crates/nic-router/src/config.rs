//! Declarative router configuration.
//!
//! Addresses inside domain definitions are kept as strings and parsed when
//! the configuration is applied, so that a single malformed entry is
//! reported and skipped instead of rejecting the whole document.

use crate::error::ConfigError;
use nic_router_types::MacAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const DEFAULT_MAC: MacAddress = MacAddress::new([0x02, 0x02, 0x02, 0x02, 0x02, 0x00]);
const DEFAULT_ARP_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_ARP_WAITER_PACKET_LIMIT: usize = 32;
const DEFAULT_TCP_IDLE_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_UDP_IDLE_TIMEOUT_MS: u64 = 30_000;

/// Transport protocol of forward rules, port routes and links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L4Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for L4Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L4Protocol::Tcp => write!(f, "tcp"),
            L4Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Top-level router configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_mac")]
    pub mac: MacAddress,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_arp_request_timeout_ms")]
    pub arp_request_timeout_ms: u64,
    /// Frames one ARP waiter buffers at most; later frames are dropped.
    #[serde(default = "default_arp_waiter_packet_limit")]
    pub arp_waiter_packet_limit: usize,
    #[serde(default = "default_tcp_idle_timeout_ms")]
    pub tcp_idle_timeout_ms: u64,
    #[serde(default = "default_udp_idle_timeout_ms")]
    pub udp_idle_timeout_ms: u64,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
    #[serde(default)]
    pub domains: Vec<DomainConfig>,
}

fn default_mac() -> MacAddress {
    DEFAULT_MAC
}

fn default_arp_request_timeout_ms() -> u64 {
    DEFAULT_ARP_REQUEST_TIMEOUT_MS
}

fn default_arp_waiter_packet_limit() -> usize {
    DEFAULT_ARP_WAITER_PACKET_LIMIT
}

fn default_tcp_idle_timeout_ms() -> u64 {
    DEFAULT_TCP_IDLE_TIMEOUT_MS
}

fn default_udp_idle_timeout_ms() -> u64 {
    DEFAULT_UDP_IDLE_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mac: DEFAULT_MAC,
            verbose: false,
            arp_request_timeout_ms: DEFAULT_ARP_REQUEST_TIMEOUT_MS,
            arp_waiter_packet_limit: DEFAULT_ARP_WAITER_PACKET_LIMIT,
            tcp_idle_timeout_ms: DEFAULT_TCP_IDLE_TIMEOUT_MS,
            udp_idle_timeout_ms: DEFAULT_UDP_IDLE_TIMEOUT_MS,
            policies: Vec::new(),
            domains: Vec::new(),
        }
    }
}

impl RouterConfig {
    /// Parses a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_policy(mut self, label_prefix: &str, domain: &str) -> Self {
        self.policies.push(PolicyConfig {
            label_prefix: label_prefix.to_string(),
            domain: domain.to_string(),
        });
        self
    }

    pub fn with_domain(mut self, domain: DomainConfig) -> Self {
        self.domains.push(domain);
        self
    }

    pub fn with_timeouts(mut self, arp_request_ms: u64, tcp_idle_ms: u64, udp_idle_ms: u64) -> Self {
        self.arp_request_timeout_ms = arp_request_ms;
        self.tcp_idle_timeout_ms = tcp_idle_ms;
        self.udp_idle_timeout_ms = udp_idle_ms;
        self
    }

    pub fn with_arp_waiter_packet_limit(mut self, limit: usize) -> Self {
        self.arp_waiter_packet_limit = limit;
        self
    }

    pub fn arp_request_timeout(&self) -> Duration {
        Duration::from_millis(self.arp_request_timeout_ms)
    }

    pub fn idle_timeout(&self, protocol: L4Protocol) -> Duration {
        match protocol {
            L4Protocol::Tcp => Duration::from_millis(self.tcp_idle_timeout_ms),
            L4Protocol::Udp => Duration::from_millis(self.udp_idle_timeout_ms),
        }
    }
}

/// Maps session labels starting with `label_prefix` to a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub label_prefix: String,
    pub domain: String,
}

/// One domain definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub name: String,
    /// Router address and subnet (`"10.0.1.1/24"`). Absent if the domain
    /// obtains its IP config at runtime.
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default = "default_true")]
    pub use_arp: bool,
    #[serde(default)]
    pub tcp_forward: Vec<ForwardRuleConfig>,
    #[serde(default)]
    pub udp_forward: Vec<ForwardRuleConfig>,
    #[serde(default)]
    pub nat: Vec<NatRuleConfig>,
    #[serde(default)]
    pub port_routes: Vec<PortRouteConfig>,
    #[serde(default)]
    pub ip: Vec<IpRuleConfig>,
}

impl DomainConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            interface: None,
            gateway: None,
            use_arp: true,
            tcp_forward: Vec::new(),
            udp_forward: Vec::new(),
            nat: Vec::new(),
            port_routes: Vec::new(),
            ip: Vec::new(),
        }
    }

    pub fn with_interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self
    }

    pub fn with_gateway(mut self, gateway: &str) -> Self {
        self.gateway = Some(gateway.to_string());
        self
    }

    pub fn with_forward(mut self, protocol: L4Protocol, rule: ForwardRuleConfig) -> Self {
        match protocol {
            L4Protocol::Tcp => self.tcp_forward.push(rule),
            L4Protocol::Udp => self.udp_forward.push(rule),
        }
        self
    }

    pub fn with_nat(mut self, domain: &str, tcp_ports: u32, udp_ports: u32) -> Self {
        self.nat.push(NatRuleConfig {
            domain: domain.to_string(),
            tcp_ports,
            udp_ports,
        });
        self
    }

    pub fn with_port_route(mut self, route: PortRouteConfig) -> Self {
        self.port_routes.push(route);
        self
    }

    pub fn with_ip_rule(mut self, dst: &str, domain: &str) -> Self {
        self.ip.push(IpRuleConfig {
            dst: dst.to_string(),
            domain: domain.to_string(),
        });
        self
    }

    pub fn forward_rules(&self, protocol: L4Protocol) -> &[ForwardRuleConfig] {
        match protocol {
            L4Protocol::Tcp => &self.tcp_forward,
            L4Protocol::Udp => &self.udp_forward,
        }
    }
}

/// Forwards a port of the router address to a host in another domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardRuleConfig {
    pub port: u16,
    pub domain: String,
    pub to: String,
    #[serde(default)]
    pub to_port: Option<u16>,
}

impl ForwardRuleConfig {
    pub fn new(port: u16, domain: &str, to: &str) -> Self {
        Self {
            port,
            domain: domain.to_string(),
            to: to.to_string(),
            to_port: None,
        }
    }
}

/// Translates traffic from `domain` to the router address of the
/// enclosing domain, with per-protocol port quotas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatRuleConfig {
    pub domain: String,
    #[serde(default)]
    pub tcp_ports: u32,
    #[serde(default)]
    pub udp_ports: u32,
}

/// Routes a destination port for sessions whose label starts with
/// `label_prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRouteConfig {
    pub protocol: L4Protocol,
    pub port: u16,
    pub label_prefix: String,
    pub domain: String,
    #[serde(default)]
    pub via: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

impl PortRouteConfig {
    pub fn new(protocol: L4Protocol, port: u16, label_prefix: &str, domain: &str) -> Self {
        Self {
            protocol,
            port,
            label_prefix: label_prefix.to_string(),
            domain: domain.to_string(),
            via: None,
            to: None,
        }
    }

    pub fn with_via(mut self, via: &str) -> Self {
        self.via = Some(via.to_string());
        self
    }

    pub fn with_to(mut self, to: &str) -> Self {
        self.to = Some(to.to_string());
        self
    }
}

/// Routes destinations inside `dst` to `domain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRuleConfig {
    pub dst: String,
    pub domain: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::from_json("{}").unwrap();
        assert_eq!(config, RouterConfig::default());
        assert_eq!(config.mac.to_string(), "02:02:02:02:02:00");
        assert_eq!(config.arp_request_timeout(), Duration::from_secs(10));
        assert_eq!(config.arp_waiter_packet_limit, 32);
        assert_eq!(config.idle_timeout(L4Protocol::Udp), Duration::from_secs(30));
    }

    #[test]
    fn test_from_json() {
        let text = r#"{
            "verbose": true,
            "tcp_idle_timeout_ms": 5000,
            "policies": [{ "label_prefix": "lan", "domain": "lan" }],
            "domains": [{
                "name": "uplink",
                "interface": "10.0.2.1/24",
                "gateway": "10.0.2.254",
                "nat": [{ "domain": "lan", "tcp_ports": 100 }],
                "tcp_forward": [{ "port": 80, "domain": "lan", "to": "10.0.1.5", "to_port": 8080 }],
                "port_routes": [{ "protocol": "udp", "port": 53, "label_prefix": "lan", "domain": "lan", "to": "10.0.1.2" }],
                "ip": [{ "dst": "0.0.0.0/0", "domain": "lan" }]
            }]
        }"#;
        let config = RouterConfig::from_json(text).unwrap();
        assert!(config.verbose);
        assert_eq!(config.idle_timeout(L4Protocol::Tcp), Duration::from_secs(5));

        let uplink = &config.domains[0];
        assert!(uplink.use_arp);
        assert_eq!(uplink.nat[0].udp_ports, 0);
        assert_eq!(uplink.tcp_forward[0].to_port, Some(8080));
        assert_eq!(uplink.port_routes[0].protocol, L4Protocol::Udp);
        assert_eq!(uplink.port_routes[0].via, None);
        assert_eq!(uplink.ip[0].dst, "0.0.0.0/0");
    }

    #[test]
    fn test_from_json_rejects_bad_document() {
        assert!(matches!(
            RouterConfig::from_json(r#"{ "mac": "nope" }"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(RouterConfig::from_json(r#"{ "domains": [{}] }"#).is_err());
    }
}
