//! Serializable snapshot of the router state.

use crate::domain::DomainStats;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainReport {
    pub name: String,
    pub generation: u64,
    /// Router address and prefix, absent until a dynamic config arrives.
    pub ip_config: Option<String>,
    pub gateway: Option<String>,
    /// Label of the bound session.
    pub interface: Option<String>,
    pub rules: usize,
    pub arp_cache_entries: usize,
    pub arp_waiters: usize,
    /// Link sides indexed in the domain.
    pub links: usize,
    pub stats: DomainStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceReport {
    pub label: String,
    pub domain: Option<String>,
    pub arp_waiters: usize,
    pub timed_out_arp_waiters: usize,
    pub links: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterReport {
    pub generation: u64,
    pub domains: Vec<DomainReport>,
    pub interfaces: Vec<InterfaceReport>,
    pub tcp_ports_allocated: u16,
    pub udp_ports_allocated: u16,
}

impl RouterReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn domain(&self, name: &str) -> Option<&DomainReport> {
        self.domains.iter().find(|domain| domain.name == name)
    }
}
