//! NAT rules: source translation for traffic from another domain.

use crate::config::L4Protocol;
use crate::DomainId;
use nic_router_common::{PortAllocatorGuard, SharedPortAllocator};
use std::collections::BTreeMap;

/// Translates traffic arriving from `domain` to the router address of the
/// domain holding the rule.
///
/// The guards draw from the router-wide allocators and enforce the rule's
/// port quotas.
#[derive(Debug)]
pub struct NatRule {
    domain: DomainId,
    tcp_ports: PortAllocatorGuard,
    udp_ports: PortAllocatorGuard,
}

impl NatRule {
    pub fn new(
        domain: DomainId,
        tcp_allocator: SharedPortAllocator,
        tcp_quota: u32,
        udp_allocator: SharedPortAllocator,
        udp_quota: u32,
    ) -> Self {
        Self {
            domain,
            tcp_ports: PortAllocatorGuard::new(tcp_allocator, tcp_quota),
            udp_ports: PortAllocatorGuard::new(udp_allocator, udp_quota),
        }
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn port_allocator(&self, protocol: L4Protocol) -> &PortAllocatorGuard {
        match protocol {
            L4Protocol::Tcp => &self.tcp_ports,
            L4Protocol::Udp => &self.udp_ports,
        }
    }

    pub fn port_allocator_mut(&mut self, protocol: L4Protocol) -> &mut PortAllocatorGuard {
        match protocol {
            L4Protocol::Tcp => &mut self.tcp_ports,
            L4Protocol::Udp => &mut self.udp_ports,
        }
    }
}

/// NAT rules of one domain, keyed by the translated domain.
#[derive(Debug, Default)]
pub struct NatRuleTree {
    rules: BTreeMap<DomainId, NatRule>,
}

impl NatRuleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a rule. A second rule for the same domain is rejected and
    /// handed back.
    pub fn insert(&mut self, rule: NatRule) -> Result<(), NatRule> {
        if self.rules.contains_key(&rule.domain) {
            return Err(rule);
        }
        self.rules.insert(rule.domain, rule);
        Ok(())
    }

    pub fn find_by_domain(&self, domain: DomainId) -> Option<&NatRule> {
        self.rules.get(&domain)
    }

    pub fn find_by_domain_mut(&mut self, domain: DomainId) -> Option<&mut NatRule> {
        self.rules.get_mut(&domain)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NatRule> {
        self.rules.values()
    }

    /// Removes all rules and returns them. Ports still held through their
    /// guards stay allocated.
    pub fn clear(&mut self) -> Vec<NatRule> {
        std::mem::take(&mut self.rules).into_values().collect()
    }
}
