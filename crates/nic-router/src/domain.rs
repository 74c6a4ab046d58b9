//! Domains: named network zones with their own address space and rules.

use crate::arp::ArpCache;
use crate::config::L4Protocol;
use crate::error::DomainError;
use crate::link::{LinkKey, LinkRole};
use crate::rules::{ForwardRuleTree, IpRuleTree, NatRuleTree, PortRouteTree};
use crate::{DomainId, InterfaceId, LinkId, WaiterId};
use nic_router_common::{HasRefCount, Pointer};
use nic_router_types::Ipv4AddressPrefix;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;

/// Router address, subnet and optional gateway of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpConfig {
    pub interface: Ipv4AddressPrefix,
    pub gateway: Option<Ipv4Addr>,
}

impl IpConfig {
    pub fn new(interface: Ipv4AddressPrefix, gateway: Option<Ipv4Addr>) -> Self {
        Self { interface, gateway }
    }

    /// Returns the router's own address in the domain.
    pub fn router_ip(&self) -> Ipv4Addr {
        self.interface.address()
    }
}

/// Per-domain counters.
///
/// `packets_forwarded` counts frames transmitted into the domain;
/// `packets_dropped` counts frames received from it that were dropped.
/// ARP waiter counters belong to the domain the waiter waited in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainStats {
    pub packets_forwarded: u64,
    pub packets_dropped: u64,
    pub arp_requests_sent: u64,
    pub arp_replies_sent: u64,
    pub arp_waiters_created: u64,
    pub arp_waiters_resolved: u64,
    pub arp_waiters_timed_out: u64,
    pub packets_dropped_on_arp_timeout: u64,
    pub packets_dropped_on_full_arp_waiter: u64,
    pub links_created: u64,
    pub links_destroyed: u64,
    pub links_refused_for_ports: u64,
}

/// A network zone.
///
/// Owns its rule trees, its ARP cache, the list of ARP waiters that wait
/// for an address inside it, and the link-side index of flows touching
/// it. The interface bound to it is held as a [`Pointer`]; the rule count
/// of other domains naming it is tracked through [`HasRefCount`].
#[derive(Debug)]
pub struct Domain {
    name: String,
    generation: u64,
    ip_config: Option<IpConfig>,
    dynamic_ip_config: bool,
    use_arp: bool,
    pub(crate) tcp_forward_rules: ForwardRuleTree,
    pub(crate) udp_forward_rules: ForwardRuleTree,
    pub(crate) tcp_port_routes: PortRouteTree,
    pub(crate) udp_port_routes: PortRouteTree,
    pub(crate) nat_rules: NatRuleTree,
    pub(crate) ip_rules: IpRuleTree,
    pub(crate) arp_cache: ArpCache,
    pub(crate) foreign_arp_waiters: VecDeque<WaiterId>,
    pub(crate) links: BTreeMap<LinkKey, (LinkId, LinkRole)>,
    pub(crate) interface: Pointer<InterfaceId>,
    ref_count: u32,
    pub(crate) stats: DomainStats,
}

impl Domain {
    pub fn new(name: &str, ip_config: Option<IpConfig>, use_arp: bool, generation: u64) -> Self {
        Self {
            name: name.to_string(),
            generation,
            dynamic_ip_config: ip_config.is_none(),
            ip_config,
            use_arp,
            tcp_forward_rules: ForwardRuleTree::new(),
            udp_forward_rules: ForwardRuleTree::new(),
            tcp_port_routes: PortRouteTree::new(),
            udp_port_routes: PortRouteTree::new(),
            nat_rules: NatRuleTree::new(),
            ip_rules: IpRuleTree::new(),
            arp_cache: ArpCache::new(),
            foreign_arp_waiters: VecDeque::new(),
            links: BTreeMap::new(),
            interface: Pointer::new(),
            ref_count: 0,
            stats: DomainStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration generation that created the domain.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ip_config(&self) -> Option<&IpConfig> {
        self.ip_config.as_ref()
    }

    pub fn router_ip(&self) -> Option<Ipv4Addr> {
        self.ip_config.as_ref().map(IpConfig::router_ip)
    }

    /// Returns true if the domain has no static IP config and obtains one
    /// at runtime.
    pub fn has_dynamic_ip_config(&self) -> bool {
        self.dynamic_ip_config
    }

    pub fn use_arp(&self) -> bool {
        self.use_arp
    }

    pub(crate) fn set_ip_config(&mut self, ip_config: Option<IpConfig>) {
        self.ip_config = ip_config;
    }

    /// Returns the address a packet for `ip` has to be sent to: `ip`
    /// itself inside the subnet, otherwise the gateway.
    pub fn next_hop(&self, ip: Ipv4Addr) -> Result<Ipv4Addr, DomainError> {
        let ip_config = self
            .ip_config
            .as_ref()
            .ok_or_else(|| DomainError::NoIpConfig(self.name.clone()))?;
        if ip_config.interface.prefix_matches(ip) {
            return Ok(ip);
        }
        ip_config.gateway.ok_or_else(|| DomainError::NoNextHop {
            domain: self.name.clone(),
            ip,
        })
    }

    pub fn forward_rules(&self, protocol: L4Protocol) -> &ForwardRuleTree {
        match protocol {
            L4Protocol::Tcp => &self.tcp_forward_rules,
            L4Protocol::Udp => &self.udp_forward_rules,
        }
    }

    pub(crate) fn forward_rules_mut(&mut self, protocol: L4Protocol) -> &mut ForwardRuleTree {
        match protocol {
            L4Protocol::Tcp => &mut self.tcp_forward_rules,
            L4Protocol::Udp => &mut self.udp_forward_rules,
        }
    }

    pub fn port_routes(&self, protocol: L4Protocol) -> &PortRouteTree {
        match protocol {
            L4Protocol::Tcp => &self.tcp_port_routes,
            L4Protocol::Udp => &self.udp_port_routes,
        }
    }

    pub(crate) fn port_routes_mut(&mut self, protocol: L4Protocol) -> &mut PortRouteTree {
        match protocol {
            L4Protocol::Tcp => &mut self.tcp_port_routes,
            L4Protocol::Udp => &mut self.udp_port_routes,
        }
    }

    pub fn nat_rules(&self) -> &NatRuleTree {
        &self.nat_rules
    }

    pub fn ip_rules(&self) -> &IpRuleTree {
        &self.ip_rules
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp_cache
    }

    /// Waiters of any interface that wait for an address in this domain,
    /// oldest first.
    pub fn foreign_arp_waiters(&self) -> impl Iterator<Item = WaiterId> + '_ {
        self.foreign_arp_waiters.iter().copied()
    }

    pub fn interface(&self) -> Option<InterfaceId> {
        self.interface.copied().ok()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn rule_count(&self) -> usize {
        self.tcp_forward_rules.len()
            + self.udp_forward_rules.len()
            + self.tcp_port_routes.len()
            + self.udp_port_routes.len()
            + self.nat_rules.len()
            + self.ip_rules.len()
    }

    pub fn stats(&self) -> &DomainStats {
        &self.stats
    }

    pub(crate) fn remove_foreign_waiter(&mut self, waiter: WaiterId) {
        self.foreign_arp_waiters.retain(|id| *id != waiter);
    }

    /// Empties all rule trees and returns the domains the removed rules
    /// referred to, once per rule.
    pub(crate) fn dismantle_rules(&mut self) -> Vec<DomainId> {
        let mut targets = Vec::new();
        for protocol in [L4Protocol::Tcp, L4Protocol::Udp] {
            targets.extend(self.forward_rules_mut(protocol).clear().into_iter().map(|rule| rule.domain));
            targets.extend(self.port_routes_mut(protocol).clear().into_iter().map(|route| route.domain));
        }
        targets.extend(self.nat_rules.clear().into_iter().map(|rule| rule.domain()));
        targets.extend(self.ip_rules.clear().into_iter().map(|rule| rule.domain));
        targets
    }

    /// Checks that nothing refers to the domain any more.
    pub fn check_destroyable(&self) -> Result<(), DomainError> {
        if self.ref_count > 0 || self.interface.is_bound() {
            return Err(DomainError::StillReferenced {
                name: self.name.clone(),
                ref_count: self.ref_count,
                interface_bound: self.interface.is_bound(),
            });
        }
        Ok(())
    }
}

impl HasRefCount for Domain {
    fn increment_ref(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_add(1);
        self.ref_count
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        self.ref_count = self.ref_count.checked_sub(1)?;
        Some(self.ref_count)
    }

    fn ref_count(&self) -> u32 {
        self.ref_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::tests::null_interface;
    use nic_router_common::Arena;
    use pretty_assertions::assert_eq;

    fn lan(gateway: Option<Ipv4Addr>) -> Domain {
        let ip_config = IpConfig::new("10.0.1.1/24".parse().unwrap(), gateway);
        Domain::new("lan", Some(ip_config), true, 1)
    }

    #[test]
    fn test_next_hop() {
        let domain = lan(Some(Ipv4Addr::new(10, 0, 1, 254)));
        assert_eq!(domain.next_hop(Ipv4Addr::new(10, 0, 1, 9)), Ok(Ipv4Addr::new(10, 0, 1, 9)));
        assert_eq!(domain.next_hop(Ipv4Addr::new(8, 8, 8, 8)), Ok(Ipv4Addr::new(10, 0, 1, 254)));

        let no_gateway = lan(None);
        assert_eq!(
            no_gateway.next_hop(Ipv4Addr::new(8, 8, 8, 8)),
            Err(DomainError::NoNextHop {
                domain: "lan".to_string(),
                ip: Ipv4Addr::new(8, 8, 8, 8)
            })
        );

        let dynamic = Domain::new("dhcp", None, true, 1);
        assert_eq!(
            dynamic.next_hop(Ipv4Addr::new(10, 0, 1, 9)),
            Err(DomainError::NoIpConfig("dhcp".to_string()))
        );
    }

    #[test]
    fn test_destroy_refused_while_referenced() {
        let mut domains = Arena::new();
        let id = domains.insert(lan(None));
        let mut interfaces = Arena::new();
        let session = interfaces.insert(null_interface("lan-1"));

        domains.increment_ref(id).unwrap();
        domains.get_mut(id).unwrap().interface.set(session).unwrap();
        assert_eq!(
            domains.get(id).unwrap().check_destroyable(),
            Err(DomainError::StillReferenced {
                name: "lan".to_string(),
                ref_count: 1,
                interface_bound: true
            })
        );

        domains.decrement_ref(id).unwrap();
        domains.get_mut(id).unwrap().interface.unset();
        assert_eq!(domains.get(id).unwrap().check_destroyable(), Ok(()));
    }
}
