//! The router: configuration generations, sessions and the packet path.
//!
//! All state lives in handle arenas owned by [`Router`]. Domains,
//! interfaces, ARP waiters and links name each other by handle; the
//! router keeps the list memberships on both ends in sync.

mod arp;
mod frame;
mod ip;
mod ip_config;
mod link;
mod reconfigure;
mod session;
mod timeout;

use crate::arp::ArpWaiter;
use crate::config::{L4Protocol, RouterConfig};
use crate::domain::Domain;
use crate::error::ConfigError;
use crate::interface::Interface;
use crate::label::LabelTree;
use crate::link::Link;
use crate::report::{DomainReport, InterfaceReport, RouterReport};
use crate::{DomainId, InterfaceId, LinkId, WaiterId};
use nic_router_common::{Arena, CachedTimer, Clock, SharedPortAllocator};
use nic_router_types::MacAddress;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

pub use timeout::TimeoutReport;

/// Why a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// The frame could not be parsed.
    Malformed,
    /// Neither ARP nor IPv4, or an IP protocol that cannot be translated.
    UnsupportedProtocol,
    UnknownSession,
    /// The receiving interface is not bound to a domain.
    NoDomain,
    NoIpConfig,
    /// ARP request for an address other than the router's.
    NotForRouter,
    NoRoute,
    NoNextHop,
    /// The destination domain has no interface bound.
    NoInterface,
    NatPortsExhausted,
    /// The ARP waiter for the next hop buffers as many frames as allowed.
    ArpWaiterFull,
    /// The translated flow would clash with an existing link.
    FlowCollision,
    TransmitFailed,
}

/// Outcome of handling one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketVerdict {
    /// Transmitted to the destination interface.
    Forwarded,
    /// Buffered in an ARP waiter until the next hop is resolved.
    Queued,
    /// An ARP request for the router address was answered.
    ArpReplied,
    /// An ARP reply was learned and `released` buffered frames were sent.
    ArpResolved { released: usize },
    Dropped(DropReason),
}

/// Result of applying a configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub generation: u64,
    pub domains: usize,
    pub rules: usize,
    pub errors: Vec<ConfigError>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Router-wide settings of the current configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterSettings {
    pub mac: MacAddress,
    pub verbose: bool,
    pub arp_request_timeout: Duration,
    pub arp_waiter_packet_limit: usize,
    pub tcp_idle_timeout: Duration,
    pub udp_idle_timeout: Duration,
}

impl RouterSettings {
    pub fn idle_timeout(&self, protocol: L4Protocol) -> Duration {
        match protocol {
            L4Protocol::Tcp => self.tcp_idle_timeout,
            L4Protocol::Udp => self.udp_idle_timeout,
        }
    }
}

impl From<&RouterConfig> for RouterSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            mac: config.mac,
            verbose: config.verbose,
            arp_request_timeout: config.arp_request_timeout(),
            arp_waiter_packet_limit: config.arp_waiter_packet_limit,
            tcp_idle_timeout: config.idle_timeout(L4Protocol::Tcp),
            udp_idle_timeout: config.idle_timeout(L4Protocol::Udp),
        }
    }
}

/// The policy engine.
///
/// Single-threaded: every entry point runs to completion before the next
/// one is invoked.
pub struct Router {
    settings: RouterSettings,
    generation: u64,
    policies: LabelTree<String>,
    domains: Arena<Domain>,
    domain_names: BTreeMap<String, DomainId>,
    interfaces: Arena<Interface>,
    waiters: Arena<ArpWaiter>,
    links: Arena<Link>,
    tcp_ports: SharedPortAllocator,
    udp_ports: SharedPortAllocator,
    timer: CachedTimer,
}

impl Router {
    /// Creates a router without domains.
    ///
    /// The allocators are shared by all NAT rules of all configuration
    /// generations.
    pub fn new(tcp_ports: SharedPortAllocator, udp_ports: SharedPortAllocator, clock: Box<dyn Clock>) -> Self {
        Self {
            settings: RouterSettings::from(&RouterConfig::default()),
            generation: 0,
            policies: LabelTree::new(),
            domains: Arena::new(),
            domain_names: BTreeMap::new(),
            interfaces: Arena::new(),
            waiters: Arena::new(),
            links: Arena::new(),
            tcp_ports,
            udp_ports,
            timer: CachedTimer::new(clock),
        }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Number of configurations applied so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the current domain named `name`.
    pub fn domain(&self, name: &str) -> Option<&Domain> {
        self.domain_names.get(name).and_then(|id| self.domains.get(*id))
    }

    pub fn domain_id(&self, name: &str) -> Option<DomainId> {
        self.domain_names.get(name).copied()
    }

    pub fn domain_by_id(&self, id: DomainId) -> Option<&Domain> {
        self.domains.get(id)
    }

    /// Iterates over the domains of the current generation.
    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domain_names.values().filter_map(|id| self.domains.get(*id))
    }

    pub fn interface(&self, id: InterfaceId) -> Option<&Interface> {
        self.interfaces.get(id)
    }

    pub fn waiter(&self, id: WaiterId) -> Option<&ArpWaiter> {
        self.waiters.get(id)
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn port_allocator(&self, protocol: L4Protocol) -> &SharedPortAllocator {
        match protocol {
            L4Protocol::Tcp => &self.tcp_ports,
            L4Protocol::Udp => &self.udp_ports,
        }
    }

    /// Builds a serializable snapshot of the router state.
    pub fn report(&self) -> RouterReport {
        let domains = self
            .domains()
            .map(|domain| DomainReport {
                name: domain.name().to_string(),
                generation: domain.generation(),
                ip_config: domain.ip_config().map(|config| config.interface.to_string()),
                gateway: domain
                    .ip_config()
                    .and_then(|config| config.gateway)
                    .map(|gateway| gateway.to_string()),
                interface: domain
                    .interface()
                    .and_then(|id| self.interfaces.get(id))
                    .map(|interface| interface.label().to_string()),
                rules: domain.rule_count(),
                arp_cache_entries: domain.arp_cache().len(),
                arp_waiters: domain.foreign_arp_waiters().count(),
                links: domain.link_count(),
                stats: domain.stats().clone(),
            })
            .collect();

        let interfaces = self
            .interfaces
            .values()
            .map(|interface| InterfaceReport {
                label: interface.label().to_string(),
                domain: interface
                    .domain()
                    .and_then(|id| self.domains.get(id))
                    .map(|domain| domain.name().to_string()),
                arp_waiters: interface.own_arp_waiters().count(),
                timed_out_arp_waiters: interface.timed_out_arp_waiters().count(),
                links: interface.links().count(),
            })
            .collect();

        RouterReport {
            generation: self.generation,
            domains,
            interfaces,
            tcp_ports_allocated: self.tcp_ports.borrow().allocated_count(),
            udp_ports_allocated: self.udp_ports.borrow().allocated_count(),
        }
    }

    /// Sends a frame out of the interface bound to `domain`.
    fn transmit(&mut self, domain: DomainId, frame: &[u8]) -> Result<(), DropReason> {
        let interface_id = self
            .domains
            .get(domain)
            .and_then(Domain::interface)
            .ok_or(DropReason::NoInterface)?;
        let interface = self
            .interfaces
            .get_mut(interface_id)
            .ok_or(DropReason::NoInterface)?;
        interface.transmit(frame).map_err(|error| {
            warn!(interface = interface.label(), %error, "Failed to transmit frame");
            DropReason::TransmitFailed
        })
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("generation", &self.generation)
            .field("domains", &self.domain_names)
            .field("interfaces", &self.interfaces.len())
            .field("waiters", &self.waiters.len())
            .field("links", &self.links.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
