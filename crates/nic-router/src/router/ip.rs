//! IPv4 routing: rule lookup, translation and hand-off to the
//! destination domain.

use super::{DropReason, PacketVerdict, Router};
use crate::config::L4Protocol;
use crate::link::{LinkRole, LinkSideId};
use crate::packet::{self, Ipv4Summary, Ports};
use crate::{DomainId, InterfaceId, LinkId};
use nic_router_types::MacAddress;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::debug;

/// Where the rule trees send a TCP/UDP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct RouteDecision {
    pub domain: DomainId,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
    pub via: Option<Ipv4Addr>,
    /// True if the destination address or port changes.
    pub rewritten: bool,
}

impl Router {
    pub(super) fn handle_ip(
        &mut self,
        interface: InterfaceId,
        domain_id: DomainId,
        frame: &[u8],
        ip: Ipv4Summary,
    ) -> Result<PacketVerdict, DropReason> {
        let domain = self.domains.get(domain_id).ok_or(DropReason::NoDomain)?;
        if domain.ip_config().is_none() {
            return Err(DropReason::NoIpConfig);
        }
        let Some(ports) = ip.ports else {
            return self.route_plain(interface, domain_id, frame, ip);
        };

        let key = (
            ports.protocol,
            LinkSideId {
                src_ip: ip.src,
                src_port: ports.src,
                dst_ip: ip.dst,
                dst_port: ports.dst,
            },
        );
        if let Some(&(link, role)) = domain.links.get(&key) {
            return self.pass_through_link(interface, link, role, frame);
        }

        let label = self
            .interfaces
            .get(interface)
            .map(|iface| iface.label().to_string())
            .ok_or(DropReason::UnknownSession)?;
        let decision = self
            .route_decision(domain_id, &label, ports.protocol, ip.dst, ports.dst)
            .ok_or(DropReason::NoRoute)?;
        self.open_link_and_pass(interface, domain_id, frame, ip, ports, decision)
    }

    /// Consults forward rules, port routes and IP rules of `domain_id`, in
    /// that order.
    pub(super) fn route_decision(
        &self,
        domain_id: DomainId,
        label: &str,
        protocol: L4Protocol,
        dst_ip: Ipv4Addr,
        dst_port: u16,
    ) -> Option<RouteDecision> {
        let domain = self.domains.get(domain_id)?;

        if domain.router_ip() == Some(dst_ip) {
            if let Some(rule) = domain.forward_rules(protocol).find_by_port(dst_port) {
                return Some(RouteDecision {
                    domain: rule.domain,
                    dst_ip: rule.to,
                    dst_port: rule.destination_port(),
                    via: None,
                    rewritten: true,
                });
            }
        }

        if let Some(route) = domain.port_routes(protocol).find(label, dst_port) {
            let to = route.to.unwrap_or(dst_ip);
            return Some(RouteDecision {
                domain: route.domain,
                dst_ip: to,
                dst_port,
                via: route.via,
                rewritten: to != dst_ip,
            });
        }

        let rule = domain.ip_rules().longest_prefix_match(dst_ip)?;
        Some(RouteDecision {
            domain: rule.domain,
            dst_ip,
            dst_port,
            via: None,
            rewritten: false,
        })
    }

    /// Routes a TCP/UDP packet that matched no link. Translated flows get
    /// a link so that later packets in both directions bypass the rules.
    fn open_link_and_pass(
        &mut self,
        interface: InterfaceId,
        domain_id: DomainId,
        frame: &[u8],
        ip: Ipv4Summary,
        ports: Ports,
        decision: RouteDecision,
    ) -> Result<PacketVerdict, DropReason> {
        let remote = self.domains.get(decision.domain).ok_or(DropReason::NoRoute)?;
        let remote_ip = remote.router_ip().ok_or(DropReason::NoIpConfig)?;
        let next_hop = match decision.via {
            Some(via) => via,
            None => remote
                .next_hop(decision.dst_ip)
                .map_err(|_| DropReason::NoNextHop)?,
        };
        if remote.interface().is_none() {
            return Err(DropReason::NoInterface);
        }
        let nat = remote.nat_rules().find_by_domain(domain_id).is_some();

        let nat_port = if nat {
            Some(self.alloc_nat_port(decision.domain, domain_id, ports.protocol)?)
        } else {
            None
        };
        let src = match nat_port {
            Some(port) => SocketAddrV4::new(remote_ip, port),
            None => SocketAddrV4::new(ip.src, ports.src),
        };
        let dst = SocketAddrV4::new(decision.dst_ip, decision.dst_port);

        let mut out = frame.to_vec();
        let translated = Ports {
            protocol: ports.protocol,
            src: src.port(),
            dst: dst.port(),
        };
        if packet::rewrite_ipv4(&mut out, *src.ip(), *dst.ip(), Some(translated)).is_none() {
            self.free_nat_port(decision.domain, domain_id, ports.protocol, nat_port);
            return Err(DropReason::Malformed);
        }

        if nat_port.is_some() || decision.rewritten {
            let client = LinkSideId::new(SocketAddrV4::new(ip.src, ports.src), SocketAddrV4::new(ip.dst, ports.dst));
            let server = LinkSideId::new(dst, src);
            if let Err(reason) = self.create_link(
                interface,
                ports.protocol,
                (domain_id, client),
                (decision.domain, server),
                decision.via,
                nat_port,
            ) {
                self.free_nat_port(decision.domain, domain_id, ports.protocol, nat_port);
                return Err(reason);
            }
        }

        self.send_ip(interface, decision.domain, next_hop, out)
    }

    /// Translates a packet along an existing link.
    fn pass_through_link(
        &mut self,
        interface: InterfaceId,
        link_id: LinkId,
        role: LinkRole,
        frame: &[u8],
    ) -> Result<PacketVerdict, DropReason> {
        let link = self.links.get_mut(link_id).ok_or(DropReason::NoRoute)?;
        let protocol = link.protocol();
        link.refresh(self.timer.cached_time() + self.settings.idle_timeout(protocol));
        let translation = link.translate(role);

        let target = self
            .domains
            .get(translation.domain)
            .ok_or(DropReason::NoRoute)?;
        let next_hop = match translation.via {
            Some(via) => via,
            None => target
                .next_hop(*translation.dst.ip())
                .map_err(|_| DropReason::NoNextHop)?,
        };

        let mut out = frame.to_vec();
        let ports = Ports {
            protocol,
            src: translation.src.port(),
            dst: translation.dst.port(),
        };
        packet::rewrite_ipv4(&mut out, *translation.src.ip(), *translation.dst.ip(), Some(ports))
            .ok_or(DropReason::Malformed)?;
        debug!(link = %link_id, ?role, src = %translation.src, dst = %translation.dst, "Passing packet along link");
        self.send_ip(interface, translation.domain, next_hop, out)
    }

    /// Routes a packet without ports by IP rules only. Such packets cannot
    /// be source-translated.
    fn route_plain(
        &mut self,
        interface: InterfaceId,
        domain_id: DomainId,
        frame: &[u8],
        ip: Ipv4Summary,
    ) -> Result<PacketVerdict, DropReason> {
        let domain = self.domains.get(domain_id).ok_or(DropReason::NoDomain)?;
        let rule = domain
            .ip_rules()
            .longest_prefix_match(ip.dst)
            .ok_or(DropReason::NoRoute)?;
        let remote_id = rule.domain;
        let remote = self.domains.get(remote_id).ok_or(DropReason::NoRoute)?;
        if remote.nat_rules().find_by_domain(domain_id).is_some() {
            return Err(DropReason::UnsupportedProtocol);
        }
        let next_hop = remote.next_hop(ip.dst).map_err(|_| DropReason::NoNextHop)?;
        if remote.interface().is_none() {
            return Err(DropReason::NoInterface);
        }
        self.send_ip(interface, remote_id, next_hop, frame.to_vec())
    }

    /// Transmits a rewritten IP frame into `domain_id`, or queues it in an
    /// ARP waiter if the next hop is unknown.
    fn send_ip(
        &mut self,
        src: InterfaceId,
        domain_id: DomainId,
        next_hop: Ipv4Addr,
        mut frame: Vec<u8>,
    ) -> Result<PacketVerdict, DropReason> {
        let domain = self.domains.get(domain_id).ok_or(DropReason::NoRoute)?;
        let dst_mac = if domain.use_arp() {
            domain.arp_cache().find_by_ip(next_hop)
        } else {
            Some(MacAddress::BROADCAST)
        };

        let Some(dst_mac) = dst_mac else {
            packet::set_ethernet_addresses(&mut frame, self.settings.mac, MacAddress::ZERO)
                .ok_or(DropReason::Malformed)?;
            return self.queue_for_arp(src, domain_id, next_hop, frame);
        };

        packet::set_ethernet_addresses(&mut frame, self.settings.mac, dst_mac).ok_or(DropReason::Malformed)?;
        self.transmit(domain_id, &frame)?;
        if let Some(domain) = self.domains.get_mut(domain_id) {
            domain.stats.packets_forwarded = domain.stats.packets_forwarded.saturating_add(1);
        }
        Ok(PacketVerdict::Forwarded)
    }
}
