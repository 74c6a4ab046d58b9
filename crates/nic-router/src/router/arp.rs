//! ARP handling: answering requests, learning replies and the waiter
//! lifecycle.

use super::{DropReason, PacketVerdict, Router};
use crate::arp::ArpWaiter;
use crate::packet::{self, ArpOp, ArpSummary};
use crate::{DomainId, InterfaceId, WaiterId};
use nic_router_types::MacAddress;
use std::net::Ipv4Addr;
use tracing::debug;

impl Router {
    pub(super) fn handle_arp(
        &mut self,
        interface: InterfaceId,
        domain_id: DomainId,
        arp: ArpSummary,
    ) -> Result<PacketVerdict, DropReason> {
        match arp.op {
            ArpOp::Request => self.answer_arp_request(interface, domain_id, arp),
            ArpOp::Reply => Ok(self.learn_arp_reply(domain_id, arp)),
        }
    }

    fn answer_arp_request(
        &mut self,
        interface: InterfaceId,
        domain_id: DomainId,
        arp: ArpSummary,
    ) -> Result<PacketVerdict, DropReason> {
        let router_ip = self
            .domains
            .get(domain_id)
            .and_then(|domain| domain.router_ip())
            .ok_or(DropReason::NoIpConfig)?;
        if arp.target_ip != router_ip {
            return Err(DropReason::NotForRouter);
        }

        let reply = packet::arp_reply(self.settings.mac, router_ip, arp.sender_mac, arp.sender_ip)
            .ok_or(DropReason::Malformed)?;
        let iface = self
            .interfaces
            .get_mut(interface)
            .ok_or(DropReason::UnknownSession)?;
        iface.transmit(&reply).map_err(|_| DropReason::TransmitFailed)?;

        if let Some(domain) = self.domains.get_mut(domain_id) {
            domain.stats.arp_replies_sent = domain.stats.arp_replies_sent.saturating_add(1);
        }
        debug!(requester = %arp.sender_ip, "Answered ARP request");
        Ok(PacketVerdict::ArpReplied)
    }

    /// Caches the sender of a reply and releases every waiter of the domain
    /// that waits for it, oldest first. Waiters are released to the cached
    /// MAC if the address was known before.
    fn learn_arp_reply(&mut self, domain_id: DomainId, arp: ArpSummary) -> PacketVerdict {
        let Some(domain) = self.domains.get_mut(domain_id) else {
            return PacketVerdict::Dropped(DropReason::NoDomain);
        };
        let mac = domain.arp_cache.insert(arp.sender_ip, arp.sender_mac);
        if mac != arp.sender_mac {
            debug!(domain = domain.name(), ip = %arp.sender_ip, known = %mac, claimed = %arp.sender_mac, "Ignoring conflicting ARP reply");
        }

        let matching: Vec<WaiterId> = domain
            .foreign_arp_waiters()
            .filter(|id| {
                self.waiters
                    .get(*id)
                    .is_some_and(|waiter| waiter.ip() == arp.sender_ip)
            })
            .collect();

        let released: usize = matching
            .into_iter()
            .map(|waiter| self.resolve_waiter(waiter, domain_id, mac))
            .sum();
        PacketVerdict::ArpResolved { released }
    }

    /// Sends the frames of a waiter to `mac` and destroys the waiter.
    /// Returns the number of frames transmitted.
    fn resolve_waiter(&mut self, id: WaiterId, domain_id: DomainId, mac: MacAddress) -> usize {
        let Some(mut waiter) = self.waiters.remove(id) else {
            return 0;
        };
        let frames = waiter.resolve();
        if let Some(domain) = self.domains.get_mut(domain_id) {
            domain.remove_foreign_waiter(id);
            domain.stats.arp_waiters_resolved = domain.stats.arp_waiters_resolved.saturating_add(1);
        }
        if let Some(src) = waiter.src().ok().and_then(|src| self.interfaces.get_mut(src)) {
            src.remove_own_waiter(id);
        }

        let mut released = 0;
        for mut frame in frames {
            if packet::set_ethernet_addresses(&mut frame, self.settings.mac, mac).is_none() {
                continue;
            }
            if self.transmit(domain_id, &frame).is_ok() {
                released += 1;
            }
        }
        if let Some(domain) = self.domains.get_mut(domain_id) {
            domain.stats.packets_forwarded = domain.stats.packets_forwarded.saturating_add(released as u64);
        }
        debug!(waiter = %id, ip = %waiter.ip(), released, "ARP waiter resolved");
        released
    }

    /// Buffers an IP frame until `next_hop` in `domain_id` is resolved.
    ///
    /// A frame for a next hop the interface already waits for is appended
    /// to the existing waiter, unless the waiter holds
    /// `arp_waiter_packet_limit` frames already. Otherwise a new waiter is
    /// created and an ARP request is sent.
    pub(super) fn queue_for_arp(
        &mut self,
        src: InterfaceId,
        domain_id: DomainId,
        next_hop: Ipv4Addr,
        frame: Vec<u8>,
    ) -> Result<PacketVerdict, DropReason> {
        let domain = self.domains.get(domain_id).ok_or(DropReason::NoRoute)?;
        let router_ip = domain.router_ip().ok_or(DropReason::NoIpConfig)?;

        let existing = domain.foreign_arp_waiters().find(|id| {
            self.waiters
                .get(*id)
                .is_some_and(|waiter| waiter.ip() == next_hop && waiter.src() == Ok(src))
        });
        if let Some(id) = existing {
            let limit = self.settings.arp_waiter_packet_limit;
            let Some(waiter) = self.waiters.get_mut(id) else {
                return Err(DropReason::NoRoute);
            };
            if waiter.packet_count() >= limit {
                if let Some(domain) = self.domains.get_mut(domain_id) {
                    domain.stats.packets_dropped_on_full_arp_waiter =
                        domain.stats.packets_dropped_on_full_arp_waiter.saturating_add(1);
                }
                debug!(waiter = %id, ip = %next_hop, limit, "ARP waiter full");
                return Err(DropReason::ArpWaiterFull);
            }
            waiter.push_packet(frame);
            debug!(waiter = %id, ip = %next_hop, packets = waiter.packet_count(), "Queued frame in ARP waiter");
            return Ok(PacketVerdict::Queued);
        }

        let deadline = self.timer.cached_time() + self.settings.arp_request_timeout;
        let id = self
            .waiters
            .insert(ArpWaiter::new(src, domain_id, next_hop, deadline, frame));
        if let Some(domain) = self.domains.get_mut(domain_id) {
            domain.foreign_arp_waiters.push_back(id);
            domain.stats.arp_waiters_created = domain.stats.arp_waiters_created.saturating_add(1);
        }
        if let Some(iface) = self.interfaces.get_mut(src) {
            iface.own_arp_waiters.push_back(id);
        }
        debug!(waiter = %id, ip = %next_hop, "Created ARP waiter");

        if let Some(request) = packet::arp_request(self.settings.mac, router_ip, next_hop) {
            // the waiter stays and times out if the request cannot be sent
            if self.transmit(domain_id, &request).is_ok() {
                if let Some(domain) = self.domains.get_mut(domain_id) {
                    domain.stats.arp_requests_sent = domain.stats.arp_requests_sent.saturating_add(1);
                }
            }
        }
        Ok(PacketVerdict::Queued)
    }

    /// Removes a waiter from both of its lists and destroys it, dropping
    /// its frames.
    pub(super) fn dissolve_waiter(&mut self, id: WaiterId) {
        let Some(mut waiter) = self.waiters.remove(id) else {
            return;
        };
        let dst = waiter.dst().ok();
        let dropped = waiter.dissolve() as u64;
        if let Some(domain) = dst.and_then(|dst| self.domains.get_mut(dst)) {
            domain.remove_foreign_waiter(id);
            domain.stats.packets_dropped = domain.stats.packets_dropped.saturating_add(dropped);
        }
        if let Some(src) = waiter.src().ok().and_then(|src| self.interfaces.get_mut(src)) {
            src.remove_own_waiter(id);
            src.timed_out_arp_waiters.retain(|waiter| *waiter != id);
        }
        debug!(waiter = %id, ip = %waiter.ip(), dropped, "Dissolved ARP waiter");
    }
}
