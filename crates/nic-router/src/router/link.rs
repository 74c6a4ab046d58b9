//! Link lifecycle and NAT port bookkeeping.

use super::{DropReason, Router};
use crate::config::L4Protocol;
use crate::link::{Link, LinkKey, LinkRole, LinkSide, LinkSideId};
use crate::{DomainId, InterfaceId, LinkId};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

impl Router {
    /// Allocates a translated source port through the NAT rule that
    /// `remote` holds for traffic from `local`.
    pub(super) fn alloc_nat_port(
        &mut self,
        remote: DomainId,
        local: DomainId,
        protocol: L4Protocol,
    ) -> Result<u16, DropReason> {
        let result = self
            .domains
            .get_mut(remote)
            .and_then(|domain| domain.nat_rules.find_by_domain_mut(local))
            .ok_or(DropReason::NoRoute)?
            .port_allocator_mut(protocol)
            .alloc();

        result.map_err(|error| {
            if let Some(domain) = self.domains.get_mut(local) {
                domain.stats.links_refused_for_ports = domain.stats.links_refused_for_ports.saturating_add(1);
                warn!(domain = domain.name(), %protocol, %error, "Refusing flow, no NAT port left");
            }
            DropReason::NatPortsExhausted
        })
    }

    /// Releases a NAT port through the rule it was allocated from. If the
    /// rule is gone the port is returned to the shared allocator directly.
    pub(super) fn free_nat_port(
        &mut self,
        remote: DomainId,
        local: DomainId,
        protocol: L4Protocol,
        port: Option<u16>,
    ) {
        let Some(port) = port else {
            return;
        };
        let rule = self
            .domains
            .get_mut(remote)
            .and_then(|domain| domain.nat_rules.find_by_domain_mut(local));
        match rule {
            Some(rule) => rule.port_allocator_mut(protocol).free(port),
            None => self.port_allocator(protocol).borrow_mut().free(port),
        }
    }

    pub(super) fn create_link(
        &mut self,
        interface: InterfaceId,
        protocol: L4Protocol,
        (client_domain, client_id): (DomainId, LinkSideId),
        (server_domain, server_id): (DomainId, LinkSideId),
        via: Option<Ipv4Addr>,
        nat_port: Option<u16>,
    ) -> Result<LinkId, DropReason> {
        let client_key = (protocol, client_id);
        let server_key = (protocol, server_id);
        let taken = |domain: DomainId, key: LinkKey| {
            self.domains
                .get(domain)
                .is_some_and(|domain| domain.links.contains_key(&key))
        };
        if taken(client_domain, client_key) || taken(server_domain, server_key) {
            warn!(%protocol, client = %client_id, server = %server_id, "Translated flow collides with existing link");
            return Err(DropReason::FlowCollision);
        }

        let deadline = self.timer.cached_time() + self.settings.idle_timeout(protocol);
        let id = self.links.insert(Link::new(
            protocol,
            LinkSide {
                domain: client_domain,
                id: client_id,
            },
            LinkSide {
                domain: server_domain,
                id: server_id,
            },
            interface,
            via,
            nat_port,
            deadline,
        ));
        self.index_link(id);
        if let Some(iface) = self.interfaces.get_mut(interface) {
            iface.links.insert(id);
        }
        if let Some(domain) = self.domains.get_mut(client_domain) {
            domain.stats.links_created = domain.stats.links_created.saturating_add(1);
        }
        debug!(link = %id, %protocol, client = %client_id, server = %server_id, ?nat_port, "Created link");
        Ok(id)
    }

    /// Enters both sides of a link into the link index of their domains.
    pub(super) fn index_link(&mut self, id: LinkId) {
        let Some(link) = self.links.get(id) else {
            return;
        };
        let sides = [
            (link.client.domain, link.client_key(), LinkRole::Client),
            (link.server.domain, link.server_key(), LinkRole::Server),
        ];
        for (domain, key, role) in sides {
            if let Some(domain) = self.domains.get_mut(domain) {
                domain.links.insert(key, (id, role));
            }
        }
    }

    /// Destroys a link: removes it from both domain indices and from its
    /// interface and releases its NAT port.
    pub(super) fn dissolve_link(&mut self, id: LinkId) {
        let Some(link) = self.links.remove(id) else {
            return;
        };
        let sides = [
            (link.client.domain, link.client_key()),
            (link.server.domain, link.server_key()),
        ];
        for (domain, key) in sides {
            if let Some(domain) = self.domains.get_mut(domain) {
                if domain.links.get(&key).is_some_and(|(entry, _)| *entry == id) {
                    domain.links.remove(&key);
                }
            }
        }
        if let Some(iface) = link.client_interface().ok().and_then(|iface| self.interfaces.get_mut(iface)) {
            iface.links.remove(&id);
        }
        self.free_nat_port(link.server.domain, link.client.domain, link.protocol(), link.nat_port());
        if let Some(domain) = self.domains.get_mut(link.client.domain) {
            domain.stats.links_destroyed = domain.stats.links_destroyed.saturating_add(1);
        }
        debug!(link = %id, protocol = %link.protocol(), client = %link.client.id, "Dissolved link");
    }
}
