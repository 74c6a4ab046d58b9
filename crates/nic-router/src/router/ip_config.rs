//! Runtime IP configuration of domains without a static address.

use super::Router;
use crate::domain::IpConfig;
use crate::error::DomainError;
use crate::{DomainId, LinkId, WaiterId};
use nic_router_types::Ipv4AddressPrefix;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::info;

impl Router {
    /// Installs an IP config obtained at runtime, e.g. from a DHCP lease.
    ///
    /// A config already present is withdrawn first, together with the ARP
    /// waiters and links that depend on its addresses.
    pub fn assign_ip_config(
        &mut self,
        name: &str,
        interface: Ipv4AddressPrefix,
        gateway: Option<Ipv4Addr>,
    ) -> Result<(), DomainError> {
        let id = self.dynamic_domain_id(name)?;
        if self.domains.get(id).is_some_and(|domain| domain.ip_config().is_some()) {
            self.withdraw_ip_config(id);
        }
        if let Some(domain) = self.domains.get_mut(id) {
            domain.set_ip_config(Some(IpConfig::new(interface, gateway)));
        }
        info!(domain = name, %interface, ?gateway, "Assigned IP config");
        Ok(())
    }

    /// Removes a runtime IP config. Every ARP waiter targeting the domain
    /// and every link touching it is dissolved since their addresses no
    /// longer mean anything.
    pub fn discard_ip_config(&mut self, name: &str) -> Result<(), DomainError> {
        let id = self.dynamic_domain_id(name)?;
        if self.domains.get(id).and_then(|domain| domain.ip_config()).is_none() {
            return Err(DomainError::NoIpConfig(name.to_string()));
        }
        self.withdraw_ip_config(id);
        Ok(())
    }

    /// Drops the IP config of a domain and everything built on it.
    pub(super) fn withdraw_ip_config(&mut self, id: DomainId) {
        let Some(domain) = self.domains.get_mut(id) else {
            return;
        };
        domain.set_ip_config(None);
        domain.arp_cache.clear();
        let waiters: Vec<WaiterId> = domain.foreign_arp_waiters().collect();
        let links: BTreeSet<LinkId> = domain.links.values().map(|(link, _)| *link).collect();
        let name = domain.name().to_string();

        for &waiter in &waiters {
            self.dissolve_waiter(waiter);
        }
        for &link in &links {
            self.dissolve_link(link);
        }
        info!(domain = name.as_str(), waiters = waiters.len(), links = links.len(), "Discarded IP config");
    }

    fn dynamic_domain_id(&self, name: &str) -> Result<DomainId, DomainError> {
        let id = self
            .domain_names
            .get(name)
            .copied()
            .ok_or_else(|| DomainError::UnknownDomain(name.to_string()))?;
        match self.domains.get(id) {
            Some(domain) if domain.has_dynamic_ip_config() => Ok(id),
            Some(_) => Err(DomainError::StaticIpConfig(name.to_string())),
            None => Err(DomainError::UnknownDomain(name.to_string())),
        }
    }
}
