//! Client sessions: binding interfaces to domains.

use super::Router;
use crate::error::SessionError;
use crate::interface::{Interface, NicSink};
use crate::{DomainId, InterfaceId};
use tracing::{info, warn};

impl Router {
    /// Opens a session for `label` and binds its interface to the domain
    /// the policies select.
    pub fn open_session(&mut self, label: &str, sink: Box<dyn NicSink>) -> Result<InterfaceId, SessionError> {
        let domain_id = match self.domain_for_label(label) {
            Ok(domain_id) => domain_id,
            Err(error) => {
                warn!(label, %error, "Refusing session");
                return Err(error);
            }
        };

        let id = self.interfaces.insert(Interface::new(label, sink));
        if let Err(error) = self.bind_interface(id, domain_id) {
            self.interfaces.remove(id);
            warn!(label, %error, "Refusing session");
            return Err(error);
        }

        info!(label, interface = %id, domain = self.domains.get(domain_id).map(|domain| domain.name()), "Opened session");
        Ok(id)
    }

    /// Closes a session: dissolves its ARP waiters and links, detaches it
    /// from its domain and destroys the interface.
    pub fn close_session(&mut self, id: InterfaceId) -> Result<(), SessionError> {
        let iface = self.interfaces.get_mut(id).ok_or(SessionError::UnknownSession(id))?;
        let own: Vec<_> = iface.own_arp_waiters.drain(..).collect();
        let links: Vec<_> = iface.links.iter().copied().collect();

        for waiter in own {
            self.dissolve_waiter(waiter);
        }
        self.destroy_timed_out_waiters(id);
        for link in links {
            self.dissolve_link(link);
        }
        self.unbind_interface(id);

        if let Some(iface) = self.interfaces.remove(id) {
            info!(label = iface.label(), interface = %id, "Closed session");
        }
        Ok(())
    }

    /// Resolves the domain a session label selects in the current
    /// generation.
    pub(super) fn domain_for_label(&self, label: &str) -> Result<DomainId, SessionError> {
        let name = self
            .policies
            .find_by_label(label)
            .ok_or_else(|| SessionError::NoPolicy(label.to_string()))?;
        self.domain_names
            .get(name)
            .copied()
            .ok_or_else(|| SessionError::UnknownDomain {
                label: label.to_string(),
                domain: name.clone(),
            })
    }

    /// Binds both ends of the interface-domain relation. A domain serves
    /// at most one interface.
    pub(super) fn bind_interface(&mut self, id: InterfaceId, domain_id: DomainId) -> Result<(), SessionError> {
        let iface = self.interfaces.get_mut(id).ok_or(SessionError::UnknownSession(id))?;
        let domain = self
            .domains
            .get_mut(domain_id)
            .ok_or_else(|| SessionError::UnknownDomain {
                label: iface.label().to_string(),
                domain: domain_id.to_string(),
            })?;
        if iface.domain.is_bound() {
            return Err(SessionError::AlreadyBound(id));
        }
        domain
            .interface
            .set(id)
            .map_err(|_| SessionError::DomainBusy(domain.name().to_string()))?;
        iface.domain.set(domain_id).map_err(|_| SessionError::AlreadyBound(id))
    }

    /// Detaches an interface from its domain. The domain forgets the
    /// addresses it learned through the interface, and a dynamic IP config
    /// goes away with the session that obtained it.
    pub(super) fn unbind_interface(&mut self, id: InterfaceId) -> Option<DomainId> {
        let domain_id = self.interfaces.get_mut(id)?.domain.unset()?;
        let Some(domain) = self.domains.get_mut(domain_id) else {
            return Some(domain_id);
        };
        domain.interface.unset();
        domain.arp_cache.clear();
        if domain.has_dynamic_ip_config() && domain.ip_config().is_some() {
            self.withdraw_ip_config(domain_id);
        }
        Some(domain_id)
    }
}
