//! Port routes: per-session-label static port mappings.

use crate::label::LabelTree;
use crate::DomainId;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Routes a destination port to `domain`, optionally rewriting the
/// destination to `to` and sending through `via`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRoute {
    pub port: u16,
    pub domain: DomainId,
    pub via: Option<Ipv4Addr>,
    pub to: Option<Ipv4Addr>,
}

/// Port routes of one domain and protocol.
///
/// Routes are grouped by label prefix; a lookup first selects the group
/// that best matches the session label and then the port inside it.
#[derive(Debug, Default)]
pub struct PortRouteTree {
    groups: LabelTree<BTreeMap<u16, PortRoute>>,
}

impl PortRouteTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a route for `label_prefix`. A duplicate port within the same
    /// label prefix is rejected and the route is handed back.
    pub fn insert(&mut self, label_prefix: &str, route: PortRoute) -> Result<(), PortRoute> {
        let group = self.groups.get_or_insert_with(label_prefix, BTreeMap::new);
        if group.contains_key(&route.port) {
            return Err(route);
        }
        group.insert(route.port, route);
        Ok(())
    }

    /// Returns the routes of the label group that best matches `label`.
    pub fn find_by_label(&self, label: &str) -> Option<&BTreeMap<u16, PortRoute>> {
        self.groups.find_by_label(label)
    }

    /// Resolves a session label and destination port to a route.
    pub fn find(&self, label: &str, port: u16) -> Option<&PortRoute> {
        self.find_by_label(label)?.get(&port)
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, group)| group.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PortRoute)> {
        self.groups
            .iter()
            .flat_map(|(label, group)| group.values().map(move |route| (label, route)))
    }

    /// Removes all routes and returns them.
    pub fn clear(&mut self) -> Vec<PortRoute> {
        let groups = std::mem::take(&mut self.groups);
        groups
            .iter()
            .flat_map(|(_, group)| group.values().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Domain;
    use nic_router_common::Arena;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_same_port_routes_by_label() {
        let mut domains = Arena::new();
        let dns_a = domains.insert(Domain::new("dns_a", None, true, 1));
        let dns_b = domains.insert(Domain::new("dns_b", None, true, 1));

        let mut tree = PortRouteTree::new();
        let generic = PortRoute {
            port: 53,
            domain: dns_a,
            via: None,
            to: Some(Ipv4Addr::new(10, 0, 3, 2)),
        };
        let guest = PortRoute {
            port: 53,
            domain: dns_b,
            via: Some(Ipv4Addr::new(10, 0, 4, 254)),
            to: None,
        };
        tree.insert("lan", generic.clone()).unwrap();
        tree.insert("lan-guest", guest.clone()).unwrap();

        assert_eq!(tree.find("lan-laptop", 53), Some(&generic));
        assert_eq!(tree.find("lan-guest-1", 53), Some(&guest));
        assert_eq!(tree.find("lan-guest-1", 80), None);
        assert_eq!(tree.find("wifi", 53), None);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_duplicate_port_per_label_rejected() {
        let mut domains = Arena::new();
        let dns = domains.insert(Domain::new("dns", None, true, 1));

        let mut tree = PortRouteTree::new();
        let route = PortRoute {
            port: 53,
            domain: dns,
            via: None,
            to: None,
        };
        tree.insert("lan", route.clone()).unwrap();
        assert_eq!(tree.insert("lan", route.clone()), Err(route.clone()));
        assert!(tree.insert("lan-guest", route).is_ok());
        assert_eq!(tree.clear().len(), 2);
        assert!(tree.is_empty());
    }
}
