//! Per-domain ARP cache.

use nic_router_types::MacAddress;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// IP to MAC mappings learned from ARP replies inside one domain.
#[derive(Debug, Clone, Default)]
pub struct ArpCache {
    entries: BTreeMap<Ipv4Addr, MacAddress>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a mapping unless `ip` is known already and returns the MAC
    /// in effect for `ip`. A known entry is never replaced; it lives until
    /// the cache is cleared.
    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddress) -> MacAddress {
        *self.entries.entry(ip).or_insert(mac)
    }

    pub fn find_by_ip(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        self.entries.get(&ip).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_insert_keeps_first_mac() {
        let ip = Ipv4Addr::new(10, 0, 1, 9);
        let first = MacAddress::new([2, 0, 0, 0, 0, 9]);
        let second = MacAddress::new([2, 0, 0, 0, 0, 10]);

        let mut cache = ArpCache::new();
        assert_eq!(cache.insert(ip, first), first);
        assert_eq!(cache.insert(ip, second), first);
        assert_eq!(cache.find_by_ip(ip), Some(first));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert_eq!(cache.find_by_ip(ip), None);
        assert_eq!(cache.insert(ip, second), second);
    }
}
