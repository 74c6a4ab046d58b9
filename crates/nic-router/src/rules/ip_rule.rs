//! IP rules: destination prefix to domain.

use crate::DomainId;
use nic_router_types::Ipv4AddressPrefix;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Routes destinations inside `dst` to `domain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRule {
    pub dst: Ipv4AddressPrefix,
    pub domain: DomainId,
}

/// IP rules of one domain with longest-prefix lookup.
#[derive(Debug, Default)]
pub struct IpRuleTree {
    // keyed by (prefix length, network); iterating backwards visits the
    // most specific rules first
    rules: BTreeMap<(u8, Ipv4Addr), IpRule>,
}

impl IpRuleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a rule. A second rule for the same network is rejected and
    /// handed back.
    pub fn insert(&mut self, rule: IpRule) -> Result<(), IpRule> {
        let key = (rule.dst.prefix_len(), rule.dst.network());
        if self.rules.contains_key(&key) {
            return Err(rule);
        }
        self.rules.insert(key, rule);
        Ok(())
    }

    /// Returns the most specific rule whose prefix contains `ip`.
    pub fn longest_prefix_match(&self, ip: Ipv4Addr) -> Option<&IpRule> {
        self.rules.values().rev().find(|rule| rule.dst.prefix_matches(ip))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpRule> {
        self.rules.values()
    }

    /// Removes all rules and returns them.
    pub fn clear(&mut self) -> Vec<IpRule> {
        std::mem::take(&mut self.rules).into_values().collect()
    }
}
