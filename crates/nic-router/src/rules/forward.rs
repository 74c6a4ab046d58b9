//! Forward rules: router port to destination domain and host.

use crate::DomainId;
use nic_router_common::SharedPortAllocator;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Forwards traffic for `port` on the router address to `to:to_port` in
/// `domain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRule {
    pub port: u16,
    pub domain: DomainId,
    pub to: Ipv4Addr,
    pub to_port: Option<u16>,
}

impl ForwardRule {
    /// Returns the destination port after forwarding.
    pub fn destination_port(&self) -> u16 {
        self.to_port.unwrap_or(self.port)
    }
}

/// Forward rules of one domain and protocol, keyed by router port.
///
/// Ports pinned in the shared allocator while the tree holds the rule are
/// released by [`clear`](Self::clear).
#[derive(Debug, Default)]
pub struct ForwardRuleTree {
    rules: BTreeMap<u16, ForwardRule>,
    pinned: Vec<(SharedPortAllocator, u16)>,
}

impl ForwardRuleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a rule. A duplicate port is rejected and the rule is handed
    /// back.
    pub fn insert(&mut self, rule: ForwardRule) -> Result<(), ForwardRule> {
        if self.rules.contains_key(&rule.port) {
            return Err(rule);
        }
        self.rules.insert(rule.port, rule);
        Ok(())
    }

    /// Records a port pinned for one of the rules.
    pub fn add_pin(&mut self, allocator: SharedPortAllocator, port: u16) {
        self.pinned.push((allocator, port));
    }

    pub fn find_by_port(&self, port: u16) -> Option<&ForwardRule> {
        self.rules.get(&port)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ForwardRule> {
        self.rules.values()
    }

    /// Removes all rules, releases pinned ports and returns the removed
    /// rules.
    pub fn clear(&mut self) -> Vec<ForwardRule> {
        for (allocator, port) in self.pinned.drain(..) {
            allocator.borrow_mut().free(port);
        }
        std::mem::take(&mut self.rules).into_values().collect()
    }
}
