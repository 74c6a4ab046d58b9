//! Interfaces: the binding of one client session to a domain.

use crate::error::TransmitError;
use crate::{DomainId, LinkId, WaiterId};
use nic_router_common::Pointer;
use std::collections::{BTreeSet, VecDeque};

/// Transmit side of a client session.
///
/// Implemented by the session transport of the embedding process.
pub trait NicSink {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), TransmitError>;
}

/// A client session attached to the router.
///
/// Owns the ARP waiters it originated and the links it opened as client.
/// Both are dissolved before the interface is destroyed.
pub struct Interface {
    label: String,
    pub(crate) domain: Pointer<DomainId>,
    pub(crate) own_arp_waiters: VecDeque<WaiterId>,
    pub(crate) timed_out_arp_waiters: Vec<WaiterId>,
    pub(crate) links: BTreeSet<LinkId>,
    sink: Box<dyn NicSink>,
}

impl Interface {
    pub fn new(label: &str, sink: Box<dyn NicSink>) -> Self {
        Self {
            label: label.to_string(),
            domain: Pointer::new(),
            own_arp_waiters: VecDeque::new(),
            timed_out_arp_waiters: Vec::new(),
            links: BTreeSet::new(),
            sink,
        }
    }

    /// Session label the interface was opened with.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the bound domain, or `None` while the interface is retired.
    pub fn domain(&self) -> Option<DomainId> {
        self.domain.copied().ok()
    }

    pub fn own_arp_waiters(&self) -> impl Iterator<Item = WaiterId> + '_ {
        self.own_arp_waiters.iter().copied()
    }

    pub fn timed_out_arp_waiters(&self) -> impl Iterator<Item = WaiterId> + '_ {
        self.timed_out_arp_waiters.iter().copied()
    }

    pub fn links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.links.iter().copied()
    }

    pub(crate) fn transmit(&mut self, frame: &[u8]) -> Result<(), TransmitError> {
        self.sink.transmit(frame)
    }

    /// Moves a waiter from the own list to the timed-out list.
    pub(crate) fn move_to_timed_out(&mut self, waiter: WaiterId) {
        self.own_arp_waiters.retain(|id| *id != waiter);
        self.timed_out_arp_waiters.push(waiter);
    }

    pub(crate) fn remove_own_waiter(&mut self, waiter: WaiterId) {
        self.own_arp_waiters.retain(|id| *id != waiter);
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("label", &self.label)
            .field("domain", &self.domain)
            .field("own_arp_waiters", &self.own_arp_waiters)
            .field("timed_out_arp_waiters", &self.timed_out_arp_waiters)
            .field("links", &self.links)
            .finish_non_exhaustive()
    }
}
