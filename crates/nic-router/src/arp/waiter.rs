//! ARP waiter: packets blocked on address resolution.

use crate::{DomainId, InterfaceId};
use nic_router_common::{ConstPointer, Pointer, PointerError};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Lifecycle state of an [`ArpWaiter`].
///
/// `Resolved` and `TimedOut` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaiterState {
    Waiting,
    Resolved,
    TimedOut,
}

/// Frames waiting for the MAC address of `ip` in the destination domain.
///
/// A waiter is listed in its source interface's waiter list and, while
/// waiting, in its destination domain's list of foreign waiters. The
/// router keeps both lists in sync with the pointers held here.
#[derive(Debug)]
pub struct ArpWaiter {
    ip: Ipv4Addr,
    src: ConstPointer<InterfaceId>,
    dst: Pointer<DomainId>,
    deadline: Duration,
    packets: Vec<Vec<u8>>,
    state: WaiterState,
}

impl ArpWaiter {
    /// Creates a waiting waiter holding one frame.
    pub fn new(
        src: InterfaceId,
        dst: DomainId,
        ip: Ipv4Addr,
        deadline: Duration,
        frame: Vec<u8>,
    ) -> Self {
        Self {
            ip,
            src: ConstPointer::new(src),
            dst: Pointer::bound(dst),
            deadline,
            packets: vec![frame],
            state: WaiterState::Waiting,
        }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn src(&self) -> Result<InterfaceId, PointerError> {
        self.src.copied()
    }

    pub fn dst(&self) -> Result<DomainId, PointerError> {
        self.dst.copied()
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn state(&self) -> WaiterState {
        self.state
    }

    pub fn is_waiting(&self) -> bool {
        self.state == WaiterState::Waiting
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn packets(&self) -> &[Vec<u8>] {
        &self.packets
    }

    /// Buffers another frame for the same destination.
    pub fn push_packet(&mut self, frame: Vec<u8>) {
        self.packets.push(frame);
    }

    /// Retargets the waiter to `domain` after a reconfiguration and
    /// returns the previous destination.
    ///
    /// The deadline and the buffered frames are kept.
    pub fn handle_config(&mut self, domain: DomainId) -> Result<DomainId, PointerError> {
        let old = self.dst.unset().ok_or(PointerError::Unbound)?;
        self.dst.set(domain)?;
        Ok(old)
    }

    /// Marks the waiter resolved and hands out its frames.
    pub fn resolve(&mut self) -> Vec<Vec<u8>> {
        self.state = WaiterState::Resolved;
        self.dst.unset();
        std::mem::take(&mut self.packets)
    }

    /// Marks the waiter timed out and returns the destination it waited
    /// for. The frames stay buffered until the waiter is destroyed.
    pub fn time_out(&mut self) -> Option<DomainId> {
        self.state = WaiterState::TimedOut;
        self.dst.unset()
    }

    /// Detaches the waiter from its destination domain without resolving
    /// it and returns the number of frames dropped.
    pub fn dissolve(&mut self) -> usize {
        self.dst.unset();
        let dropped = self.packets.len();
        self.packets.clear();
        dropped
    }
}
