//! Deadlines of ARP waiters and links.

use super::Router;
use crate::{InterfaceId, LinkId, WaiterId};
use std::time::Duration;
use tracing::debug;

/// What one call to [`Router::handle_timeouts`] expired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutReport {
    pub arp_waiters_timed_out: usize,
    pub links_expired: usize,
}

impl Router {
    /// Returns the earliest pending deadline, if any.
    ///
    /// The caller arms its timer for this instant and calls
    /// [`handle_timeouts`](Self::handle_timeouts) once it fires.
    pub fn next_timeout(&self) -> Option<Duration> {
        let waiters = self
            .waiters
            .values()
            .filter(|waiter| waiter.is_waiting())
            .map(|waiter| waiter.deadline());
        let links = self.links.values().map(|link| link.deadline());
        waiters.chain(links).min()
    }

    /// Expires every ARP waiter and link whose deadline has passed.
    ///
    /// Timed-out waiters leave their domain immediately but are destroyed
    /// only by the next frame on their source interface or by
    /// [`collect_garbage`](Self::collect_garbage).
    pub fn handle_timeouts(&mut self) -> TimeoutReport {
        let now = self.timer.curr_time();

        let waiters: Vec<WaiterId> = self
            .waiters
            .iter()
            .filter(|(_, waiter)| waiter.is_waiting() && waiter.deadline() <= now)
            .map(|(id, _)| id)
            .collect();
        let links: Vec<LinkId> = self
            .links
            .iter()
            .filter(|(_, link)| link.deadline() <= now)
            .map(|(id, _)| id)
            .collect();

        let report = TimeoutReport {
            arp_waiters_timed_out: waiters.len(),
            links_expired: links.len(),
        };
        for id in waiters {
            self.time_out_waiter(id);
        }
        for id in links {
            self.dissolve_link(id);
        }
        if report != TimeoutReport::default() {
            debug!(?now, waiters = report.arp_waiters_timed_out, links = report.links_expired, "Handled timeouts");
        }
        report
    }

    /// Destroys the timed-out waiters of all interfaces. Returns the number
    /// of waiters destroyed.
    pub fn collect_garbage(&mut self) -> usize {
        self.interfaces
            .handles()
            .into_iter()
            .map(|interface| self.destroy_timed_out_waiters(interface))
            .sum()
    }

    /// Destroys the timed-out waiters of one interface.
    pub(super) fn destroy_timed_out_waiters(&mut self, interface: InterfaceId) -> usize {
        let Some(iface) = self.interfaces.get_mut(interface) else {
            return 0;
        };
        let timed_out = std::mem::take(&mut iface.timed_out_arp_waiters);
        let count = timed_out.len();
        for id in timed_out {
            self.dissolve_waiter(id);
        }
        count
    }

    fn time_out_waiter(&mut self, id: WaiterId) {
        let Some(waiter) = self.waiters.get_mut(id) else {
            return;
        };
        let src = waiter.src().ok();
        let dropped = waiter.packet_count() as u64;
        let ip = waiter.ip();
        let dst = waiter.time_out();

        if let Some(domain) = dst.and_then(|dst| self.domains.get_mut(dst)) {
            domain.remove_foreign_waiter(id);
            domain.stats.arp_waiters_timed_out = domain.stats.arp_waiters_timed_out.saturating_add(1);
            domain.stats.packets_dropped_on_arp_timeout =
                domain.stats.packets_dropped_on_arp_timeout.saturating_add(dropped);
            debug!(waiter = %id, domain = domain.name(), %ip, dropped, "ARP waiter timed out");
        }
        if let Some(iface) = src.and_then(|src| self.interfaces.get_mut(src)) {
            iface.move_to_timed_out(id);
        }
    }
}
