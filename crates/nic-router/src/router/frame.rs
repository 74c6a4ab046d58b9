//! Frame dispatch.

use super::{DropReason, PacketVerdict, Router};
use crate::packet::{self, Frame};
use crate::InterfaceId;
use tracing::debug;

impl Router {
    /// Handles one frame received on `interface`.
    pub fn handle_frame(&mut self, interface: InterfaceId, frame: &[u8]) -> PacketVerdict {
        self.timer.update_cached_time();
        self.process_frame(interface, frame)
    }

    /// Handles a batch of frames received on `interface`, reading the clock
    /// once for the whole batch.
    pub fn handle_frames<'a, I>(&mut self, interface: InterfaceId, frames: I) -> Vec<PacketVerdict>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        self.timer.update_cached_time();
        frames
            .into_iter()
            .map(|frame| self.process_frame(interface, frame))
            .collect()
    }

    fn process_frame(&mut self, interface: InterfaceId, frame: &[u8]) -> PacketVerdict {
        self.destroy_timed_out_waiters(interface);

        let Some(bound) = self.interfaces.get(interface).map(|iface| iface.domain()) else {
            return PacketVerdict::Dropped(DropReason::UnknownSession);
        };
        let Some(domain) = bound else {
            debug!(%interface, "Dropping frame on interface without domain");
            return PacketVerdict::Dropped(DropReason::NoDomain);
        };

        let result = match packet::classify(frame) {
            None => Err(DropReason::Malformed),
            Some(Frame::Other) => Err(DropReason::UnsupportedProtocol),
            Some(Frame::Arp(arp)) => self.handle_arp(interface, domain, arp),
            Some(Frame::Ipv4(ip)) => self.handle_ip(interface, domain, frame, ip),
        };

        match result {
            Ok(verdict) => verdict,
            Err(reason) => {
                if let Some(domain) = self.domains.get_mut(domain) {
                    domain.stats.packets_dropped = domain.stats.packets_dropped.saturating_add(1);
                    debug!(domain = domain.name(), ?reason, "Dropped frame");
                }
                PacketVerdict::Dropped(reason)
            }
        }
    }
}
