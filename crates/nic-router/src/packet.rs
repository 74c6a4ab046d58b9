//! Frame parsing and rewriting on top of `pnet`.

use crate::config::L4Protocol;
use nic_router_types::MacAddress;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpPacket};
use pnet::packet::udp::{self, MutableUdpPacket, UdpPacket};
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;
use std::net::Ipv4Addr;

pub(crate) const ETHERNET_HEADER_LEN: usize = 14;
pub(crate) const ARP_PACKET_LEN: usize = 28;

pub(crate) fn to_pnet_mac(mac: MacAddress) -> MacAddr {
    let [a, b, c, d, e, f] = mac.octets();
    MacAddr::new(a, b, c, d, e, f)
}

pub(crate) fn from_pnet_mac(mac: MacAddr) -> MacAddress {
    MacAddress::new([mac.0, mac.1, mac.2, mac.3, mac.4, mac.5])
}

/// Transport header fields used for routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ports {
    pub protocol: L4Protocol,
    pub src: u16,
    pub dst: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ipv4Summary {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// `None` for protocols other than TCP/UDP and for non-first fragments.
    pub ports: Option<Ports>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArpOp {
    Request,
    Reply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArpSummary {
    pub op: ArpOp,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Frame {
    Arp(ArpSummary),
    Ipv4(Ipv4Summary),
    Other,
}

/// Classifies an Ethernet frame. Returns `None` for malformed frames.
pub(crate) fn classify(frame: &[u8]) -> Option<Frame> {
    let eth = EthernetPacket::new(frame)?;
    match eth.get_ethertype() {
        EtherTypes::Arp => parse_arp(eth.payload()).map(Frame::Arp),
        EtherTypes::Ipv4 => parse_ipv4(eth.payload()).map(Frame::Ipv4),
        _ => Some(Frame::Other),
    }
}

fn parse_arp(payload: &[u8]) -> Option<ArpSummary> {
    let arp = ArpPacket::new(payload)?;
    if arp.get_hardware_type() != ArpHardwareTypes::Ethernet
        || arp.get_protocol_type() != EtherTypes::Ipv4
        || arp.get_hw_addr_len() != 6
        || arp.get_proto_addr_len() != 4
    {
        return None;
    }
    let op = match arp.get_operation() {
        ArpOperations::Request => ArpOp::Request,
        ArpOperations::Reply => ArpOp::Reply,
        _ => return None,
    };
    Some(ArpSummary {
        op,
        sender_mac: from_pnet_mac(arp.get_sender_hw_addr()),
        sender_ip: arp.get_sender_proto_addr(),
        target_ip: arp.get_target_proto_addr(),
    })
}

fn parse_ipv4(payload: &[u8]) -> Option<Ipv4Summary> {
    let ip = Ipv4Packet::new(payload)?;
    let header_len = usize::from(ip.get_header_length()) * 4;
    let total_len = usize::from(ip.get_total_length());
    if ip.get_version() != 4 || header_len < 20 || total_len < header_len || total_len > payload.len() {
        return None;
    }

    let ports = if ip.get_fragment_offset() != 0 {
        None
    } else {
        match ip.get_next_level_protocol() {
            IpNextHeaderProtocols::Tcp => {
                let tcp = TcpPacket::new(ip.payload())?;
                Some(Ports {
                    protocol: L4Protocol::Tcp,
                    src: tcp.get_source(),
                    dst: tcp.get_destination(),
                })
            }
            IpNextHeaderProtocols::Udp => {
                let udp = UdpPacket::new(ip.payload())?;
                Some(Ports {
                    protocol: L4Protocol::Udp,
                    src: udp.get_source(),
                    dst: udp.get_destination(),
                })
            }
            _ => None,
        }
    };

    Some(Ipv4Summary {
        src: ip.get_source(),
        dst: ip.get_destination(),
        ports,
    })
}

/// Rewrites the IPv4 addresses, and the ports if given, of a frame that
/// [`classify`] accepted, recomputing the checksums.
pub(crate) fn rewrite_ipv4(
    frame: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ports: Option<Ports>,
) -> Option<()> {
    let mut eth = MutableEthernetPacket::new(frame)?;
    let mut ip = MutableIpv4Packet::new(eth.payload_mut())?;
    ip.set_source(src);
    ip.set_destination(dst);

    match ports {
        Some(Ports {
            protocol: L4Protocol::Tcp,
            src: src_port,
            dst: dst_port,
        }) => {
            let mut tcp = MutableTcpPacket::new(ip.payload_mut())?;
            tcp.set_source(src_port);
            tcp.set_destination(dst_port);
            let checksum = tcp::ipv4_checksum(&tcp.to_immutable(), &src, &dst);
            tcp.set_checksum(checksum);
        }
        Some(Ports {
            protocol: L4Protocol::Udp,
            src: src_port,
            dst: dst_port,
        }) => {
            let mut udp = MutableUdpPacket::new(ip.payload_mut())?;
            udp.set_source(src_port);
            udp.set_destination(dst_port);
            let checksum = udp::ipv4_checksum(&udp.to_immutable(), &src, &dst);
            udp.set_checksum(checksum);
        }
        None => {}
    }

    let checksum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);
    Some(())
}

/// Sets the Ethernet source and destination of a frame.
pub(crate) fn set_ethernet_addresses(frame: &mut [u8], src: MacAddress, dst: MacAddress) -> Option<()> {
    let mut eth = MutableEthernetPacket::new(frame)?;
    eth.set_source(to_pnet_mac(src));
    eth.set_destination(to_pnet_mac(dst));
    Some(())
}

/// Builds an ARP request for `target_ip`, broadcast from `sender`.
pub(crate) fn arp_request(sender_mac: MacAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Option<Vec<u8>> {
    arp_frame(
        ArpOp::Request,
        sender_mac,
        sender_ip,
        MacAddress::ZERO,
        target_ip,
        MacAddress::BROADCAST,
    )
}

/// Builds an ARP reply to `target`.
pub(crate) fn arp_reply(
    sender_mac: MacAddress,
    sender_ip: Ipv4Addr,
    target_mac: MacAddress,
    target_ip: Ipv4Addr,
) -> Option<Vec<u8>> {
    arp_frame(ArpOp::Reply, sender_mac, sender_ip, target_mac, target_ip, target_mac)
}

fn arp_frame(
    op: ArpOp,
    sender_mac: MacAddress,
    sender_ip: Ipv4Addr,
    target_mac: MacAddress,
    target_ip: Ipv4Addr,
    eth_dst: MacAddress,
) -> Option<Vec<u8>> {
    let mut buffer = vec![0u8; ETHERNET_HEADER_LEN + ARP_PACKET_LEN];
    {
        let mut eth = MutableEthernetPacket::new(&mut buffer)?;
        eth.set_destination(to_pnet_mac(eth_dst));
        eth.set_source(to_pnet_mac(sender_mac));
        eth.set_ethertype(EtherTypes::Arp);

        let mut arp = MutableArpPacket::new(eth.payload_mut())?;
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(match op {
            ArpOp::Request => ArpOperations::Request,
            ArpOp::Reply => ArpOperations::Reply,
        });
        arp.set_sender_hw_addr(to_pnet_mac(sender_mac));
        arp.set_sender_proto_addr(sender_ip);
        arp.set_target_hw_addr(to_pnet_mac(target_mac));
        arp.set_target_proto_addr(target_ip);
    }
    Some(buffer)
}
