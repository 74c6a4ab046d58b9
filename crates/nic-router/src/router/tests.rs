use super::*;
use crate::config::{DomainConfig, ForwardRuleConfig, RouterConfig};
use crate::error::{DomainError, SessionError, TransmitError};
use crate::interface::NicSink;
use crate::packet::tests::{ipv4_frame, transport_frame};
use crate::packet::{self, Frame};
use nic_router_common::{ManualClock, PortAllocator, FIRST_EPHEMERAL_PORT};
use nic_router_types::Ipv4AddressPrefix;
use pnet::packet::ip::IpNextHeaderProtocols;
use pretty_assertions::assert_eq;
use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::rc::Rc;

const ROUTER_MAC: MacAddress = MacAddress::new([0x02, 0x02, 0x02, 0x02, 0x02, 0x00]);
const HOST_MAC: MacAddress = MacAddress::new([0x02, 0, 0, 0, 1, 10]);
const GATEWAY_MAC: MacAddress = MacAddress::new([0x02, 0, 0, 0, 2, 254]);

type Sent = Rc<RefCell<Vec<Vec<u8>>>>;

struct Recorder(Sent);

impl NicSink for Recorder {
    fn transmit(&mut self, frame: &[u8]) -> Result<(), TransmitError> {
        self.0.borrow_mut().push(frame.to_vec());
        Ok(())
    }
}

fn router() -> (Router, ManualClock) {
    let clock = ManualClock::new();
    let router = Router::new(PortAllocator::shared(), PortAllocator::shared(), Box::new(clock.clone()));
    (router, clock)
}

fn open(router: &mut Router, label: &str) -> (InterfaceId, Sent) {
    let sent = Sent::default();
    let id = router.open_session(label, Box::new(Recorder(sent.clone()))).unwrap();
    (id, sent)
}

fn addr(text: &str) -> SocketAddrV4 {
    text.parse().unwrap()
}

fn tcp(src: &str, dst: &str) -> Vec<u8> {
    transport_frame(L4Protocol::Tcp, HOST_MAC, ROUTER_MAC, addr(src), addr(dst), b"data")
}

fn arp_reply(mac: MacAddress, ip: [u8; 4], router_ip: [u8; 4]) -> Vec<u8> {
    packet::arp_reply(mac, Ipv4Addr::from(ip), ROUTER_MAC, Ipv4Addr::from(router_ip)).unwrap()
}

/// Source and destination socket of a transmitted TCP/UDP frame.
fn endpoints(frame: &[u8]) -> (SocketAddrV4, SocketAddrV4) {
    match packet::classify(frame) {
        Some(Frame::Ipv4(ip)) => {
            let ports = ip.ports.unwrap();
            (SocketAddrV4::new(ip.src, ports.src), SocketAddrV4::new(ip.dst, ports.dst))
        }
        other => panic!("expected an IPv4 frame, got {other:?}"),
    }
}

/// lan (10.0.1.1/24) reaches everything through uplink (10.0.2.1/24),
/// which translates lan traffic.
fn nat_config() -> RouterConfig {
    RouterConfig::default()
        .with_policy("lan", "lan")
        .with_policy("uplink", "uplink")
        .with_domain(
            DomainConfig::new("lan")
                .with_interface("10.0.1.1/24")
                .with_ip_rule("0.0.0.0/0", "uplink"),
        )
        .with_domain(
            DomainConfig::new("uplink")
                .with_interface("10.0.2.1/24")
                .with_gateway("10.0.2.254")
                .with_nat("lan", 2, 2),
        )
}

/// Opens both sessions of [`nat_config`] and teaches the router the MACs
/// of the lan host and the uplink gateway.
fn nat_setup() -> (Router, ManualClock, (InterfaceId, Sent), (InterfaceId, Sent)) {
    let (mut router, clock) = router();
    assert!(router.apply_config(&nat_config()).is_clean());
    let lan = open(&mut router, "lan");
    let uplink = open(&mut router, "uplink");
    assert_eq!(
        router.handle_frame(uplink.0, &arp_reply(GATEWAY_MAC, [10, 0, 2, 254], [10, 0, 2, 1])),
        PacketVerdict::ArpResolved { released: 0 }
    );
    assert_eq!(
        router.handle_frame(lan.0, &arp_reply(HOST_MAC, [10, 0, 1, 10], [10, 0, 1, 1])),
        PacketVerdict::ArpResolved { released: 0 }
    );
    (router, clock, lan, uplink)
}

#[test]
fn test_sessions_follow_policies() {
    let (mut router, _clock) = router();
    router.apply_config(&nat_config());

    let (lan, _) = open(&mut router, "lan-1");
    assert_eq!(router.domain("lan").unwrap().interface(), Some(lan));
    assert_eq!(
        router.open_session("lan-2", Box::new(Recorder(Sent::default()))).unwrap_err(),
        SessionError::DomainBusy("lan".to_string())
    );
    assert_eq!(
        router.open_session("wifi", Box::new(Recorder(Sent::default()))).unwrap_err(),
        SessionError::NoPolicy("wifi".to_string())
    );

    router.close_session(lan).unwrap();
    assert_eq!(router.close_session(lan), Err(SessionError::UnknownSession(lan)));
    assert!(router.domain("lan").unwrap().interface().is_none());
    assert!(router.open_session("lan-2", Box::new(Recorder(Sent::default()))).is_ok());
}

#[test]
fn test_answers_arp_for_router_address_only() {
    let (mut router, _clock) = router();
    router.apply_config(&nat_config());
    let (lan, sent) = open(&mut router, "lan");

    let request = packet::arp_request(HOST_MAC, Ipv4Addr::new(10, 0, 1, 10), Ipv4Addr::new(10, 0, 1, 1)).unwrap();
    assert_eq!(router.handle_frame(lan, &request), PacketVerdict::ArpReplied);
    assert_eq!(sent.borrow().len(), 1);
    match packet::classify(&sent.borrow()[0]) {
        Some(Frame::Arp(reply)) => {
            assert_eq!(reply.sender_mac, ROUTER_MAC);
            assert_eq!(reply.sender_ip, Ipv4Addr::new(10, 0, 1, 1));
            assert_eq!(reply.target_ip, Ipv4Addr::new(10, 0, 1, 10));
        }
        other => panic!("expected an ARP reply, got {other:?}"),
    }

    let other = packet::arp_request(HOST_MAC, Ipv4Addr::new(10, 0, 1, 10), Ipv4Addr::new(10, 0, 1, 7)).unwrap();
    assert_eq!(router.handle_frame(lan, &other), PacketVerdict::Dropped(DropReason::NotForRouter));
    assert_eq!(router.domain("lan").unwrap().stats().arp_replies_sent, 1);
}

#[test]
fn test_nat_round_trip() {
    let (mut router, _clock, lan, uplink) = nat_setup();

    let verdict = router.handle_frame(lan.0, &tcp("10.0.1.10:40000", "1.1.1.1:80"));
    assert_eq!(verdict, PacketVerdict::Forwarded);
    let out = uplink.1.borrow().last().cloned().unwrap();
    let nat = SocketAddrV4::new(Ipv4Addr::new(10, 0, 2, 1), FIRST_EPHEMERAL_PORT);
    assert_eq!(endpoints(&out), (nat, addr("1.1.1.1:80")));
    assert_eq!(router.link_count(), 1);
    assert_eq!(router.port_allocator(L4Protocol::Tcp).borrow().allocated_count(), 1);

    let reply = transport_frame(L4Protocol::Tcp, GATEWAY_MAC, ROUTER_MAC, addr("1.1.1.1:80"), nat, b"ok");
    assert_eq!(router.handle_frame(uplink.0, &reply), PacketVerdict::Forwarded);
    let back = lan.1.borrow().last().cloned().unwrap();
    assert_eq!(endpoints(&back), (addr("1.1.1.1:80"), addr("10.0.1.10:40000")));

    let stats = router.domain("lan").unwrap().stats().clone();
    assert_eq!((stats.links_created, stats.packets_forwarded), (1, 1));
}

#[test]
fn test_portless_traffic_is_not_translated() {
    let (mut router, _clock, lan, _uplink) = nat_setup();
    let icmp = ipv4_frame(
        HOST_MAC,
        ROUTER_MAC,
        Ipv4Addr::new(10, 0, 1, 10),
        Ipv4Addr::new(1, 1, 1, 1),
        IpNextHeaderProtocols::Icmp,
        8,
    );
    assert_eq!(
        router.handle_frame(lan.0, &icmp),
        PacketVerdict::Dropped(DropReason::UnsupportedProtocol)
    );
    assert_eq!(router.domain("lan").unwrap().stats().packets_dropped, 1);
}

#[test]
fn test_close_session_releases_links_and_ports() {
    let (mut router, _clock, lan, _uplink) = nat_setup();
    router.handle_frame(lan.0, &tcp("10.0.1.10:40000", "1.1.1.1:80"));
    router.handle_frame(lan.0, &tcp("10.0.1.10:40001", "1.1.1.1:80"));
    assert_eq!(router.link_count(), 2);

    router.close_session(lan.0).unwrap();
    assert_eq!(router.link_count(), 0);
    assert_eq!(router.domain("uplink").unwrap().link_count(), 0);
    assert_eq!(router.port_allocator(L4Protocol::Tcp).borrow().allocated_count(), 0);
    let nat = router
        .domain("uplink")
        .unwrap()
        .nat_rules()
        .iter()
        .map(|rule| rule.port_allocator(L4Protocol::Tcp).used())
        .sum::<u32>();
    assert_eq!(nat, 0);
    assert_eq!(router.domain("lan").unwrap().stats().links_destroyed, 2);
}

#[test]
fn test_forward_rule_without_nat_tracks_link() {
    let (mut router, _clock) = router();
    let config = RouterConfig::default()
        .with_policy("lan", "lan")
        .with_policy("dmz", "dmz")
        .with_domain(
            DomainConfig::new("lan")
                .with_interface("10.0.1.1/24")
                .with_forward(L4Protocol::Udp, ForwardRuleConfig::new(53, "dmz", "10.0.3.2")),
        )
        .with_domain(DomainConfig::new("dmz").with_interface("10.0.3.1/24"));
    assert!(router.apply_config(&config).is_clean());
    let (lan, _) = open(&mut router, "lan");
    let (dmz, dmz_sent) = open(&mut router, "dmz");
    router.handle_frame(dmz, &arp_reply(GATEWAY_MAC, [10, 0, 3, 2], [10, 0, 3, 1]));

    let query = transport_frame(
        L4Protocol::Udp,
        HOST_MAC,
        ROUTER_MAC,
        addr("10.0.1.10:5353"),
        addr("10.0.1.1:53"),
        b"q",
    );
    assert_eq!(router.handle_frame(lan, &query), PacketVerdict::Forwarded);
    let out = dmz_sent.borrow().last().cloned().unwrap();
    assert_eq!(endpoints(&out), (addr("10.0.1.10:5353"), addr("10.0.3.2:53")));
    assert_eq!(router.link_count(), 1);
    assert_eq!(router.port_allocator(L4Protocol::Udp).borrow().allocated_count(), 0);
}

#[test]
fn test_apply_config_reports_rejected_entries() {
    let (mut router, _clock) = router();
    let config = RouterConfig::default()
        .with_policy("lan", "lan")
        .with_policy("lan", "lan")
        .with_policy("x", "nowhere")
        .with_domain(
            DomainConfig::new("lan")
                .with_interface("10.0.1.1/24")
                .with_gateway("10.0.9.1")
                .with_ip_rule("0.0.0.0/0", "nowhere")
                .with_ip_rule("10.8.0.0/16", "lan")
                .with_ip_rule("10.8.1.0/16", "lan")
                .with_forward(L4Protocol::Tcp, ForwardRuleConfig::new(80, "lan", "10.0.1.5"))
                .with_forward(L4Protocol::Tcp, ForwardRuleConfig::new(80, "lan", "10.0.1.6"))
                .with_forward(L4Protocol::Tcp, ForwardRuleConfig::new(81, "lan", "not-an-ip")),
        )
        .with_domain(DomainConfig::new("lan"))
        .with_domain(DomainConfig::new("broken").with_interface("10.0.1.1/33"));

    let report = router.apply_config(&config);
    assert_eq!(report.generation, 1);
    assert_eq!(report.domains, 1);
    assert_eq!(report.rules, 2);
    assert_eq!(
        report.errors,
        vec![
            ConfigError::invalid_address("lan", "gateway", "10.0.9.1"),
            ConfigError::DuplicateDomain("lan".to_string()),
            ConfigError::invalid_address("broken", "interface", "10.0.1.1/33"),
            ConfigError::DuplicatePolicy("lan".to_string()),
            ConfigError::UnknownPolicyDomain {
                label_prefix: "x".to_string(),
                domain: "nowhere".to_string(),
            },
            ConfigError::duplicate_rule("lan", "tcp forward rule for port 80"),
            ConfigError::invalid_address("lan", "forward destination", "not-an-ip"),
            ConfigError::unknown_domain("lan", "nowhere"),
            ConfigError::duplicate_rule("lan", "ip rule for 10.8.1.0/16"),
        ]
    );
    let lan = router.domain("lan").unwrap();
    assert_eq!(lan.ip_config().and_then(|config| config.gateway), None);
    assert_eq!(lan.rule_count(), 2);
}

#[test]
fn test_forward_port_in_nat_range_is_pinned() {
    let (mut router, _clock) = router();
    let pinned = |port| {
        RouterConfig::default()
            .with_domain(
                DomainConfig::new("lan")
                    .with_interface("10.0.1.1/24")
                    .with_forward(L4Protocol::Tcp, ForwardRuleConfig::new(port, "lan", "10.0.1.5")),
            )
            .with_domain(
                DomainConfig::new("dmz")
                    .with_interface("10.0.3.1/24")
                    .with_forward(L4Protocol::Tcp, ForwardRuleConfig::new(port, "dmz", "10.0.3.5")),
            )
    };

    let report = router.apply_config(&pinned(FIRST_EPHEMERAL_PORT));
    assert_eq!(report.rules, 1);
    assert!(matches!(
        report.errors.as_slice(),
        [ConfigError::PortPinned { port, .. }] if *port == FIRST_EPHEMERAL_PORT
    ));
    assert!(router.port_allocator(L4Protocol::Tcp).borrow().is_allocated(FIRST_EPHEMERAL_PORT));

    assert!(router.apply_config(&pinned(8080)).is_clean());
    assert_eq!(router.port_allocator(L4Protocol::Tcp).borrow().allocated_count(), 0);
}

#[test]
fn test_reload_keeps_matching_links() {
    let (mut router, _clock, lan, uplink) = nat_setup();
    router.handle_frame(lan.0, &tcp("10.0.1.10:40000", "1.1.1.1:80"));
    let old_lan = router.domain_id("lan").unwrap();

    let report = router.apply_config(&nat_config());
    assert!(report.is_clean());
    let new_lan = router.domain_id("lan").unwrap();
    assert_ne!(old_lan, new_lan);
    assert!(router.domain_by_id(old_lan).is_none());
    assert_eq!(router.link_count(), 1);
    assert_eq!(router.domain("lan").unwrap().interface(), Some(lan.0));

    let uplink_domain = router.domain("uplink").unwrap();
    let guard = uplink_domain.nat_rules().find_by_domain(new_lan).unwrap();
    assert_eq!(guard.port_allocator(L4Protocol::Tcp).used(), 1);
    assert_eq!(uplink_domain.arp_cache().find_by_ip(Ipv4Addr::new(10, 0, 2, 254)), Some(GATEWAY_MAC));

    let nat = SocketAddrV4::new(Ipv4Addr::new(10, 0, 2, 1), FIRST_EPHEMERAL_PORT);
    let reply = transport_frame(L4Protocol::Tcp, GATEWAY_MAC, ROUTER_MAC, addr("1.1.1.1:80"), nat, b"ok");
    assert_eq!(router.handle_frame(uplink.0, &reply), PacketVerdict::Forwarded);
}

#[test]
fn test_reload_drops_links_whose_rule_vanished() {
    let (mut router, _clock, lan, _uplink) = nat_setup();
    router.handle_frame(lan.0, &tcp("10.0.1.10:40000", "1.1.1.1:80"));

    let mut config = nat_config();
    config.domains[1].nat.clear();
    router.apply_config(&config);

    assert_eq!(router.link_count(), 0);
    assert_eq!(router.port_allocator(L4Protocol::Tcp).borrow().allocated_count(), 0);
    assert_eq!(router.interface(lan.0).unwrap().links().count(), 0);
}

#[test]
fn test_interface_retired_until_domain_returns() {
    let (mut router, _clock) = router();
    router.apply_config(&nat_config());
    let (lan, _) = open(&mut router, "lan");

    let without_lan = RouterConfig::default()
        .with_policy("uplink", "uplink")
        .with_domain(DomainConfig::new("uplink").with_interface("10.0.2.1/24"));
    router.apply_config(&without_lan);
    assert_eq!(router.interface(lan).unwrap().domain(), None);
    assert_eq!(
        router.handle_frame(lan, &tcp("10.0.1.10:40000", "1.1.1.1:80")),
        PacketVerdict::Dropped(DropReason::NoDomain)
    );

    router.apply_config(&nat_config());
    assert_eq!(router.interface(lan).unwrap().domain(), router.domain_id("lan"));
    assert_eq!(router.domain("lan").unwrap().interface(), Some(lan));
}

#[test]
fn test_dynamic_ip_config() {
    let (mut router, _clock) = router();
    let config = RouterConfig::default()
        .with_policy("lan", "lan")
        .with_policy("wan", "wan")
        .with_domain(
            DomainConfig::new("lan")
                .with_interface("10.0.1.1/24")
                .with_ip_rule("0.0.0.0/0", "wan"),
        )
        .with_domain(DomainConfig::new("wan"));
    router.apply_config(&config);
    let (lan, _) = open(&mut router, "lan");
    let (wan, wan_sent) = open(&mut router, "wan");

    assert_eq!(
        router.handle_frame(wan, &tcp("192.168.0.2:1000", "192.168.0.1:80")),
        PacketVerdict::Dropped(DropReason::NoIpConfig)
    );
    let prefix: Ipv4AddressPrefix = "192.168.0.1/24".parse().unwrap();
    assert_eq!(
        router.assign_ip_config("lan", prefix, None),
        Err(DomainError::StaticIpConfig("lan".to_string()))
    );
    router
        .assign_ip_config("wan", prefix, Some(Ipv4Addr::new(192, 168, 0, 254)))
        .unwrap();

    assert_eq!(
        router.handle_frame(lan, &tcp("10.0.1.10:40000", "8.8.8.8:53")),
        PacketVerdict::Queued
    );
    assert_eq!(router.waiter_count(), 1);
    assert_eq!(wan_sent.borrow().len(), 1, "ARP request for the gateway");

    // the assigned config survives a reload
    router.apply_config(&config);
    assert_eq!(router.domain("wan").unwrap().router_ip(), Some(Ipv4Addr::new(192, 168, 0, 1)));
    assert_eq!(router.waiter_count(), 1);

    router.discard_ip_config("wan").unwrap();
    assert_eq!(router.waiter_count(), 0);
    assert_eq!(router.interface(lan).unwrap().own_arp_waiters().count(), 0);
    assert_eq!(
        router.discard_ip_config("wan"),
        Err(DomainError::NoIpConfig("wan".to_string()))
    );
    assert_eq!(
        router.discard_ip_config("dmz"),
        Err(DomainError::UnknownDomain("dmz".to_string()))
    );
}

#[test]
fn test_next_timeout_and_batch_clock_reads() {
    let (mut router, clock) = router();
    router.apply_config(&nat_config());
    let (lan, _) = open(&mut router, "lan");
    let (_uplink, _) = open(&mut router, "uplink");
    assert_eq!(router.next_timeout(), None);

    clock.advance(Duration::from_secs(1));
    let reads = clock.reads();
    let frames = [
        tcp("10.0.1.10:40000", "1.1.1.1:80"),
        tcp("10.0.1.10:40001", "1.1.1.1:80"),
    ];
    let verdicts = router.handle_frames(lan, frames.iter().map(Vec::as_slice));
    assert_eq!(verdicts, vec![PacketVerdict::Queued, PacketVerdict::Queued]);
    assert_eq!(clock.reads(), reads + 1);

    // both flows wait for the gateway; the links expire long after
    assert_eq!(router.waiter_count(), 1);
    assert_eq!(router.next_timeout(), Some(Duration::from_secs(11)));
}

#[test]
fn test_full_arp_waiter_drops_and_counts() {
    let (mut router, _clock) = router();
    assert!(router
        .apply_config(&nat_config().with_arp_waiter_packet_limit(2))
        .is_clean());
    let (lan, _) = open(&mut router, "lan");
    let (uplink, _) = open(&mut router, "uplink");

    let frame = tcp("10.0.1.10:40000", "10.0.2.9:80");
    let verdicts: Vec<_> = (0..4).map(|_| router.handle_frame(lan, &frame)).collect();
    assert_eq!(
        verdicts,
        vec![
            PacketVerdict::Queued,
            PacketVerdict::Queued,
            PacketVerdict::Dropped(DropReason::ArpWaiterFull),
            PacketVerdict::Dropped(DropReason::ArpWaiterFull),
        ]
    );

    let waiter = router.domain("uplink").unwrap().foreign_arp_waiters().next().unwrap();
    assert_eq!(router.waiter(waiter).unwrap().packet_count(), 2);
    assert_eq!(router.domain("uplink").unwrap().stats().packets_dropped_on_full_arp_waiter, 2);
    assert_eq!(router.domain("lan").unwrap().stats().packets_dropped, 2);

    assert_eq!(
        router.handle_frame(uplink, &arp_reply(HOST_MAC, [10, 0, 2, 9], [10, 0, 2, 1])),
        PacketVerdict::ArpResolved { released: 2 }
    );
}

#[test]
fn test_conflicting_arp_reply_keeps_cached_mac() {
    let (mut router, _clock, lan, uplink) = nat_setup();
    let forged = MacAddress::new([0x02, 0x06, 0x06, 0x06, 0x06, 0x06]);

    assert_eq!(
        router.handle_frame(uplink.0, &arp_reply(forged, [10, 0, 2, 254], [10, 0, 2, 1])),
        PacketVerdict::ArpResolved { released: 0 }
    );
    let cache = router.domain("uplink").unwrap().arp_cache();
    assert_eq!(cache.find_by_ip(Ipv4Addr::new(10, 0, 2, 254)), Some(GATEWAY_MAC));

    assert_eq!(
        router.handle_frame(lan.0, &tcp("10.0.1.10:40000", "1.1.1.1:80")),
        PacketVerdict::Forwarded
    );
    let out = uplink.1.borrow().last().cloned().unwrap();
    let dst = MacAddress::new(out[..6].try_into().unwrap());
    assert_eq!(dst, GATEWAY_MAC);
}

#[test]
fn test_close_session_dissolves_pending_waiters() {
    let (mut router, _clock, lan, _uplink) = nat_setup();
    assert_eq!(
        router.handle_frame(lan.0, &tcp("10.0.1.10:40000", "10.0.2.9:80")),
        PacketVerdict::Queued
    );
    assert_eq!(router.domain("uplink").unwrap().foreign_arp_waiters().count(), 1);

    router.close_session(lan.0).unwrap();
    assert_eq!(router.waiter_count(), 0);
    assert_eq!(router.domain("uplink").unwrap().foreign_arp_waiters().count(), 0);
    assert_eq!(router.domain("uplink").unwrap().stats().packets_dropped, 1);
    assert_eq!(router.link_count(), 0);
    assert_eq!(router.port_allocator(L4Protocol::Tcp).borrow().allocated_count(), 0);
}

#[test]
fn test_close_session_destroys_timed_out_waiters() {
    let (mut router, clock, lan, _uplink) = nat_setup();
    router.handle_frame(lan.0, &tcp("10.0.1.10:40000", "10.0.2.9:80"));
    clock.advance(Duration::from_secs(10));
    assert_eq!(router.handle_timeouts().arp_waiters_timed_out, 1);
    assert_eq!(router.interface(lan.0).unwrap().timed_out_arp_waiters().count(), 1);
    assert_eq!(router.waiter_count(), 1);

    router.close_session(lan.0).unwrap();
    assert_eq!(router.waiter_count(), 0);
    assert_eq!(router.domain("uplink").unwrap().foreign_arp_waiters().count(), 0);
    assert_eq!(router.domain("uplink").unwrap().stats().packets_dropped_on_arp_timeout, 1);
}

/// lan reaches everything through wan, which obtains its address at
/// runtime and translates lan traffic.
fn dynamic_config() -> RouterConfig {
    RouterConfig::default()
        .with_policy("lan", "lan")
        .with_policy("wan", "wan")
        .with_domain(
            DomainConfig::new("lan")
                .with_interface("10.0.1.1/24")
                .with_ip_rule("0.0.0.0/0", "wan"),
        )
        .with_domain(DomainConfig::new("wan").with_nat("lan", 4, 4))
}

#[test]
fn test_reassigned_ip_config_dissolves_dependents() {
    let (mut router, _clock) = router();
    assert!(router.apply_config(&dynamic_config()).is_clean());
    let (lan, _) = open(&mut router, "lan");
    let (_wan, _) = open(&mut router, "wan");

    let lease: Ipv4AddressPrefix = "192.168.0.1/24".parse().unwrap();
    router
        .assign_ip_config("wan", lease, Some(Ipv4Addr::new(192, 168, 0, 254)))
        .unwrap();
    assert_eq!(
        router.handle_frame(lan, &tcp("10.0.1.10:40000", "8.8.8.8:53")),
        PacketVerdict::Queued
    );
    assert_eq!((router.waiter_count(), router.link_count()), (1, 1));

    let renewed: Ipv4AddressPrefix = "172.16.0.1/24".parse().unwrap();
    router
        .assign_ip_config("wan", renewed, Some(Ipv4Addr::new(172, 16, 0, 254)))
        .unwrap();
    assert_eq!((router.waiter_count(), router.link_count()), (0, 0));
    assert_eq!(router.interface(lan).unwrap().own_arp_waiters().count(), 0);
    assert_eq!(router.port_allocator(L4Protocol::Tcp).borrow().allocated_count(), 0);
    assert_eq!(router.domain("wan").unwrap().router_ip(), Some(Ipv4Addr::new(172, 16, 0, 1)));

    assert_eq!(
        router.handle_frame(lan, &tcp("10.0.1.10:40000", "8.8.8.8:53")),
        PacketVerdict::Queued
    );
    let waiter = router.domain("wan").unwrap().foreign_arp_waiters().next().unwrap();
    assert_eq!(router.waiter(waiter).unwrap().ip(), Ipv4Addr::new(172, 16, 0, 254));
}

#[test]
fn test_closing_session_discards_dynamic_ip_config() {
    let (mut router, _clock) = router();
    router.apply_config(&dynamic_config());
    let (lan, _) = open(&mut router, "lan");
    let (wan, _) = open(&mut router, "wan");
    let lease: Ipv4AddressPrefix = "192.168.0.1/24".parse().unwrap();
    router
        .assign_ip_config("wan", lease, Some(Ipv4Addr::new(192, 168, 0, 254)))
        .unwrap();
    assert_eq!(
        router.handle_frame(lan, &tcp("10.0.1.10:40000", "8.8.8.8:53")),
        PacketVerdict::Queued
    );

    router.close_session(wan).unwrap();
    assert_eq!(router.domain("wan").unwrap().router_ip(), None);
    assert_eq!((router.waiter_count(), router.link_count()), (0, 0));
    assert_eq!(
        router.discard_ip_config("wan"),
        Err(DomainError::NoIpConfig("wan".to_string()))
    );
}
