//! End-to-end scenarios over in-memory packet ports: ARP-gated
//! forwarding, NAT round trips, TCP teardown, DHCP service and lease
//! handling, and parked-packet timeouts.

use natgate::dataplane::{
    DhcpServerConfig, Domain, DomainId, IfaceId, IpRule, Ipv4Cidr, Ipv4Config, LinkState, Proto,
    Router, RouterConfig, TransportRule,
};
use natgate::port::SharedPort;
use natgate::protocol::arp::{ArpOp, ArpPacket};
use natgate::protocol::dhcp::{
    BootpOp, DhcpBuilder, DhcpHeader, DhcpMessageType, DHCP_CLIENT_PORT, DHCP_SERVER_PORT,
};
use natgate::protocol::ethernet::{FrameBuilder, HEADER_SIZE as ETH};
use natgate::protocol::ipv4::{Ipv4Builder, Ipv4Mut, Protocol};
use natgate::protocol::tcp::{self, TcpFlags};
use natgate::protocol::udp::{UdpBuilder, UdpMut};
use natgate::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;
use std::time::Duration;

const CLIENT_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x10]);
const LAN_ROUTER_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
const WAN_ROUTER_MAC: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
const GATEWAY_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
const LAN_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const WAN_IP: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
const WAN_GATEWAY: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 254);
const REMOTE_IP: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

struct Net {
    router: Router,
    lan: DomainId,
    wan: DomainId,
    lan_if: IfaceId,
    wan_if: IfaceId,
    lan_port: SharedPort,
    wan_port: SharedPort,
}

fn build_net(config: RouterConfig) -> Net {
    let mut router = Router::new(config);

    let mut lan_domain = Domain::new("lan");
    lan_domain.ip_config = Some(Ipv4Config {
        address: LAN_IP,
        prefix_len: 24,
        gateway: None,
    });
    let lan = router.add_domain(lan_domain);

    let mut wan_domain = Domain::new("wan");
    wan_domain.ip_config = Some(Ipv4Config {
        address: WAN_IP,
        prefix_len: 24,
        gateway: Some(WAN_GATEWAY),
    });
    let wan = router.add_domain(wan_domain);

    for proto in [Proto::Tcp, Proto::Udp] {
        router
            .domain_mut(lan)
            .transport_rules_mut(proto)
            .add(TransportRule {
                ports: 0..=65535,
                domain: wan,
            });
    }
    router.domain_mut(wan).ip_rules.add(IpRule {
        cidr: Ipv4Cidr::parse("10.0.0.0/24").unwrap(),
        domain: lan,
    });

    let lan_port = SharedPort::new();
    let wan_port = SharedPort::new();
    let lan_if = router.add_interface(
        "lan0",
        CLIENT_MAC,
        LAN_ROUTER_MAC,
        lan,
        Box::new(lan_port.clone()),
    );
    let wan_if = router.add_interface(
        "wan0",
        MacAddr([0x02, 0x00, 0x00, 0x00, 0x01, 0x00]),
        WAN_ROUTER_MAC,
        wan,
        Box::new(wan_port.clone()),
    );

    Net {
        router,
        lan,
        wan,
        lan_if,
        wan_if,
        lan_port,
        wan_port,
    }
}

fn udp_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp = UdpBuilder::new()
        .src_port(src_port)
        .dst_port(dst_port)
        .payload(payload)
        .build(src_ip, dst_ip);
    let ip = Ipv4Builder::new()
        .src_addr(src_ip)
        .dst_addr(dst_ip)
        .ttl(64)
        .protocol(Protocol::Udp)
        .payload(&udp)
        .build();
    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Ipv4)
        .payload(&ip)
        .build()
}

fn tcp_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    flags: TcpFlags,
) -> Vec<u8> {
    let seg = tcp::build_segment(src_ip, dst_ip, src_port, dst_port, flags);
    let ip = Ipv4Builder::new()
        .src_addr(src_ip)
        .dst_addr(dst_ip)
        .ttl(64)
        .protocol(Protocol::Tcp)
        .payload(&seg)
        .build();
    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Ipv4)
        .payload(&ip)
        .build()
}

fn parse_udp(frame: &[u8]) -> (Ipv4Addr, Ipv4Addr, u16, u16) {
    let mut l3 = frame[ETH..].to_vec();
    let ip = Ipv4Mut::parse(&mut l3).unwrap();
    let (src, dst) = (ip.src_addr(), ip.dst_addr());
    let mut l4 = frame[ETH + 20..].to_vec();
    let udp = UdpMut::parse(&mut l4).unwrap();
    (src, dst, udp.src_port(), udp.dst_port())
}

/// Scenario 1: a forwarded packet waits for ARP resolution of the
/// gateway and egresses rewritten once the reply arrives.
#[test]
fn arp_resolve_then_forward() {
    let mut net = build_net(RouterConfig::default());

    net.lan_port.push_rx(udp_frame(
        CLIENT_MAC,
        LAN_ROUTER_MAC,
        CLIENT_IP,
        REMOTE_IP,
        5000,
        53,
        b"query",
    ));
    net.router.ready_to_submit(net.lan_if);

    // no egress yet: the packet is parked behind an ARP request
    assert_eq!(net.lan_port.acked(), 0);
    assert_eq!(net.router.waiter_count(), 1);
    let out = net.wan_port.take_transmitted();
    assert_eq!(out.len(), 1);
    let request = ArpPacket::parse(&out[0][ETH..]).unwrap();
    assert_eq!(request.operation, ArpOp::Request);
    assert_eq!(request.target_ip, WAN_GATEWAY);

    // gateway answers
    let reply = ArpPacket::reply(GATEWAY_MAC, WAN_GATEWAY, WAN_ROUTER_MAC, WAN_IP);
    let reply_frame = FrameBuilder::new()
        .dst_mac(WAN_ROUTER_MAC)
        .src_mac(GATEWAY_MAC)
        .ethertype(EtherType::Arp)
        .payload(&reply.to_bytes())
        .build();
    net.wan_port.push_rx(reply_frame);
    net.router.ready_to_submit(net.wan_if);

    // exactly one rewritten frame egresses
    let sent = net.wan_port.take_transmitted();
    assert_eq!(sent.len(), 1);
    let (src, dst, sport, dport) = parse_udp(&sent[0]);
    assert_eq!(src, WAN_IP);
    assert_eq!(dst, REMOTE_IP);
    assert_eq!(sport, 49152); // first allocated NAT port
    assert_eq!(dport, 53);
    assert_eq!(MacAddr(sent[0][0..6].try_into().unwrap()), GATEWAY_MAC);

    // the parked descriptor was acked on resume
    assert_eq!(net.lan_port.acked(), 1);
    assert_eq!(net.router.waiter_count(), 0);
}

/// Scenario 2: the reply traverses the reverse rewrite back to the
/// exact original client addresses with valid checksums.
#[test]
fn nat_reply_path() {
    let mut net = build_net(RouterConfig::default());
    net.router.add_arp_entry(net.wan, WAN_GATEWAY, GATEWAY_MAC);
    net.router.add_arp_entry(net.lan, CLIENT_IP, CLIENT_MAC);

    net.lan_port.push_rx(udp_frame(
        CLIENT_MAC,
        LAN_ROUTER_MAC,
        CLIENT_IP,
        REMOTE_IP,
        5000,
        53,
        b"query",
    ));
    net.router.ready_to_submit(net.lan_if);
    net.wan_port.take_transmitted();

    net.wan_port.push_rx(udp_frame(
        GATEWAY_MAC,
        WAN_ROUTER_MAC,
        REMOTE_IP,
        WAN_IP,
        53,
        49152,
        b"answer",
    ));
    net.router.ready_to_submit(net.wan_if);

    let sent = net.lan_port.take_transmitted();
    assert_eq!(sent.len(), 1);
    let (src, dst, sport, dport) = parse_udp(&sent[0]);
    assert_eq!(src, REMOTE_IP);
    assert_eq!(dst, CLIENT_IP);
    assert_eq!(sport, 53);
    assert_eq!(dport, 5000);

    // checksums recomputed for the restored addresses; payload intact
    let mut l3 = sent[0][ETH..].to_vec();
    assert!(Ipv4Mut::parse(&mut l3).unwrap().verify_checksum());
    let mut l4 = sent[0][ETH + 20..].to_vec();
    let udp = UdpMut::parse(&mut l4).unwrap();
    assert!(udp.validate_checksum(REMOTE_IP, CLIENT_IP));
    assert_eq!(udp.payload(), b"answer");
}

/// Scenario 3: FINs in both directions close the link; it leaves both
/// interfaces' lists after the next ack drain.
#[test]
fn tcp_fin_teardown() {
    let mut net = build_net(RouterConfig::default());
    net.router.add_arp_entry(net.wan, WAN_GATEWAY, GATEWAY_MAC);
    net.router.add_arp_entry(net.lan, CLIENT_IP, CLIENT_MAC);

    let syn = TcpFlags {
        syn: true,
        ..Default::default()
    };
    let syn_ack = TcpFlags {
        syn: true,
        ack: true,
        ..Default::default()
    };
    let fin_ack = TcpFlags {
        fin: true,
        ack: true,
        ..Default::default()
    };
    let ack = TcpFlags {
        ack: true,
        ..Default::default()
    };

    let client_pkt = |flags| {
        tcp_frame(
            CLIENT_MAC,
            LAN_ROUTER_MAC,
            CLIENT_IP,
            REMOTE_IP,
            44321,
            80,
            flags,
        )
    };
    let server_pkt = |flags| {
        tcp_frame(
            GATEWAY_MAC,
            WAN_ROUTER_MAC,
            REMOTE_IP,
            WAN_IP,
            80,
            49152,
            flags,
        )
    };

    net.lan_port.push_rx(client_pkt(syn));
    net.router.ready_to_submit(net.lan_if);
    net.wan_port.push_rx(server_pkt(syn_ack));
    net.router.ready_to_submit(net.wan_if);

    assert_eq!(net.router.link_count(), 1);
    let link_id = net
        .router
        .interface(net.lan_if)
        .unwrap()
        .active_links(Proto::Tcp)[0];
    assert_eq!(net.router.link(link_id).unwrap().state, LinkState::Open);

    // bidirectional teardown
    net.lan_port.push_rx(client_pkt(fin_ack));
    net.router.ready_to_submit(net.lan_if);
    assert_eq!(net.router.link(link_id).unwrap().state, LinkState::Closing);

    net.wan_port.push_rx(server_pkt(ack));
    net.router.ready_to_submit(net.wan_if);
    net.wan_port.push_rx(server_pkt(fin_ack));
    net.router.ready_to_submit(net.wan_if);

    // dissolved from both active lists, destroyed after the ack drain
    for iface in [net.lan_if, net.wan_if] {
        assert!(net
            .router
            .interface(iface)
            .unwrap()
            .active_links(Proto::Tcp)
            .is_empty());
    }
    assert_eq!(net.router.link_count(), 1);
    net.router.ready_to_ack(net.lan_if);
    net.router.ready_to_ack(net.wan_if);
    assert_eq!(net.router.link_count(), 0);
    for iface in [net.lan_if, net.wan_if] {
        assert!(net
            .router
            .interface(iface)
            .unwrap()
            .dissolved_links(Proto::Tcp)
            .is_empty());
    }
}

fn discover_frame(mac: MacAddr, xid: u32) -> Vec<u8> {
    let dhcp = DhcpBuilder::new()
        .op(BootpOp::Request)
        .xid(xid)
        .flags(0x8000)
        .chaddr(&mac.0)
        .message_type(DhcpMessageType::Discover)
        .build();
    let udp = UdpBuilder::new()
        .src_port(DHCP_CLIENT_PORT)
        .dst_port(DHCP_SERVER_PORT)
        .payload(&dhcp)
        .build(Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST);
    let ip = Ipv4Builder::new()
        .src_addr(Ipv4Addr::UNSPECIFIED)
        .dst_addr(Ipv4Addr::BROADCAST)
        .ttl(64)
        .protocol(Protocol::Udp)
        .payload(&udp)
        .build();
    FrameBuilder::new()
        .dst_mac(MacAddr::BROADCAST)
        .src_mac(mac)
        .ethertype(EtherType::Ipv4)
        .payload(&ip)
        .build()
}

/// Scenario 4: a two-address pool serves two clients and drops the
/// third DISCOVER with a warning.
#[test]
fn dhcp_server_pool_exhaustion() {
    let mut net = build_net(RouterConfig::default());
    net.router.domain_mut(net.lan).dhcp_server = Some(DhcpServerConfig {
        range_start: Ipv4Addr::new(10, 0, 0, 100),
        range_end: Ipv4Addr::new(10, 0, 0, 101),
        lease_secs: 3600,
        offer_timeout_secs: 10,
        dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8)],
    });

    for (i, last) in [0x31u8, 0x32, 0x33].iter().enumerate() {
        let mac = MacAddr([0x02, 0, 0, 0, 0, *last]);
        net.lan_port.push_rx(discover_frame(mac, 0x100 + i as u32));
    }
    net.router.ready_to_submit(net.lan_if);

    let sent = net.lan_port.take_transmitted();
    assert_eq!(sent.len(), 2);
    for (frame, expected) in sent
        .iter()
        .zip([Ipv4Addr::new(10, 0, 0, 100), Ipv4Addr::new(10, 0, 0, 101)])
    {
        let msg = DhcpHeader::parse(&frame[ETH + 20 + 8..]).unwrap();
        assert_eq!(msg.message_type(), Some(DhcpMessageType::Offer));
        assert_eq!(msg.yiaddr(), expected);
    }

    assert_eq!(net.router.metrics().dropped_warn.get(), 1);
    assert_eq!(net.lan_port.acked(), 3);
}

/// Scenario 5: the DHCP client acquires a lease over the wire; losing
/// the lease drops the domain config and dissolves the domain's links.
#[test]
fn dhcp_client_lease_and_config_swap() {
    let mut net = build_net(RouterConfig::default());

    // an uplink domain acquiring its address via DHCP
    let mut uplink_domain = Domain::new("uplink");
    uplink_domain.dhcp_client = true;
    let uplink = net.router.add_domain(uplink_domain);
    let uplink_port = SharedPort::new();
    let uplink_if = net.router.add_interface(
        "up0",
        MacAddr([0x02, 0, 0, 0, 0, 0x40]),
        MacAddr([0x02, 0, 0, 0, 0, 0x41]),
        uplink,
        Box::new(uplink_port.clone()),
    );

    // binding starts discovery
    let sent = uplink_port.take_transmitted();
    assert_eq!(sent.len(), 1);
    let discover = DhcpHeader::parse(&sent[0][ETH + 20 + 8..]).unwrap();
    assert_eq!(discover.message_type(), Some(DhcpMessageType::Discover));
    let xid = discover.xid();
    let chaddr = discover.client_mac();

    let server_ip = Ipv4Addr::new(198, 51, 100, 1);
    let leased_ip = Ipv4Addr::new(198, 51, 100, 7);
    let reply = |msg_type: DhcpMessageType| {
        let mut builder = DhcpBuilder::new()
            .op(BootpOp::Reply)
            .xid(xid)
            .chaddr(&chaddr)
            .yiaddr(leased_ip)
            .message_type(msg_type)
            .server_id(server_ip)
            .subnet_mask(Ipv4Addr::new(255, 255, 255, 0))
            .router(server_ip);
        if msg_type == DhcpMessageType::Ack {
            builder = builder.lease_time(20);
        }
        let dhcp = builder.build();
        let udp = UdpBuilder::new()
            .src_port(DHCP_SERVER_PORT)
            .dst_port(DHCP_CLIENT_PORT)
            .payload(&dhcp)
            .build(server_ip, Ipv4Addr::BROADCAST);
        let ip = Ipv4Builder::new()
            .src_addr(server_ip)
            .dst_addr(Ipv4Addr::BROADCAST)
            .ttl(64)
            .protocol(Protocol::Udp)
            .payload(&udp)
            .build();
        FrameBuilder::new()
            .dst_mac(MacAddr::BROADCAST)
            .src_mac(GATEWAY_MAC)
            .ethertype(EtherType::Ipv4)
            .payload(&ip)
            .build()
    };

    uplink_port.push_rx(reply(DhcpMessageType::Offer));
    net.router.ready_to_submit(uplink_if);
    let sent = uplink_port.take_transmitted();
    assert_eq!(sent.len(), 1);
    let request = DhcpHeader::parse(&sent[0][ETH + 20 + 8..]).unwrap();
    assert_eq!(request.message_type(), Some(DhcpMessageType::Request));

    uplink_port.push_rx(reply(DhcpMessageType::Ack));
    net.router.ready_to_submit(uplink_if);

    let cfg = net.router.domain(uplink).ip_config.unwrap();
    assert_eq!(cfg.address, leased_ip);
    assert_eq!(cfg.gateway, Some(server_ip));

    // a flow entering through the freshly configured uplink
    net.router
        .domain_mut(uplink)
        .transport_rules_mut(Proto::Udp)
        .add(TransportRule {
            ports: 0..=65535,
            domain: net.lan,
        });
    net.router.add_arp_entry(net.lan, CLIENT_IP, CLIENT_MAC);
    uplink_port.push_rx(udp_frame(
        GATEWAY_MAC,
        MacAddr([0x02, 0, 0, 0, 0, 0x41]),
        Ipv4Addr::new(198, 51, 100, 50),
        CLIENT_IP,
        6000,
        9999,
        b"inbound",
    ));
    net.router.ready_to_submit(uplink_if);
    assert_eq!(
        net.router
            .interface(uplink_if)
            .unwrap()
            .active_links(Proto::Udp)
            .len(),
        1
    );

    // losing the lease dissolves every link touching the domain before
    // the config goes away
    net.router.install_domain_config(uplink, None);
    assert!(net.router.domain(uplink).ip_config.is_none());
    assert!(net
        .router
        .interface(uplink_if)
        .unwrap()
        .active_links(Proto::Udp)
        .is_empty());
    assert!(net
        .router
        .interface(net.lan_if)
        .unwrap()
        .active_links(Proto::Udp)
        .is_empty());
}

/// Scenario 6: an unanswered ARP request times the waiter out; the
/// parked descriptor is acked and nothing egresses.
#[test]
fn postponed_packet_on_arp_timeout() {
    let config = RouterConfig {
        arp_waiter_timeout: Duration::from_millis(20),
        ..Default::default()
    };
    let mut net = build_net(config);

    // wan-side packet routed into the lan toward an unresolvable host
    net.wan_port.push_rx(udp_frame(
        GATEWAY_MAC,
        WAN_ROUTER_MAC,
        REMOTE_IP,
        Ipv4Addr::new(10, 0, 0, 99),
        53,
        1234,
        b"late",
    ));
    net.router.ready_to_submit(net.wan_if);

    assert_eq!(net.router.waiter_count(), 1);
    assert_eq!(net.wan_port.acked(), 0);
    // only the ARP request went out on the lan side
    assert_eq!(net.lan_port.take_transmitted().len(), 1);

    std::thread::sleep(Duration::from_millis(40));
    net.router.run_maintenance();

    assert_eq!(net.router.waiter_count(), 0);
    assert_eq!(net.wan_port.acked(), 1);
    assert!(net.lan_port.transmitted().is_empty());
}

/// NAT forward then reverse is the identity on the transport payload.
#[test]
fn nat_round_trip_is_identity_on_payload() {
    let mut net = build_net(RouterConfig::default());
    net.router.add_arp_entry(net.wan, WAN_GATEWAY, GATEWAY_MAC);
    net.router.add_arp_entry(net.lan, CLIENT_IP, CLIENT_MAC);

    let payload = b"the quick brown fox";
    net.lan_port.push_rx(udp_frame(
        CLIENT_MAC,
        LAN_ROUTER_MAC,
        CLIENT_IP,
        REMOTE_IP,
        5000,
        4242,
        payload,
    ));
    net.router.ready_to_submit(net.lan_if);

    let outbound = net.wan_port.take_transmitted().remove(0);
    let (nat_src, _, nat_port, _) = parse_udp(&outbound);

    // echo it straight back
    net.wan_port.push_rx(udp_frame(
        GATEWAY_MAC,
        WAN_ROUTER_MAC,
        REMOTE_IP,
        nat_src,
        4242,
        nat_port,
        payload,
    ));
    net.router.ready_to_submit(net.wan_if);

    let inbound = net.lan_port.take_transmitted().remove(0);
    let (src, dst, sport, dport) = parse_udp(&inbound);
    assert_eq!((src, dst, sport, dport), (REMOTE_IP, CLIENT_IP, 4242, 5000));

    let mut l4 = inbound[ETH + 20..].to_vec();
    let udp = UdpMut::parse(&mut l4).unwrap();
    assert_eq!(udp.payload(), payload);
}

/// A TCP RST tears the link down immediately.
#[test]
fn tcp_rst_closes_link() {
    let mut net = build_net(RouterConfig::default());
    net.router.add_arp_entry(net.wan, WAN_GATEWAY, GATEWAY_MAC);
    net.router.add_arp_entry(net.lan, CLIENT_IP, CLIENT_MAC);

    net.lan_port.push_rx(tcp_frame(
        CLIENT_MAC,
        LAN_ROUTER_MAC,
        CLIENT_IP,
        REMOTE_IP,
        44321,
        80,
        TcpFlags {
            syn: true,
            ..Default::default()
        },
    ));
    net.router.ready_to_submit(net.lan_if);
    assert_eq!(net.router.link_count(), 1);

    net.wan_port.push_rx(tcp_frame(
        GATEWAY_MAC,
        WAN_ROUTER_MAC,
        REMOTE_IP,
        WAN_IP,
        80,
        49152,
        TcpFlags {
            rst: true,
            ..Default::default()
        },
    ));
    net.router.ready_to_submit(net.wan_if);

    assert!(net
        .router
        .interface(net.lan_if)
        .unwrap()
        .active_links(Proto::Tcp)
        .is_empty());
    net.router.ready_to_ack(net.lan_if);
    assert_eq!(net.router.link_count(), 0);
}

/// Every taken descriptor is acked exactly once across a mixed batch.
#[test]
fn every_packet_acked_once() {
    let mut net = build_net(RouterConfig::default());
    net.router.add_arp_entry(net.wan, WAN_GATEWAY, GATEWAY_MAC);

    // a forwardable packet, an unroutable one, and a malformed one
    net.lan_port.push_rx(udp_frame(
        CLIENT_MAC,
        LAN_ROUTER_MAC,
        CLIENT_IP,
        REMOTE_IP,
        5000,
        53,
        b"ok",
    ));
    net.wan_port.push_rx(udp_frame(
        GATEWAY_MAC,
        WAN_ROUTER_MAC,
        REMOTE_IP,
        Ipv4Addr::new(192, 0, 2, 55),
        53,
        53,
        b"nowhere",
    ));
    net.lan_port.push_rx(vec![0u8; 10]);

    net.router.ready_to_submit(net.lan_if);
    net.router.ready_to_submit(net.wan_if);

    assert_eq!(net.lan_port.acked(), 2);
    assert_eq!(net.wan_port.acked(), 1);
    assert_eq!(net.lan_port.outstanding(), 0);
    assert_eq!(net.wan_port.outstanding(), 0);
}
