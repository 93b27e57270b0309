//! Interfaces and the router pipeline
//!
//! An Interface is a signal-driven NIC packet handler bound to a domain.
//! The Router owns every domain, interface, link and ARP waiter and runs
//! them on one cooperative event loop, so peer mutations (link insertion
//! on another interface, rule swaps, config changes) are serialized by
//! construction.

use super::arp::ArpWaiter;
use super::dhcp_client::{DhcpClient, DhcpClientAction};
use super::dhcp_server::{
    self, AllocationState, DhcpAllocation, DhcpAllocations,
};
use super::domain::{DhcpServerConfig, Domain, DomainId, Ipv4Config};
use super::link::{Link, LinkId, LinkSide, LinkState, LinkTable, LinkTimeouts, Proto, Side, SideId};
use crate::port::{PacketPort, RxPacket};
use crate::protocol::arp::{ArpOp, ArpPacket, ARP_PACKET_SIZE};
use crate::protocol::dhcp::{DhcpMessageType, DHCP_CLIENT_PORT, DHCP_SERVER_PORT};
use crate::protocol::ethernet::{self, FrameBuilder, FrameMut};
use crate::protocol::ipv4::{Ipv4Builder, Ipv4Mut, Protocol};
use crate::protocol::tcp::{TcpFlags, TcpMut};
use crate::protocol::udp::{UdpBuilder, UdpMut};
use crate::protocol::{EtherType, MacAddr};
use crate::telemetry::MetricsRegistry;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, Interval};
use tracing::{debug, info, trace, warn};

const ETH: usize = ethernet::HEADER_SIZE;

/// TTL of frames the router originates
const ORIGINATED_TTL: u8 = 64;

/// Handle to an interface owned by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IfaceId(pub usize);

/// Why a packet left the fast path.
///
/// Deep parse and rewrite stages return this through `?`; the dispatch
/// loop logs, counts and acks. `Postpone` is the one non-drop case: the
/// descriptor is parked in an ARP waiter instead of being acked.
#[derive(Debug)]
pub enum Deny {
    /// Expected drop, logged at debug
    Inform(String),
    /// Abnormal drop, logged at warn
    Warn(String),
    /// Next-hop MAC unknown; park the packet until `ip` resolves in
    /// `domain`
    Postpone { domain: DomainId, ip: Ipv4Addr },
}

pub type Flow<T> = std::result::Result<T, Deny>;

/// Tunables of the router
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub link_timeouts: LinkTimeouts,
    /// At most one broadcast ARP request per target inside this window
    pub arp_request_window: Duration,
    /// Parked packets are dropped and acked after this long
    pub arp_waiter_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            link_timeouts: LinkTimeouts::default(),
            arp_request_window: Duration::from_secs(1),
            arp_waiter_timeout: Duration::from_secs(3),
        }
    }
}

/// A NIC-facing interface bound to a domain
pub struct Interface {
    pub name: String,
    /// MAC of the attached session client
    mac: MacAddr,
    /// MAC the router itself uses on this interface
    router_mac: MacAddr,
    domain: DomainId,
    port: Box<dyn PacketPort>,
    tcp_links: Vec<LinkId>,
    udp_links: Vec<LinkId>,
    dissolved_tcp_links: Vec<LinkId>,
    dissolved_udp_links: Vec<LinkId>,
    dhcp_allocations: DhcpAllocations,
    dhcp_client: Option<DhcpClient>,
}

impl Interface {
    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn router_mac(&self) -> MacAddr {
        self.router_mac
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn dhcp_client(&self) -> Option<&DhcpClient> {
        self.dhcp_client.as_ref()
    }

    /// Links with a side on this interface, still routable
    pub fn active_links(&self, proto: Proto) -> &[LinkId] {
        match proto {
            Proto::Tcp => &self.tcp_links,
            Proto::Udp => &self.udp_links,
        }
    }

    /// Links awaiting destruction at the next ack drain
    pub fn dissolved_links(&self, proto: Proto) -> &[LinkId] {
        match proto {
            Proto::Tcp => &self.dissolved_tcp_links,
            Proto::Udp => &self.dissolved_udp_links,
        }
    }

    fn links_mut(&mut self, proto: Proto) -> &mut Vec<LinkId> {
        match proto {
            Proto::Tcp => &mut self.tcp_links,
            Proto::Udp => &mut self.udp_links,
        }
    }

    fn dissolved_links_mut(&mut self, proto: Proto) -> &mut Vec<LinkId> {
        match proto {
            Proto::Tcp => &mut self.dissolved_tcp_links,
            Proto::Udp => &mut self.dissolved_udp_links,
        }
    }

    /// Allocate a TX packet, fill it, submit it. Allocation failure is
    /// transient back-pressure: logged and abandoned.
    fn send_with(&mut self, size: usize, write: impl FnOnce(&mut [u8])) {
        match self.port.alloc_packet(size) {
            Ok(mut packet) => {
                write(packet.bytes_mut());
                self.port.submit_packet(packet);
            }
            Err(_) => warn!(iface = %self.name, "failed to allocate packet"),
        }
    }

    fn send_frame(&mut self, frame: &[u8]) {
        self.send_with(frame.len(), |buf| buf.copy_from_slice(frame));
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("mac", &self.mac)
            .field("router_mac", &self.router_mac)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// The NAT router: domains, interfaces, links, waiters, one event loop
pub struct Router {
    config: RouterConfig,
    domains: Vec<Domain>,
    interfaces: Vec<Option<Interface>>,
    links: LinkTable,
    arp_waiters: Vec<ArpWaiter>,
    metrics: Arc<MetricsRegistry>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            domains: Vec::new(),
            interfaces: Vec::new(),
            links: LinkTable::new(),
            arp_waiters: Vec::new(),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn add_domain(&mut self, domain: Domain) -> DomainId {
        self.domains.push(domain);
        DomainId(self.domains.len() - 1)
    }

    pub fn domain(&self, id: DomainId) -> &Domain {
        &self.domains[id.0]
    }

    pub fn domain_mut(&mut self, id: DomainId) -> &mut Domain {
        &mut self.domains[id.0]
    }

    pub fn domain_by_name(&self, name: &str) -> Option<DomainId> {
        self.domains
            .iter()
            .position(|d| d.name == name)
            .map(DomainId)
    }

    pub fn interfaces_of(&self, domain: DomainId) -> &[IfaceId] {
        self.domains[domain.0].interfaces()
    }

    /// Bind a new interface to a domain. When the domain is unconfigured
    /// and marked for DHCP, the interface's client starts discovery
    /// immediately.
    pub fn add_interface(
        &mut self,
        name: impl Into<String>,
        mac: MacAddr,
        router_mac: MacAddr,
        domain: DomainId,
        port: Box<dyn PacketPort>,
    ) -> IfaceId {
        let id = IfaceId(self.interfaces.len());
        let wants_dhcp =
            self.domains[domain.0].dhcp_client && self.domains[domain.0].ip_config.is_none();

        let iface = Interface {
            name: name.into(),
            mac,
            router_mac,
            domain,
            port,
            tcp_links: Vec::new(),
            udp_links: Vec::new(),
            dissolved_tcp_links: Vec::new(),
            dissolved_udp_links: Vec::new(),
            dhcp_allocations: DhcpAllocations::new(),
            dhcp_client: None,
        };
        self.interfaces.push(Some(iface));
        self.domains[domain.0].interfaces.push(id);

        if wants_dhcp {
            let mut client = DhcpClient::new(router_mac);
            let action = client.start();
            if let Some(iface) = self.interfaces[id.0].as_mut() {
                iface.dhcp_client = Some(client);
            }
            self.apply_client_action(id, action);
        }

        debug!(iface = id.0, domain = domain.0, "interface bound");
        id
    }

    /// Tear an interface down: cancel its ARP waiters (parked packets
    /// are acked), dissolve and destroy all its links, drop its DHCP
    /// allocations, unbind it from the domain.
    pub fn remove_interface(&mut self, id: IfaceId) {
        // cancel parked packets owned by this interface
        let mut cancelled = Vec::new();
        let mut i = 0;
        while i < self.arp_waiters.len() {
            if self.arp_waiters[i].iface == id {
                cancelled.push(self.arp_waiters.swap_remove(i));
            } else {
                i += 1;
            }
        }
        for waiter in cancelled {
            warn!("waiting for ARP cancelled");
            self.ack(id, waiter.packet);
        }

        // dissolve every link with a side on this interface
        let doomed: Vec<LinkId> = self
            .links
            .ids()
            .into_iter()
            .filter(|lid| {
                self.links
                    .get(*lid)
                    .is_some_and(|l| l.client.iface == id || l.server.iface == id)
            })
            .collect();
        for lid in doomed {
            self.dissolve_link(lid);
        }
        self.destroy_dissolved(id);

        if let Some(iface) = self.interfaces[id.0].take() {
            self.domains[iface.domain.0].interfaces.retain(|x| *x != id);
            debug!(iface = %iface.name, "interface destroyed");
        }
    }

    fn iface(&self, id: IfaceId) -> Option<&Interface> {
        self.interfaces.get(id.0).and_then(|i| i.as_ref())
    }

    fn iface_mut(&mut self, id: IfaceId) -> Option<&mut Interface> {
        self.interfaces.get_mut(id.0).and_then(|i| i.as_mut())
    }

    pub fn interface(&self, id: IfaceId) -> Option<&Interface> {
        self.iface(id)
    }

    /// Install a static ARP entry into a domain's cache
    pub fn add_arp_entry(&mut self, domain: DomainId, ip: Ipv4Addr, mac: MacAddr) {
        self.domains[domain.0].arp_cache.insert(ip, mac);
    }

    /// Look a link up by id; None once the arena slot was reclaimed
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    /// Number of live links
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of parked packets
    pub fn waiter_count(&self) -> usize {
        self.arp_waiters.len()
    }

    /*
     * Signal handlers
     */

    /// `ready_to_submit`: drain the interface's RX queue
    pub fn ready_to_submit(&mut self, id: IfaceId) {
        loop {
            let Some(mut packet) = self.iface_mut(id).and_then(|i| i.port.next_packet()) else {
                break;
            };
            match self.handle_frame(id, packet.bytes_mut()) {
                Ok(()) => self.ack(id, packet),
                Err(Deny::Inform(msg)) => {
                    debug!(iface = id.0, "drop packet: {}", msg);
                    self.metrics.dropped_inform.inc();
                    self.ack(id, packet);
                }
                Err(Deny::Warn(msg)) => {
                    warn!(iface = id.0, "drop packet: {}", msg);
                    self.metrics.dropped_warn.inc();
                    self.ack(id, packet);
                }
                Err(Deny::Postpone { domain, ip }) => {
                    trace!(iface = id.0, %ip, "packet postponed");
                    self.metrics.postponed.inc();
                    self.arp_waiters.push(ArpWaiter {
                        iface: id,
                        domain,
                        ip,
                        packet,
                        since: Instant::now(),
                    });
                }
            }
        }
    }

    /// `ready_to_ack`: reclaim TX buffers and run the deferred
    /// destructions that were parked until no descriptor could reference
    /// them
    pub fn ready_to_ack(&mut self, id: IfaceId) {
        if let Some(iface) = self.iface_mut(id) {
            iface.port.reclaim_acked();
        }
        self.destroy_dissolved(id);
        if let Some(iface) = self.iface_mut(id) {
            iface.dhcp_allocations.destroy_released();
        }
    }

    fn ack(&mut self, id: IfaceId, packet: RxPacket) {
        if let Some(iface) = self.iface_mut(id) {
            iface.port.acknowledge(packet);
        }
    }

    /*
     * Frame dispatch
     */

    fn handle_frame(&mut self, id: IfaceId, frame: &mut [u8]) -> Flow<()> {
        let domain_id = self
            .iface(id)
            .ok_or_else(|| Deny::Inform("interface gone".into()))?
            .domain;
        let configured = self.domains[domain_id.0].ip_config.is_some();

        let ethertype = {
            let eth = FrameMut::parse(frame)
                .map_err(|e| Deny::Warn(format!("malformed Ethernet frame: {}", e)))?;
            eth.ethertype()
        };

        if configured {
            match EtherType::from_u16(ethertype) {
                Some(EtherType::Arp) => self.handle_arp(id, domain_id, frame),
                Some(EtherType::Ipv4) => self.handle_ip(id, domain_id, frame),
                None => Err(Deny::Inform(format!(
                    "unknown network protocol {:#06x}",
                    ethertype
                ))),
            }
        } else {
            // without an IP config only the DHCP client may talk
            match EtherType::from_u16(ethertype) {
                Some(EtherType::Ipv4) => self.handle_ip_unconfigured(id, frame),
                _ => Err(Deny::Inform("domain has no IP config".into())),
            }
        }
    }

    /*
     * ARP engine
     */

    fn handle_arp(&mut self, id: IfaceId, domain_id: DomainId, frame: &mut [u8]) -> Flow<()> {
        let arp = ArpPacket::parse(&frame[ETH..])
            .map_err(|e| Deny::Warn(format!("malformed ARP packet: {}", e)))?;

        match arp.operation {
            ArpOp::Request => self.handle_arp_request(id, domain_id, frame, &arp),
            ArpOp::Reply => self.handle_arp_reply(id, domain_id, frame, &arp),
        }
    }

    fn handle_arp_request(
        &mut self,
        id: IfaceId,
        domain_id: DomainId,
        frame: &mut [u8],
        arp: &ArpPacket,
    ) -> Flow<()> {
        let cfg = self.domains[domain_id.0]
            .ip_config
            .ok_or_else(|| Deny::Inform("domain has no IP config".into()))?;

        if cfg.contains(arp.target_ip) {
            if arp.is_gratuitous() {
                // learn the announced binding, then discard
                self.domains[domain_id.0]
                    .arp_cache
                    .insert(arp.sender_ip, arp.sender_mac);
                self.resume_waiters(domain_id, arp.sender_ip);
                return Err(Deny::Inform("gratuitous ARP request".into()));
            }
            if arp.target_ip == cfg.address {
                self.send_arp_reply(id, cfg.address, arp);
                return Ok(());
            }
            // request for another subnet-local host: let the peers answer
            let len = (ETH + ARP_PACKET_SIZE).min(frame.len());
            self.domain_broadcast(id, domain_id, &frame[..len]);
            return Ok(());
        }

        if cfg.gateway.is_some() {
            return Err(Deny::Inform("leave ARP request to the gateway".into()));
        }
        // no gateway configured: answer in its stead
        self.send_arp_reply(id, arp.target_ip, arp);
        Ok(())
    }

    fn handle_arp_reply(
        &mut self,
        id: IfaceId,
        domain_id: DomainId,
        frame: &mut [u8],
        arp: &ArpPacket,
    ) -> Flow<()> {
        if self.domains[domain_id.0].arp_cache.find(arp.sender_ip).is_none() {
            self.domains[domain_id.0]
                .arp_cache
                .insert(arp.sender_ip, arp.sender_mac);
            self.resume_waiters(domain_id, arp.sender_ip);
        } else {
            trace!(ip = %arp.sender_ip, "ARP entry already exists");
        }

        let cfg = self.domains[domain_id.0]
            .ip_config
            .ok_or_else(|| Deny::Inform("domain has no IP config".into()))?;
        if cfg.contains(arp.target_ip) && arp.target_ip != cfg.address {
            let len = (ETH + ARP_PACKET_SIZE).min(frame.len());
            self.domain_broadcast(id, domain_id, &frame[..len]);
        }
        Ok(())
    }

    fn send_arp_reply(&mut self, id: IfaceId, answered_ip: Ipv4Addr, request: &ArpPacket) {
        let metrics = Arc::clone(&self.metrics);
        let Some(iface) = self.iface_mut(id) else {
            return;
        };
        let reply = ArpPacket::reply(
            iface.router_mac,
            answered_ip,
            request.sender_mac,
            request.sender_ip,
        );
        let frame = FrameBuilder::new()
            .dst_mac(request.sender_mac)
            .src_mac(iface.router_mac)
            .ethertype(EtherType::Arp)
            .payload(&reply.to_bytes())
            .build();
        debug!(ip = %answered_ip, to = %request.sender_ip, "ARP reply");
        iface.send_frame(&frame);
        metrics.arp_replies_sent.inc();
    }

    fn broadcast_arp_request(&mut self, domain_id: DomainId, target_ip: Ipv4Addr) {
        let Some(router_ip) = self.domains[domain_id.0].router_ip() else {
            return;
        };
        let metrics = Arc::clone(&self.metrics);
        let members = self.domains[domain_id.0].interfaces.clone();
        for id in members {
            let Some(iface) = self.iface_mut(id) else {
                continue;
            };
            let request = ArpPacket::request(iface.router_mac, router_ip, target_ip);
            let frame = FrameBuilder::new()
                .dst_mac(MacAddr::BROADCAST)
                .src_mac(iface.router_mac)
                .ethertype(EtherType::Arp)
                .payload(&request.to_bytes())
                .build();
            iface.send_frame(&frame);
            metrics.arp_requests_sent.inc();
        }
        debug!(ip = %target_ip, domain = domain_id.0, "ARP request broadcast");
    }

    /// Re-enter dispatch for every packet parked on `ip` in `domain_id`
    fn resume_waiters(&mut self, domain_id: DomainId, ip: Ipv4Addr) {
        let mut ready = Vec::new();
        let mut i = 0;
        while i < self.arp_waiters.len() {
            if self.arp_waiters[i].domain == domain_id && self.arp_waiters[i].ip == ip {
                ready.push(self.arp_waiters.swap_remove(i));
            } else {
                i += 1;
            }
        }

        for waiter in ready {
            let mut packet = waiter.packet;
            let id = waiter.iface;
            match self.handle_frame(id, packet.bytes_mut()) {
                Ok(()) => {}
                Err(Deny::Postpone { .. }) => warn!("failed twice to handle packet"),
                Err(Deny::Inform(msg)) => {
                    debug!("drop resumed packet: {}", msg);
                    self.metrics.dropped_inform.inc();
                }
                Err(Deny::Warn(msg)) => {
                    warn!("drop resumed packet: {}", msg);
                    self.metrics.dropped_warn.inc();
                }
            }
            self.ack(id, packet);
        }
    }

    /// Resolve the L2 destination toward `next_ip` inside the target
    /// domain. A cache miss broadcasts one ARP request (suppressed inside
    /// the pending window) and postpones the packet.
    fn adapt_eth(&mut self, next_ip: Ipv4Addr, remote_domain: DomainId) -> Flow<MacAddr> {
        let cfg = self.domains[remote_domain.0]
            .ip_config
            .ok_or_else(|| Deny::Inform("target domain has no IP config".into()))?;
        let hop = cfg
            .next_hop(next_ip)
            .ok_or_else(|| Deny::Inform(format!("no next hop toward {}", next_ip)))?;

        if let Some(mac) = self.domains[remote_domain.0].arp_cache.find(hop) {
            return Ok(mac);
        }

        let now = Instant::now();
        let window = self.config.arp_request_window;
        if !self.domains[remote_domain.0]
            .arp_cache
            .request_pending(hop, window, now)
        {
            self.domains[remote_domain.0]
                .arp_cache
                .mark_requested(hop, now);
            self.broadcast_arp_request(remote_domain, hop);
        }
        Err(Deny::Postpone {
            domain: remote_domain,
            ip: hop,
        })
    }

    /*
     * IPv4 forwarding and NAT
     */

    fn handle_ip(&mut self, id: IfaceId, domain_id: DomainId, frame: &mut [u8]) -> Flow<()> {
        let (src, dst, proto_num) = {
            let ip = Ipv4Mut::parse(&mut frame[ETH..])
                .map_err(|e| Deny::Warn(format!("malformed IPv4 packet: {}", e)))?;
            if !ip.verify_checksum() {
                return Err(Deny::Warn("bad IPv4 header checksum".into()));
            }
            (ip.src_addr(), ip.dst_addr(), ip.protocol())
        };

        let cfg = self.domains[domain_id.0]
            .ip_config
            .ok_or_else(|| Deny::Inform("domain has no IP config".into()))?;

        if src == cfg.address || src == cfg.broadcast_address() {
            return Err(Deny::Warn(format!("spoofed source address {}", src)));
        }

        let proto = Proto::from_ip_protocol(proto_num);

        if let Some(proto) = proto {
            let (src_port, dst_port, tcp_flags) = transport_ports(frame, proto)?;

            // DHCP before any routing
            if proto == Proto::Udp {
                if src_port == DHCP_CLIENT_PORT
                    && dst_port == DHCP_SERVER_PORT
                    && self.domains[domain_id.0].dhcp_server.is_some()
                {
                    return self.handle_dhcp_request(id, domain_id, frame);
                }
                if src_port == DHCP_SERVER_PORT
                    && dst_port == DHCP_CLIENT_PORT
                    && self.iface(id).is_some_and(|i| i.dhcp_client.is_some())
                {
                    return self.handle_dhcp_client_reply(id, frame);
                }
            }

            // broadcast stays inside the domain
            if dst == cfg.broadcast_address() || dst == Ipv4Addr::BROADCAST {
                let len = self.ip_frame_len(frame)?;
                self.domain_broadcast(id, domain_id, &frame[..len]);
                return Ok(());
            }

            let local = SideId {
                src_ip: src,
                src_port,
                dst_ip: dst,
                dst_port,
            };

            // existing flow, either side
            if let Some(&(link_id, side)) = self.domains[domain_id.0].sides(proto).get(&local) {
                trace!(link = link_id.0, "using existing link");
                return self.pass_via_link(frame, proto, link_id, side, tcp_flags);
            }

            // port forwarding toward a host in a remote domain
            if dst == cfg.address {
                if let Some(rule) = self.domains[domain_id.0]
                    .forward_rules(proto)
                    .matching(dst_port)
                    .copied()
                {
                    debug!(port = dst_port, to = %rule.to, "using forward rule");
                    let hop_mac = self.adapt_eth(rule.to, rule.domain)?;
                    let new_dport = rule.to_port.unwrap_or(dst_port);
                    return self.nat_link_and_pass(
                        id, domain_id, frame, proto, local, rule.domain, hop_mac, rule.to,
                        new_dport,
                    );
                }
            }

            // destination-port routing
            if let Some(rule) = self.domains[domain_id.0]
                .transport_rules(proto)
                .matching(dst_port)
                .cloned()
            {
                debug!(port = dst_port, "using transport rule");
                let hop_mac = self.adapt_eth(dst, rule.domain)?;
                return self.nat_link_and_pass(
                    id, domain_id, frame, proto, local, rule.domain, hop_mac, dst, dst_port,
                );
            }
        } else if dst == cfg.broadcast_address() || dst == Ipv4Addr::BROADCAST {
            let len = self.ip_frame_len(frame)?;
            self.domain_broadcast(id, domain_id, &frame[..len]);
            return Ok(());
        }

        // longest-prefix route, any transport
        if let Some(rule) = self.domains[domain_id.0]
            .ip_rules
            .longest_prefix_match(dst)
            .copied()
        {
            debug!(dst = %dst, "using IP rule");
            let hop_mac = self.adapt_eth(dst, rule.domain)?;
            let egress = self.egress_iface(rule.domain)?;
            return self.pass_plain(frame, egress, hop_mac);
        }

        Err(Deny::Inform("no matching rule".into()))
    }

    /// Unconfigured domain: the DHCP client is the only listener
    fn handle_ip_unconfigured(&mut self, id: IfaceId, frame: &mut [u8]) -> Flow<()> {
        let proto_num = {
            let ip = Ipv4Mut::parse(&mut frame[ETH..])
                .map_err(|e| Deny::Warn(format!("malformed IPv4 packet: {}", e)))?;
            ip.protocol()
        };

        if Proto::from_ip_protocol(proto_num) == Some(Proto::Udp) {
            let (src_port, dst_port, _) = transport_ports(frame, Proto::Udp)?;
            if src_port == DHCP_SERVER_PORT
                && dst_port == DHCP_CLIENT_PORT
                && self.iface(id).is_some_and(|i| i.dhcp_client.is_some())
            {
                return self.handle_dhcp_client_reply(id, frame);
            }
        }
        Err(Deny::Inform("domain has no IP config".into()))
    }

    /// Forward along an established link, rewriting with the opposite
    /// side's addresses
    fn pass_via_link(
        &mut self,
        frame: &mut [u8],
        proto: Proto,
        link_id: LinkId,
        side: Side,
        tcp_flags: Option<TcpFlags>,
    ) -> Flow<()> {
        let opposite = *self
            .links
            .get(link_id)
            .ok_or_else(|| Deny::Inform("stale link".into()))?
            .side(side.opposite());

        // resolve the egress L2 first so a postponed packet stays intact
        let hop_mac = self.adapt_eth(opposite.id.src_ip, opposite.domain)?;

        self.pass_rewritten(
            frame,
            proto,
            opposite.id.dst_ip,
            opposite.id.src_ip,
            opposite.id.dst_port,
            opposite.id.src_port,
            opposite.iface,
            hop_mac,
        )?;

        let closed = {
            let Some(link) = self.links.get_mut(link_id) else {
                return Ok(());
            };
            link.packet(side, tcp_flags.as_ref());
            link.state == LinkState::Closed
        };
        if closed {
            debug!(link = link_id.0, "link closed");
            self.dissolve_link(link_id);
        }
        Ok(())
    }

    /// Create the NAT link for a fresh flow and forward its first packet
    #[allow(clippy::too_many_arguments)]
    fn nat_link_and_pass(
        &mut self,
        in_iface: IfaceId,
        in_domain: DomainId,
        frame: &mut [u8],
        proto: Proto,
        local: SideId,
        remote_domain: DomainId,
        hop_mac: MacAddr,
        new_dst: Ipv4Addr,
        new_dport: u16,
    ) -> Flow<()> {
        let egress_ip = self.domains[remote_domain.0]
            .ip_config
            .ok_or_else(|| Deny::Inform("target domain has no IP config".into()))?
            .address;
        let egress = self.egress_iface(remote_domain)?;

        let nat_port = self.domains[remote_domain.0]
            .port_alloc_mut(proto)
            .alloc()
            .ok_or_else(|| Deny::Warn("NAT port exhaustion".into()))?;

        if let Err(deny) = self.pass_rewritten(
            frame, proto, egress_ip, new_dst, nat_port, new_dport, egress, hop_mac,
        ) {
            self.domains[remote_domain.0]
                .port_alloc_mut(proto)
                .free(nat_port);
            return Err(deny);
        }

        let remote = SideId {
            src_ip: new_dst,
            src_port: new_dport,
            dst_ip: egress_ip,
            dst_port: nat_port,
        };
        let link = Link::new(
            proto,
            LinkSide {
                iface: in_iface,
                domain: in_domain,
                id: local,
            },
            LinkSide {
                iface: egress,
                domain: remote_domain,
                id: remote,
            },
            Some(nat_port),
        );
        let link_id = self.links.insert(link);
        self.domains[in_domain.0]
            .sides_mut(proto)
            .insert(local, (link_id, Side::Client));
        self.domains[remote_domain.0]
            .sides_mut(proto)
            .insert(remote, (link_id, Side::Server));
        if let Some(iface) = self.iface_mut(in_iface) {
            iface.links_mut(proto).push(link_id);
        }
        if let Some(iface) = self.iface_mut(egress) {
            if egress != in_iface {
                iface.links_mut(proto).push(link_id);
            }
        }

        self.metrics.links_created.inc();
        self.metrics.set_active_links(self.links.len());
        debug!(
            link = link_id.0,
            nat_port,
            "new {:?} link {}:{} -> {}:{}",
            proto,
            local.src_ip,
            local.src_port,
            new_dst,
            new_dport
        );
        Ok(())
    }

    /// TTL, full L3/L4 rewrite, checksums, L2 rewrite, submit
    #[allow(clippy::too_many_arguments)]
    fn pass_rewritten(
        &mut self,
        frame: &mut [u8],
        proto: Proto,
        new_src: Ipv4Addr,
        new_dst: Ipv4Addr,
        new_sport: u16,
        new_dport: u16,
        egress: IfaceId,
        hop_mac: MacAddr,
    ) -> Flow<()> {
        let frame_len;
        {
            let mut ip = Ipv4Mut::parse(&mut frame[ETH..])
                .map_err(|e| Deny::Warn(format!("malformed IPv4 packet: {}", e)))?;
            if !ip.decrement_ttl() {
                return Err(Deny::Inform("TTL expired".into()));
            }
            ip.set_src_addr(new_src);
            ip.set_dst_addr(new_dst);

            match proto {
                Proto::Tcp => {
                    let mut tcp = TcpMut::parse(ip.payload_mut())
                        .map_err(|e| Deny::Warn(format!("malformed TCP segment: {}", e)))?;
                    tcp.set_src_port(new_sport);
                    tcp.set_dst_port(new_dport);
                    tcp.update_checksum(new_src, new_dst);
                }
                Proto::Udp => {
                    let mut udp = UdpMut::parse(ip.payload_mut())
                        .map_err(|e| Deny::Warn(format!("malformed UDP datagram: {}", e)))?;
                    udp.set_src_port(new_sport);
                    udp.set_dst_port(new_dport);
                    udp.update_checksum(new_src, new_dst);
                }
            }
            ip.finalize_checksum();
            frame_len = ETH + ip.total_len();
        }
        self.submit(frame, frame_len, egress, hop_mac)
    }

    /// TTL and L2 only; addresses and payload stay untouched
    fn pass_plain(&mut self, frame: &mut [u8], egress: IfaceId, hop_mac: MacAddr) -> Flow<()> {
        let frame_len;
        {
            let mut ip = Ipv4Mut::parse(&mut frame[ETH..])
                .map_err(|e| Deny::Warn(format!("malformed IPv4 packet: {}", e)))?;
            if !ip.decrement_ttl() {
                return Err(Deny::Inform("TTL expired".into()));
            }
            ip.finalize_checksum();
            frame_len = ETH + ip.total_len();
        }
        self.submit(frame, frame_len, egress, hop_mac)
    }

    fn submit(
        &mut self,
        frame: &mut [u8],
        frame_len: usize,
        egress: IfaceId,
        hop_mac: MacAddr,
    ) -> Flow<()> {
        let metrics = Arc::clone(&self.metrics);
        let iface = self
            .iface_mut(egress)
            .ok_or_else(|| Deny::Inform("egress interface gone".into()))?;
        ethernet::rewrite_l2(frame, iface.router_mac, hop_mac);
        iface.send_frame(&frame[..frame_len.min(frame.len())]);
        metrics.packets_forwarded.inc();
        Ok(())
    }

    fn ip_frame_len(&self, frame: &mut [u8]) -> Flow<usize> {
        let ip = Ipv4Mut::parse(&mut frame[ETH..])
            .map_err(|e| Deny::Warn(format!("malformed IPv4 packet: {}", e)))?;
        Ok(ETH + ip.total_len())
    }

    /// First interface of a domain carries its unicast egress
    fn egress_iface(&self, domain: DomainId) -> Flow<IfaceId> {
        self.domains[domain.0]
            .interfaces
            .first()
            .copied()
            .ok_or_else(|| Deny::Inform("no interface in target domain".into()))
    }

    /// Send a frame out of every other interface of the domain, with
    /// that interface's router MAC as L2 source
    fn domain_broadcast(&mut self, from: IfaceId, domain_id: DomainId, frame: &[u8]) {
        let peers: Vec<IfaceId> = self.domains[domain_id.0]
            .interfaces
            .iter()
            .copied()
            .filter(|id| *id != from)
            .collect();
        for id in peers {
            let Some(iface) = self.iface_mut(id) else {
                continue;
            };
            let router_mac = iface.router_mac;
            iface.send_with(frame.len(), |buf| {
                buf.copy_from_slice(frame);
                if let Ok(mut eth) = FrameMut::parse(buf) {
                    eth.set_src_mac(router_mac);
                }
            });
        }
    }

    /*
     * Link lifecycle
     */

    /// Unmap a link from both domains and move it to both interfaces'
    /// dissolved lists; the arena entry survives until the ack drain
    fn dissolve_link(&mut self, link_id: LinkId) {
        let Some(link) = self.links.get(link_id) else {
            return;
        };
        let proto = link.proto;
        let client = link.client;
        let server = link.server;

        self.domains[client.domain.0]
            .sides_mut(proto)
            .remove(&client.id);
        self.domains[server.domain.0]
            .sides_mut(proto)
            .remove(&server.id);

        for side_iface in [client.iface, server.iface] {
            if let Some(iface) = self.iface_mut(side_iface) {
                let active = iface.links_mut(proto);
                if let Some(pos) = active.iter().position(|l| *l == link_id) {
                    active.remove(pos);
                    iface.dissolved_links_mut(proto).push(link_id);
                }
            }
        }
        self.metrics.links_dissolved.inc();
    }

    /// Destroy this interface's dissolved links; stale ids whose arena
    /// entry was already reclaimed by the peer interface are skipped
    fn destroy_dissolved(&mut self, id: IfaceId) {
        for proto in [Proto::Tcp, Proto::Udp] {
            let Some(iface) = self.iface_mut(id) else {
                return;
            };
            let ids = std::mem::take(iface.dissolved_links_mut(proto));
            for link_id in ids {
                if let Some(link) = self.links.remove(link_id) {
                    if let Some(port) = link.nat_port {
                        self.domains[link.server.domain.0]
                            .port_alloc_mut(link.proto)
                            .free(port);
                    }
                    trace!(link = link_id.0, "link destroyed");
                }
            }
        }
        self.metrics.set_active_links(self.links.len());
    }

    /*
     * DHCP server
     */

    fn handle_dhcp_request(
        &mut self,
        id: IfaceId,
        domain_id: DomainId,
        frame: &mut [u8],
    ) -> Flow<()> {
        let cfg = self.domains[domain_id.0]
            .ip_config
            .ok_or_else(|| Deny::Inform("domain has no IP config".into()))?;
        let server_cfg = self.domains[domain_id.0]
            .dhcp_server
            .clone()
            .ok_or_else(|| Deny::Inform("no DHCP server on this domain".into()))?;

        let (msg_type, client_mac, xid, requested, server_id, client_ip) = {
            let payload = dhcp_payload(frame)?;
            let msg = crate::protocol::dhcp::DhcpHeader::parse(payload)
                .map_err(|e| Deny::Warn(format!("malformed DHCP message: {}", e)))?;
            let msg_type = msg
                .message_type()
                .ok_or_else(|| Deny::Warn("DHCP request without message type".into()))?;
            let requested = msg.requested_ip().or_else(|| {
                let ci = msg.ciaddr();
                (ci != Ipv4Addr::UNSPECIFIED).then_some(ci)
            });
            (
                msg_type,
                MacAddr(msg.client_mac()),
                msg.xid(),
                requested,
                msg.server_id(),
                msg.ciaddr(),
            )
        };
        let now = Instant::now();

        debug!(?msg_type, mac = %client_mac, "DHCP request");

        match msg_type {
            DhcpMessageType::Discover => {
                let existing = self
                    .iface(id)
                    .and_then(|i| i.dhcp_allocations.find(client_mac))
                    .map(|a| a.ip);
                match existing {
                    Some(ip) => {
                        // rediscovery keeps the client's address; a
                        // forgotten lease is demoted back to an offer
                        if let Some(allocation) = self
                            .iface_mut(id)
                            .and_then(|i| i.dhcp_allocations.find_mut(client_mac))
                        {
                            allocation.state = AllocationState::Offered;
                            allocation.expires_at = dhcp_server::offer_expiry(&server_cfg, now);
                            allocation.xid = xid;
                        }
                        self.send_dhcp_reply(
                            id,
                            &server_cfg,
                            cfg,
                            client_mac,
                            ip,
                            DhcpMessageType::Offer,
                            xid,
                            false,
                        );
                        Ok(())
                    }
                    None => self.new_dhcp_allocation(id, &server_cfg, cfg, client_mac, xid, now),
                }
            }

            DhcpMessageType::Request => {
                if server_id.is_some_and(|s| s != cfg.address) {
                    // client committed to another server
                    if let Some(iface) = self.iface_mut(id) {
                        iface.dhcp_allocations.release(client_mac);
                    }
                    return Err(Deny::Inform("client selected another DHCP server".into()));
                }
                let existing = self
                    .iface(id)
                    .and_then(|i| i.dhcp_allocations.find(client_mac))
                    .map(|a| (a.ip, a.state));
                match existing {
                    Some((ip, AllocationState::Bound)) => {
                        if let Some(allocation) = self
                            .iface_mut(id)
                            .and_then(|i| i.dhcp_allocations.find_mut(client_mac))
                        {
                            allocation.expires_at = dhcp_server::lease_expiry(&server_cfg, now);
                        }
                        self.send_dhcp_reply(
                            id,
                            &server_cfg,
                            cfg,
                            client_mac,
                            ip,
                            DhcpMessageType::Ack,
                            xid,
                            false,
                        );
                        Ok(())
                    }
                    Some((ip, AllocationState::Offered)) if requested == Some(ip) => {
                        if let Some(allocation) = self
                            .iface_mut(id)
                            .and_then(|i| i.dhcp_allocations.find_mut(client_mac))
                        {
                            allocation.state = AllocationState::Bound;
                            allocation.expires_at = dhcp_server::lease_expiry(&server_cfg, now);
                        }
                        info!(mac = %client_mac, ip = %ip, "DHCP allocation bound");
                        self.send_dhcp_reply(
                            id,
                            &server_cfg,
                            cfg,
                            client_mac,
                            ip,
                            DhcpMessageType::Ack,
                            xid,
                            false,
                        );
                        Ok(())
                    }
                    _ => {
                        if let Some(iface) = self.iface_mut(id) {
                            iface.dhcp_allocations.release(client_mac);
                        }
                        self.send_dhcp_reply(
                            id,
                            &server_cfg,
                            cfg,
                            client_mac,
                            Ipv4Addr::UNSPECIFIED,
                            DhcpMessageType::Nak,
                            xid,
                            false,
                        );
                        Ok(())
                    }
                }
            }

            DhcpMessageType::Release | DhcpMessageType::Decline => {
                let known = self
                    .iface(id)
                    .is_some_and(|i| i.dhcp_allocations.find(client_mac).is_some());
                if !known {
                    return Err(Deny::Warn(format!(
                        "DHCP {:?} from client without allocation",
                        msg_type
                    )));
                }
                info!(mac = %client_mac, ?msg_type, "DHCP allocation released");
                if let Some(iface) = self.iface_mut(id) {
                    iface.dhcp_allocations.release(client_mac);
                }
                Ok(())
            }

            DhcpMessageType::Inform => {
                self.send_dhcp_reply(
                    id,
                    &server_cfg,
                    cfg,
                    client_mac,
                    client_ip,
                    DhcpMessageType::Ack,
                    xid,
                    true,
                );
                Ok(())
            }

            DhcpMessageType::Offer | DhcpMessageType::Ack | DhcpMessageType::Nak => Err(
                Deny::Warn(format!("DHCP {:?} from client side", msg_type)),
            ),
        }
    }

    fn new_dhcp_allocation(
        &mut self,
        id: IfaceId,
        server_cfg: &DhcpServerConfig,
        cfg: Ipv4Config,
        client_mac: MacAddr,
        xid: u32,
        now: Instant,
    ) -> Flow<()> {
        let allocations = &self
            .iface(id)
            .ok_or_else(|| Deny::Inform("interface gone".into()))?
            .dhcp_allocations;
        let ip = dhcp_server::first_free_ip(server_cfg, cfg.address, allocations)
            .ok_or_else(|| Deny::Warn("dhcp pool full".into()))?;

        if let Some(iface) = self.iface_mut(id) {
            iface.dhcp_allocations.insert(DhcpAllocation {
                mac: client_mac,
                ip,
                state: AllocationState::Offered,
                expires_at: dhcp_server::offer_expiry(server_cfg, now),
                xid,
            });
        }
        info!(mac = %client_mac, ip = %ip, "DHCP allocation offered");
        self.send_dhcp_reply(
            id,
            server_cfg,
            cfg,
            client_mac,
            ip,
            DhcpMessageType::Offer,
            xid,
            false,
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn send_dhcp_reply(
        &mut self,
        id: IfaceId,
        server_cfg: &DhcpServerConfig,
        cfg: Ipv4Config,
        client_mac: MacAddr,
        client_ip: Ipv4Addr,
        msg_type: DhcpMessageType,
        xid: u32,
        for_inform: bool,
    ) {
        let router_ip = cfg.address;
        let mut builder = crate::protocol::dhcp::DhcpBuilder::new()
            .xid(xid)
            .ciaddr(if for_inform {
                client_ip
            } else {
                Ipv4Addr::UNSPECIFIED
            })
            .yiaddr(if for_inform || msg_type == DhcpMessageType::Nak {
                Ipv4Addr::UNSPECIFIED
            } else {
                client_ip
            })
            .siaddr(router_ip)
            .chaddr(&client_mac.0)
            .message_type(msg_type)
            .server_id(router_ip);

        if msg_type != DhcpMessageType::Nak {
            builder = builder
                .subnet_mask(cfg.netmask())
                .router(router_ip)
                .dns(&server_cfg.dns_servers)
                .broadcast_addr(cfg.broadcast_address())
                .lease_time(server_cfg.lease_secs)
                .renewal_time(server_cfg.lease_secs / 2)
                .rebinding_time(server_cfg.lease_secs / 8 * 7);
        }
        let dhcp = builder.build();

        let (dst_ip, dst_mac) = if msg_type == DhcpMessageType::Nak {
            (Ipv4Addr::BROADCAST, MacAddr::BROADCAST)
        } else {
            (client_ip, client_mac)
        };

        let udp = UdpBuilder::new()
            .src_port(DHCP_SERVER_PORT)
            .dst_port(DHCP_CLIENT_PORT)
            .payload(&dhcp)
            .build(router_ip, dst_ip);
        let ip = Ipv4Builder::new()
            .src_addr(router_ip)
            .dst_addr(dst_ip)
            .ttl(ORIGINATED_TTL)
            .protocol(Protocol::Udp)
            .payload(&udp)
            .build();

        let metrics = Arc::clone(&self.metrics);
        let Some(iface) = self.iface_mut(id) else {
            return;
        };
        let frame = FrameBuilder::new()
            .dst_mac(dst_mac)
            .src_mac(iface.router_mac)
            .ethertype(EtherType::Ipv4)
            .payload(&ip)
            .build();
        debug!(?msg_type, to = %client_mac, "DHCP reply");
        iface.send_frame(&frame);

        match msg_type {
            DhcpMessageType::Offer => metrics.dhcp_offers_sent.inc(),
            DhcpMessageType::Ack => metrics.dhcp_acks_sent.inc(),
            DhcpMessageType::Nak => metrics.dhcp_naks_sent.inc(),
            _ => {}
        }
    }

    /*
     * DHCP client plumbing
     */

    fn handle_dhcp_client_reply(&mut self, id: IfaceId, frame: &mut [u8]) -> Flow<()> {
        let action = {
            let payload = dhcp_payload(frame)?;
            let iface = self
                .interfaces
                .get_mut(id.0)
                .and_then(|i| i.as_mut())
                .ok_or_else(|| Deny::Inform("interface gone".into()))?;
            let Some(client) = iface.dhcp_client.as_mut() else {
                return Err(Deny::Inform("no DHCP client on this interface".into()));
            };
            client.process_reply(payload)
        };
        self.apply_client_action(id, action);
        Ok(())
    }

    fn apply_client_action(&mut self, id: IfaceId, action: DhcpClientAction) {
        match action {
            DhcpClientAction::Send {
                packet,
                dst_ip,
                dst_mac,
            } => self.send_dhcp_client_frame(id, &packet, dst_ip, dst_mac),
            DhcpClientAction::Configure { config } => {
                let Some(domain) = self.iface(id).map(|i| i.domain) else {
                    return;
                };
                self.install_domain_config(domain, Some(config));
            }
            DhcpClientAction::Deconfigure => {
                let Some(domain) = self.iface(id).map(|i| i.domain) else {
                    return;
                };
                self.install_domain_config(domain, None);
            }
            DhcpClientAction::None => {}
        }
    }

    fn send_dhcp_client_frame(
        &mut self,
        id: IfaceId,
        dhcp_payload: &[u8],
        dst_ip: Ipv4Addr,
        dst_mac: MacAddr,
    ) {
        let Some(iface) = self.iface_mut(id) else {
            return;
        };
        let src_ip = iface
            .dhcp_client
            .as_ref()
            .and_then(|c| c.lease())
            .map(|l| l.ip_addr)
            .unwrap_or(Ipv4Addr::UNSPECIFIED);

        let udp = UdpBuilder::new()
            .src_port(DHCP_CLIENT_PORT)
            .dst_port(DHCP_SERVER_PORT)
            .payload(dhcp_payload)
            .build(src_ip, dst_ip);
        let ip = Ipv4Builder::new()
            .src_addr(src_ip)
            .dst_addr(dst_ip)
            .ttl(ORIGINATED_TTL)
            .protocol(Protocol::Udp)
            .payload(&udp)
            .build();
        let frame = FrameBuilder::new()
            .dst_mac(dst_mac)
            .src_mac(iface.router_mac)
            .ethertype(EtherType::Ipv4)
            .payload(&ip)
            .build();
        iface.send_frame(&frame);
    }

    /// Swap a domain's IP config. Links touching the domain are
    /// dissolved before the new config becomes visible, so no flow ever
    /// straddles two configs.
    pub fn install_domain_config(&mut self, domain: DomainId, config: Option<Ipv4Config>) {
        let doomed: Vec<LinkId> = self
            .links
            .ids()
            .into_iter()
            .filter(|lid| {
                self.links
                    .get(*lid)
                    .is_some_and(|l| l.client.domain == domain || l.server.domain == domain)
            })
            .collect();
        for lid in doomed {
            self.dissolve_link(lid);
        }

        match config {
            Some(cfg) => info!(domain = %self.domains[domain.0].name, ip = %cfg.address, "domain configured"),
            None => info!(domain = %self.domains[domain.0].name, "domain deconfigured"),
        }
        self.domains[domain.0].ip_config = config;
    }

    /*
     * Timers
     */

    /// Drive every deadline: link keep-alive, parked packets, ARP
    /// request suppression, DHCP offers/leases, DHCP client state.
    /// Deadlines are re-checked here rather than trusted, so a late
    /// signal is harmless.
    pub fn run_maintenance(&mut self) {
        let now = Instant::now();

        // link keep-alive
        let timeouts = self.config.link_timeouts.clone();
        for link_id in self.links.ids() {
            let expired = self
                .links
                .get(link_id)
                .is_some_and(|l| l.idle_expired(&timeouts, now));
            if expired {
                debug!(link = link_id.0, "link idle timeout");
                self.dissolve_link(link_id);
            }
        }

        // parked packets
        let waiter_timeout = self.config.arp_waiter_timeout;
        let mut timed_out = Vec::new();
        let mut i = 0;
        while i < self.arp_waiters.len() {
            if now.duration_since(self.arp_waiters[i].since) > waiter_timeout {
                timed_out.push(self.arp_waiters.swap_remove(i));
            } else {
                i += 1;
            }
        }
        for waiter in timed_out {
            warn!(ip = %waiter.ip, "ARP resolution timed out, dropping packet");
            self.metrics.dropped_warn.inc();
            self.ack(waiter.iface, waiter.packet);
        }

        // allow a fresh ARP request per target after the window
        let window = self.config.arp_request_window;
        for domain in &mut self.domains {
            domain.arp_cache.expire_pending(window, now);
        }

        // DHCP allocation expiry
        for index in 0..self.interfaces.len() {
            if let Some(iface) = self.interfaces[index].as_mut() {
                for ip in iface.dhcp_allocations.expire(now) {
                    info!(%ip, "DHCP allocation expired");
                }
            }
        }

        // DHCP client timers
        for index in 0..self.interfaces.len() {
            let action = match self.interfaces[index]
                .as_mut()
                .and_then(|i| i.dhcp_client.as_mut())
            {
                Some(client) => client.tick(now),
                None => continue,
            };
            self.apply_client_action(IfaceId(index), action);
        }

        self.metrics.set_active_links(self.links.len());
        self.metrics.set_arp_waiters(self.arp_waiters.len());
    }

    /// Ticker for `run_maintenance`
    pub fn maintenance_interval() -> Interval {
        interval(Duration::from_secs(1))
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("domains", &self.domains.len())
            .field("links", &self.links.len())
            .field("arp_waiters", &self.arp_waiters.len())
            .finish_non_exhaustive()
    }
}

/// Source/destination ports (and TCP flags) of the transport header
fn transport_ports(frame: &mut [u8], proto: Proto) -> Flow<(u16, u16, Option<TcpFlags>)> {
    let mut ip = Ipv4Mut::parse(&mut frame[ETH..])
        .map_err(|e| Deny::Warn(format!("malformed IPv4 packet: {}", e)))?;
    match proto {
        Proto::Tcp => {
            let tcp = TcpMut::parse(ip.payload_mut())
                .map_err(|e| Deny::Warn(format!("malformed TCP segment: {}", e)))?;
            Ok((tcp.src_port(), tcp.dst_port(), Some(tcp.flags())))
        }
        Proto::Udp => {
            let udp = UdpMut::parse(ip.payload_mut())
                .map_err(|e| Deny::Warn(format!("malformed UDP datagram: {}", e)))?;
            Ok((udp.src_port(), udp.dst_port(), None))
        }
    }
}

/// Borrow the DHCP message inside an eth/ip/udp frame
fn dhcp_payload(frame: &mut [u8]) -> Flow<&[u8]> {
    let (header_len, total_len) = {
        let ip = Ipv4Mut::parse(&mut frame[ETH..])
            .map_err(|e| Deny::Warn(format!("malformed IPv4 packet: {}", e)))?;
        (ip.header_len(), ip.total_len())
    };
    let start = ETH + header_len + crate::protocol::udp::HEADER_SIZE;
    let end = ETH + total_len;
    if start >= end || end > frame.len() {
        return Err(Deny::Warn("truncated DHCP message".into()));
    }
    Ok(&frame[start..end])
}
