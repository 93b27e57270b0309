//! Routing domains
//!
//! A domain is a logical routing zone: a group of interfaces sharing one
//! IP realm, one ARP cache, one set of rule trees and one NAT port
//! allocator. Interfaces reference their domain but never own it; the
//! router owns all domains and serializes every mutation on its single
//! event loop.

use super::arp::ArpCache;
use super::interface::IfaceId;
use super::link::{LinkId, Proto, Side, SideId};
use super::rules::{ForwardRuleTree, IpRuleTree, PortAllocator, TransportRuleList};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Handle to a domain owned by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(pub usize);

/// IP configuration of a domain (address of the router inside it)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Config {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Option<Ipv4Addr>,
}

impl Ipv4Config {
    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            !0u32 << (32 - self.prefix_len)
        }
    }

    /// The address lies inside the domain's subnet
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (u32::from(ip) & self.mask()) == (u32::from(self.address) & self.mask())
    }

    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask())
    }

    pub fn broadcast_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) | !self.mask())
    }

    /// Next hop toward `dst`: the host itself when subnet-local, else the
    /// gateway
    pub fn next_hop(&self, dst: Ipv4Addr) -> Option<Ipv4Addr> {
        if self.contains(dst) {
            Some(dst)
        } else {
            self.gateway
        }
    }
}

/// DHCP server settings of a domain
#[derive(Debug, Clone)]
pub struct DhcpServerConfig {
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub lease_secs: u32,
    pub offer_timeout_secs: u64,
    pub dns_servers: Vec<Ipv4Addr>,
}

/// A routing domain
#[derive(Debug)]
pub struct Domain {
    pub name: String,
    pub ip_config: Option<Ipv4Config>,
    /// Acquire the domain address via the DHCP client when unconfigured
    pub dhcp_client: bool,
    pub dhcp_server: Option<DhcpServerConfig>,

    pub ip_rules: IpRuleTree,
    tcp_forward_rules: ForwardRuleTree,
    udp_forward_rules: ForwardRuleTree,
    tcp_rules: TransportRuleList,
    udp_rules: TransportRuleList,

    tcp_ports: PortAllocator,
    udp_ports: PortAllocator,

    pub(crate) interfaces: Vec<IfaceId>,
    pub(crate) arp_cache: ArpCache,
    tcp_sides: BTreeMap<SideId, (LinkId, Side)>,
    udp_sides: BTreeMap<SideId, (LinkId, Side)>,
}

impl Domain {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip_config: None,
            dhcp_client: false,
            dhcp_server: None,
            ip_rules: IpRuleTree::new(),
            tcp_forward_rules: ForwardRuleTree::new(),
            udp_forward_rules: ForwardRuleTree::new(),
            tcp_rules: TransportRuleList::new(),
            udp_rules: TransportRuleList::new(),
            tcp_ports: PortAllocator::default(),
            udp_ports: PortAllocator::default(),
            interfaces: Vec::new(),
            arp_cache: ArpCache::new(),
            tcp_sides: BTreeMap::new(),
            udp_sides: BTreeMap::new(),
        }
    }

    pub fn forward_rules(&self, proto: Proto) -> &ForwardRuleTree {
        match proto {
            Proto::Tcp => &self.tcp_forward_rules,
            Proto::Udp => &self.udp_forward_rules,
        }
    }

    pub fn forward_rules_mut(&mut self, proto: Proto) -> &mut ForwardRuleTree {
        match proto {
            Proto::Tcp => &mut self.tcp_forward_rules,
            Proto::Udp => &mut self.udp_forward_rules,
        }
    }

    pub fn transport_rules(&self, proto: Proto) -> &TransportRuleList {
        match proto {
            Proto::Tcp => &self.tcp_rules,
            Proto::Udp => &self.udp_rules,
        }
    }

    pub fn transport_rules_mut(&mut self, proto: Proto) -> &mut TransportRuleList {
        match proto {
            Proto::Tcp => &mut self.tcp_rules,
            Proto::Udp => &mut self.udp_rules,
        }
    }

    pub fn port_alloc_mut(&mut self, proto: Proto) -> &mut PortAllocator {
        match proto {
            Proto::Tcp => &mut self.tcp_ports,
            Proto::Udp => &mut self.udp_ports,
        }
    }

    pub(crate) fn sides(&self, proto: Proto) -> &BTreeMap<SideId, (LinkId, Side)> {
        match proto {
            Proto::Tcp => &self.tcp_sides,
            Proto::Udp => &self.udp_sides,
        }
    }

    pub(crate) fn sides_mut(&mut self, proto: Proto) -> &mut BTreeMap<SideId, (LinkId, Side)> {
        match proto {
            Proto::Tcp => &mut self.tcp_sides,
            Proto::Udp => &mut self.udp_sides,
        }
    }

    /// Router address inside the domain, if configured
    pub fn router_ip(&self) -> Option<Ipv4Addr> {
        self.ip_config.map(|cfg| cfg.address)
    }

    pub fn interfaces(&self) -> &[IfaceId] {
        &self.interfaces
    }
}
