//! Routing rules and NAT port allocation
//!
//! Three rule classes decide where a packet leaves its domain: forward
//! rules (port redirection toward a host in a remote domain), transport
//! rules (destination-port match toward a remote domain) and IP rules
//! (longest prefix match on the destination address).

use super::domain::DomainId;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

/// IPv4 prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Self {
        Self { addr, prefix_len }
    }

    /// Parse "a.b.c.d/n"
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::Parse(format!("invalid CIDR: {}", s)))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::Parse(format!("invalid address: {}", addr)))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| Error::Parse(format!("invalid prefix: {}", prefix)))?;
        if prefix_len > 32 {
            return Err(Error::Parse(format!("prefix too long: {}", prefix_len)));
        }
        Ok(Self { addr, prefix_len })
    }

    fn mask(&self) -> u32 {
        if self.prefix_len == 0 {
            0
        } else {
            !0u32 << (32 - self.prefix_len)
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (u32::from(ip) & self.mask()) == (u32::from(self.addr) & self.mask())
    }
}

/// Longest-prefix route from a destination subnet to a remote domain
#[derive(Debug, Clone, Copy)]
pub struct IpRule {
    pub cidr: Ipv4Cidr,
    pub domain: DomainId,
}

/// IP rule tree with longest prefix match
#[derive(Debug, Default)]
pub struct IpRuleTree {
    rules: Vec<IpRule>,
}

impl IpRuleTree {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add(&mut self, rule: IpRule) {
        self.rules
            .retain(|r| r.cidr != rule.cidr);
        self.rules.push(rule);
        // longest prefix first
        self.rules
            .sort_by(|a, b| b.cidr.prefix_len.cmp(&a.cidr.prefix_len));
    }

    pub fn longest_prefix_match(&self, addr: Ipv4Addr) -> Option<&IpRule> {
        self.rules.iter().find(|r| r.cidr.contains(addr))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Port forwarding target: an incoming destination port on this domain
/// redirects to a host (and optionally another port) in a remote domain
#[derive(Debug, Clone, Copy)]
pub struct ForwardRule {
    pub port: u16,
    pub domain: DomainId,
    pub to: Ipv4Addr,
    pub to_port: Option<u16>,
}

/// Forward rules keyed by destination port
#[derive(Debug, Default)]
pub struct ForwardRuleTree {
    rules: BTreeMap<u16, ForwardRule>,
}

impl ForwardRuleTree {
    pub fn new() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, rule: ForwardRule) {
        self.rules.insert(rule.port, rule);
    }

    pub fn matching(&self, port: u16) -> Option<&ForwardRule> {
        self.rules.get(&port)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Destination-port range routed to a remote domain
#[derive(Debug, Clone)]
pub struct TransportRule {
    pub ports: RangeInclusive<u16>,
    pub domain: DomainId,
}

/// Transport rules, first match wins
#[derive(Debug, Default)]
pub struct TransportRuleList {
    rules: Vec<TransportRule>,
}

impl TransportRuleList {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add(&mut self, rule: TransportRule) {
        self.rules.push(rule);
    }

    pub fn matching(&self, port: u16) -> Option<&TransportRule> {
        self.rules.iter().find(|r| r.ports.contains(&port))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Default NAT source port range (IANA ephemeral)
pub const NAT_PORT_RANGE: (u16, u16) = (49152, 65535);

/// Guarded NAT source port allocator
#[derive(Debug)]
pub struct PortAllocator {
    range: (u16, u16),
    next: u16,
    in_use: HashSet<u16>,
}

impl PortAllocator {
    pub fn new(range: (u16, u16)) -> Self {
        Self {
            range,
            next: range.0,
            in_use: HashSet::new(),
        }
    }

    /// Allocate a free port; None on exhaustion
    pub fn alloc(&mut self) -> Option<u16> {
        let (min, max) = self.range;
        let range_size = (max - min) as usize + 1;

        for _ in 0..range_size {
            let port = self.next;
            self.next = if self.next >= max { min } else { self.next + 1 };

            if self.in_use.insert(port) {
                return Some(port);
            }
        }
        None
    }

    pub fn free(&mut self, port: u16) {
        self.in_use.remove(&port);
    }

    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(NAT_PORT_RANGE)
    }
}
