//! ARP cache and waiters
//!
//! The cache is domain-scoped: all interfaces of a domain resolve against
//! the same IP realm. A waiter parks the RX descriptor of a packet whose
//! next-hop MAC is unknown; the packet resumes when the reply arrives or
//! is dropped and acked when the waiter times out.

use super::domain::DomainId;
use super::interface::IfaceId;
use crate::port::RxPacket;
use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Domain-scoped IP-to-MAC cache with request suppression
#[derive(Debug, Default)]
pub struct ArpCache {
    entries: HashMap<Ipv4Addr, MacAddr>,
    /// Per-target timestamp of the last broadcast request; at most one
    /// request is in flight per IP inside the suppression window
    pending: HashMap<Ipv4Addr, Instant>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries.get(&ip).copied()
    }

    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        self.entries.insert(ip, mac);
        self.pending.remove(&ip);
    }

    /// A broadcast request for this IP is already in flight
    pub fn request_pending(&self, ip: Ipv4Addr, window: Duration, now: Instant) -> bool {
        self.pending
            .get(&ip)
            .is_some_and(|sent| now.duration_since(*sent) < window)
    }

    pub fn mark_requested(&mut self, ip: Ipv4Addr, now: Instant) {
        self.pending.insert(ip, now);
    }

    /// Drop pending marks older than the suppression window
    pub fn expire_pending(&mut self, window: Duration, now: Instant) {
        self.pending
            .retain(|_, sent| now.duration_since(*sent) < window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A parked RX descriptor waiting for an ARP resolution
#[derive(Debug)]
pub struct ArpWaiter {
    /// Interface whose sink the descriptor belongs to
    pub iface: IfaceId,
    /// Domain the resolution runs in
    pub domain: DomainId,
    pub ip: Ipv4Addr,
    pub packet: RxPacket,
    pub since: Instant,
}
