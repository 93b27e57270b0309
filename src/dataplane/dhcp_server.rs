//! DHCP server allocations
//!
//! One allocation binds a client MAC to an IP of the domain's pool. The
//! store is kept per interface; released allocations move to a tombstone
//! list drained at the TX ack point, and an IP stays reserved until its
//! tombstone is destroyed.

use super::domain::DhcpServerConfig;
use crate::protocol::MacAddr;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    /// Offered, waiting for the client's REQUEST
    Offered,
    /// Leased until expiry
    Bound,
}

/// One MAC-to-IP binding with its lease window
#[derive(Debug, Clone)]
pub struct DhcpAllocation {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub state: AllocationState,
    pub expires_at: Instant,
    pub xid: u32,
}

/// Per-interface allocation store with deferred destruction
#[derive(Debug, Default)]
pub struct DhcpAllocations {
    allocations: BTreeMap<MacAddr, DhcpAllocation>,
    released: Vec<DhcpAllocation>,
}

impl DhcpAllocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, mac: MacAddr) -> Option<&DhcpAllocation> {
        self.allocations.get(&mac)
    }

    pub fn find_mut(&mut self, mac: MacAddr) -> Option<&mut DhcpAllocation> {
        self.allocations.get_mut(&mac)
    }

    pub fn insert(&mut self, allocation: DhcpAllocation) {
        self.allocations.insert(allocation.mac, allocation);
    }

    /// Move an allocation to the tombstone list
    pub fn release(&mut self, mac: MacAddr) {
        if let Some(allocation) = self.allocations.remove(&mac) {
            self.released.push(allocation);
        }
    }

    /// Destroy tombstones; runs at the TX ack drain
    pub fn destroy_released(&mut self) -> usize {
        let count = self.released.len();
        self.released.clear();
        count
    }

    /// Release every allocation whose lease or offer window expired
    pub fn expire(&mut self, now: Instant) -> Vec<Ipv4Addr> {
        let expired: Vec<MacAddr> = self
            .allocations
            .values()
            .filter(|a| now >= a.expires_at)
            .map(|a| a.mac)
            .collect();

        let mut ips = Vec::new();
        for mac in expired {
            if let Some(allocation) = self.allocations.remove(&mac) {
                ips.push(allocation.ip);
                self.released.push(allocation);
            }
        }
        ips
    }

    /// The IP is held by a live allocation or a pending tombstone
    pub fn ip_in_use(&self, ip: Ipv4Addr) -> bool {
        self.allocations.values().any(|a| a.ip == ip)
            || self.released.iter().any(|a| a.ip == ip)
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

/// First pool address not reserved by an allocation or tombstone.
///
/// Scans `[range_start..=range_end]` in order, skipping the router's own
/// address.
pub fn first_free_ip(
    config: &DhcpServerConfig,
    router_ip: Ipv4Addr,
    allocations: &DhcpAllocations,
) -> Option<Ipv4Addr> {
    let start = u32::from(config.range_start);
    let end = u32::from(config.range_end);

    (start..=end)
        .map(Ipv4Addr::from)
        .find(|ip| *ip != router_ip && !allocations.ip_in_use(*ip))
}

/// Offer window for a fresh allocation
pub fn offer_expiry(config: &DhcpServerConfig, now: Instant) -> Instant {
    now + Duration::from_secs(config.offer_timeout_secs)
}

/// Lease window for a bound allocation
pub fn lease_expiry(config: &DhcpServerConfig, now: Instant) -> Instant {
    now + Duration::from_secs(config.lease_secs as u64)
}
