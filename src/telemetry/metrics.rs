//! Metrics collection for dataplane statistics.
//!
//! Thread-safe counters; the dataplane itself runs on one event loop but
//! the registry may be read from elsewhere.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter with relaxed increments.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Registry of the router's dataplane events.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Packets rewritten and submitted to an egress interface.
    pub packets_forwarded: Counter,
    /// Expected drops (no rule, benign misses).
    pub dropped_inform: Counter,
    /// Abnormal drops (malformed frames, exhaustion).
    pub dropped_warn: Counter,
    /// Packets parked for ARP resolution.
    pub postponed: Counter,

    /// ARP requests broadcast.
    pub arp_requests_sent: Counter,
    /// ARP replies answered.
    pub arp_replies_sent: Counter,

    /// DHCP server replies by type.
    pub dhcp_offers_sent: Counter,
    pub dhcp_acks_sent: Counter,
    pub dhcp_naks_sent: Counter,

    /// Link lifecycle.
    pub links_created: Counter,
    pub links_dissolved: Counter,

    active_links: AtomicU64,
    arp_waiters: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active_links(&self, count: usize) {
        self.active_links.store(count as u64, Ordering::Relaxed);
    }

    pub fn active_links(&self) -> u64 {
        self.active_links.load(Ordering::Relaxed)
    }

    pub fn set_arp_waiters(&self, count: usize) {
        self.arp_waiters.store(count as u64, Ordering::Relaxed);
    }

    pub fn arp_waiters(&self) -> u64 {
        self.arp_waiters.load(Ordering::Relaxed)
    }
}
