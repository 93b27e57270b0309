//! DHCPv4 client
//!
//! RFC 2131 state machine acquiring the IP configuration of the
//! interface's own domain. The machine only decides; the router executes
//! the returned actions (framing and sending packets, installing or
//! dropping the domain config).

use super::domain::Ipv4Config;
use crate::protocol::dhcp::{options, BootpOp, DhcpBuilder, DhcpHeader, DhcpMessageType};
use crate::protocol::MacAddr;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maximum retransmits during initial discovery/request
const MAX_RETRIES: u8 = 10;

/// Unanswered retransmits during renew/rebind before giving up the lease
const RENEW_MAX_RETRIES: u8 = 3;

/// Base retransmit timeout in seconds (doubled per retry, capped)
const BASE_TIMEOUT_SECS: u64 = 4;

/// DHCP client states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhcpClientState {
    /// No lease, discovery not yet running
    Init,
    /// DISCOVER sent, waiting for OFFER
    Select,
    /// REQUEST sent, waiting for ACK
    Request,
    /// Lease held and valid
    Bound,
    /// T1 passed, renewing unicast with the leasing server
    Renew,
    /// T2 passed, rebinding via broadcast
    Rebind,
}

/// Lease acquired from a DHCP server
#[derive(Debug, Clone)]
pub struct DhcpLease {
    pub ip_addr: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub server_id: Ipv4Addr,
    pub lease_time: u32,
    pub renewal_time: u32,
    pub rebinding_time: u32,
    pub obtained_at: Instant,
}

impl DhcpLease {
    pub fn renewal_due(&self, now: Instant) -> bool {
        now.duration_since(self.obtained_at) >= Duration::from_secs(self.renewal_time as u64)
    }

    pub fn rebinding_due(&self, now: Instant) -> bool {
        now.duration_since(self.obtained_at) >= Duration::from_secs(self.rebinding_time as u64)
    }

    pub fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.obtained_at) >= Duration::from_secs(self.lease_time as u64)
    }

    pub fn ip_config(&self) -> Ipv4Config {
        Ipv4Config {
            address: self.ip_addr,
            prefix_len: self.prefix_len,
            gateway: self.gateway,
        }
    }
}

/// What the router must do on behalf of the client
#[derive(Debug)]
pub enum DhcpClientAction {
    /// Send a DHCP message (payload only; the router frames it)
    Send {
        packet: Vec<u8>,
        dst_ip: Ipv4Addr,
        dst_mac: MacAddr,
    },
    /// Install the acquired IP configuration into the domain
    Configure { config: Ipv4Config },
    /// Drop the domain's IP configuration
    Deconfigure,
    /// Nothing to do
    None,
}

/// DHCPv4 client for one interface
#[derive(Debug)]
pub struct DhcpClient {
    mac: MacAddr,
    state: DhcpClientState,
    xid: u32,
    lease: Option<DhcpLease>,
    last_sent: Option<Instant>,
    retries: u8,
    offered_server: Option<Ipv4Addr>,
    offered_ip: Option<Ipv4Addr>,
}

impl DhcpClient {
    pub fn new(mac: MacAddr) -> Self {
        Self {
            mac,
            state: DhcpClientState::Init,
            xid: generate_xid(),
            lease: None,
            last_sent: None,
            retries: 0,
            offered_server: None,
            offered_ip: None,
        }
    }

    pub fn state(&self) -> DhcpClientState {
        self.state
    }

    pub fn lease(&self) -> Option<&DhcpLease> {
        self.lease.as_ref()
    }

    /// Start (or restart) discovery
    pub fn start(&mut self) -> DhcpClientAction {
        info!("dhcp client: starting discovery");
        self.state = DhcpClientState::Init;
        self.xid = generate_xid();
        self.retries = 0;
        self.offered_server = None;
        self.offered_ip = None;
        self.send_discover()
    }

    fn send_discover(&mut self) -> DhcpClientAction {
        debug!("dhcp client: DISCOVER (xid {:#010x})", self.xid);
        self.state = DhcpClientState::Select;
        self.last_sent = Some(Instant::now());

        DhcpClientAction::Send {
            packet: self.build_discover(),
            dst_ip: Ipv4Addr::BROADCAST,
            dst_mac: MacAddr::BROADCAST,
        }
    }

    fn build_discover(&self) -> Vec<u8> {
        DhcpBuilder::new()
            .op(BootpOp::Request)
            .xid(self.xid)
            .flags(0x8000)
            .chaddr(&self.mac.0)
            .message_type(DhcpMessageType::Discover)
            .parameter_request_list(&[
                options::SUBNET_MASK,
                options::ROUTER,
                options::DNS_SERVER,
                options::LEASE_TIME,
                options::RENEWAL_TIME,
                options::REBINDING_TIME,
            ])
            .build()
    }

    /// Process a BOOTREPLY addressed to this interface
    pub fn process_reply(&mut self, dhcp_payload: &[u8]) -> DhcpClientAction {
        let msg = match DhcpHeader::parse(dhcp_payload) {
            Ok(m) => m,
            Err(e) => {
                debug!("dhcp client: failed to parse reply: {}", e);
                return DhcpClientAction::None;
            }
        };

        if msg.xid() != self.xid {
            debug!(
                "dhcp client: ignoring reply with xid {:#010x}, expected {:#010x}",
                msg.xid(),
                self.xid
            );
            return DhcpClientAction::None;
        }
        if msg.client_mac() != self.mac.0 {
            debug!("dhcp client: ignoring reply for different chaddr");
            return DhcpClientAction::None;
        }

        let Some(msg_type) = msg.message_type() else {
            debug!("dhcp client: reply without message type");
            return DhcpClientAction::None;
        };

        match (self.state, msg_type) {
            (DhcpClientState::Select, DhcpMessageType::Offer) => self.handle_offer(&msg),
            (DhcpClientState::Request, DhcpMessageType::Ack) => self.handle_ack(&msg),
            (DhcpClientState::Request, DhcpMessageType::Nak) => {
                warn!("dhcp client: NAK, restarting discovery");
                self.lease = None;
                self.start()
            }
            (DhcpClientState::Renew | DhcpClientState::Rebind, DhcpMessageType::Ack) => {
                let lease = self.parse_lease(&msg);
                info!(ip = %lease.ip_addr, lease_secs = lease.lease_time, "dhcp client: lease renewed");
                self.state = DhcpClientState::Bound;
                self.lease = Some(lease);
                DhcpClientAction::None
            }
            (DhcpClientState::Renew | DhcpClientState::Rebind, DhcpMessageType::Nak) => {
                warn!("dhcp client: NAK during renewal, dropping lease");
                self.lease = None;
                self.state = DhcpClientState::Init;
                DhcpClientAction::Deconfigure
            }
            _ => {
                debug!(
                    "dhcp client: unexpected {:?} in state {:?}",
                    msg_type, self.state
                );
                DhcpClientAction::None
            }
        }
    }

    fn handle_offer(&mut self, msg: &DhcpHeader) -> DhcpClientAction {
        let offered_ip = msg.yiaddr();
        info!(ip = %offered_ip, server = ?msg.server_id(), "dhcp client: OFFER received");

        self.offered_ip = Some(offered_ip);
        self.offered_server = msg.server_id();
        self.state = DhcpClientState::Request;
        self.last_sent = Some(Instant::now());
        self.retries = 0;

        DhcpClientAction::Send {
            packet: self.build_request(),
            dst_ip: Ipv4Addr::BROADCAST,
            dst_mac: MacAddr::BROADCAST,
        }
    }

    fn build_request(&self) -> Vec<u8> {
        let mut builder = DhcpBuilder::new()
            .op(BootpOp::Request)
            .xid(self.xid)
            .flags(0x8000)
            .chaddr(&self.mac.0)
            .message_type(DhcpMessageType::Request);

        if let Some(ip) = self.offered_ip {
            builder = builder.requested_ip(ip);
        }
        if let Some(server) = self.offered_server {
            builder = builder.server_id(server);
        }

        builder
            .parameter_request_list(&[
                options::SUBNET_MASK,
                options::ROUTER,
                options::DNS_SERVER,
                options::LEASE_TIME,
                options::RENEWAL_TIME,
                options::REBINDING_TIME,
            ])
            .build()
    }

    fn handle_ack(&mut self, msg: &DhcpHeader) -> DhcpClientAction {
        let lease = self.parse_lease(msg);
        info!(
            ip = %lease.ip_addr,
            lease_secs = lease.lease_time,
            t1 = lease.renewal_time,
            t2 = lease.rebinding_time,
            "dhcp client: lease acquired"
        );

        self.state = DhcpClientState::Bound;
        let action = DhcpClientAction::Configure {
            config: lease.ip_config(),
        };
        self.lease = Some(lease);
        action
    }

    fn parse_lease(&self, msg: &DhcpHeader) -> DhcpLease {
        let subnet_mask = msg
            .find_option_ip(options::SUBNET_MASK)
            .unwrap_or(Ipv4Addr::new(255, 255, 255, 0));
        let lease_time = msg.find_option_u32(options::LEASE_TIME).unwrap_or(86400);

        DhcpLease {
            ip_addr: msg.yiaddr(),
            prefix_len: u32::from(subnet_mask).count_ones() as u8,
            gateway: msg.find_option_ip(options::ROUTER),
            dns_servers: msg
                .find_option_ip_list(options::DNS_SERVER)
                .unwrap_or_default(),
            server_id: msg.server_id().unwrap_or(Ipv4Addr::UNSPECIFIED),
            lease_time,
            renewal_time: msg
                .find_option_u32(options::RENEWAL_TIME)
                .unwrap_or(lease_time / 2),
            rebinding_time: msg
                .find_option_u32(options::REBINDING_TIME)
                .unwrap_or(lease_time / 8 * 7),
            obtained_at: Instant::now(),
        }
    }

    /// Drive timers; called from the maintenance signal
    pub fn tick(&mut self, now: Instant) -> DhcpClientAction {
        match self.state {
            DhcpClientState::Init => self.start(),

            DhcpClientState::Select | DhcpClientState::Request => {
                if !self.retransmit_due(now) {
                    return DhcpClientAction::None;
                }
                self.retries += 1;
                if self.retries > MAX_RETRIES {
                    warn!("dhcp client: retries exhausted, restarting");
                    return self.start();
                }
                debug!(retry = self.retries, "dhcp client: retransmit");
                self.last_sent = Some(now);
                let packet = if self.state == DhcpClientState::Select {
                    self.build_discover()
                } else {
                    self.build_request()
                };
                DhcpClientAction::Send {
                    packet,
                    dst_ip: Ipv4Addr::BROADCAST,
                    dst_mac: MacAddr::BROADCAST,
                }
            }

            DhcpClientState::Bound => {
                let due = self.lease.as_ref().is_some_and(|l| l.renewal_due(now));
                if due {
                    info!("dhcp client: T1 reached, renewing");
                    self.state = DhcpClientState::Renew;
                    self.xid = generate_xid();
                    self.retries = 0;
                    self.last_sent = Some(now);
                    return self.send_lease_request(true);
                }
                DhcpClientAction::None
            }

            DhcpClientState::Renew => {
                let Some(lease) = self.lease.as_ref() else {
                    return self.start();
                };
                if lease.rebinding_due(now) {
                    info!("dhcp client: T2 reached, rebinding");
                    self.state = DhcpClientState::Rebind;
                    self.retries = 0;
                    self.last_sent = Some(now);
                    return self.send_lease_request(false);
                }
                self.retransmit_or_give_up(now, true)
            }

            DhcpClientState::Rebind => {
                let Some(lease) = self.lease.as_ref() else {
                    return self.start();
                };
                if lease.expired(now) {
                    warn!("dhcp client: lease expired");
                    self.lease = None;
                    self.state = DhcpClientState::Init;
                    return DhcpClientAction::Deconfigure;
                }
                self.retransmit_or_give_up(now, false)
            }
        }
    }

    fn retransmit_or_give_up(&mut self, now: Instant, unicast: bool) -> DhcpClientAction {
        if !self.retransmit_due(now) {
            return DhcpClientAction::None;
        }
        self.retries += 1;
        if self.retries >= RENEW_MAX_RETRIES {
            warn!("dhcp client: server unresponsive, dropping lease");
            self.lease = None;
            self.state = DhcpClientState::Init;
            return DhcpClientAction::Deconfigure;
        }
        debug!(retry = self.retries, "dhcp client: retransmit lease request");
        self.last_sent = Some(now);
        self.send_lease_request(unicast)
    }

    /// REQUEST while a lease is held: ciaddr carries our address; unicast
    /// toward the leasing server during renew, broadcast during rebind
    fn send_lease_request(&mut self, unicast: bool) -> DhcpClientAction {
        let Some(lease) = self.lease.as_ref() else {
            return self.start();
        };

        let packet = DhcpBuilder::new()
            .op(BootpOp::Request)
            .xid(self.xid)
            .ciaddr(lease.ip_addr)
            .chaddr(&self.mac.0)
            .message_type(DhcpMessageType::Request)
            .parameter_request_list(&[
                options::SUBNET_MASK,
                options::ROUTER,
                options::DNS_SERVER,
                options::LEASE_TIME,
            ])
            .build();

        let dst_ip = if unicast {
            lease.server_id
        } else {
            Ipv4Addr::BROADCAST
        };

        DhcpClientAction::Send {
            packet,
            dst_ip,
            // the server MAC is not tracked; L2 broadcast reaches it either way
            dst_mac: MacAddr::BROADCAST,
        }
    }

    fn retransmit_due(&self, now: Instant) -> bool {
        self.last_sent
            .is_some_and(|last| now.duration_since(last) > self.retransmit_timeout())
    }

    /// Exponential backoff: 4, 8, 16, 32, 64 seconds
    fn retransmit_timeout(&self) -> Duration {
        let multiplier = 1u64 << self.retries.min(4);
        Duration::from_secs(BASE_TIMEOUT_SECS * multiplier)
    }

    #[cfg(test)]
    pub(crate) fn xid(&self) -> u32 {
        self.xid
    }
}

/// Transaction ids only need to be unlikely to collide
fn generate_xid() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    seed.wrapping_mul(1103515245).wrapping_add(12345)
}
