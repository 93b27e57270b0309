//! DHCP protocol - RFC 2131, 2132
//!
//! DHCPv4 message parsing and building for both the server engine and
//! the client state machine.

use crate::{Error, Result};
use std::net::Ipv4Addr;

/// DHCP server port (bootps)
pub const DHCP_SERVER_PORT: u16 = 67;

/// DHCP client port (bootpc)
pub const DHCP_CLIENT_PORT: u16 = 68;

/// Fixed header size (before options)
pub const DHCP_HEADER_SIZE: usize = 236;

/// Magic cookie marking start of options
pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Minimum packet size (header + magic cookie + end option)
pub const MIN_PACKET_SIZE: usize = DHCP_HEADER_SIZE + 4 + 1;

/// BOOTP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootpOp {
    Request = 1,
    Reply = 2,
}

impl BootpOp {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(BootpOp::Request),
            2 => Some(BootpOp::Reply),
            _ => None,
        }
    }
}

/// DHCP message types (Option 53)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl DhcpMessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DhcpMessageType::Discover),
            2 => Some(DhcpMessageType::Offer),
            3 => Some(DhcpMessageType::Request),
            4 => Some(DhcpMessageType::Decline),
            5 => Some(DhcpMessageType::Ack),
            6 => Some(DhcpMessageType::Nak),
            7 => Some(DhcpMessageType::Release),
            8 => Some(DhcpMessageType::Inform),
            _ => None,
        }
    }
}

/// DHCP option codes
pub mod options {
    pub const PAD: u8 = 0;
    pub const SUBNET_MASK: u8 = 1;
    pub const ROUTER: u8 = 3;
    pub const DNS_SERVER: u8 = 6;
    pub const BROADCAST_ADDR: u8 = 28;
    pub const REQUESTED_IP: u8 = 50;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
    pub const PARAMETER_REQUEST: u8 = 55;
    pub const RENEWAL_TIME: u8 = 58;
    pub const REBINDING_TIME: u8 = 59;
    pub const END: u8 = 255;
}

/// Parsed DHCP message (zero-copy reference)
#[derive(Debug)]
pub struct DhcpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> DhcpHeader<'a> {
    /// Parse DHCP message from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_PACKET_SIZE {
            return Err(Error::Parse("DHCP message too short".into()));
        }

        let cookie = &buffer[236..240];
        if cookie != MAGIC_COOKIE {
            return Err(Error::Parse("invalid DHCP magic cookie".into()));
        }

        Ok(Self { buffer })
    }

    /// Operation code (1=request, 2=reply)
    pub fn op(&self) -> u8 {
        self.buffer[0]
    }

    pub fn htype(&self) -> u8 {
        self.buffer[1]
    }

    pub fn hlen(&self) -> u8 {
        self.buffer[2]
    }

    /// Transaction ID
    pub fn xid(&self) -> u32 {
        u32::from_be_bytes([
            self.buffer[4],
            self.buffer[5],
            self.buffer[6],
            self.buffer[7],
        ])
    }

    /// Flags (bit 15 = broadcast)
    pub fn flags(&self) -> u16 {
        u16::from_be_bytes([self.buffer[10], self.buffer[11]])
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags() & 0x8000 != 0
    }

    /// Client IP address (ciaddr)
    pub fn ciaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[12],
            self.buffer[13],
            self.buffer[14],
            self.buffer[15],
        )
    }

    /// Your IP address (yiaddr) - assigned to client
    pub fn yiaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[16],
            self.buffer[17],
            self.buffer[18],
            self.buffer[19],
        )
    }

    /// Server IP address (siaddr)
    pub fn siaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[20],
            self.buffer[21],
            self.buffer[22],
            self.buffer[23],
        )
    }

    /// Gateway IP address (giaddr) - relay agent
    pub fn giaddr(&self) -> Ipv4Addr {
        Ipv4Addr::new(
            self.buffer[24],
            self.buffer[25],
            self.buffer[26],
            self.buffer[27],
        )
    }

    /// Client hardware address (chaddr) - first 16 bytes
    pub fn chaddr(&self) -> &[u8] {
        &self.buffer[28..44]
    }

    /// Client MAC address (first 6 bytes of chaddr for Ethernet)
    pub fn client_mac(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buffer[28..34]);
        mac
    }

    /// Options section (after magic cookie)
    pub fn options_raw(&self) -> &[u8] {
        &self.buffer[240..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer
    }

    /// Get DHCP message type from options
    pub fn message_type(&self) -> Option<DhcpMessageType> {
        self.find_option(options::MESSAGE_TYPE)
            .and_then(|data| data.first().copied())
            .and_then(DhcpMessageType::from_u8)
    }

    /// Get requested IP address from options (Option 50)
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.find_option_ip(options::REQUESTED_IP)
    }

    /// Get server identifier from options (Option 54)
    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.find_option_ip(options::SERVER_ID)
    }

    /// Find an option carrying a single IPv4 address
    pub fn find_option_ip(&self, code: u8) -> Option<Ipv4Addr> {
        self.find_option(code).and_then(|data| {
            if data.len() >= 4 {
                Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
            } else {
                None
            }
        })
    }

    /// Find an option carrying a list of IPv4 addresses
    pub fn find_option_ip_list(&self, code: u8) -> Option<Vec<Ipv4Addr>> {
        self.find_option(code).map(|data| {
            data.chunks_exact(4)
                .map(|c| Ipv4Addr::new(c[0], c[1], c[2], c[3]))
                .collect()
        })
    }

    /// Find an option carrying a big-endian u32
    pub fn find_option_u32(&self, code: u8) -> Option<u32> {
        self.find_option(code).and_then(|data| {
            if data.len() >= 4 {
                Some(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
            } else {
                None
            }
        })
    }

    /// Find option by code, returns option data (without code and length)
    pub fn find_option(&self, code: u8) -> Option<&[u8]> {
        let opts = self.options_raw();
        let mut i = 0;

        while i < opts.len() {
            let opt_code = opts[i];

            if opt_code == options::PAD {
                i += 1;
                continue;
            }
            if opt_code == options::END {
                break;
            }

            if i + 1 >= opts.len() {
                break;
            }
            let opt_len = opts[i + 1] as usize;
            let data_start = i + 2;
            let data_end = data_start + opt_len;

            if data_end > opts.len() {
                break;
            }

            if opt_code == code {
                return Some(&opts[data_start..data_end]);
            }

            i = data_end;
        }

        None
    }
}

/// DHCP message builder
#[derive(Debug, Clone)]
pub struct DhcpBuilder {
    op: u8,
    xid: u32,
    flags: u16,
    ciaddr: Ipv4Addr,
    yiaddr: Ipv4Addr,
    siaddr: Ipv4Addr,
    giaddr: Ipv4Addr,
    chaddr: [u8; 16],
    options: Vec<u8>,
}

impl DhcpBuilder {
    /// Create a new builder for a DHCP reply based on a request
    pub fn reply(request: &DhcpHeader) -> Self {
        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(request.chaddr());

        Self {
            op: BootpOp::Reply as u8,
            xid: request.xid(),
            flags: request.flags(),
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: request.giaddr(),
            chaddr,
            options: Vec::new(),
        }
    }

    /// Create a new empty builder
    pub fn new() -> Self {
        Self {
            op: BootpOp::Reply as u8,
            xid: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0u8; 16],
            options: Vec::new(),
        }
    }

    pub fn op(mut self, op: BootpOp) -> Self {
        self.op = op as u8;
        self
    }

    pub fn xid(mut self, xid: u32) -> Self {
        self.xid = xid;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn ciaddr(mut self, ip: Ipv4Addr) -> Self {
        self.ciaddr = ip;
        self
    }

    pub fn yiaddr(mut self, ip: Ipv4Addr) -> Self {
        self.yiaddr = ip;
        self
    }

    pub fn siaddr(mut self, ip: Ipv4Addr) -> Self {
        self.siaddr = ip;
        self
    }

    pub fn chaddr(mut self, mac: &[u8; 6]) -> Self {
        self.chaddr = [0u8; 16];
        self.chaddr[..6].copy_from_slice(mac);
        self
    }

    /// Set DHCP message type (Option 53)
    pub fn message_type(mut self, msg_type: DhcpMessageType) -> Self {
        self.add_option(options::MESSAGE_TYPE, &[msg_type as u8]);
        self
    }

    /// Set server identifier (Option 54)
    pub fn server_id(mut self, ip: Ipv4Addr) -> Self {
        self.add_option(options::SERVER_ID, &ip.octets());
        self
    }

    /// Set requested IP address (Option 50)
    pub fn requested_ip(mut self, ip: Ipv4Addr) -> Self {
        self.add_option(options::REQUESTED_IP, &ip.octets());
        self
    }

    /// Set subnet mask (Option 1)
    pub fn subnet_mask(mut self, mask: Ipv4Addr) -> Self {
        self.add_option(options::SUBNET_MASK, &mask.octets());
        self
    }

    /// Set router/gateway (Option 3)
    pub fn router(mut self, router: Ipv4Addr) -> Self {
        self.add_option(options::ROUTER, &router.octets());
        self
    }

    /// Set DNS servers (Option 6)
    pub fn dns(mut self, servers: &[Ipv4Addr]) -> Self {
        if servers.is_empty() {
            return self;
        }
        let mut data = Vec::new();
        for s in servers {
            data.extend_from_slice(&s.octets());
        }
        self.add_option(options::DNS_SERVER, &data);
        self
    }

    /// Set broadcast address (Option 28)
    pub fn broadcast_addr(mut self, addr: Ipv4Addr) -> Self {
        self.add_option(options::BROADCAST_ADDR, &addr.octets());
        self
    }

    /// Set lease time in seconds (Option 51)
    pub fn lease_time(mut self, seconds: u32) -> Self {
        self.add_option(options::LEASE_TIME, &seconds.to_be_bytes());
        self
    }

    /// Set renewal time T1 in seconds (Option 58)
    pub fn renewal_time(mut self, seconds: u32) -> Self {
        self.add_option(options::RENEWAL_TIME, &seconds.to_be_bytes());
        self
    }

    /// Set rebinding time T2 in seconds (Option 59)
    pub fn rebinding_time(mut self, seconds: u32) -> Self {
        self.add_option(options::REBINDING_TIME, &seconds.to_be_bytes());
        self
    }

    /// Set parameter request list (Option 55)
    pub fn parameter_request_list(mut self, params: &[u8]) -> Self {
        self.add_option(options::PARAMETER_REQUEST, params);
        self
    }

    fn add_option(&mut self, code: u8, data: &[u8]) {
        self.options.push(code);
        self.options.push(data.len() as u8);
        self.options.extend_from_slice(data);
    }

    /// Build the DHCP packet
    pub fn build(mut self) -> Vec<u8> {
        self.options.push(options::END);

        // Pad to minimum 300 bytes for BOOTP compatibility
        let options_len = self.options.len();
        let total_len = DHCP_HEADER_SIZE + 4 + options_len;
        let padded_len = total_len.max(300);

        let mut buffer = vec![0u8; padded_len];

        buffer[0] = self.op;
        buffer[1] = 1; // htype = Ethernet
        buffer[2] = 6; // hlen
        buffer[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buffer[10..12].copy_from_slice(&self.flags.to_be_bytes());
        buffer[12..16].copy_from_slice(&self.ciaddr.octets());
        buffer[16..20].copy_from_slice(&self.yiaddr.octets());
        buffer[20..24].copy_from_slice(&self.siaddr.octets());
        buffer[24..28].copy_from_slice(&self.giaddr.octets());
        buffer[28..44].copy_from_slice(&self.chaddr);
        // sname and file stay zeroed

        buffer[236..240].copy_from_slice(&MAGIC_COOKIE);
        buffer[240..240 + options_len].copy_from_slice(&self.options);

        buffer
    }
}

impl Default for DhcpBuilder {
    fn default() -> Self {
        Self::new()
    }
}
