//! NAT flow links
//!
//! A Link records one NAT-mapped transport flow with a client side
//! (pre-NAT view at the ingress interface) and a server side (post-NAT
//! view at the egress interface). Links live in an arena and are referred
//! to by stable `LinkId`s from the per-interface lists and the per-domain
//! side maps; physical deletion is deferred to the TX ack drain so an
//! in-flight descriptor never references a freed link.

use super::domain::DomainId;
use super::interface::IfaceId;
use crate::protocol::tcp::TcpFlags;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Transport protocols carried by links
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Proto {
    Tcp,
    Udp,
}

impl Proto {
    pub fn from_ip_protocol(value: u8) -> Option<Self> {
        match value {
            6 => Some(Proto::Tcp),
            17 => Some(Proto::Udp),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            Proto::Tcp => 6,
            Proto::Udp => 17,
        }
    }
}

/// The 5-tuple (minus protocol) identifying one side of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SideId {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
}

/// Which side of a link matched a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

/// One side of a link: where it attaches and how its packets look
#[derive(Debug, Clone, Copy)]
pub struct LinkSide {
    pub iface: IfaceId,
    pub domain: DomainId,
    pub id: SideId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Open,
    Closing,
    Closed,
}

/// Stable handle into the link arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub usize);

/// Idle timeouts per flow class
#[derive(Debug, Clone)]
pub struct LinkTimeouts {
    pub udp: Duration,
    pub tcp_established: Duration,
    pub tcp_transitory: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            udp: Duration::from_secs(30),
            tcp_established: Duration::from_secs(300),
            tcp_transitory: Duration::from_secs(120),
        }
    }
}

/// A NAT-mapped transport flow
#[derive(Debug)]
pub struct Link {
    pub proto: Proto,
    pub client: LinkSide,
    pub server: LinkSide,
    pub state: LinkState,
    /// NAT source port held on the server domain's allocator
    pub nat_port: Option<u16>,
    last_activity: Instant,
    established: bool,
    client_fin: bool,
    server_fin: bool,
}

impl Link {
    pub fn new(
        proto: Proto,
        client: LinkSide,
        server: LinkSide,
        nat_port: Option<u16>,
    ) -> Self {
        Self {
            proto,
            client,
            server,
            state: LinkState::Open,
            nat_port,
            last_activity: Instant::now(),
            established: false,
            client_fin: false,
            server_fin: false,
        }
    }

    pub fn side(&self, which: Side) -> &LinkSide {
        match which {
            Side::Client => &self.client,
            Side::Server => &self.server,
        }
    }

    /// Reset the keep-alive timer
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Record a forwarded packet, updating TCP teardown state.
    ///
    /// `from` is the side the packet entered on.
    pub fn packet(&mut self, from: Side, tcp_flags: Option<&TcpFlags>) {
        self.touch();
        if from == Side::Server {
            self.established = true;
        }

        let Some(flags) = tcp_flags else {
            return;
        };

        if flags.rst {
            self.state = LinkState::Closed;
            return;
        }
        if flags.fin {
            match from {
                Side::Client => self.client_fin = true,
                Side::Server => self.server_fin = true,
            }
        }
        self.state = match (self.client_fin, self.server_fin) {
            (false, false) => LinkState::Open,
            (true, true) => LinkState::Closed,
            _ => LinkState::Closing,
        };
    }

    /// Idle timeout class for this link
    pub fn idle_timeout(&self, timeouts: &LinkTimeouts) -> Duration {
        match self.proto {
            Proto::Udp => timeouts.udp,
            Proto::Tcp => {
                if self.state == LinkState::Open && self.established {
                    timeouts.tcp_established
                } else {
                    timeouts.tcp_transitory
                }
            }
        }
    }

    pub fn idle_expired(&self, timeouts: &LinkTimeouts, now: Instant) -> bool {
        now.duration_since(self.last_activity) > self.idle_timeout(timeouts)
    }
}

/// Arena of links addressed by `LinkId`
#[derive(Debug, Default)]
pub struct LinkTable {
    slots: Vec<Option<Link>>,
    free: Vec<usize>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, link: Link) -> LinkId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(link);
                LinkId(index)
            }
            None => {
                self.slots.push(Some(link));
                LinkId(self.slots.len() - 1)
            }
        }
    }

    pub fn get(&self, id: LinkId) -> Option<&Link> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    pub fn contains(&self, id: LinkId) -> bool {
        self.get(id).is_some()
    }

    /// Remove a link; None when the slot was already reclaimed
    pub fn remove(&mut self, id: LinkId) -> Option<Link> {
        let link = self.slots.get_mut(id.0).and_then(|slot| slot.take())?;
        self.free.push(id.0);
        Some(link)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<LinkId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| LinkId(i)))
            .collect()
    }
}
