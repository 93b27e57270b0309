//! Data plane components
//!
//! Domains, interfaces, flow links, ARP resolution and DHCP around the
//! central router pipeline.

mod arp;
mod dhcp_client;
mod dhcp_server;
mod domain;
mod interface;
mod link;
mod rules;

pub use arp::{ArpCache, ArpWaiter};
pub use dhcp_client::{DhcpClient, DhcpClientAction, DhcpClientState, DhcpLease};
pub use dhcp_server::{AllocationState, DhcpAllocation, DhcpAllocations};
pub use domain::{DhcpServerConfig, Domain, DomainId, Ipv4Config};
pub use interface::{Deny, Flow, IfaceId, Interface, Router, RouterConfig};
pub use link::{
    Link, LinkId, LinkSide, LinkState, LinkTable, LinkTimeouts, Proto, Side, SideId,
};
pub use rules::{
    ForwardRule, ForwardRuleTree, IpRule, IpRuleTree, Ipv4Cidr, PortAllocator, TransportRule,
    TransportRuleList,
};
