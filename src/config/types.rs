//! Configuration types

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub domains: BTreeMap<String, DomainConfig>,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainConfig {
    /// Router address inside the domain, CIDR notation
    pub address: Option<String>,
    pub gateway: Option<String>,
    /// Acquire the address with the DHCP client instead
    #[serde(default)]
    pub dhcp: bool,
    pub dhcp_server: Option<DhcpServerSection>,
    #[serde(default)]
    pub ip_rules: Vec<IpRuleConfig>,
    #[serde(default)]
    pub tcp_rules: Vec<TransportRuleConfig>,
    #[serde(default)]
    pub udp_rules: Vec<TransportRuleConfig>,
    #[serde(default)]
    pub tcp_forward: Vec<ForwardRuleConfig>,
    #[serde(default)]
    pub udp_forward: Vec<ForwardRuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DhcpServerSection {
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u32,
    #[serde(default = "default_offer_timeout_secs")]
    pub offer_timeout_secs: u64,
    #[serde(default)]
    pub dns: Vec<Ipv4Addr>,
}

fn default_lease_secs() -> u32 {
    3600
}

fn default_offer_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpRuleConfig {
    pub prefix: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportRuleConfig {
    /// Inclusive port range
    pub ports: (u16, u16),
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardRuleConfig {
    pub port: u16,
    pub to: String,
    pub host: Ipv4Addr,
    pub host_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub domain: String,
    pub mac: String,
    pub router_mac: String,
}
