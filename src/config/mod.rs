//! Router configuration
//!
//! TOML-backed declaration of domains (address or DHCP client, rule
//! sets, optional DHCP server) and interfaces (MACs plus domain
//! binding). The file is parsed and validated here; `build_router`
//! turns it into a live router once the packet ports exist.

mod types;
mod validation;

pub use types::{
    Config, DhcpServerSection, DomainConfig, ForwardRuleConfig, InterfaceConfig, IpRuleConfig,
    TransportRuleConfig,
};
pub use validation::validate;

use crate::dataplane::{
    DhcpServerConfig, Domain, DomainId, ForwardRule, IpRule, Ipv4Cidr, Ipv4Config, Router,
    RouterConfig, TransportRule,
};
use crate::port::PacketPort;
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// Load and validate a configuration file
pub fn load(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config =
        toml::from_str(&content).map_err(|e| Error::Config(format!("parse failure: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

/// Build a router from a validated configuration.
///
/// `ports` maps every configured interface name to its packet port.
pub fn build_router(
    config: &Config,
    router_config: RouterConfig,
    mut ports: HashMap<String, Box<dyn PacketPort>>,
) -> Result<Router> {
    let mut router = Router::new(router_config);

    // domains first, rules need the full id map
    let mut ids: HashMap<&str, DomainId> = HashMap::new();
    for (name, domain_cfg) in &config.domains {
        let mut domain = Domain::new(name.clone());

        if let Some(ref address) = domain_cfg.address {
            let cidr = Ipv4Cidr::parse(address)?;
            let gateway = domain_cfg
                .gateway
                .as_deref()
                .map(|g| {
                    g.parse()
                        .map_err(|_| Error::Config(format!("invalid gateway: {}", g)))
                })
                .transpose()?;
            domain.ip_config = Some(Ipv4Config {
                address: cidr.addr,
                prefix_len: cidr.prefix_len,
                gateway,
            });
        }
        domain.dhcp_client = domain_cfg.dhcp;

        if let Some(ref server) = domain_cfg.dhcp_server {
            domain.dhcp_server = Some(DhcpServerConfig {
                range_start: server.range_start,
                range_end: server.range_end,
                lease_secs: server.lease_secs,
                offer_timeout_secs: server.offer_timeout_secs,
                dns_servers: server.dns.clone(),
            });
        }

        let id = router.add_domain(domain);
        ids.insert(name.as_str(), id);
    }

    for (name, domain_cfg) in &config.domains {
        let id = ids[name.as_str()];

        for rule in &domain_cfg.ip_rules {
            let to = *ids
                .get(rule.to.as_str())
                .ok_or_else(|| Error::DomainNotFound {
                    name: rule.to.clone(),
                })?;
            router.domain_mut(id).ip_rules.add(IpRule {
                cidr: Ipv4Cidr::parse(&rule.prefix)?,
                domain: to,
            });
        }

        for (rules, proto) in [
            (&domain_cfg.tcp_rules, crate::dataplane::Proto::Tcp),
            (&domain_cfg.udp_rules, crate::dataplane::Proto::Udp),
        ] {
            for rule in rules.iter() {
                let to = *ids
                    .get(rule.to.as_str())
                    .ok_or_else(|| Error::DomainNotFound {
                        name: rule.to.clone(),
                    })?;
                router
                    .domain_mut(id)
                    .transport_rules_mut(proto)
                    .add(TransportRule {
                        ports: rule.ports.0..=rule.ports.1,
                        domain: to,
                    });
            }
        }

        for (rules, proto) in [
            (&domain_cfg.tcp_forward, crate::dataplane::Proto::Tcp),
            (&domain_cfg.udp_forward, crate::dataplane::Proto::Udp),
        ] {
            for rule in rules.iter() {
                let to = *ids
                    .get(rule.to.as_str())
                    .ok_or_else(|| Error::DomainNotFound {
                        name: rule.to.clone(),
                    })?;
                router
                    .domain_mut(id)
                    .forward_rules_mut(proto)
                    .add(ForwardRule {
                        port: rule.port,
                        domain: to,
                        to: rule.host,
                        to_port: rule.host_port,
                    });
            }
        }
    }

    for (name, iface_cfg) in &config.interfaces {
        let domain = *ids
            .get(iface_cfg.domain.as_str())
            .ok_or_else(|| Error::DomainNotFound {
                name: iface_cfg.domain.clone(),
            })?;
        let mac: MacAddr = iface_cfg
            .mac
            .parse()
            .map_err(|e| Error::Config(format!("interface {}: {}", name, e)))?;
        let router_mac: MacAddr = iface_cfg
            .router_mac
            .parse()
            .map_err(|e| Error::Config(format!("interface {}: {}", name, e)))?;
        let port = ports
            .remove(name.as_str())
            .ok_or_else(|| Error::InterfaceNotFound { name: name.clone() })?;

        router.add_interface(name.clone(), mac, router_mac, domain, port);
    }

    Ok(router)
}
