//! Configuration validation

use super::types::Config;
use crate::dataplane::Ipv4Cidr;
use crate::protocol::MacAddr;
use crate::{Error, Result};

/// Cross-check a parsed configuration before anything is built from it
pub fn validate(config: &Config) -> Result<()> {
    for (name, domain) in &config.domains {
        if domain.address.is_none() && !domain.dhcp {
            return Err(Error::Config(format!(
                "domain {}: needs an address or dhcp = true",
                name
            )));
        }
        if domain.address.is_some() && domain.dhcp {
            return Err(Error::Config(format!(
                "domain {}: address and dhcp are mutually exclusive",
                name
            )));
        }

        let cidr = domain
            .address
            .as_deref()
            .map(Ipv4Cidr::parse)
            .transpose()
            .map_err(|e| Error::Config(format!("domain {}: {}", name, e)))?;

        if let Some(ref gateway) = domain.gateway {
            gateway
                .parse::<std::net::Ipv4Addr>()
                .map_err(|_| Error::Config(format!("domain {}: invalid gateway", name)))?;
        }

        if let Some(ref server) = domain.dhcp_server {
            if u32::from(server.range_start) > u32::from(server.range_end) {
                return Err(Error::Config(format!(
                    "domain {}: DHCP range start above end",
                    name
                )));
            }
            if let Some(cidr) = cidr {
                if !cidr.contains(server.range_start) || !cidr.contains(server.range_end) {
                    return Err(Error::Config(format!(
                        "domain {}: DHCP range outside the domain subnet",
                        name
                    )));
                }
            }
        }

        let targets = domain
            .ip_rules
            .iter()
            .map(|r| &r.to)
            .chain(domain.tcp_rules.iter().map(|r| &r.to))
            .chain(domain.udp_rules.iter().map(|r| &r.to))
            .chain(domain.tcp_forward.iter().map(|r| &r.to))
            .chain(domain.udp_forward.iter().map(|r| &r.to));
        for target in targets {
            if !config.domains.contains_key(target) {
                return Err(Error::Config(format!(
                    "domain {}: rule targets unknown domain {}",
                    name, target
                )));
            }
        }

        for rule in &domain.ip_rules {
            Ipv4Cidr::parse(&rule.prefix)
                .map_err(|e| Error::Config(format!("domain {}: {}", name, e)))?;
        }
        for rule in domain.tcp_rules.iter().chain(domain.udp_rules.iter()) {
            if rule.ports.0 > rule.ports.1 {
                return Err(Error::Config(format!(
                    "domain {}: transport rule port range inverted",
                    name
                )));
            }
        }
    }

    for (name, iface) in &config.interfaces {
        if !config.domains.contains_key(&iface.domain) {
            return Err(Error::Config(format!(
                "interface {}: unknown domain {}",
                name, iface.domain
            )));
        }
        iface
            .mac
            .parse::<MacAddr>()
            .map_err(|e| Error::Config(format!("interface {}: {}", name, e)))?;
        iface
            .router_mac
            .parse::<MacAddr>()
            .map_err(|e| Error::Config(format!("interface {}: {}", name, e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_domain_without_addressing_rejected() {
        let config = parse("[domains.lan]\n");
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_address_and_dhcp_exclusive() {
        let config = parse(
            r#"
            [domains.lan]
            address = "10.0.0.1/24"
            dhcp = true
        "#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rule_target_must_exist() {
        let config = parse(
            r#"
            [domains.lan]
            address = "10.0.0.1/24"

            [[domains.lan.ip_rules]]
            prefix = "0.0.0.0/0"
            to = "nowhere"
        "#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_dhcp_range_checked() {
        let config = parse(
            r#"
            [domains.lan]
            address = "10.0.0.1/24"

            [domains.lan.dhcp_server]
            range_start = "10.0.1.100"
            range_end = "10.0.1.101"
        "#,
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_valid_config() {
        let config = parse(
            r#"
            [domains.lan]
            address = "10.0.0.1/24"

            [domains.lan.dhcp_server]
            range_start = "10.0.0.100"
            range_end = "10.0.0.200"

            [domains.wan]
            dhcp = true

            [[domains.lan.ip_rules]]
            prefix = "0.0.0.0/0"
            to = "wan"

            [interfaces.eth0]
            domain = "lan"
            mac = "02:00:00:00:00:01"
            router_mac = "02:00:00:00:00:02"
        "#,
        );
        assert!(validate(&config).is_ok());
    }
}
