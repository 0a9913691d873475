//! VPC networks and subnet layout.

use crate::core::types::{ResourceDefinition, ResourceKind, Value};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetType {
    Public,
    Private,
}

impl SubnetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetConfig {
    pub name: String,
    pub subnet_type: SubnetType,
    pub cidr_mask: u8,
}

impl SubnetConfig {
    pub fn new(name: &str, subnet_type: SubnetType, cidr_mask: u8) -> Self {
        Self {
            name: name.to_string(),
            subnet_type,
            cidr_mask,
        }
    }

    fn to_value(&self) -> Value {
        Value::map([
            ("name", Value::from(self.name.as_str())),
            ("type", Value::from(self.subnet_type.as_str())),
            ("cidr_mask", Value::from(u64::from(self.cidr_mask))),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProps {
    pub cidr: String,
    pub nat_gateways: u32,
    pub subnets: Vec<SubnetConfig>,
}

impl NetworkProps {
    pub fn definition(&self, id: &str) -> ResourceDefinition {
        ResourceDefinition::new(id, ResourceKind::Network)
            .property("cidr", self.cidr.as_str())
            .property("nat_gateways", u64::from(self.nat_gateways))
            .property(
                "subnets",
                Value::List(self.subnets.iter().map(SubnetConfig::to_value).collect()),
            )
    }

    pub fn private_subnets(&self) -> Vec<&str> {
        self.subnets
            .iter()
            .filter(|s| s.subnet_type == SubnetType::Private)
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Parse `a.b.c.d/n`. Returns the prefix length.
pub fn parse_cidr(cidr: &str) -> Result<u8, String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("'{}' is not in a.b.c.d/n form", cidr))?;
    addr.parse::<Ipv4Addr>()
        .map_err(|e| format!("'{}': {}", cidr, e))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("'{}': bad prefix length", cidr))?;
    if prefix > 32 {
        return Err(format!("'{}': prefix length over 32", cidr));
    }
    Ok(prefix)
}

pub(crate) fn validate(properties: &BTreeMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();
    let prefix = match properties.get("cidr").map(|v| v.as_str()) {
        Some(Some(cidr)) => match parse_cidr(cidr) {
            Ok(p) => Some(p),
            Err(e) => {
                errors.push(format!("invalid cidr {}", e));
                None
            }
        },
        Some(None) => {
            errors.push("cidr must be a string".to_string());
            None
        }
        None => None,
    };

    if let (Some(prefix), Some(Value::List(subnets))) = (prefix, properties.get("subnets")) {
        for subnet in subnets {
            let mask = match subnet {
                Value::Map(m) => m.get("cidr_mask").and_then(|v| match v {
                    Value::Number(n) => n.as_u64(),
                    _ => None,
                }),
                _ => None,
            };
            match mask {
                Some(mask) if mask >= u64::from(prefix) && mask <= 32 => {}
                _ => errors.push(format!(
                    "subnet cidr_mask must lie between /{} and /32",
                    prefix
                )),
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vpc() -> NetworkProps {
        NetworkProps {
            cidr: "192.168.0.0/16".into(),
            nat_gateways: 1,
            subnets: vec![
                SubnetConfig::new("Public1", SubnetType::Public, 24),
                SubnetConfig::new("Private1", SubnetType::Private, 24),
            ],
        }
    }

    #[test]
    fn test_tr006_network_definition_valid() {
        let def = vpc().definition("vpc");
        assert!(validate(&def.properties).is_empty());
        assert_eq!(vpc().private_subnets(), vec!["Private1"]);
    }

    #[test]
    fn test_tr006_parse_cidr() {
        assert_eq!(parse_cidr("10.0.0.0/8"), Ok(8));
        assert!(parse_cidr("10.0.0.0").is_err());
        assert!(parse_cidr("300.0.0.0/8").is_err());
        assert!(parse_cidr("10.0.0.0/33").is_err());
    }

    #[test]
    fn test_tr006_subnet_mask_wider_than_vpc() {
        let mut props = vpc();
        props.subnets.push(SubnetConfig::new("Huge", SubnetType::Public, 8));
        let errors = validate(&props.definition("vpc").properties);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("/16"));
    }
}
