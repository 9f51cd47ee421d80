//! Service connectivity specifications.
//!
//! A `Connectivity` entry declares how a service is reached: the
//! protocol, the ports it listens on, and the sources allowed to talk
//! to it. Ports accept either a bare integer (`80`) or a range string
//! (`"50-59"`); allow-list entries are symbolic (`WORLD`, a CIDR, or
//! another service's name) and resolved by the backend at
//! authorization time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The allow-list token granting access to everyone.
pub const WORLD: &str = "WORLD";

/// Wire protocol for a connectivity entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Icmp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        };
        f.write_str(s)
    }
}

/// A single port or an inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSpec {
    Single(u16),
    Range(u16, u16),
}

impl PortSpec {
    /// The `(from_port, to_port)` pair handed to backend ingress rules.
    /// A bare port maps to itself on both ends.
    pub fn bounds(self) -> (u16, u16) {
        match self {
            PortSpec::Single(p) => (p, p),
            PortSpec::Range(lo, hi) => (lo, hi),
        }
    }

    /// Every concrete port this spec covers.
    pub fn iter(self) -> impl Iterator<Item = u16> {
        let (lo, hi) = self.bounds();
        lo..=hi
    }
}

#[derive(Debug, Error)]
#[error("invalid port specification: '{0}'")]
pub struct InvalidPortSpec(pub String);

impl FromStr for PortSpec {
    type Err = InvalidPortSpec;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || InvalidPortSpec(s.to_string());
        match s.split_once('-') {
            Some((lo, hi)) => {
                let lo: u16 = lo.trim().parse().map_err(|_| bad())?;
                let hi: u16 = hi.trim().parse().map_err(|_| bad())?;
                if lo > hi {
                    return Err(bad());
                }
                Ok(PortSpec::Range(lo, hi))
            }
            None => {
                let p: u16 = s.trim().parse().map_err(|_| bad())?;
                Ok(PortSpec::Single(p))
            }
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Single(p) => write!(f, "{p}"),
            PortSpec::Range(lo, hi) => write!(f, "{lo}-{hi}"),
        }
    }
}

impl Serialize for PortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PortSpec::Single(p) => serializer.serialize_u16(*p),
            PortSpec::Range(..) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for PortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u16),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(p) => Ok(PortSpec::Single(p)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Declarative connectivity for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connectivity {
    #[serde(default)]
    pub protocol: Protocol,
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub allowed: Vec<String>,
}

impl Connectivity {
    /// Every concrete port across all entries, in declaration order.
    pub fn all_ports(specs: &[Connectivity]) -> Vec<u16> {
        specs
            .iter()
            .flat_map(|c| c.ports.iter().copied())
            .flat_map(PortSpec::iter)
            .collect()
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports: Vec<String> = self.ports.iter().map(|p| p.to_string()).collect();
        write!(
            f,
            "{} ports [{}] allowed [{}]",
            self.protocol,
            ports.join(", "),
            self.allowed.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_maps_to_itself() {
        let spec: PortSpec = "80".parse().unwrap();
        assert_eq!(spec, PortSpec::Single(80));
        assert_eq!(spec.bounds(), (80, 80));
    }

    #[test]
    fn range_string_expands_to_bounds() {
        let spec: PortSpec = "50-59".parse().unwrap();
        assert_eq!(spec, PortSpec::Range(50, 59));
        assert_eq!(spec.bounds(), (50, 59));
        assert_eq!(spec.iter().count(), 10);
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!("59-50".parse::<PortSpec>().is_err());
        assert!("x-59".parse::<PortSpec>().is_err());
    }

    #[test]
    fn deserializes_mixed_port_forms() {
        let conn: Connectivity = serde_yaml::from_str(
            r#"
            protocol: tcp
            ports: [80, "50-59"]
            allowed: [WORLD]
            "#,
        )
        .unwrap();
        assert_eq!(conn.ports, vec![PortSpec::Single(80), PortSpec::Range(50, 59)]);
        assert_eq!(conn.allowed, vec!["WORLD"]);
    }

    #[test]
    fn protocol_defaults_to_tcp() {
        let conn: Connectivity = serde_yaml::from_str("ports: [8080]").unwrap();
        assert_eq!(conn.protocol, Protocol::Tcp);
        assert!(conn.allowed.is_empty());
    }

    #[test]
    fn all_ports_flattens_ranges() {
        let specs = vec![
            Connectivity {
                protocol: Protocol::Tcp,
                ports: vec![PortSpec::Single(80), PortSpec::Range(50, 52)],
                allowed: vec![],
            },
            Connectivity {
                protocol: Protocol::Tcp,
                ports: vec![PortSpec::Single(443)],
                allowed: vec![],
            },
        ];
        assert_eq!(Connectivity::all_ports(&specs), vec![80, 50, 51, 52, 443]);
    }
}
