//! Network identity of a node and its per-service port bindings.

use std::collections::BTreeMap;
use std::fmt;

use crate::tags::{ServiceMap, ServicePorts};

/// Maps a node's host identifier to the ports each installed service is
/// reachable on. Derived on demand from a node's tags; never persisted
/// on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    /// service name → { container port → exposed port }
    pub service_mappings: ServiceMap,
}

impl Address {
    pub fn new(host: impl Into<String>, service_mappings: ServiceMap) -> Self {
        Self {
            host: host.into(),
            service_mappings,
        }
    }

    /// Build an address where every port is exposed as itself, from a
    /// flat port list per service. Used by backends with no port
    /// translation layer.
    pub fn identity_mapped(host: impl Into<String>, services: &BTreeMap<String, Vec<u16>>) -> Self {
        let mut mappings = ServiceMap::new();
        for (service, ports) in services {
            let map: ServicePorts = ports.iter().map(|p| (*p, *p)).collect();
            mappings.insert(service.clone(), map);
        }
        Self::new(host, mappings)
    }

    /// The exposed ports for a service, ascending.
    pub fn ports(&self, service: &str) -> Vec<u16> {
        self.service_mappings
            .get(service)
            .map(|m| m.values().copied().collect())
            .unwrap_or_default()
    }

    /// Comma-joined exposed ports, as injected into environment settings.
    pub fn port_list(&self, service: &str) -> String {
        let ports: Vec<String> = self.ports(service).iter().map(|p| p.to_string()).collect();
        ports.join(",")
    }

    /// `host:port` endpoints for a service.
    pub fn service_addresses(&self, service: &str) -> Vec<String> {
        self.ports(service)
            .iter()
            .map(|p| format!("{}:{}", self.host, p))
            .collect()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;
        for (service, ports) in &self.service_mappings {
            let entries: Vec<String> = ports.iter().map(|(c, e)| format!("{c}→{e}")).collect();
            write!(f, " {service}[{}]", entries.join(","))?;
        }
        Ok(())
    }
}
