//! Durable node tags.
//!
//! Tags are the backend-persisted record of a node's environment
//! membership and installed services: the cloud backend stores them as
//! provider-native instance tags, the container-host backend as a YAML
//! file per container. The `services` tag is the sole source of truth
//! for what is installed on a node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// container port → exposed port for one service.
pub type ServicePorts = BTreeMap<u16, u16>;

/// service name → its port mappings.
pub type ServiceMap = BTreeMap<String, ServicePorts>;

/// Tag key under which the serialized `ServiceMap` is stored on
/// backends with flat string tags.
pub const SERVICES_TAG: &str = "services";
pub const ENV_NAME_TAG: &str = "env_name";
pub const ENV_DEF_NAME_TAG: &str = "env_def_name";

/// The full tag set carried by a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTags {
    pub env_name: String,
    pub env_def_name: String,
    #[serde(default)]
    pub services: ServiceMap,
    /// Backend-specific metadata (credentials name, admin user, template...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl NodeTags {
    /// Fresh tags for a node just started into an environment: membership
    /// recorded, no services installed yet.
    pub fn for_new_node(env_name: impl Into<String>, env_def_name: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            env_def_name: env_def_name.into(),
            services: ServiceMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

/// Serialize a service map into the flat-string form stored in a
/// provider-native tag.
pub fn serialize_services(services: &ServiceMap) -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(services)
}

/// Parse a service map back out of a tag value. An empty or absent tag
/// value is an empty map.
pub fn parse_services(raw: &str) -> Result<ServiceMap, serde_yaml::Error> {
    if raw.trim().is_empty() || raw.trim() == "{}" {
        return Ok(ServiceMap::new());
    }
    serde_yaml::from_str(raw)
}
