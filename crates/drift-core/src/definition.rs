//! Declarative node definitions, one variant per backend.
//!
//! A `NodeDefinition` describes one desired node: backend-specific
//! sizing/image attributes plus the set of services it must run. The
//! discriminator is an explicit `type` tag; unknown discriminators are
//! rejected during validation, before any backend is contacted.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::credentials::CredentialsMap;

/// One desired node, tagged by backend kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeDefinition {
    Cloud(CloudNodeDefinition),
    Host(HostNodeDefinition),
    File(FileNodeDefinition),
}

/// Cloud instance definition: image, size, region, and the credentials
/// used to administer it after boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudNodeDefinition {
    pub image_id: String,
    pub size: String,
    pub credentials_name: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub services: Vec<String>,
    /// Extra security groups to attach beyond the per-service ones.
    #[serde(default)]
    pub security_groups: Vec<String>,
    /// Name of the provider-side key pair installed on the instance.
    pub key_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    /// Resolved from `credentials_name` after loading; not part of the
    /// declarative document.
    #[serde(skip)]
    pub admin_user: Option<String>,
    #[serde(skip)]
    pub private_key_path: Option<PathBuf>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Container definition: the template the container host builds from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostNodeDefinition {
    pub template: String,
    pub services: Vec<String>,
}

/// Definition for the file-backed fake backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNodeDefinition {
    #[serde(default)]
    pub role: Option<String>,
    pub services: Vec<String>,
}

impl NodeDefinition {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeDefinition::Cloud(_) => "cloud",
            NodeDefinition::Host(_) => "host",
            NodeDefinition::File(_) => "file",
        }
    }

    pub fn services(&self) -> &[String] {
        match self {
            NodeDefinition::Cloud(d) => &d.services,
            NodeDefinition::Host(d) => &d.services,
            NodeDefinition::File(d) => &d.services,
        }
    }

    /// Parse a raw node block into a typed definition, resolving the
    /// admin login for backends that carry a credentials reference.
    /// Call only after `validate_block` has passed.
    pub fn from_value(
        value: Value,
        all_credentials: &CredentialsMap,
    ) -> Result<Self, serde_yaml::Error> {
        let mut def: NodeDefinition = serde_yaml::from_value(value)?;
        if let NodeDefinition::Cloud(cloud) = &mut def
            && let Some(creds) = all_credentials.get(&cloud.credentials_name)
        {
            cloud.admin_user = Some(creds.login.clone());
            cloud.private_key_path = Some(creds.private_key_path());
        }
        Ok(def)
    }

    /// Static validation of a raw node block. Appends human-readable
    /// messages; the error list is authoritative.
    pub fn validate_block(
        block: &Mapping,
        node_number: usize,
        env_name: &str,
        all_credentials: &CredentialsMap,
        errors: &mut Vec<String>,
    ) {
        let Some(kind) = str_key(block, "type") else {
            errors.push(format!(
                "Node type is missing for node number {node_number} in '{env_name}' environment"
            ));
            return;
        };

        match kind {
            "cloud" => validate_cloud_block(block, node_number, env_name, all_credentials, errors),
            "host" => validate_host_block(block, node_number, env_name, errors),
            "file" => {}
            other => errors.push(format!(
                "Node type '{other}' is invalid for node number {node_number} in '{env_name}' environment"
            )),
        }

        match block.get("services") {
            Some(Value::Sequence(services)) if !services.is_empty() => {}
            _ => errors.push(format!(
                "Key 'services' must name at least one service for node number {node_number} in '{env_name}' environment"
            )),
        }
    }
}

fn validate_cloud_block(
    block: &Mapping,
    node_number: usize,
    env_name: &str,
    all_credentials: &CredentialsMap,
    errors: &mut Vec<String>,
) {
    for key in ["image_id", "key_name", "size"] {
        if str_key(block, key).is_none() {
            errors.push(format!(
                "Key '{key}' not set for cloud node definition number {node_number} in '{env_name}' environment"
            ));
        }
    }

    match str_key(block, "credentials_name") {
        None => errors.push(format!(
            "Key 'credentials_name' not set for cloud node definition number {node_number} in '{env_name}' environment"
        )),
        Some(name) if !all_credentials.contains_key(name) => errors.push(format!(
            "Key 'credentials_name' does not contain a valid credential for cloud node definition number {node_number} in '{env_name}' environment"
        )),
        Some(_) => {}
    }
}

fn validate_host_block(
    block: &Mapping,
    node_number: usize,
    env_name: &str,
    errors: &mut Vec<String>,
) {
    if str_key(block, "template").is_none() {
        errors.push(format!(
            "Key 'template' not set for host node definition number {node_number} in '{env_name}' environment"
        ));
    }
}

/// A string-valued key that is present and non-blank.
fn str_key<'a>(block: &'a Mapping, key: &str) -> Option<&'a str> {
    match block.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
        _ => None,
    }
}

impl fmt::Display for NodeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeDefinition::Cloud(d) => write!(
                f,
                "cloud node image:'{}' size:'{}' credentials:'{}' region:'{}' services:{:?}",
                d.image_id, d.size, d.credentials_name, d.region, d.services
            ),
            NodeDefinition::Host(d) => {
                write!(f, "host node template:'{}' services:{:?}", d.template, d.services)
            }
            NodeDefinition::File(d) => write!(f, "file node services:{:?}", d.services),
        }
    }
}
