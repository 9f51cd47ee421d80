//! The cloud API seam.
//!
//! Everything the backend needs from a cloud is expressed here as one
//! trait over plain records. `SimulatedCloud` implements it in memory
//! for tests and local runs; a production SDK binding implements it at
//! the embedding edge.

use std::collections::BTreeMap;

use drift_core::{NodeState, Protocol};
use driftgrid_provider::ProviderResult;

/// One instance as the cloud reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub id: String,
    pub state: NodeState,
    pub dns_name: String,
    pub image_id: String,
    pub size: String,
    pub availability_zone: String,
    pub tags: BTreeMap<String, String>,
}

/// Request to provision one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInstanceRequest {
    pub image_id: String,
    pub size: String,
    pub key_name: String,
    pub security_groups: Vec<String>,
    pub availability_zone: Option<String>,
}

/// A resolved ingress-rule source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressSource {
    /// An IPv4 address or CIDR block, used verbatim.
    Cidr(String),
    /// Another security group, by name.
    Group(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Listener {
    pub protocol: Protocol,
    pub app_port: u16,
    pub balancer_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub listeners: Vec<Listener>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Probe target, e.g. `HTTP:8080/ping`.
    pub target: String,
    pub interval: u32,
    pub timeout: u32,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerRecord {
    pub name: String,
    pub dns_name: String,
    pub listeners: Vec<Listener>,
    pub health_check: Option<HealthCheck>,
    pub zones: Vec<String>,
    pub instances: Vec<String>,
}

/// Synchronous cloud operations, scoped per region.
pub trait CloudApi: Send + Sync {
    fn instances(&self, region: &str) -> ProviderResult<Vec<InstanceRecord>>;

    /// Fresh record for one instance, `None` when the id is unknown.
    fn instance(&self, region: &str, id: &str) -> ProviderResult<Option<InstanceRecord>>;

    fn run_instance(
        &self,
        region: &str,
        request: &RunInstanceRequest,
    ) -> ProviderResult<InstanceRecord>;

    fn terminate_instance(&self, region: &str, id: &str) -> ProviderResult<()>;

    fn set_tag(&self, region: &str, id: &str, key: &str, value: &str) -> ProviderResult<()>;

    fn security_group_names(&self, region: &str) -> ProviderResult<Vec<String>>;

    fn create_security_group(
        &self,
        region: &str,
        name: &str,
        description: &str,
    ) -> ProviderResult<()>;

    /// Fails when an identical rule already exists; callers running
    /// convergent passes downgrade that failure to a warning.
    fn authorize_ingress(
        &self,
        region: &str,
        group: &str,
        protocol: Protocol,
        from_port: u16,
        to_port: u16,
        source: &IngressSource,
    ) -> ProviderResult<()>;

    fn find_load_balancer(
        &self,
        region: &str,
        name: &str,
    ) -> ProviderResult<Option<LoadBalancerRecord>>;

    fn create_load_balancer(
        &self,
        region: &str,
        spec: &LoadBalancerSpec,
    ) -> ProviderResult<LoadBalancerRecord>;

    fn configure_health_check(
        &self,
        region: &str,
        name: &str,
        check: &HealthCheck,
    ) -> ProviderResult<()>;

    fn register_instance(
        &self,
        region: &str,
        balancer: &str,
        zone: &str,
        instance_id: &str,
    ) -> ProviderResult<()>;

    fn deregister_instance(
        &self,
        region: &str,
        balancer: &str,
        instance_id: &str,
    ) -> ProviderResult<()>;
}
