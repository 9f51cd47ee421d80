//! In-memory cloud, used by tests and local runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use drift_core::{NodeState, Protocol};
use driftgrid_provider::{ProviderError, ProviderResult};

use crate::api::{
    CloudApi, HealthCheck, IngressSource, InstanceRecord, LoadBalancerRecord, LoadBalancerSpec,
    RunInstanceRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub source: IngressSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupRecord {
    pub name: String,
    pub description: String,
    pub rules: Vec<IngressRule>,
}

#[derive(Default)]
struct SimState {
    instances: BTreeMap<String, Vec<InstanceRecord>>,
    groups: BTreeMap<String, Vec<SecurityGroupRecord>>,
    balancers: BTreeMap<String, Vec<LoadBalancerRecord>>,
    next_instance: u32,
    create_group_calls: u32,
}

/// A whole cloud in one mutex. Instances boot straight into `Running`.
#[derive(Default)]
pub struct SimulatedCloud {
    state: Mutex<SimState>,
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observability for tests.
    pub fn create_group_calls(&self) -> u32 {
        self.state.lock().unwrap().create_group_calls
    }

    pub fn group(&self, region: &str, name: &str) -> Option<SecurityGroupRecord> {
        self.state
            .lock()
            .unwrap()
            .groups
            .get(region)?
            .iter()
            .find(|g| g.name == name)
            .cloned()
    }

    pub fn balancer(&self, region: &str, name: &str) -> Option<LoadBalancerRecord> {
        self.state
            .lock()
            .unwrap()
            .balancers
            .get(region)?
            .iter()
            .find(|b| b.name == name)
            .cloned()
    }

    /// Force an instance's reported state, for readiness tests.
    pub fn set_instance_state(&self, region: &str, id: &str, state: NodeState) {
        let mut sim = self.state.lock().unwrap();
        if let Some(record) = sim
            .instances
            .get_mut(region)
            .and_then(|list| list.iter_mut().find(|i| i.id == id))
        {
            record.state = state;
        }
    }

    /// Insert an instance the provider did not start, for drift tests.
    pub fn seed_instance(&self, region: &str, record: InstanceRecord) {
        self.state
            .lock()
            .unwrap()
            .instances
            .entry(region.to_string())
            .or_default()
            .push(record);
    }
}

impl CloudApi for SimulatedCloud {
    fn instances(&self, region: &str) -> ProviderResult<Vec<InstanceRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .instances
            .get(region)
            .cloned()
            .unwrap_or_default())
    }

    fn instance(&self, region: &str, id: &str) -> ProviderResult<Option<InstanceRecord>> {
        Ok(self
            .instances(region)?
            .into_iter()
            .find(|record| record.id == id))
    }

    fn run_instance(
        &self,
        region: &str,
        request: &RunInstanceRequest,
    ) -> ProviderResult<InstanceRecord> {
        let mut sim = self.state.lock().unwrap();
        sim.next_instance += 1;
        let n = sim.next_instance;
        let record = InstanceRecord {
            id: format!("i-{n:06}"),
            state: NodeState::Running,
            dns_name: format!("node-{n}.{region}.sim.example.com"),
            image_id: request.image_id.clone(),
            size: request.size.clone(),
            availability_zone: request
                .availability_zone
                .clone()
                .unwrap_or_else(|| format!("{region}a")),
            tags: BTreeMap::new(),
        };
        sim.instances
            .entry(region.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn terminate_instance(&self, region: &str, id: &str) -> ProviderResult<()> {
        let mut sim = self.state.lock().unwrap();
        let record = sim
            .instances
            .get_mut(region)
            .and_then(|list| list.iter_mut().find(|i| i.id == id))
            .ok_or_else(|| ProviderError::Lookup(id.to_string()))?;
        record.state = NodeState::Terminated;
        Ok(())
    }

    fn set_tag(&self, region: &str, id: &str, key: &str, value: &str) -> ProviderResult<()> {
        let mut sim = self.state.lock().unwrap();
        let record = sim
            .instances
            .get_mut(region)
            .and_then(|list| list.iter_mut().find(|i| i.id == id))
            .ok_or_else(|| ProviderError::Lookup(id.to_string()))?;
        record.tags.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn security_group_names(&self, region: &str) -> ProviderResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .groups
            .get(region)
            .map(|groups| groups.iter().map(|g| g.name.clone()).collect())
            .unwrap_or_default())
    }

    fn create_security_group(
        &self,
        region: &str,
        name: &str,
        description: &str,
    ) -> ProviderResult<()> {
        let mut sim = self.state.lock().unwrap();
        sim.create_group_calls += 1;
        let groups = sim.groups.entry(region.to_string()).or_default();
        if groups.iter().any(|g| g.name == name) {
            return Err(ProviderError::Backend(format!(
                "security group '{name}' already exists"
            )));
        }
        groups.push(SecurityGroupRecord {
            name: name.to_string(),
            description: description.to_string(),
            rules: Vec::new(),
        });
        Ok(())
    }

    fn authorize_ingress(
        &self,
        region: &str,
        group: &str,
        protocol: Protocol,
        from_port: u16,
        to_port: u16,
        source: &IngressSource,
    ) -> ProviderResult<()> {
        let mut sim = self.state.lock().unwrap();
        let record = sim
            .groups
            .get_mut(region)
            .and_then(|groups| groups.iter_mut().find(|g| g.name == group))
            .ok_or_else(|| ProviderError::Lookup(group.to_string()))?;

        let rule = IngressRule {
            protocol,
            from_port,
            to_port,
            source: source.clone(),
        };
        if record.rules.contains(&rule) {
            return Err(ProviderError::Backend(format!(
                "rule {protocol} {from_port}-{to_port} already exists on '{group}'"
            )));
        }
        record.rules.push(rule);
        Ok(())
    }

    fn find_load_balancer(
        &self,
        region: &str,
        name: &str,
    ) -> ProviderResult<Option<LoadBalancerRecord>> {
        Ok(self.balancer(region, name))
    }

    fn create_load_balancer(
        &self,
        region: &str,
        spec: &LoadBalancerSpec,
    ) -> ProviderResult<LoadBalancerRecord> {
        let record = LoadBalancerRecord {
            name: spec.name.clone(),
            dns_name: format!("{}.{region}.elb.sim.example.com", spec.name),
            listeners: spec.listeners.clone(),
            health_check: None,
            zones: Vec::new(),
            instances: Vec::new(),
        };
        self.state
            .lock()
            .unwrap()
            .balancers
            .entry(region.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn configure_health_check(
        &self,
        region: &str,
        name: &str,
        check: &HealthCheck,
    ) -> ProviderResult<()> {
        let mut sim = self.state.lock().unwrap();
        let record = sim
            .balancers
            .get_mut(region)
            .and_then(|list| list.iter_mut().find(|b| b.name == name))
            .ok_or_else(|| ProviderError::Lookup(name.to_string()))?;
        record.health_check = Some(check.clone());
        Ok(())
    }

    fn register_instance(
        &self,
        region: &str,
        balancer: &str,
        zone: &str,
        instance_id: &str,
    ) -> ProviderResult<()> {
        let mut sim = self.state.lock().unwrap();
        let record = sim
            .balancers
            .get_mut(region)
            .and_then(|list| list.iter_mut().find(|b| b.name == balancer))
            .ok_or_else(|| ProviderError::Lookup(balancer.to_string()))?;
        if !record.zones.iter().any(|z| z == zone) {
            record.zones.push(zone.to_string());
        }
        if !record.instances.iter().any(|i| i == instance_id) {
            record.instances.push(instance_id.to_string());
        }
        Ok(())
    }

    fn deregister_instance(
        &self,
        region: &str,
        balancer: &str,
        instance_id: &str,
    ) -> ProviderResult<()> {
        let mut sim = self.state.lock().unwrap();
        let record = sim
            .balancers
            .get_mut(region)
            .and_then(|list| list.iter_mut().find(|b| b.name == balancer))
            .ok_or_else(|| ProviderError::Lookup(balancer.to_string()))?;
        record.instances.retain(|i| i != instance_id);
        Ok(())
    }
}
