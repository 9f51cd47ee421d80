//! Cloud `NodeProvider` and its node handles.

use std::collections::BTreeMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use drift_core::{
    Address, Connectivity, CredentialsMap, NodeDefinition, NodeState, NodeTags, ServicePorts,
    parse_services, serialize_services, ENV_DEF_NAME_TAG, ENV_NAME_TAG, SERVICES_TAG,
};
use driftgrid_provider::{
    CommandOutput, DefinitionTranslator, EnvironmentDescription, Location, NodePredicate,
    NodeProvider, NodeSummary, ProviderError, ProviderResult, RunningNode, TransportFactory,
};
use serde_yaml::Value;
use tracing::{info, warn};

use crate::api::{CloudApi, InstanceRecord, RunInstanceRequest};
use crate::security::SecurityGroups;

pub const CREDENTIALS_TAG: &str = "credentials_name";
pub const ADMIN_USER_TAG: &str = "admin_user";

/// Port probed to decide a booted instance is reachable.
const CONTROL_PORT: u16 = 22;

/// Reachability check against a booted instance.
pub trait ReadinessProbe: Send + Sync {
    fn ready(&self, host: &str, port: u16) -> bool;
}

/// TCP connect with a short timeout.
pub struct TcpProbe;

impl ReadinessProbe for TcpProbe {
    fn ready(&self, host: &str, port: u16) -> bool {
        let Ok(mut addrs) = (host, port).to_socket_addrs() else {
            return false;
        };
        addrs.any(|addr| TcpStream::connect_timeout(&addr, Duration::from_secs(2)).is_ok())
    }
}

/// Poll and settle intervals for readiness waiting.
#[derive(Debug, Clone, Copy)]
pub struct CloudTiming {
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub startup_timeout: Duration,
}

impl Default for CloudTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            settle_delay: Duration::from_secs(10),
            startup_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Clone)]
struct Admin {
    user: String,
    private_key: PathBuf,
}

/// Cloud backend over a `CloudApi` binding.
pub struct CloudNodeProvider {
    api: Arc<dyn CloudApi>,
    transports: Arc<dyn TransportFactory>,
    regions: Vec<String>,
    probe: Arc<dyn ReadinessProbe>,
    timing: CloudTiming,
}

impl CloudNodeProvider {
    pub fn new(api: Arc<dyn CloudApi>, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            api,
            transports,
            regions: vec!["us-east-1".to_string()],
            probe: Arc::new(TcpProbe),
            timing: CloudTiming::default(),
        }
    }

    pub fn with_regions(mut self, regions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.regions = regions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_timing(mut self, timing: CloudTiming) -> Self {
        self.timing = timing;
        self
    }

    fn node(&self, region: &str, record: InstanceRecord, admin: Option<Admin>) -> CloudNode {
        CloudNode {
            api: Arc::clone(&self.api),
            transports: Arc::clone(&self.transports),
            probe: Arc::clone(&self.probe),
            timing: self.timing,
            region: region.to_string(),
            admin,
            record: Mutex::new(record),
        }
    }

    fn resolve_admin(record: &InstanceRecord, all_credentials: &CredentialsMap) -> Option<Admin> {
        let name = record.tags.get(CREDENTIALS_TAG)?;
        let creds = all_credentials.get(name)?;
        Some(Admin {
            user: creds.login.clone(),
            private_key: creds.private_key_path(),
        })
    }
}

impl NodeProvider for CloudNodeProvider {
    fn list(
        &self,
        all_credentials: &CredentialsMap,
        predicate: &NodePredicate,
    ) -> ProviderResult<Vec<Box<dyn RunningNode>>> {
        let mut nodes: Vec<Box<dyn RunningNode>> = Vec::new();
        for region in &self.regions {
            for record in self.api.instances(region)? {
                if !record.tags.contains_key(ENV_DEF_NAME_TAG) {
                    warn!(id = %record.id, %region, "instance has no environment tags, skipping");
                    continue;
                }
                let admin = Self::resolve_admin(&record, all_credentials);
                let node = self.node(region, record, admin);
                if predicate(&node) {
                    nodes.push(Box::new(node));
                }
            }
        }
        Ok(nodes)
    }

    fn start(
        &self,
        definition: &NodeDefinition,
        env_name: &str,
        env_def_name: &str,
    ) -> ProviderResult<Box<dyn RunningNode>> {
        let NodeDefinition::Cloud(def) = definition else {
            return Err(ProviderError::Backend(format!(
                "cloud provider cannot start a '{}' node",
                definition.kind()
            )));
        };

        let groups = SecurityGroups::new(
            Arc::clone(&self.api),
            &def.region,
            env_name,
            env_def_name,
        );
        let mut security_groups = def.security_groups.clone();
        for service in &def.services {
            security_groups.push(groups.create_group_if_absent(service)?);
        }

        let mut record = self.api.run_instance(
            &def.region,
            &RunInstanceRequest {
                image_id: def.image_id.clone(),
                size: def.size.clone(),
                key_name: def.key_name.clone(),
                security_groups,
                availability_zone: def.availability_zone.clone(),
            },
        )?;
        info!(id = %record.id, region = %def.region, env = %env_name, "started instance");

        // Tag immediately so list sees the node mid-boot.
        let mut tags = vec![
            (ENV_NAME_TAG, env_name.to_string()),
            (ENV_DEF_NAME_TAG, env_def_name.to_string()),
            (SERVICES_TAG, serialize_services(&Default::default())?),
            (CREDENTIALS_TAG, def.credentials_name.clone()),
        ];
        if let Some(user) = &def.admin_user {
            tags.push((ADMIN_USER_TAG, user.clone()));
        }
        for (key, value) in tags {
            self.api.set_tag(&def.region, &record.id, key, &value)?;
            record.tags.insert(key.to_string(), value);
        }

        let admin = match (&def.admin_user, &def.private_key_path) {
            (Some(user), Some(key)) => Some(Admin {
                user: user.clone(),
                private_key: key.clone(),
            }),
            _ => None,
        };
        Ok(Box::new(self.node(&def.region, record, admin)))
    }

    fn shutdown(&self, identity: &str) -> ProviderResult<()> {
        for region in &self.regions {
            if self.api.instance(region, identity)?.is_some() {
                info!(id = %identity, %region, "terminating instance");
                return self.api.terminate_instance(region, identity);
            }
        }
        Err(ProviderError::Lookup(identity.to_string()))
    }

    fn validate(
        &self,
        env_name: &str,
        config: &Value,
        errors: &mut Vec<String>,
        _all_credentials: &CredentialsMap,
    ) {
        let Some(nodes) = config.get("nodes").and_then(Value::as_sequence) else {
            return;
        };
        for (i, node) in nodes.iter().enumerate() {
            let number = i + 1;
            if node.get("type").and_then(Value::as_str) != Some("cloud") {
                continue;
            }
            if let Some(region) = node.get("region").and_then(Value::as_str)
                && !self.regions.iter().any(|r| r == region)
            {
                errors.push(format!(
                    "Region '{region}' is not available for cloud node definition number {number} in '{env_name}' environment"
                ));
            }
        }
    }

    fn startup_timeout(&self) -> Duration {
        self.timing.startup_timeout
    }

    fn definition_translator(&self) -> Box<dyn DefinitionTranslator> {
        Box::new(CloudDefinitionTranslator)
    }

    fn running_environment(
        &self,
        env_name: &str,
        env_def_name: &str,
        _all_credentials: &CredentialsMap,
    ) -> ProviderResult<EnvironmentDescription> {
        let mut locations = Vec::new();
        for region in &self.regions {
            let mut summaries = Vec::new();
            for record in self.api.instances(region)? {
                if record.tags.get(ENV_NAME_TAG).map(String::as_str) != Some(env_name)
                    || record.tags.get(ENV_DEF_NAME_TAG).map(String::as_str)
                        != Some(env_def_name)
                    || record.state != NodeState::Running
                {
                    continue;
                }
                let services = record
                    .tags
                    .get(SERVICES_TAG)
                    .map(|raw| parse_services(raw))
                    .transpose()?
                    .unwrap_or_default();
                summaries.push(NodeSummary {
                    id: record.id.clone(),
                    dns_name: record.dns_name.clone(),
                    services: services.keys().cloned().collect(),
                    details: BTreeMap::from([
                        ("image".to_string(), record.image_id.clone()),
                        ("size".to_string(), record.size.clone()),
                        ("zone".to_string(), record.availability_zone.clone()),
                    ]),
                });
            }
            locations.push(Location {
                name: region.clone(),
                nodes: summaries,
            });
        }
        Ok(EnvironmentDescription {
            name: env_name.to_string(),
            locations,
        })
    }
}

/// One cloud instance. The cached record is refreshed before every
/// state or tag read.
pub struct CloudNode {
    api: Arc<dyn CloudApi>,
    transports: Arc<dyn TransportFactory>,
    probe: Arc<dyn ReadinessProbe>,
    timing: CloudTiming,
    region: String,
    admin: Option<Admin>,
    record: Mutex<InstanceRecord>,
}

impl CloudNode {
    fn refresh(&self) -> ProviderResult<InstanceRecord> {
        let id = self.record.lock().unwrap().id.clone();
        let fresh = self
            .api
            .instance(&self.region, &id)?
            .ok_or_else(|| ProviderError::Lookup(id))?;
        *self.record.lock().unwrap() = fresh.clone();
        Ok(fresh)
    }

    fn admin(&self) -> ProviderResult<&Admin> {
        self.admin.as_ref().ok_or_else(|| {
            ProviderError::Backend(format!(
                "no admin credentials resolved for node {}",
                self.record.lock().unwrap().id
            ))
        })
    }

    fn tags_from(record: &InstanceRecord) -> ProviderResult<NodeTags> {
        let services = record
            .tags
            .get(SERVICES_TAG)
            .map(|raw| parse_services(raw))
            .transpose()?
            .unwrap_or_default();
        let mut extra = record.tags.clone();
        extra.remove(ENV_NAME_TAG);
        extra.remove(ENV_DEF_NAME_TAG);
        extra.remove(SERVICES_TAG);
        Ok(NodeTags {
            env_name: record
                .tags
                .get(ENV_NAME_TAG)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string()),
            env_def_name: record
                .tags
                .get(ENV_DEF_NAME_TAG)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string()),
            services,
            extra,
        })
    }
}

impl RunningNode for CloudNode {
    fn id(&self) -> String {
        self.record.lock().unwrap().id.clone()
    }

    fn state(&self) -> ProviderResult<NodeState> {
        Ok(self.refresh()?.state)
    }

    fn tags(&self) -> ProviderResult<NodeTags> {
        Self::tags_from(&self.refresh()?)
    }

    fn address(&self) -> ProviderResult<Address> {
        let record = self.refresh()?;
        let tags = Self::tags_from(&record)?;
        Ok(Address::new(record.dns_name, tags.services))
    }

    fn run_command(&self, command: &str, warn_only: bool) -> ProviderResult<CommandOutput> {
        let admin = self.admin()?;
        let host = self.record.lock().unwrap().dns_name.clone();
        let transport = self
            .transports
            .connect(&host, &admin.user, &admin.private_key)?;
        let output = transport.run_command(command)?;
        if !output.success && !warn_only {
            return Err(ProviderError::Command {
                node: self.id(),
                command: command.to_string(),
                output: output.stdout,
            });
        }
        Ok(output)
    }

    fn upload_file(&self, local: &Path, destination: &str) -> ProviderResult<()> {
        let admin = self.admin()?;
        let host = self.record.lock().unwrap().dns_name.clone();
        self.transports
            .connect(&host, &admin.user, &admin.private_key)?
            .upload_file(local, destination)
    }

    fn add_service_to_tags(
        &self,
        service: &str,
        connectivity: &[Connectivity],
    ) -> ProviderResult<()> {
        let record = self.refresh()?;
        let tags = Self::tags_from(&record)?;

        let mut services = tags.services;
        let mapping: ServicePorts = Connectivity::all_ports(connectivity)
            .into_iter()
            .map(|p| (p, p))
            .collect();
        services.insert(service.to_string(), mapping);
        self.api.set_tag(
            &self.region,
            &record.id,
            SERVICES_TAG,
            &serialize_services(&services)?,
        )?;

        SecurityGroups::new(
            Arc::clone(&self.api),
            &self.region,
            &tags.env_name,
            &tags.env_def_name,
        )
        .open_ports(service, connectivity)
    }

    fn wait_for_ready(
        &self,
        callback: &mut dyn FnMut(),
        timeout: Duration,
    ) -> ProviderResult<()> {
        let started = Instant::now();
        loop {
            let record = self.refresh()?;
            if record.state == NodeState::Running
                && self.probe.ready(&record.dns_name, CONTROL_PORT)
            {
                // Sshd can flap right after boot; give it a moment.
                thread::sleep(self.timing.settle_delay);
                callback();
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(ProviderError::NotReady {
                    node: record.id,
                    timeout,
                });
            }
            thread::sleep(self.timing.poll_interval);
        }
    }

    fn matches_definition(&self, definition: &NodeDefinition) -> bool {
        let NodeDefinition::Cloud(def) = definition else {
            return false;
        };
        let Ok(record) = self.refresh() else {
            return false;
        };
        let Ok(tags) = Self::tags_from(&record) else {
            return false;
        };

        let mut installed: Vec<&String> = tags.services.keys().collect();
        installed.sort();
        let mut desired: Vec<&String> = def.services.iter().collect();
        desired.sort();

        record.image_id == def.image_id
            && record.size == def.size
            && self.region == def.region
            && tags.extra.get(CREDENTIALS_TAG) == Some(&def.credentials_name)
            && installed == desired
    }

    fn environment_name(&self) -> String {
        self.tags().map(|t| t.env_name).unwrap_or_else(|_| "Unknown".to_string())
    }

    fn environment_definition_name(&self) -> String {
        self.tags()
            .map(|t| t.env_def_name)
            .unwrap_or_else(|_| "Unknown".to_string())
    }
}

/// Renders static cloud definitions grouped by region.
struct CloudDefinitionTranslator;

impl DefinitionTranslator for CloudDefinitionTranslator {
    fn translate(
        &self,
        env_name: &str,
        definitions: &[NodeDefinition],
        _service_connectivity: &BTreeMap<String, Vec<Connectivity>>,
    ) -> EnvironmentDescription {
        let mut by_region: BTreeMap<String, Vec<NodeSummary>> = BTreeMap::new();
        for definition in definitions {
            let NodeDefinition::Cloud(def) = definition else {
                continue;
            };
            by_region.entry(def.region.clone()).or_default().push(NodeSummary {
                id: String::new(),
                dns_name: "(not provisioned)".to_string(),
                services: def.services.clone(),
                details: BTreeMap::from([
                    ("image".to_string(), def.image_id.clone()),
                    ("size".to_string(), def.size.clone()),
                ]),
            });
        }
        EnvironmentDescription {
            name: env_name.to_string(),
            locations: by_region
                .into_iter()
                .map(|(name, nodes)| Location { name, nodes })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use drift_core::{CloudNodeDefinition, PortSpec, Protocol};
    use driftgrid_provider::predicate;
    use driftgrid_provider::Transport;

    use super::*;
    use crate::sim::SimulatedCloud;

    struct AlwaysReady;
    impl ReadinessProbe for AlwaysReady {
        fn ready(&self, _host: &str, _port: u16) -> bool {
            true
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedTransports {
        commands: Arc<Mutex<Vec<String>>>,
    }

    struct ScriptedSession {
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for ScriptedSession {
        fn run_command(&self, command: &str) -> ProviderResult<CommandOutput> {
            self.commands.lock().unwrap().push(command.to_string());
            if command.contains("fail") {
                Ok(CommandOutput::failed("boom"))
            } else {
                Ok(CommandOutput::ok("done"))
            }
        }

        fn upload_file(&self, _local: &Path, _remote: &str) -> ProviderResult<()> {
            Ok(())
        }
    }

    impl TransportFactory for ScriptedTransports {
        fn connect(
            &self,
            _host: &str,
            _user: &str,
            _private_key: &Path,
        ) -> ProviderResult<Box<dyn Transport>> {
            Ok(Box::new(ScriptedSession {
                commands: Arc::clone(&self.commands),
            }))
        }
    }

    fn zero_timing() -> CloudTiming {
        CloudTiming {
            poll_interval: Duration::ZERO,
            settle_delay: Duration::ZERO,
            startup_timeout: Duration::ZERO,
        }
    }

    fn definition(services: &[&str]) -> NodeDefinition {
        NodeDefinition::Cloud(CloudNodeDefinition {
            image_id: "img-4dad7424".to_string(),
            size: "t1.micro".to_string(),
            credentials_name: "test".to_string(),
            region: "us-east-1".to_string(),
            services: services.iter().map(|s| s.to_string()).collect(),
            security_groups: vec![],
            key_name: "test".to_string(),
            availability_zone: None,
            admin_user: Some("ubuntu".to_string()),
            private_key_path: Some(PathBuf::from("/keys/test.pem")),
        })
    }

    fn provider(api: &Arc<SimulatedCloud>) -> CloudNodeProvider {
        CloudNodeProvider::new(
            Arc::clone(api) as Arc<dyn CloudApi>,
            Arc::new(ScriptedTransports::default()),
        )
        .with_probe(Arc::new(AlwaysReady))
        .with_timing(zero_timing())
    }

    fn connectivity(ports: &[u16]) -> Vec<Connectivity> {
        vec![Connectivity {
            protocol: Protocol::Tcp,
            ports: ports.iter().map(|p| PortSpec::Single(*p)).collect(),
            allowed: vec!["WORLD".to_string()],
        }]
    }

    #[test]
    fn start_tags_the_instance_with_environment_membership() {
        let api = Arc::new(SimulatedCloud::new());
        let node = provider(&api)
            .start(&definition(&["web"]), "dev", "three_tier")
            .unwrap();

        assert_eq!(node.environment_name(), "dev");
        assert_eq!(node.environment_definition_name(), "three_tier");
        assert!(node.get_services().unwrap().is_empty());
        assert!(api.group("us-east-1", "three_tier/dev/web").is_some());
    }

    #[test]
    fn list_skips_instances_without_environment_tags() {
        let api = Arc::new(SimulatedCloud::new());
        let provider = provider(&api);
        provider.start(&definition(&["web"]), "dev", "def").unwrap();
        api.seed_instance(
            "us-east-1",
            InstanceRecord {
                id: "i-stray".to_string(),
                state: NodeState::Running,
                dns_name: "stray.example.com".to_string(),
                image_id: "img-x".to_string(),
                size: "t1.micro".to_string(),
                availability_zone: "us-east-1a".to_string(),
                tags: BTreeMap::new(),
            },
        );

        let nodes = provider
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn shutdown_terminates_and_unknown_identity_is_lookup() {
        let api = Arc::new(SimulatedCloud::new());
        let provider = provider(&api);
        let node = provider.start(&definition(&["web"]), "dev", "def").unwrap();

        provider.shutdown(&node.id()).unwrap();
        assert_eq!(node.state().unwrap(), NodeState::Terminated);
        assert!(matches!(
            provider.shutdown("i-nope"),
            Err(ProviderError::Lookup(_))
        ));
    }

    #[test]
    fn tagging_a_service_round_trips_and_opens_ports() {
        let api = Arc::new(SimulatedCloud::new());
        let node = provider(&api)
            .start(&definition(&["web"]), "dev", "three_tier")
            .unwrap();

        node.add_service_to_tags("web", &connectivity(&[80])).unwrap();

        assert_eq!(
            node.get_services().unwrap()["web"],
            ServicePorts::from([(80, 80)])
        );
        let group = api.group("us-east-1", "three_tier/dev/web").unwrap();
        assert_eq!(group.rules.len(), 1);
        assert_eq!(node.address().unwrap().ports("web"), vec![80]);
    }

    #[test]
    fn matches_definition_needs_image_size_credentials_and_services() {
        let api = Arc::new(SimulatedCloud::new());
        let node = provider(&api)
            .start(&definition(&["web"]), "dev", "def")
            .unwrap();
        node.add_service_to_tags("web", &connectivity(&[80])).unwrap();

        assert!(node.matches_definition(&definition(&["web"])));
        assert!(!node.matches_definition(&definition(&["web", "db"])));

        let NodeDefinition::Cloud(mut other) = definition(&["web"]) else {
            unreachable!();
        };
        other.size = "m1.large".to_string();
        assert!(!node.matches_definition(&NodeDefinition::Cloud(other)));
    }

    #[test]
    fn wait_for_ready_fires_callback_once_when_running() {
        let api = Arc::new(SimulatedCloud::new());
        let node = provider(&api)
            .start(&definition(&["web"]), "dev", "def")
            .unwrap();

        let mut calls = 0;
        node.wait_for_ready(&mut || calls += 1, Duration::from_secs(1)).unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn wait_for_ready_times_out_on_pending_instances() {
        let api = Arc::new(SimulatedCloud::new());
        let node = provider(&api)
            .start(&definition(&["web"]), "dev", "def")
            .unwrap();
        api.set_instance_state("us-east-1", &node.id(), NodeState::Pending);

        let err = node.wait_for_ready(&mut || {}, Duration::ZERO).unwrap_err();
        assert!(matches!(err, ProviderError::NotReady { .. }));
    }

    #[test]
    fn failed_command_propagates_unless_warn_only() {
        let api = Arc::new(SimulatedCloud::new());
        let transports = ScriptedTransports::default();
        let provider = CloudNodeProvider::new(
            Arc::clone(&api) as Arc<dyn CloudApi>,
            Arc::new(transports.clone()),
        )
        .with_probe(Arc::new(AlwaysReady))
        .with_timing(zero_timing());
        let node = provider.start(&definition(&["web"]), "dev", "def").unwrap();

        assert!(node.run_command("echo hi", false).unwrap().success);
        assert!(matches!(
            node.run_command("fail now", false),
            Err(ProviderError::Command { .. })
        ));
        assert!(!node.run_command("fail now", true).unwrap().success);
        assert_eq!(transports.commands.lock().unwrap().len(), 3);
    }

    #[test]
    fn validate_rejects_unavailable_regions() {
        let api = Arc::new(SimulatedCloud::new());
        let provider = provider(&api);
        let config: Value = serde_yaml::from_str(
            r#"
            nodes:
              - type: cloud
                region: mars-north-1
              - type: file
            "#,
        )
        .unwrap();

        let mut errors = Vec::new();
        provider.validate("dev", &config, &mut errors, &CredentialsMap::new());
        assert_eq!(
            errors,
            vec![
                "Region 'mars-north-1' is not available for cloud node definition number 1 in 'dev' environment"
            ]
        );
    }

    #[test]
    fn running_environment_groups_by_region() {
        let api = Arc::new(SimulatedCloud::new());
        let provider = provider(&api);
        provider.start(&definition(&["web"]), "dev", "def").unwrap();
        provider.start(&definition(&["web"]), "prod", "def").unwrap();

        let description = provider
            .running_environment("dev", "def", &CredentialsMap::new())
            .unwrap();
        assert_eq!(description.locations.len(), 1);
        assert_eq!(description.locations[0].name, "us-east-1");
        assert_eq!(description.locations[0].nodes.len(), 1);
        assert_eq!(description.locations[0].nodes[0].details["size"], "t1.micro");
    }
}
