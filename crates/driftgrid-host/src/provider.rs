//! Container-host `NodeProvider` and its node handles.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use drift_core::{
    Address, Connectivity, CredentialsMap, NodeDefinition, NodeState, NodeTags, ServicePorts,
};
use driftgrid_provider::{
    CommandOutput, DefinitionTranslator, EnvironmentDescription, Location, NodePredicate,
    NodeProvider, NodeSummary, ProviderError, ProviderResult, RunningNode, Transport,
};
use serde_yaml::Value;
use tracing::{debug, info, warn};

use crate::shell::{FIRST_FORWARDED_PORT, HostShell, PortAssignments};

/// Tag under which the container's build template is recorded.
pub const TEMPLATE_TAG: &str = "template";

#[derive(Debug, Clone, Copy)]
pub struct HostTiming {
    pub poll_interval: Duration,
    pub startup_timeout: Duration,
}

impl Default for HostTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            startup_timeout: Duration::from_secs(120),
        }
    }
}

/// Backend managing lxc containers on one host reached over a
/// transport session.
pub struct HostNodeProvider {
    shell: HostShell,
    /// The container host's own address; forwarded service ports are
    /// reachable there, not on the containers directly.
    host_name: String,
    timing: HostTiming,
}

impl HostNodeProvider {
    pub fn new(transport: Arc<dyn Transport>, host_name: impl Into<String>) -> Self {
        Self {
            shell: HostShell::new(transport),
            host_name: host_name.into(),
            timing: HostTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: HostTiming) -> Self {
        self.timing = timing;
        self
    }

    fn node(&self, name: String) -> HostNode {
        HostNode {
            shell: self.shell.clone(),
            host_name: self.host_name.clone(),
            timing: self.timing,
            name,
        }
    }

    fn next_container_name(&self, env_name: &str, env_def_name: &str) -> ProviderResult<String> {
        let prefix = format!("{env_name}-{env_def_name}-");
        let highest = self
            .shell
            .containers()?
            .iter()
            .filter_map(|name| name.strip_prefix(&prefix))
            .filter_map(|suffix| suffix.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Ok(format!("{prefix}{}", highest + 1))
    }
}

impl NodeProvider for HostNodeProvider {
    fn list(
        &self,
        _all_credentials: &CredentialsMap,
        predicate: &NodePredicate,
    ) -> ProviderResult<Vec<Box<dyn RunningNode>>> {
        let mut nodes: Vec<Box<dyn RunningNode>> = Vec::new();
        for name in self.shell.containers()? {
            if self.shell.read_tags(&name).is_err() {
                warn!(container = %name, "container has no tag file, skipping");
                continue;
            }
            let node = self.node(name);
            if predicate(&node) {
                nodes.push(Box::new(node));
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
        let NodeDefinition::Host(def) = definition else {
            return Err(ProviderError::Backend(format!(
                "host provider cannot start a '{}' node",
                definition.kind()
            )));
        };

        let name = self.next_container_name(env_name, env_def_name)?;
        info!(container = %name, template = %def.template, "creating container");
        self.shell.create_container(&def.template, &name)?;
        self.shell.write_tags(
            &name,
            &NodeTags::for_new_node(env_name, env_def_name)
                .with_extra(TEMPLATE_TAG, &def.template),
        )?;
        Ok(Box::new(self.node(name)))
    }

    fn shutdown(&self, identity: &str) -> ProviderResult<()> {
        if !self.shell.containers()?.iter().any(|name| name == identity) {
            return Err(ProviderError::Lookup(identity.to_string()));
        }
        info!(container = %identity, "destroying container");
        self.shell.destroy_container(identity)
    }

    fn validate(
        &self,
        _env_name: &str,
        _config: &Value,
        _errors: &mut Vec<String>,
        _all_credentials: &CredentialsMap,
    ) {
        // Template and service checks happen at definition level.
    }

    fn startup_timeout(&self) -> Duration {
        self.timing.startup_timeout
    }

    fn definition_translator(&self) -> Box<dyn DefinitionTranslator> {
        Box::new(HostDefinitionTranslator {
            host_name: self.host_name.clone(),
        })
    }

    fn running_environment(
        &self,
        env_name: &str,
        env_def_name: &str,
        all_credentials: &CredentialsMap,
    ) -> ProviderResult<EnvironmentDescription> {
        let predicate = driftgrid_provider::predicate::running_in_env(env_name, env_def_name);
        let nodes = self.list(all_credentials, &predicate)?;

        let mut summaries = Vec::new();
        for node in &nodes {
            let tags = node.tags()?;
            summaries.push(NodeSummary {
                id: node.id(),
                dns_name: self.host_name.clone(),
                services: tags.services.keys().cloned().collect(),
                details: tags.extra.clone(),
            });
        }
        Ok(EnvironmentDescription {
            name: env_name.to_string(),
            locations: vec![Location {
                name: self.host_name.clone(),
                nodes: summaries,
            }],
        })
    }
}

/// One container. All observations go through the host shell; the tag
/// file is the durable metadata store.
pub struct HostNode {
    shell: HostShell,
    host_name: String,
    timing: HostTiming,
    name: String,
}

impl HostNode {
    fn staged_upload_path(&self) -> String {
        format!("/tmp/driftgrid-{}-upload", self.name)
    }

    fn next_free_port(assignments: &PortAssignments) -> u16 {
        assignments
            .keys()
            .max()
            .map(|p| p + 1)
            .unwrap_or(FIRST_FORWARDED_PORT)
    }
}

impl RunningNode for HostNode {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn state(&self) -> ProviderResult<NodeState> {
        self.shell.container_state(&self.name)
    }

    fn tags(&self) -> ProviderResult<NodeTags> {
        self.shell.read_tags(&self.name)
    }

    fn address(&self) -> ProviderResult<Address> {
        Ok(Address::new(self.host_name.clone(), self.tags()?.services))
    }

    fn run_command(&self, command: &str, warn_only: bool) -> ProviderResult<CommandOutput> {
        let output = self.shell.attach(&self.name, command)?;
        if !output.success && !warn_only {
            return Err(ProviderError::Command {
                node: self.name.clone(),
                command: command.to_string(),
                output: output.stdout,
            });
        }
        Ok(output)
    }

    fn upload_file(&self, local: &Path, destination: &str) -> ProviderResult<()> {
        let staged = self.staged_upload_path();
        self.shell.transport().upload_file(local, &staged)?;
        self.shell.transport().run_command(&format!(
            "cp {staged} /var/lib/lxc/{}/rootfs{destination}",
            self.name
        ))?;
        Ok(())
    }

    fn add_service_to_tags(
        &self,
        service: &str,
        connectivity: &[Connectivity],
    ) -> ProviderResult<()> {
        let mut tags = self.tags()?;
        if tags.services.contains_key(service) {
            debug!(container = %self.name, %service, "service already tagged");
            return Ok(());
        }

        let ip = self.shell.container_ip(&self.name)?;
        let mut assignments = self.shell.port_assignments()?;
        let mut mapping = ServicePorts::new();
        for container_port in Connectivity::all_ports(connectivity) {
            let host_port = Self::next_free_port(&assignments);
            self.shell.forward_port(&ip, host_port, container_port)?;
            assignments.insert(host_port, format!("{}:{container_port}", self.name));
            mapping.insert(container_port, host_port);
        }
        self.shell.write_port_assignments(&assignments)?;

        tags.services.insert(service.to_string(), mapping);
        self.shell.write_tags(&self.name, &tags)
    }

    fn wait_for_ready(
        &self,
        callback: &mut dyn FnMut(),
        timeout: Duration,
    ) -> ProviderResult<()> {
        let started = Instant::now();
        loop {
            let running = matches!(self.state(), Ok(NodeState::Running));
            let reachable = running
                && match self.shell.container_ip(&self.name) {
                    Ok(ip) => self.shell.ping(&ip),
                    Err(_) => false,
                };
            if reachable {
                callback();
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(ProviderError::NotReady {
                    node: self.name.clone(),
                    timeout,
                });
            }
            thread::sleep(self.timing.poll_interval);
        }
    }

    fn matches_definition(&self, definition: &NodeDefinition) -> bool {
        let NodeDefinition::Host(def) = definition else {
            return false;
        };
        let Ok(tags) = self.tags() else {
            return false;
        };

        let mut installed: Vec<&String> = tags.services.keys().collect();
        installed.sort();
        let mut desired: Vec<&String> = def.services.iter().collect();
        desired.sort();

        tags.extra.get(TEMPLATE_TAG) == Some(&def.template) && installed == desired
    }

    fn environment_name(&self) -> String {
        self.tags()
            .map(|t| t.env_name)
            .unwrap_or_else(|_| "Unknown".to_string())
    }

    fn environment_definition_name(&self) -> String {
        self.tags()
            .map(|t| t.env_def_name)
            .unwrap_or_else(|_| "Unknown".to_string())
    }
}

struct HostDefinitionTranslator {
    host_name: String,
}

impl DefinitionTranslator for HostDefinitionTranslator {
    fn translate(
        &self,
        env_name: &str,
        definitions: &[NodeDefinition],
        _service_connectivity: &BTreeMap<String, Vec<Connectivity>>,
    ) -> EnvironmentDescription {
        let nodes = definitions
            .iter()
            .filter_map(|definition| {
                let NodeDefinition::Host(def) = definition else {
                    return None;
                };
                Some(NodeSummary {
                    id: String::new(),
                    dns_name: self.host_name.clone(),
                    services: def.services.clone(),
                    details: BTreeMap::from([(
                        TEMPLATE_TAG.to_string(),
                        def.template.clone(),
                    )]),
                })
            })
            .collect();
        EnvironmentDescription {
            name: env_name.to_string(),
            locations: vec![Location {
                name: self.host_name.clone(),
                nodes,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use drift_core::{HostNodeDefinition, PortSpec, Protocol};
    use driftgrid_provider::predicate;

    use super::*;
    use crate::shell::TAG_DIR;

    #[derive(Default)]
    struct FakeHostState {
        containers: BTreeMap<String, String>, // name → state
        ips: BTreeMap<String, String>,
        files: BTreeMap<String, String>,
        iptables: Vec<String>,
        attached: Vec<String>,
        next_ip: u8,
    }

    /// Emulates the lxc tooling the shell drives.
    #[derive(Default)]
    struct FakeHost {
        state: Mutex<FakeHostState>,
    }

    impl Transport for FakeHost {
        fn run_command(&self, command: &str) -> ProviderResult<CommandOutput> {
            let mut host = self.state.lock().unwrap();

            if command == "lxc-ls -1" {
                let names: Vec<&str> =
                    host.containers.keys().map(String::as_str).collect();
                return Ok(CommandOutput::ok(names.join("\n")));
            }
            if let Some(name) = command.strip_prefix("lxc-info -sn ") {
                return match host.containers.get(name) {
                    Some(state) => Ok(CommandOutput::ok(format!("State: {state}"))),
                    None => Ok(CommandOutput::failed("not found")),
                };
            }
            if let Some(name) = command.strip_prefix("lxc-info -in ") {
                return match host.ips.get(name) {
                    Some(ip) => Ok(CommandOutput::ok(format!("IP: {ip}"))),
                    None => Ok(CommandOutput::failed("not found")),
                };
            }
            if let Some(rest) = command.strip_prefix("lxc-create -t ") {
                let name = rest.split(" -n ").nth(1).unwrap().to_string();
                host.next_ip += 1;
                let ip = format!("10.0.3.{}", host.next_ip);
                host.containers.insert(name.clone(), "STOPPED".to_string());
                host.ips.insert(name, ip);
                return Ok(CommandOutput::ok(""));
            }
            if let Some(name) = command.strip_prefix("lxc-start -dn ") {
                host.containers
                    .insert(name.to_string(), "RUNNING".to_string());
                return Ok(CommandOutput::ok(""));
            }
            if let Some(name) = command.strip_prefix("lxc-stop -n ") {
                host.containers
                    .insert(name.to_string(), "STOPPED".to_string());
                return Ok(CommandOutput::ok(""));
            }
            if let Some(name) = command.strip_prefix("lxc-destroy -n ") {
                host.containers.remove(name);
                host.ips.remove(name);
                return Ok(CommandOutput::ok(""));
            }
            if let Some(path) = command.strip_prefix("rm -f ") {
                host.files.remove(path);
                return Ok(CommandOutput::ok(""));
            }
            if command.contains("cat > ") {
                let path = command
                    .split("cat > ")
                    .nth(1)
                    .unwrap()
                    .split(" <<'EOF'")
                    .next()
                    .unwrap()
                    .to_string();
                let body = command
                    .split("<<'EOF'\n")
                    .nth(1)
                    .unwrap()
                    .trim_end_matches("EOF")
                    .to_string();
                host.files.insert(path, body);
                return Ok(CommandOutput::ok(""));
            }
            if let Some(path) = command.strip_prefix("cat ") {
                return match host.files.get(path) {
                    Some(body) => Ok(CommandOutput::ok(body.clone())),
                    None => Ok(CommandOutput::failed("no such file")),
                };
            }
            if command.starts_with("iptables ") {
                host.iptables.push(command.to_string());
                return Ok(CommandOutput::ok(""));
            }
            if command.starts_with("ping ") {
                return Ok(CommandOutput::ok(""));
            }
            if command.starts_with("lxc-attach ") {
                host.attached.push(command.to_string());
                if command.contains("exit 1") {
                    return Ok(CommandOutput::failed("nonzero exit"));
                }
                return Ok(CommandOutput::ok("attached"));
            }
            if command.starts_with("cp ") {
                return Ok(CommandOutput::ok(""));
            }
            Ok(CommandOutput::failed(format!("unhandled: {command}")))
        }

        fn upload_file(&self, _local: &Path, remote: &str) -> ProviderResult<()> {
            self.state
                .lock()
                .unwrap()
                .files
                .insert(remote.to_string(), "<uploaded>".to_string());
            Ok(())
        }
    }

    fn definition(template: &str, services: &[&str]) -> NodeDefinition {
        NodeDefinition::Host(HostNodeDefinition {
            template: template.to_string(),
            services: services.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn connectivity(ports: &[u16]) -> Vec<Connectivity> {
        vec![Connectivity {
            protocol: Protocol::Tcp,
            ports: ports.iter().map(|p| PortSpec::Single(*p)).collect(),
            allowed: vec![],
        }]
    }

    fn provider() -> (Arc<FakeHost>, HostNodeProvider) {
        let host = Arc::new(FakeHost::default());
        let provider = HostNodeProvider::new(
            Arc::clone(&host) as Arc<dyn Transport>,
            "lxc-host.example.com",
        )
        .with_timing(HostTiming {
            poll_interval: Duration::ZERO,
            startup_timeout: Duration::ZERO,
        });
        (host, provider)
    }

    #[test]
    fn start_creates_a_tagged_running_container() {
        let (host, provider) = provider();
        let node = provider
            .start(&definition("ubuntu", &["apache"]), "dev", "lxc_env")
            .unwrap();

        assert_eq!(node.id(), "dev-lxc_env-1");
        assert_eq!(node.state().unwrap(), NodeState::Running);
        assert_eq!(node.environment_name(), "dev");
        assert!(
            host.state
                .lock()
                .unwrap()
                .files
                .contains_key(&format!("{TAG_DIR}/dev-lxc_env-1.yml"))
        );
    }

    #[test]
    fn container_names_count_upward_per_environment() {
        let (_host, provider) = provider();
        let def = definition("ubuntu", &["a"]);
        assert_eq!(provider.start(&def, "dev", "e").unwrap().id(), "dev-e-1");
        assert_eq!(provider.start(&def, "dev", "e").unwrap().id(), "dev-e-2");
        assert_eq!(provider.start(&def, "prod", "e").unwrap().id(), "prod-e-1");
    }

    #[test]
    fn list_skips_containers_without_tag_files() {
        let (host, provider) = provider();
        provider
            .start(&definition("ubuntu", &["a"]), "dev", "e")
            .unwrap();
        {
            let mut state = host.state.lock().unwrap();
            state.containers.insert("stray".to_string(), "RUNNING".to_string());
        }

        let nodes = provider
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn shutdown_destroys_and_unknown_identity_is_lookup() {
        let (host, provider) = provider();
        let node = provider
            .start(&definition("ubuntu", &["a"]), "dev", "e")
            .unwrap();

        provider.shutdown(&node.id()).unwrap();
        assert!(host.state.lock().unwrap().containers.is_empty());
        assert!(matches!(
            provider.shutdown("dev-e-1"),
            Err(ProviderError::Lookup(_))
        ));
    }

    #[test]
    fn tagging_forwards_ports_from_the_reserved_range() {
        let (host, provider) = provider();
        let node = provider
            .start(&definition("ubuntu", &["web"]), "dev", "e")
            .unwrap();

        node.add_service_to_tags("web", &connectivity(&[80, 443])).unwrap();

        let services = node.get_services().unwrap();
        assert_eq!(
            services["web"],
            ServicePorts::from([(80, 50000), (443, 50001)])
        );
        let rules = host.state.lock().unwrap().iptables.clone();
        // external, bridge, and local rules per forwarded port
        assert_eq!(rules.len(), 6);
        assert!(rules[0].contains("--dport 50000"));

        let address = node.address().unwrap();
        assert_eq!(address.host, "lxc-host.example.com");
        assert_eq!(address.ports("web"), vec![50000, 50001]);
    }

    #[test]
    fn tagging_twice_is_a_no_op() {
        let (host, provider) = provider();
        let node = provider
            .start(&definition("ubuntu", &["web"]), "dev", "e")
            .unwrap();

        node.add_service_to_tags("web", &connectivity(&[80])).unwrap();
        node.add_service_to_tags("web", &connectivity(&[80])).unwrap();

        assert_eq!(host.state.lock().unwrap().iptables.len(), 3);
        assert_eq!(node.get_services().unwrap()["web"], ServicePorts::from([(80, 50000)]));
    }

    #[test]
    fn port_allocation_continues_across_containers() {
        let (_host, provider) = provider();
        let first = provider
            .start(&definition("ubuntu", &["web"]), "dev", "e")
            .unwrap();
        let second = provider
            .start(&definition("ubuntu", &["db"]), "dev", "e")
            .unwrap();

        first.add_service_to_tags("web", &connectivity(&[80])).unwrap();
        second.add_service_to_tags("db", &connectivity(&[5432])).unwrap();

        assert_eq!(second.get_services().unwrap()["db"], ServicePorts::from([(5432, 50001)]));
    }

    #[test]
    fn matches_definition_compares_template_and_services() {
        let (_host, provider) = provider();
        let node = provider
            .start(&definition("ubuntu", &["web"]), "dev", "e")
            .unwrap();
        node.add_service_to_tags("web", &connectivity(&[80])).unwrap();

        assert!(node.matches_definition(&definition("ubuntu", &["web"])));
        assert!(!node.matches_definition(&definition("debian", &["web"])));
        assert!(!node.matches_definition(&definition("ubuntu", &["web", "db"])));
    }

    #[test]
    fn failed_attach_propagates_unless_warn_only() {
        let (_host, provider) = provider();
        let node = provider
            .start(&definition("ubuntu", &["web"]), "dev", "e")
            .unwrap();

        assert!(node.run_command("echo hi", false).unwrap().success);
        assert!(matches!(
            node.run_command("exit 1", false),
            Err(ProviderError::Command { .. })
        ));
        assert!(!node.run_command("exit 1", true).unwrap().success);
    }

    #[test]
    fn wait_for_ready_pings_the_container() {
        let (_host, provider) = provider();
        let node = provider
            .start(&definition("ubuntu", &["web"]), "dev", "e")
            .unwrap();

        let mut calls = 0;
        node.wait_for_ready(&mut || calls += 1, Duration::from_secs(1)).unwrap();
        assert_eq!(calls, 1);
    }
}
