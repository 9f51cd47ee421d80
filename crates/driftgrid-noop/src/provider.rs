//! The dry-run decorator.
//!
//! Wraps any `NodeProvider` behind the same interface. Reads pass
//! through to the wrapped backend; every mutating call is recorded in
//! the action log and answered with a synthetic result, so an entire
//! convergence can be simulated without the backend changing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use drift_core::{
    Address, Connectivity, CredentialsMap, NodeDefinition, NodeState, NodeTags, ServiceMap,
    ServicePorts,
};
use driftgrid_provider::{
    CommandOutput, DefinitionTranslator, EnvironmentDescription, NodePredicate, NodeProvider,
    ProviderResult, RunningNode,
};
use tracing::debug;

use crate::actions::{Action, ActionLog};

#[derive(Default)]
struct NoopState {
    log: ActionLog,
    /// Identities shut down through the decorator. The backend still
    /// has them; `list` hides them.
    terminated: BTreeSet<String>,
    /// Service tags applied through the decorator, layered over the
    /// backend's real tags so a simulated pass sees its own tagging.
    tag_overlay: BTreeMap<String, ServiceMap>,
    synthetic: Vec<SyntheticSpec>,
    next_id: u32,
}

#[derive(Clone)]
struct SyntheticSpec {
    id: String,
    env: String,
    env_def_name: String,
    definition: NodeDefinition,
}

/// Cloneable view onto a decorator's recorded plan. Lets callers keep
/// reading the log after the provider itself has been boxed away.
#[derive(Clone)]
pub struct PlanHandle {
    state: Arc<Mutex<NoopState>>,
}

impl PlanHandle {
    pub fn render(&self) -> String {
        self.state.lock().unwrap().log.render()
    }

    pub fn actions_recorded(&self) -> usize {
        self.state.lock().unwrap().log.len()
    }
}

/// Dry-run decorator around any backend.
pub struct NoopNodeProvider {
    inner: Box<dyn NodeProvider>,
    state: Arc<Mutex<NoopState>>,
}

impl NoopNodeProvider {
    pub fn new(inner: Box<dyn NodeProvider>) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(NoopState::default())),
        }
    }

    pub fn plan(&self) -> PlanHandle {
        PlanHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// The recorded plan, grouped by node identity in first-seen order.
    pub fn noop_actions_string(&self) -> String {
        self.state.lock().unwrap().log.render()
    }

    pub fn actions_recorded(&self) -> usize {
        self.state.lock().unwrap().log.len()
    }

    fn record(&self, node_id: &str, action: Action) {
        self.state.lock().unwrap().log.record(node_id, action);
    }
}

impl NodeProvider for NoopNodeProvider {
    fn list(
        &self,
        all_credentials: &CredentialsMap,
        predicate: &NodePredicate,
    ) -> ProviderResult<Vec<Box<dyn RunningNode>>> {
        let mut nodes: Vec<Box<dyn RunningNode>> = Vec::new();

        for inner in self.inner.list(all_credentials, predicate)? {
            if self.state.lock().unwrap().terminated.contains(&inner.id()) {
                continue;
            }
            nodes.push(Box::new(WrappedNode {
                inner,
                state: Arc::clone(&self.state),
            }));
        }

        let synthetic: Vec<SyntheticSpec> = self.state.lock().unwrap().synthetic.clone();
        for spec in synthetic {
            if self.state.lock().unwrap().terminated.contains(&spec.id) {
                continue;
            }
            let node = SyntheticNode {
                spec,
                state: Arc::clone(&self.state),
            };
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
        let spec = {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let spec = SyntheticSpec {
                id: format!("sim-node-{}", state.next_id),
                env: env_name.to_string(),
                env_def_name: env_def_name.to_string(),
                definition: definition.clone(),
            };
            state.synthetic.push(spec.clone());
            state.log.record(
                &spec.id,
                Action::Start {
                    kind: definition.kind().to_string(),
                    services: definition.services().to_vec(),
                },
            );
            spec
        };
        debug!(id = %spec.id, "simulated node start");

        Ok(Box::new(SyntheticNode {
            spec,
            state: Arc::clone(&self.state),
        }))
    }

    fn shutdown(&self, identity: &str) -> ProviderResult<()> {
        self.record(identity, Action::Shutdown);
        self.state
            .lock()
            .unwrap()
            .terminated
            .insert(identity.to_string());
        Ok(())
    }

    // Validation is a pure static check, safe to run for real.
    fn validate(
        &self,
        env_name: &str,
        config: &serde_yaml::Value,
        errors: &mut Vec<String>,
        all_credentials: &CredentialsMap,
    ) {
        self.inner.validate(env_name, config, errors, all_credentials);
    }

    fn startup_timeout(&self) -> Duration {
        Duration::ZERO
    }

    fn definition_translator(&self) -> Box<dyn DefinitionTranslator> {
        self.inner.definition_translator()
    }

    fn running_environment(
        &self,
        env_name: &str,
        env_def_name: &str,
        all_credentials: &CredentialsMap,
    ) -> ProviderResult<EnvironmentDescription> {
        self.inner
            .running_environment(env_name, env_def_name, all_credentials)
    }
}

fn overlay_for(state: &Mutex<NoopState>, id: &str) -> ServiceMap {
    state
        .lock()
        .unwrap()
        .tag_overlay
        .get(id)
        .cloned()
        .unwrap_or_default()
}

fn record_tagging(
    state: &Mutex<NoopState>,
    id: &str,
    service: &str,
    connectivity: &[Connectivity],
) {
    let ports = Connectivity::all_ports(connectivity);
    let mut state = state.lock().unwrap();
    state.log.record(
        id,
        Action::TagService {
            service: service.to_string(),
            ports: ports.clone(),
        },
    );
    let mapping: ServicePorts = ports.iter().map(|p| (*p, *p)).collect();
    state
        .tag_overlay
        .entry(id.to_string())
        .or_default()
        .insert(service.to_string(), mapping);
}

/// A real backend node seen through the decorator.
struct WrappedNode {
    inner: Box<dyn RunningNode>,
    state: Arc<Mutex<NoopState>>,
}

impl RunningNode for WrappedNode {
    fn id(&self) -> String {
        self.inner.id()
    }

    fn state(&self) -> ProviderResult<NodeState> {
        self.inner.state()
    }

    fn tags(&self) -> ProviderResult<NodeTags> {
        let mut tags = self.inner.tags()?;
        for (service, ports) in overlay_for(&self.state, &self.inner.id()) {
            tags.services.insert(service, ports);
        }
        Ok(tags)
    }

    fn address(&self) -> ProviderResult<Address> {
        self.inner.address()
    }

    fn run_command(&self, command: &str, _warn_only: bool) -> ProviderResult<CommandOutput> {
        self.state.lock().unwrap().log.record(
            self.inner.id(),
            Action::RunCommand {
                command: command.to_string(),
            },
        );
        Ok(CommandOutput::ok(""))
    }

    fn upload_file(&self, local: &Path, destination: &str) -> ProviderResult<()> {
        self.state.lock().unwrap().log.record(
            self.inner.id(),
            Action::UploadFile {
                local: local.display().to_string(),
                destination: destination.to_string(),
            },
        );
        Ok(())
    }

    fn add_service_to_tags(
        &self,
        service: &str,
        connectivity: &[Connectivity],
    ) -> ProviderResult<()> {
        record_tagging(&self.state, &self.inner.id(), service, connectivity);
        Ok(())
    }

    fn wait_for_ready(
        &self,
        callback: &mut dyn FnMut(),
        _timeout: Duration,
    ) -> ProviderResult<()> {
        // Already running for real; nothing to poll for.
        callback();
        Ok(())
    }

    fn matches_definition(&self, definition: &NodeDefinition) -> bool {
        self.inner.matches_definition(definition)
    }

    fn environment_name(&self) -> String {
        self.inner.environment_name()
    }

    fn environment_definition_name(&self) -> String {
        self.inner.environment_definition_name()
    }
}

/// A node that exists only in the decorator's log.
struct SyntheticNode {
    spec: SyntheticSpec,
    state: Arc<Mutex<NoopState>>,
}

impl RunningNode for SyntheticNode {
    fn id(&self) -> String {
        self.spec.id.clone()
    }

    fn state(&self) -> ProviderResult<NodeState> {
        Ok(NodeState::Running)
    }

    fn tags(&self) -> ProviderResult<NodeTags> {
        let mut tags = NodeTags::for_new_node(&self.spec.env, &self.spec.env_def_name);
        tags.services = overlay_for(&self.state, &self.spec.id);
        Ok(tags)
    }

    fn address(&self) -> ProviderResult<Address> {
        Ok(Address::new(
            self.spec.id.clone(),
            overlay_for(&self.state, &self.spec.id),
        ))
    }

    fn run_command(&self, command: &str, _warn_only: bool) -> ProviderResult<CommandOutput> {
        self.state.lock().unwrap().log.record(
            &self.spec.id,
            Action::RunCommand {
                command: command.to_string(),
            },
        );
        Ok(CommandOutput::ok(""))
    }

    fn upload_file(&self, local: &Path, destination: &str) -> ProviderResult<()> {
        self.state.lock().unwrap().log.record(
            &self.spec.id,
            Action::UploadFile {
                local: local.display().to_string(),
                destination: destination.to_string(),
            },
        );
        Ok(())
    }

    fn add_service_to_tags(
        &self,
        service: &str,
        connectivity: &[Connectivity],
    ) -> ProviderResult<()> {
        record_tagging(&self.state, &self.spec.id, service, connectivity);
        Ok(())
    }

    fn wait_for_ready(
        &self,
        callback: &mut dyn FnMut(),
        _timeout: Duration,
    ) -> ProviderResult<()> {
        // Nothing was actually started, so nothing to wait for.
        callback();
        Ok(())
    }

    fn matches_definition(&self, definition: &NodeDefinition) -> bool {
        let mut mine: Vec<&String> = self.spec.definition.services().iter().collect();
        let mut theirs: Vec<&String> = definition.services().iter().collect();
        mine.sort();
        theirs.sort();
        self.spec.definition.kind() == definition.kind() && mine == theirs
    }

    fn environment_name(&self) -> String {
        self.spec.env.clone()
    }

    fn environment_definition_name(&self) -> String {
        self.spec.env_def_name.clone()
    }
}

#[cfg(test)]
mod tests {
    use drift_core::{FileNodeDefinition, PortSpec, Protocol};
    use driftgrid_file::FileBackedProvider;
    use driftgrid_provider::predicate;

    use super::*;

    fn definition(services: &[&str]) -> NodeDefinition {
        NodeDefinition::File(FileNodeDefinition {
            role: None,
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

    fn wrapped_file_provider() -> (tempfile::TempDir, FileBackedProvider, NoopNodeProvider) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake_env.yml");
        let inner = FileBackedProvider::new(&path);
        inner.start(&definition(&["apache"]), "dev", "def").unwrap();
        (dir, FileBackedProvider::new(&path), NoopNodeProvider::new(Box::new(inner)))
    }

    #[test]
    fn start_never_touches_the_inner_backend() {
        let (_dir, observer, noop) = wrapped_file_provider();
        noop.start(&definition(&["my_app"]), "dev", "def").unwrap();
        noop.start(&definition(&["my_app"]), "dev", "def").unwrap();

        let real = observer
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        assert_eq!(real.len(), 1);
    }

    #[test]
    fn synthetic_nodes_get_sequential_identities() {
        let (_dir, _observer, noop) = wrapped_file_provider();
        let first = noop.start(&definition(&["a"]), "dev", "def").unwrap();
        let second = noop.start(&definition(&["a"]), "dev", "def").unwrap();
        assert_eq!(first.id(), "sim-node-1");
        assert_eq!(second.id(), "sim-node-2");
    }

    #[test]
    fn shutdown_hides_the_node_without_terminating_it() {
        let (_dir, observer, noop) = wrapped_file_provider();
        let listed = noop
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        noop.shutdown(&listed[0].id()).unwrap();

        let after = noop
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        assert!(after.is_empty());

        let real = observer
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        assert_eq!(real[0].state().unwrap(), NodeState::Running);
    }

    #[test]
    fn mutations_on_wrapped_nodes_are_recorded_not_executed() {
        let (_dir, observer, noop) = wrapped_file_provider();
        let listed = noop
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        let node = &listed[0];

        node.run_command("rm -rf /tmp/scratch", false).unwrap();
        node.add_service_to_tags("apache", &connectivity(&[80])).unwrap();

        let real = observer
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        assert!(real[0].get_services().unwrap().is_empty());

        let plan = noop.noop_actions_string();
        assert!(plan.contains("run command 'rm -rf /tmp/scratch'"));
        assert!(plan.contains("tag service 'apache' ports [80]"));
    }

    #[test]
    fn tag_overlay_is_visible_through_the_wrapper() {
        let (_dir, _observer, noop) = wrapped_file_provider();
        let listed = noop
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        listed[0]
            .add_service_to_tags("apache", &connectivity(&[80]))
            .unwrap();

        let again = noop
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        assert_eq!(
            again[0].get_services().unwrap()["apache"],
            ServicePorts::from([(80, 80)])
        );
    }

    #[test]
    fn list_appends_synthetic_nodes_matching_the_predicate() {
        let (_dir, _observer, noop) = wrapped_file_provider();
        noop.start(&definition(&["a"]), "dev", "def").unwrap();
        noop.start(&definition(&["a"]), "prod", "def").unwrap();

        let dev = noop
            .list(
                &CredentialsMap::new(),
                &predicate::running_in_env("dev", "def"),
            )
            .unwrap();
        let ids: Vec<String> = dev.iter().map(|n| n.id()).collect();
        assert!(ids.contains(&"sim-node-1".to_string()));
        assert!(!ids.contains(&"sim-node-2".to_string()));
    }

    #[test]
    fn synthetic_readiness_is_immediate() {
        let (_dir, _observer, noop) = wrapped_file_provider();
        let node = noop.start(&definition(&["a"]), "dev", "def").unwrap();

        let mut called = 0;
        node.wait_for_ready(&mut || called += 1, Duration::ZERO).unwrap();
        assert_eq!(called, 1);
        assert_eq!(noop.startup_timeout(), Duration::ZERO);
    }

    #[test]
    fn validate_runs_against_the_real_backend() {
        let (_dir, _observer, noop) = wrapped_file_provider();
        let mut errors = Vec::new();
        noop.validate(
            "dev",
            &serde_yaml::Value::Null,
            &mut errors,
            &CredentialsMap::new(),
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn plan_groups_actions_per_node_in_call_order() {
        let (_dir, _observer, noop) = wrapped_file_provider();
        let node = noop.start(&definition(&["web"]), "dev", "def").unwrap();
        node.run_command("install web", false).unwrap();
        noop.shutdown("stale-node").unwrap();
        node.add_service_to_tags("web", &connectivity(&[80])).unwrap();

        let plan = noop.noop_actions_string();
        let sim_at = plan.find("sim-node-1:").unwrap();
        let stale_at = plan.find("stale-node:").unwrap();
        assert!(sim_at < stale_at);

        let sim_block: &str = &plan[sim_at..stale_at];
        let start_at = sim_block.find("start file node for services [web]").unwrap();
        let cmd_at = sim_block.find("run command 'install web'").unwrap();
        let tag_at = sim_block.find("tag service 'web' ports [80]").unwrap();
        assert!(start_at < cmd_at && cmd_at < tag_at);
        assert_eq!(noop.actions_recorded(), 4);
    }
}
