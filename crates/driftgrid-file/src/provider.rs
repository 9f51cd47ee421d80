//! The file-backed provider and its node handles.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use drift_core::{
    Address, Connectivity, CredentialsMap, NodeDefinition, NodeState, NodeTags, ServicePorts,
};
use driftgrid_provider::{
    CommandOutput, DefinitionTranslator, EnvironmentDescription, Location, NodePredicate,
    NodeProvider, NodeSummary, ProviderResult, RunningNode,
};
use serde_yaml::Value;
use tracing::debug;

use crate::store::{FileStore, NodeRecord};

/// Fake backend persisting every node in one YAML document.
pub struct FileBackedProvider {
    store: FileStore,
    /// Identities to hand out before falling back to generated ones.
    /// Lets tests pin node ids.
    preset_ids: Mutex<VecDeque<String>>,
}

impl FileBackedProvider {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            store: FileStore::new(path.as_ref()),
            preset_ids: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_node_ids(self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        {
            let mut preset = self.preset_ids.lock().unwrap();
            preset.extend(ids.into_iter().map(Into::into));
        }
        self
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    fn next_id(&self) -> ProviderResult<String> {
        if let Some(id) = self.preset_ids.lock().unwrap().pop_front() {
            return Ok(id);
        }
        let highest = self
            .store
            .nodes()?
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok((highest + 1).to_string())
    }
}

impl NodeProvider for FileBackedProvider {
    fn list(
        &self,
        _all_credentials: &CredentialsMap,
        predicate: &NodePredicate,
    ) -> ProviderResult<Vec<Box<dyn RunningNode>>> {
        if !self.store.exists() {
            return Ok(Vec::new());
        }

        let mut nodes: Vec<Box<dyn RunningNode>> = Vec::new();
        for (id, record) in self.store.nodes()? {
            let node = FileNode {
                id,
                env: record.env.clone(),
                env_def_name: record.env_def_name.clone(),
                store: self.store.clone(),
            };
            if predicate(&node) {
                nodes.push(Box::new(node));
            }
        }
        Ok(nodes)
    }

    fn start(
        &self,
        _definition: &NodeDefinition,
        env_name: &str,
        env_def_name: &str,
    ) -> ProviderResult<Box<dyn RunningNode>> {
        let id = self.next_id()?;
        self.store.insert(
            &id,
            NodeRecord {
                state: NodeState::Running,
                services: Default::default(),
                env: env_name.to_string(),
                env_def_name: env_def_name.to_string(),
                settings: BTreeMap::new(),
            },
        )?;
        debug!(%id, env = %env_name, "started file-backed node");

        Ok(Box::new(FileNode {
            id,
            env: env_name.to_string(),
            env_def_name: env_def_name.to_string(),
            store: self.store.clone(),
        }))
    }

    fn shutdown(&self, identity: &str) -> ProviderResult<()> {
        self.store
            .update(identity, |record| record.state = NodeState::Terminated)
    }

    fn validate(
        &self,
        _env_name: &str,
        _config: &Value,
        _errors: &mut Vec<String>,
        _all_credentials: &CredentialsMap,
    ) {
        // No required configuration beyond the optional store path.
    }

    fn startup_timeout(&self) -> Duration {
        Duration::ZERO
    }

    fn definition_translator(&self) -> Box<dyn DefinitionTranslator> {
        Box::new(FileDefinitionTranslator)
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
            summaries.push(NodeSummary {
                id: node.id(),
                dns_name: node.id(),
                services: node.get_services()?.keys().cloned().collect(),
                details: BTreeMap::new(),
            });
        }
        Ok(EnvironmentDescription {
            name: env_name.to_string(),
            locations: vec![Location {
                name: self.store.path().display().to_string(),
                nodes: summaries,
            }],
        })
    }
}

/// Handle to one node in the store. Reads go back to the file so that
/// a handle observes mutations made through other handles.
pub struct FileNode {
    id: String,
    env: String,
    env_def_name: String,
    store: FileStore,
}

impl FileNode {
    fn record(&self) -> ProviderResult<NodeRecord> {
        self.store.node(&self.id)
    }
}

impl RunningNode for FileNode {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn state(&self) -> ProviderResult<NodeState> {
        Ok(self.record()?.state)
    }

    fn tags(&self) -> ProviderResult<NodeTags> {
        let record = self.record()?;
        Ok(NodeTags {
            env_name: record.env,
            env_def_name: record.env_def_name,
            services: record.services,
            extra: BTreeMap::new(),
        })
    }

    fn address(&self) -> ProviderResult<Address> {
        Ok(Address::new(self.id.clone(), self.record()?.services))
    }

    fn run_command(&self, command: &str, _warn_only: bool) -> ProviderResult<CommandOutput> {
        // The fake's simulation of work: a recognizable state label is
        // applied as a state transition, anything else is recorded.
        if let Ok(state) = command.parse::<NodeState>() {
            self.store.update(&self.id, |record| record.state = state)?;
        } else {
            self.store.update(&self.id, |record| {
                record
                    .settings
                    .insert("last_command".to_string(), Value::from(command));
            })?;
        }
        Ok(CommandOutput::ok("fake output"))
    }

    fn upload_file(&self, local: &Path, _destination: &str) -> ProviderResult<()> {
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        // Settings documents are merged into the node's persisted
        // settings; anything else is only noted.
        if file_name.starts_with("settings") {
            let raw = std::fs::read_to_string(local)?;
            let uploaded: BTreeMap<String, Value> = serde_yaml::from_str(&raw)?;
            self.store.update(&self.id, |record| {
                record.settings.extend(uploaded);
            })?;
        } else {
            self.store.update(&self.id, |record| {
                record
                    .settings
                    .insert("last_upload".to_string(), Value::from(file_name));
            })?;
        }
        Ok(())
    }

    fn add_service_to_tags(
        &self,
        service: &str,
        connectivity: &[Connectivity],
    ) -> ProviderResult<()> {
        let ports = Connectivity::all_ports(connectivity);
        let mapping: ServicePorts = ports.iter().map(|p| (*p, *p)).collect();
        self.store.update(&self.id, |record| {
            record.services.insert(service.to_string(), mapping);
        })
    }

    fn wait_for_ready(
        &self,
        callback: &mut dyn FnMut(),
        _timeout: Duration,
    ) -> ProviderResult<()> {
        callback();
        Ok(())
    }

    fn matches_definition(&self, definition: &NodeDefinition) -> bool {
        let Ok(record) = self.record() else {
            return false;
        };
        let installed: Vec<&String> = record.services.keys().collect();
        let mut desired: Vec<&String> = definition.services().iter().collect();
        desired.sort();
        installed == desired
    }

    fn environment_name(&self) -> String {
        self.env.clone()
    }

    fn environment_definition_name(&self) -> String {
        self.env_def_name.clone()
    }
}

struct FileDefinitionTranslator;

impl DefinitionTranslator for FileDefinitionTranslator {
    fn translate(
        &self,
        env_name: &str,
        definitions: &[NodeDefinition],
        _service_connectivity: &BTreeMap<String, Vec<Connectivity>>,
    ) -> EnvironmentDescription {
        let nodes = definitions
            .iter()
            .map(|def| NodeSummary {
                id: String::new(),
                dns_name: match def {
                    NodeDefinition::File(f) => f.role.clone().unwrap_or_default(),
                    _ => String::new(),
                },
                services: def.services().to_vec(),
                details: BTreeMap::new(),
            })
            .collect();
        EnvironmentDescription {
            name: env_name.to_string(),
            locations: vec![Location {
                name: "file".to_string(),
                nodes,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use drift_core::FileNodeDefinition;
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
            protocol: Default::default(),
            ports: ports.iter().map(|p| drift_core::PortSpec::Single(*p)).collect(),
            allowed: vec![],
        }]
    }

    fn provider() -> (tempfile::TempDir, FileBackedProvider) {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileBackedProvider::new(dir.path().join("fake_env.yml"));
        (dir, provider)
    }

    #[test]
    fn list_is_empty_before_any_start() {
        let (_dir, provider) = provider();
        let nodes = provider
            .list(&CredentialsMap::new(), &predicate::all_nodes())
            .unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn started_node_is_running_with_no_services() {
        let (_dir, provider) = provider();
        let node = provider
            .start(&definition(&["apache"]), "dev", "some_def")
            .unwrap();

        assert_eq!(node.state().unwrap(), NodeState::Running);
        assert!(node.get_services().unwrap().is_empty());
        assert_eq!(node.environment_name(), "dev");
        assert_eq!(node.environment_definition_name(), "some_def");
    }

    #[test]
    fn list_filters_by_environment() {
        let (_dir, provider) = provider();
        provider.start(&definition(&["a"]), "dev", "some_def").unwrap();
        let doomed = provider.start(&definition(&["a"]), "dev", "some_def").unwrap();
        provider.shutdown(&doomed.id()).unwrap();
        provider.start(&definition(&["a"]), "prod", "some_def").unwrap();

        let nodes = provider
            .list(
                &CredentialsMap::new(),
                &predicate::running_in_env("dev", "some_def"),
            )
            .unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn shutdown_unknown_identity_fails_with_lookup() {
        let (_dir, provider) = provider();
        provider.start(&definition(&["a"]), "dev", "def").unwrap();
        assert!(matches!(
            provider.shutdown("no-such-node"),
            Err(driftgrid_provider::ProviderError::Lookup(_))
        ));
    }

    #[test]
    fn add_service_to_tags_persists_identity_ports() {
        let (_dir, provider) = provider();
        let node = provider.start(&definition(&["web"]), "dev", "def").unwrap();
        node.add_service_to_tags("web", &connectivity(&[80, 443])).unwrap();

        let services = node.get_services().unwrap();
        assert_eq!(services["web"], ServicePorts::from([(80, 80), (443, 443)]));
        assert_eq!(node.address().unwrap().ports("web"), vec![80, 443]);
    }

    #[test]
    fn matches_definition_compares_service_sets() {
        let (_dir, provider) = provider();
        let node = provider
            .start(&definition(&["web", "db"]), "dev", "def")
            .unwrap();
        node.add_service_to_tags("web", &connectivity(&[80])).unwrap();
        node.add_service_to_tags("db", &connectivity(&[5432])).unwrap();

        assert!(node.matches_definition(&definition(&["db", "web"])));
        assert!(!node.matches_definition(&definition(&["web"])));
    }

    #[test]
    fn preset_ids_are_used_in_order() {
        let (_dir, provider) = provider();
        let provider = provider.with_node_ids(["7", "9"]);
        assert_eq!(provider.start(&definition(&["a"]), "dev", "def").unwrap().id(), "7");
        assert_eq!(provider.start(&definition(&["a"]), "dev", "def").unwrap().id(), "9");
        // Falls back to generated ids afterwards.
        assert_eq!(provider.start(&definition(&["a"]), "dev", "def").unwrap().id(), "10");
    }

    #[test]
    fn settings_upload_merges_into_record() {
        let (dir, provider) = provider();
        let node = provider.start(&definition(&["a"]), "dev", "def").unwrap();

        let settings_file = dir.path().join("settings.yml");
        std::fs::write(&settings_file, "apache: [node-1]\n").unwrap();
        node.upload_file(&settings_file, ".").unwrap();

        let record = provider.store().node(&node.id()).unwrap();
        assert!(record.settings.contains_key("apache"));
    }
}
