//! The reconciliation core.
//!
//! An `EnvironmentDefinition` owns one convergence pass: it diffs the
//! declared node definitions against the nodes observed in the backend,
//! provisions and terminates to close the gap, blocks for readiness,
//! tags, configures, and fires lifecycle hooks. It talks only to the
//! `NodeProvider` and `RunningNode` interfaces.

use std::collections::BTreeMap;
use std::sync::Arc;

use drift_core::{CredentialsMap, NodeDefinition, NodeTags};
use driftgrid_provider::{predicate, NodeProvider, RunningNode, ServiceLifecycleHook};
use tracing::{info, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::service::{EnvSettings, ServiceDefinition};

pub type SharedNode = Arc<dyn RunningNode>;

/// Three-way split of desired definitions against observed nodes.
pub struct Delta {
    /// Definitions with no matching running node.
    pub to_provision: Vec<NodeDefinition>,
    /// Observed nodes claimed by a definition, with the definition that
    /// claimed them.
    pub matched: Vec<(SharedNode, NodeDefinition)>,
    /// Observed nodes no definition claimed.
    pub to_terminate: Vec<SharedNode>,
}

/// What one `launch` pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LaunchReport {
    pub provisioned: Vec<String>,
    pub terminated: Vec<String>,
}

/// One environment to converge: its declared topology, the backend,
/// the services to install, and the hooks to notify.
pub struct EnvironmentDefinition {
    name: String,
    env_def_name: String,
    provider: Box<dyn NodeProvider>,
    node_definitions: Vec<NodeDefinition>,
    services: BTreeMap<String, Arc<ServiceDefinition>>,
    credentials: CredentialsMap,
    hooks: BTreeMap<String, Vec<Arc<dyn ServiceLifecycleHook>>>,
}

impl EnvironmentDefinition {
    pub fn new(
        name: impl Into<String>,
        env_def_name: impl Into<String>,
        provider: Box<dyn NodeProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            env_def_name: env_def_name.into(),
            provider,
            node_definitions: Vec::new(),
            services: BTreeMap::new(),
            credentials: CredentialsMap::new(),
            hooks: BTreeMap::new(),
        }
    }

    pub fn with_definitions(mut self, definitions: Vec<NodeDefinition>) -> Self {
        self.node_definitions = definitions;
        self
    }

    pub fn with_services(
        mut self,
        services: BTreeMap<String, Arc<ServiceDefinition>>,
    ) -> Self {
        self.services = services;
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialsMap) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_hook(
        mut self,
        service: impl Into<String>,
        hook: Arc<dyn ServiceLifecycleHook>,
    ) -> Self {
        self.hooks.entry(service.into()).or_default().push(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env_def_name(&self) -> &str {
        &self.env_def_name
    }

    pub fn provider(&self) -> &dyn NodeProvider {
        self.provider.as_ref()
    }

    pub fn node_definitions(&self) -> &[NodeDefinition] {
        &self.node_definitions
    }

    pub fn service_connectivity(&self) -> BTreeMap<String, Vec<drift_core::Connectivity>> {
        self.services
            .iter()
            .map(|(name, def)| (name.clone(), def.connectivity.clone()))
            .collect()
    }

    /// The environment's nodes as the backend currently sees them.
    pub fn list_nodes(&self) -> ReconcileResult<Vec<SharedNode>> {
        let nodes = self.provider.list(
            &self.credentials,
            &predicate::running_in_env(&self.name, &self.env_def_name),
        )?;
        Ok(nodes.into_iter().map(Arc::from).collect())
    }

    /// Greedy first-match diff: each definition, in declaration order,
    /// claims the first unclaimed node that matches it. No backtracking.
    pub fn delta_defs_with_running_nodes(&self, observed: Vec<SharedNode>) -> Delta {
        let mut pool = observed;
        let mut to_provision = Vec::new();
        let mut matched = Vec::new();

        for definition in &self.node_definitions {
            match pool.iter().position(|node| node.matches_definition(definition)) {
                Some(i) => matched.push((pool.remove(i), definition.clone())),
                None => to_provision.push(definition.clone()),
            }
        }

        Delta {
            to_provision,
            matched,
            to_terminate: pool,
        }
    }

    /// One convergence pass. Order is provision, block for readiness,
    /// terminate stale, tag, build settings, configure, fire hooks.
    /// Stale nodes are not removed until their replacements exist, but
    /// there is no rolling-update guarantee across old/new pairs.
    pub fn launch(&self) -> ReconcileResult<LaunchReport> {
        info!(env = %self.name, def = %self.env_def_name, "launching environment");
        let delta = self.delta_defs_with_running_nodes(self.list_nodes()?);

        let mut report = LaunchReport::default();
        let mut node_assignments: Vec<(SharedNode, NodeDefinition)> = delta.matched;

        let mut new_nodes: Vec<SharedNode> = Vec::new();
        for definition in &delta.to_provision {
            info!(%definition, "provisioning node");
            let node: SharedNode =
                Arc::from(self.provider.start(definition, &self.name, &self.env_def_name)?);
            report.provisioned.push(node.id());
            new_nodes.push(Arc::clone(&node));
            node_assignments.push((node, definition.clone()));
        }
        let timeout = self.provider.startup_timeout();
        for node in &new_nodes {
            node.wait_for_ready(&mut || {}, timeout)?;
        }

        let terminated = self.terminate(&delta.to_terminate, &mut report)?;

        // Tag before configuring so settings are built from complete
        // service metadata.
        for (node, definition) in &node_assignments {
            for service in definition.services() {
                let connectivity = self
                    .services
                    .get(service)
                    .map(|def| def.connectivity.as_slice())
                    .unwrap_or(&[]);
                node.add_service_to_tags(service, connectivity)?;
            }
        }

        let by_service = self.nodes_by_service(&node_assignments);
        let settings = Self::build_environment_settings(&by_service)?;

        for (service_name, nodes) in &by_service {
            let Some(service) = self.services.get(service_name) else {
                warn!(service = %service_name, "service has no definition, skipping configuration");
                continue;
            };
            for node in nodes {
                service.apply_on(node.as_ref(), &settings)?;
                for hook in self.hooks_for(service_name) {
                    hook.service_installed(service_name, node.as_ref(), &service.connectivity)?;
                }
            }
        }

        self.fire_terminated_hooks(&terminated)?;

        Ok(report)
    }

    /// `service → [host]` plus `service_port → [comma-joined ports]`
    /// for every declared service, including empty ones.
    pub fn build_environment_settings(
        by_service: &BTreeMap<String, Vec<SharedNode>>,
    ) -> ReconcileResult<EnvSettings> {
        let mut settings = EnvSettings::new();
        for (service, nodes) in by_service {
            let mut hosts = Vec::new();
            let mut ports = Vec::new();
            for node in nodes {
                let address = node.address()?;
                hosts.push(address.host.clone());
                let list = address.port_list(service);
                if !list.is_empty() {
                    ports.push(list);
                }
            }
            settings.insert(service.clone(), hosts);
            settings.insert(format!("{service}_port"), ports);
        }
        Ok(settings)
    }

    /// Shut down everything the environment is running and fire the
    /// termination hooks for the services the nodes carried.
    pub fn terminate_all(&self) -> ReconcileResult<Vec<String>> {
        let nodes = self.list_nodes()?;
        let mut report = LaunchReport::default();
        let terminated = self.terminate(&nodes, &mut report)?;
        self.fire_terminated_hooks(&terminated)?;
        Ok(report.terminated)
    }

    pub fn terminate_nodes(&self, identities: &[String]) -> ReconcileResult<()> {
        let nodes = self.list_nodes()?;
        let mut selected = Vec::new();
        let mut failures = Vec::new();
        for identity in identities {
            match nodes.iter().find(|node| &node.id() == identity) {
                Some(node) => selected.push(Arc::clone(node)),
                None => failures.push(format!("{identity}: no such node")),
            }
        }

        let mut report = LaunchReport::default();
        match self.terminate(&selected, &mut report) {
            Ok(terminated) => self.fire_terminated_hooks(&terminated)?,
            Err(ReconcileError::Shutdown(shutdown_failures)) => failures.extend(shutdown_failures),
            Err(other) => return Err(other),
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Shutdown(failures))
        }
    }

    /// Continues through the whole list on failure; tags are captured
    /// before shutdown so termination hooks can still fire.
    fn terminate(
        &self,
        nodes: &[SharedNode],
        report: &mut LaunchReport,
    ) -> ReconcileResult<Vec<(SharedNode, NodeTags)>> {
        let mut terminated = Vec::new();
        let mut failures = Vec::new();
        for node in nodes {
            let tags = node.tags().unwrap_or_default();
            info!(id = %node.id(), "terminating node");
            match self.provider.shutdown(&node.id()) {
                Ok(()) => {
                    report.terminated.push(node.id());
                    terminated.push((Arc::clone(node), tags));
                }
                Err(err) => failures.push(format!("{}: {err}", node.id())),
            }
        }
        if failures.is_empty() {
            Ok(terminated)
        } else {
            Err(ReconcileError::Shutdown(failures))
        }
    }

    fn fire_terminated_hooks(
        &self,
        terminated: &[(SharedNode, NodeTags)],
    ) -> ReconcileResult<()> {
        for (node, tags) in terminated {
            for service in tags.service_names() {
                for hook in self.hooks_for(&service) {
                    hook.service_terminated(&service, node.as_ref())?;
                }
            }
        }
        Ok(())
    }

    fn nodes_by_service(
        &self,
        assignments: &[(SharedNode, NodeDefinition)],
    ) -> BTreeMap<String, Vec<SharedNode>> {
        let mut by_service: BTreeMap<String, Vec<SharedNode>> = BTreeMap::new();
        // Every declared service gets an entry, even with no nodes:
        // seeded from the service map and the node definitions both.
        for service in self.services.keys() {
            by_service.entry(service.clone()).or_default();
        }
        for definition in &self.node_definitions {
            for service in definition.services() {
                by_service.entry(service.clone()).or_default();
            }
        }
        for (node, definition) in assignments {
            for service in definition.services() {
                by_service
                    .entry(service.clone())
                    .or_default()
                    .push(Arc::clone(node));
            }
        }
        by_service
    }

    fn hooks_for(&self, service: &str) -> &[Arc<dyn ServiceLifecycleHook>] {
        self.hooks
            .get(service)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
