//! The `NodeProvider` capability interface.

use std::time::Duration;

use drift_core::{CredentialsMap, NodeDefinition};
use serde_yaml::Value;

use crate::describe::{DefinitionTranslator, EnvironmentDescription};
use crate::error::ProviderResult;
use crate::node::RunningNode;
use crate::predicate::NodePredicate;

/// Backend abstraction over a fleet of nodes.
///
/// Implemented by the cloud backend, the container-host backend, the
/// file-backed fake, and the dry-run decorator. The reconciler talks
/// only to this interface, never to a concrete backend.
pub trait NodeProvider {
    /// Enumerate currently observable nodes, filtered by predicate.
    /// Nodes whose required metadata cannot be resolved are logged and
    /// skipped rather than failing the whole listing.
    fn list(
        &self,
        all_credentials: &CredentialsMap,
        predicate: &NodePredicate,
    ) -> ProviderResult<Vec<Box<dyn RunningNode>>>;

    /// Provision one node. Does not block for readiness. The node is
    /// tagged immediately with its environment membership and an empty
    /// services map so `list` can see it mid-boot.
    fn start(
        &self,
        definition: &NodeDefinition,
        env_name: &str,
        env_def_name: &str,
    ) -> ProviderResult<Box<dyn RunningNode>>;

    /// Terminate the node by identity. Best-effort idempotent when the
    /// node is already gone from a state perspective, but fails with
    /// `ProviderError::Lookup` when the identity cannot be resolved at
    /// all.
    fn shutdown(&self, identity: &str) -> ProviderResult<()>;

    /// Static validation of this provider's configuration block.
    /// Appends human-readable messages; the error list is authoritative.
    fn validate(
        &self,
        env_name: &str,
        config: &Value,
        errors: &mut Vec<String>,
        all_credentials: &CredentialsMap,
    );

    /// Bound on `wait_for_ready` for nodes this provider starts.
    fn startup_timeout(&self) -> Duration;

    /// Formatter used to render a static environment definition for
    /// display. Display-only; never consulted by the reconciler.
    fn definition_translator(&self) -> Box<dyn DefinitionTranslator>;

    /// Describe the nodes currently running in an environment, grouped
    /// by backend location.
    fn running_environment(
        &self,
        env_name: &str,
        env_def_name: &str,
        all_credentials: &CredentialsMap,
    ) -> ProviderResult<EnvironmentDescription>;
}
