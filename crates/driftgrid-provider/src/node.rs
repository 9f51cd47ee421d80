//! The `RunningNode` capability interface.

use std::path::Path;
use std::time::Duration;

use drift_core::{Address, Connectivity, NodeDefinition, NodeState, NodeTags, ServiceMap};

use crate::error::ProviderResult;
use crate::transport::CommandOutput;

/// A live or simulated handle to one provisioned node.
///
/// Owned by whichever `NodeProvider` returned it. Identity is stable
/// for the node's lifetime; the `services` entry in `tags()` is the
/// sole source of truth for what is installed.
pub trait RunningNode {
    /// Backend-assigned identity.
    fn id(&self) -> String;

    /// Current lifecycle state, freshly observed from the backend.
    fn state(&self) -> ProviderResult<NodeState>;

    fn tags(&self) -> ProviderResult<NodeTags>;

    /// Network identity plus per-service port bindings, derived from
    /// the current tags.
    fn address(&self) -> ProviderResult<Address>;

    fn get_services(&self) -> ProviderResult<ServiceMap> {
        Ok(self.tags()?.services)
    }

    /// Run a remote command. Fails with `ProviderError::Command` unless
    /// `warn_only` is set, in which case the failing output is returned.
    fn run_command(&self, command: &str, warn_only: bool) -> ProviderResult<CommandOutput>;

    fn upload_file(&self, local: &Path, destination: &str) -> ProviderResult<()>;

    /// Record a service as installed in durable node metadata and
    /// perform the backend's network exposure step (security-group
    /// authorization, port forwarding). Idempotence for a repeated
    /// service+ports pair is the backend's responsibility.
    fn add_service_to_tags(
        &self,
        service: &str,
        connectivity: &[Connectivity],
    ) -> ProviderResult<()>;

    /// Block until the backend reports the node ready, polling at a
    /// backend-specific interval up to `timeout`. Invokes `callback`
    /// exactly once, synchronously, after readiness is confirmed.
    /// Fails with `ProviderError::NotReady` when the timeout elapses.
    fn wait_for_ready(
        &self,
        callback: &mut dyn FnMut(),
        timeout: Duration,
    ) -> ProviderResult<()>;

    /// Structural equality against a desired definition: installed
    /// service set plus backend identity attributes. The sole predicate
    /// used by the reconciler's matching pass.
    fn matches_definition(&self, definition: &NodeDefinition) -> bool;

    /// Environment membership, read from tags. Returns "Unknown" when
    /// the backend cannot resolve the tag.
    fn environment_name(&self) -> String;

    fn environment_definition_name(&self) -> String;
}
