//! Service lifecycle hooks.

use drift_core::Connectivity;

use crate::error::ProviderResult;
use crate::node::RunningNode;

/// A collaborator notified when a service lands on or leaves a node,
/// e.g. a load-balancer registration hook. Hooks are configured per
/// service and fired by the reconciler after configuration completes.
pub trait ServiceLifecycleHook {
    fn service_installed(
        &self,
        service: &str,
        node: &dyn RunningNode,
        connectivity: &[Connectivity],
    ) -> ProviderResult<()>;

    fn service_terminated(&self, service: &str, node: &dyn RunningNode) -> ProviderResult<()>;
}
