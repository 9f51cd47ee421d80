//! Load-balancer lifecycle hook.

use std::sync::Arc;

use drift_core::Connectivity;
use driftgrid_provider::{ProviderResult, RunningNode, ServiceLifecycleHook};
use tracing::{info, warn};

use crate::api::{CloudApi, HealthCheck, LoadBalancerSpec};

/// Registers nodes with a load balancer when their service is
/// installed and deregisters them on termination. The balancer itself
/// is created on first use.
pub struct LoadBalancerHook {
    api: Arc<dyn CloudApi>,
    region: String,
    spec: LoadBalancerSpec,
    health_check: HealthCheck,
}

impl LoadBalancerHook {
    pub fn new(
        api: Arc<dyn CloudApi>,
        region: impl Into<String>,
        spec: LoadBalancerSpec,
        health_check: HealthCheck,
    ) -> Self {
        Self {
            api,
            region: region.into(),
            spec,
            health_check,
        }
    }

    fn ensure_balancer(&self) -> ProviderResult<String> {
        if let Some(existing) = self.api.find_load_balancer(&self.region, &self.spec.name)? {
            return Ok(existing.name);
        }
        info!(balancer = %self.spec.name, region = %self.region, "creating load balancer");
        let created = self.api.create_load_balancer(&self.region, &self.spec)?;
        self.api
            .configure_health_check(&self.region, &created.name, &self.health_check)?;
        Ok(created.name)
    }

    fn node_zone(&self, node: &dyn RunningNode) -> String {
        node.tags()
            .ok()
            .and_then(|tags| tags.extra.get("availability_zone").cloned())
            .unwrap_or_else(|| format!("{}a", self.region))
    }
}

impl ServiceLifecycleHook for LoadBalancerHook {
    fn service_installed(
        &self,
        service: &str,
        node: &dyn RunningNode,
        _connectivity: &[Connectivity],
    ) -> ProviderResult<()> {
        let balancer = self.ensure_balancer()?;
        let zone = self.node_zone(node);
        info!(%service, node = %node.id(), %balancer, "registering node with load balancer");
        self.api
            .register_instance(&self.region, &balancer, &zone, &node.id())
    }

    // Best effort: the balancer may already be gone when the last node
    // of a service is torn down.
    fn service_terminated(&self, service: &str, node: &dyn RunningNode) -> ProviderResult<()> {
        if let Err(err) =
            self.api
                .deregister_instance(&self.region, &self.spec.name, &node.id())
        {
            warn!(%service, node = %node.id(), error = %err, "load balancer deregistration failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use drift_core::{Address, NodeDefinition, NodeState, NodeTags, Protocol, ServiceMap};
    use driftgrid_provider::{CommandOutput, ProviderResult};

    use super::*;
    use crate::api::Listener;
    use crate::sim::SimulatedCloud;

    struct StubNode {
        id: String,
        zone: Option<String>,
    }

    impl RunningNode for StubNode {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn state(&self) -> ProviderResult<NodeState> {
            Ok(NodeState::Running)
        }

        fn tags(&self) -> ProviderResult<NodeTags> {
            let mut tags = NodeTags::for_new_node("dev", "def");
            if let Some(zone) = &self.zone {
                tags.extra
                    .insert("availability_zone".to_string(), zone.clone());
            }
            Ok(tags)
        }

        fn address(&self) -> ProviderResult<Address> {
            Ok(Address::new(self.id.clone(), ServiceMap::new()))
        }

        fn run_command(&self, _: &str, _: bool) -> ProviderResult<CommandOutput> {
            Ok(CommandOutput::ok(""))
        }

        fn upload_file(&self, _: &Path, _: &str) -> ProviderResult<()> {
            Ok(())
        }

        fn add_service_to_tags(&self, _: &str, _: &[Connectivity]) -> ProviderResult<()> {
            Ok(())
        }

        fn wait_for_ready(&self, callback: &mut dyn FnMut(), _: Duration) -> ProviderResult<()> {
            callback();
            Ok(())
        }

        fn matches_definition(&self, _: &NodeDefinition) -> bool {
            false
        }

        fn environment_name(&self) -> String {
            "dev".to_string()
        }

        fn environment_definition_name(&self) -> String {
            "def".to_string()
        }
    }

    fn hook(api: &Arc<SimulatedCloud>) -> LoadBalancerHook {
        LoadBalancerHook::new(
            Arc::clone(api) as Arc<dyn CloudApi>,
            "us-east-1",
            LoadBalancerSpec {
                name: "web-lb".to_string(),
                listeners: vec![Listener {
                    protocol: Protocol::Tcp,
                    app_port: 8080,
                    balancer_port: 80,
                }],
            },
            HealthCheck {
                target: "HTTP:8080/ping".to_string(),
                interval: 10,
                timeout: 5,
                healthy_threshold: 2,
                unhealthy_threshold: 3,
            },
        )
    }

    #[test]
    fn install_creates_balancer_and_registers_node() {
        let api = Arc::new(SimulatedCloud::new());
        let node = StubNode {
            id: "i-1".to_string(),
            zone: Some("us-east-1b".to_string()),
        };
        hook(&api).service_installed("web", &node, &[]).unwrap();

        let balancer = api.balancer("us-east-1", "web-lb").unwrap();
        assert_eq!(balancer.instances, vec!["i-1"]);
        assert_eq!(balancer.zones, vec!["us-east-1b"]);
        assert!(balancer.health_check.is_some());
    }

    #[test]
    fn second_install_reuses_the_balancer() {
        let api = Arc::new(SimulatedCloud::new());
        let hook = hook(&api);
        let first = StubNode {
            id: "i-1".to_string(),
            zone: None,
        };
        let second = StubNode {
            id: "i-2".to_string(),
            zone: None,
        };

        hook.service_installed("web", &first, &[]).unwrap();
        hook.service_installed("web", &second, &[]).unwrap();

        let balancer = api.balancer("us-east-1", "web-lb").unwrap();
        assert_eq!(balancer.instances, vec!["i-1", "i-2"]);
        assert_eq!(balancer.zones, vec!["us-east-1a"]);
    }

    #[test]
    fn terminate_deregisters_and_swallows_missing_balancer() {
        let api = Arc::new(SimulatedCloud::new());
        let hook = hook(&api);
        let node = StubNode {
            id: "i-1".to_string(),
            zone: None,
        };

        // Never created: deregistration failure must not propagate.
        hook.service_terminated("web", &node).unwrap();

        hook.service_installed("web", &node, &[]).unwrap();
        hook.service_terminated("web", &node).unwrap();
        assert!(api.balancer("us-east-1", "web-lb").unwrap().instances.is_empty());
    }
}
