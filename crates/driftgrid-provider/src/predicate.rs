//! Composable node predicates for provider listings.

use crate::node::RunningNode;

/// A boolean filter over running nodes. Predicates compose with plain
/// closure combinators; backends apply them after resolving node
/// metadata.
pub type NodePredicate = dyn Fn(&dyn RunningNode) -> bool;

/// Accepts every node.
pub fn all_nodes() -> impl Fn(&dyn RunningNode) -> bool {
    |_| true
}

/// Accepts nodes currently observed in the running state.
pub fn running() -> impl Fn(&dyn RunningNode) -> bool {
    |node| matches!(node.state(), Ok(state) if state.is_running())
}

/// Accepts running nodes that belong to the given environment: state
/// is running, `env_name` and `env_def_name` tags both match.
pub fn running_in_env(
    env_name: &str,
    env_def_name: &str,
) -> impl Fn(&dyn RunningNode) -> bool + use<> {
    let env_name = env_name.to_string();
    let env_def_name = env_def_name.to_string();
    move |node| {
        matches!(node.state(), Ok(state) if state.is_running())
            && node.environment_name() == env_name
            && node.environment_definition_name() == env_def_name
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use drift_core::{
        Address, Connectivity, NodeDefinition, NodeState, NodeTags, ServiceMap,
    };

    use super::*;
    use crate::error::ProviderResult;
    use crate::transport::CommandOutput;

    struct StubNode {
        id: String,
        state: NodeState,
        tags: NodeTags,
    }

    impl StubNode {
        fn new(id: &str, state: NodeState, env: &str, def: &str) -> Self {
            Self {
                id: id.to_string(),
                state,
                tags: NodeTags::for_new_node(env, def),
            }
        }
    }

    impl RunningNode for StubNode {
        fn id(&self) -> String {
            self.id.clone()
        }

        fn state(&self) -> ProviderResult<NodeState> {
            Ok(self.state)
        }

        fn tags(&self) -> ProviderResult<NodeTags> {
            Ok(self.tags.clone())
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

        fn wait_for_ready(
            &self,
            callback: &mut dyn FnMut(),
            _: Duration,
        ) -> ProviderResult<()> {
            callback();
            Ok(())
        }

        fn matches_definition(&self, _: &NodeDefinition) -> bool {
            false
        }

        fn environment_name(&self) -> String {
            self.tags.env_name.clone()
        }

        fn environment_definition_name(&self) -> String {
            self.tags.env_def_name.clone()
        }
    }

    #[test]
    fn all_nodes_accepts_everything() {
        let node = StubNode::new("n1", NodeState::Terminated, "dev", "def");
        assert!(all_nodes()(&node));
    }

    #[test]
    fn running_filters_on_state() {
        assert!(running()(&StubNode::new("n1", NodeState::Running, "dev", "def")));
        assert!(!running()(&StubNode::new("n2", NodeState::Pending, "dev", "def")));
    }

    #[test]
    fn running_in_env_requires_all_three() {
        let pred = running_in_env("dev", "three_tier");
        assert!(pred(&StubNode::new("n1", NodeState::Running, "dev", "three_tier")));
        assert!(!pred(&StubNode::new("n2", NodeState::Running, "prod", "three_tier")));
        assert!(!pred(&StubNode::new("n3", NodeState::Running, "dev", "other")));
        assert!(!pred(&StubNode::new("n4", NodeState::Stopped, "dev", "three_tier")));
    }
}
