//! Node lifecycle states.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a provisioned node, as reported by its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Pending,
    Running,
    Stopped,
    Terminated,
}

impl NodeState {
    pub fn is_running(self) -> bool {
        self == NodeState::Running
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Stopped => "stopped",
            NodeState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Error for unrecognized state labels coming back from a backend.
#[derive(Debug, Error)]
#[error("unknown node state: {0}")]
pub struct UnknownState(pub String);

impl FromStr for NodeState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(NodeState::Pending),
            "running" => Ok(NodeState::Running),
            "stopped" => Ok(NodeState::Stopped),
            // Some backends report a transitional label during teardown.
            "terminated" | "shutting-down" => Ok(NodeState::Terminated),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_states() {
        assert_eq!("running".parse::<NodeState>().unwrap(), NodeState::Running);
        assert_eq!("RUNNING".parse::<NodeState>().unwrap(), NodeState::Running);
        assert_eq!(
            "shutting-down".parse::<NodeState>().unwrap(),
            NodeState::Terminated
        );
    }

    #[test]
    fn rejects_unknown_state() {
        assert!("rebooting".parse::<NodeState>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for state in [
            NodeState::Pending,
            NodeState::Running,
            NodeState::Stopped,
            NodeState::Terminated,
        ] {
            assert_eq!(state.to_string().parse::<NodeState>().unwrap(), state);
        }
    }
}
