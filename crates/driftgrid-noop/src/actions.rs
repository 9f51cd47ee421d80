//! The recorded dry-run plan.

use std::fmt;

/// One intercepted call. Parameters are captured for rendering only;
/// nothing here is ever replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start { kind: String, services: Vec<String> },
    Shutdown,
    RunCommand { command: String },
    UploadFile { local: String, destination: String },
    TagService { service: String, ports: Vec<u16> },
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start { kind, services } => {
                write!(f, "start {kind} node for services [{}]", services.join(", "))
            }
            Action::Shutdown => write!(f, "shutdown"),
            Action::RunCommand { command } => write!(f, "run command '{command}'"),
            Action::UploadFile { local, destination } => {
                write!(f, "upload {local} to {destination}")
            }
            Action::TagService { service, ports } => {
                let ports: Vec<String> = ports.iter().map(|p| p.to_string()).collect();
                write!(f, "tag service '{service}' ports [{}]", ports.join(", "))
            }
        }
    }
}

/// Append-only action log. Preserves global call order; rendering
/// groups entries by node identity in first-seen order.
#[derive(Debug, Default)]
pub struct ActionLog {
    entries: Vec<(String, Action)>,
}

impl ActionLog {
    pub fn record(&mut self, node_id: impl Into<String>, action: Action) {
        self.entries.push((node_id.into(), action));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// All actions recorded against one identity, in call order.
    pub fn actions_for(&self, node_id: &str) -> Vec<&Action> {
        self.entries
            .iter()
            .filter(|(id, _)| id == node_id)
            .map(|(_, action)| action)
            .collect()
    }

    /// The dry-run plan surfaced to the operator.
    pub fn render(&self) -> String {
        let mut order: Vec<&str> = Vec::new();
        for (id, _) in &self.entries {
            if !order.contains(&id.as_str()) {
                order.push(id);
            }
        }

        let mut out = String::new();
        for id in order {
            out.push_str(id);
            out.push_str(":\n");
            for action in self.actions_for(id) {
                out.push_str(&format!("    {action}\n"));
            }
        }
        out
    }
}
