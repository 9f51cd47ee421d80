//! Remote execution seam.
//!
//! The core only ever calls `run_command`/`upload_file` on a
//! `RunningNode`; backends resolve those to a `Transport` session.
//! Production bindings (an ssh subprocess, an agent channel) live at
//! the application edge; tests substitute scripted fakes.

use std::path::Path;

use crate::error::ProviderResult;

/// Result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            success: true,
        }
    }

    pub fn failed(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            success: false,
        }
    }
}

/// An established session against one remote host.
pub trait Transport: Send + Sync {
    fn run_command(&self, command: &str) -> ProviderResult<CommandOutput>;

    fn run_commands(&self, commands: &[String]) -> ProviderResult<()> {
        for command in commands {
            self.run_command(command)?;
        }
        Ok(())
    }

    fn upload_file(&self, local: &Path, remote: &str) -> ProviderResult<()>;
}

/// Opens transport sessions for nodes resolved at runtime (the cloud
/// backend learns a node's address only after boot).
pub trait TransportFactory: Send + Sync {
    fn connect(
        &self,
        host: &str,
        user: &str,
        private_key: &Path,
    ) -> ProviderResult<Box<dyn Transport>>;
}
