//! OpenSSH-backed transport: shells out to `ssh` and `scp`.

use std::path::{Path, PathBuf};
use std::process::Command;

use driftgrid_provider::{CommandOutput, ProviderError, ProviderResult, Transport, TransportFactory};
use tracing::debug;

pub struct OpenSsh;

impl TransportFactory for OpenSsh {
    fn connect(
        &self,
        host: &str,
        user: &str,
        private_key: &Path,
    ) -> ProviderResult<Box<dyn Transport>> {
        Ok(Box::new(SshSession {
            host: host.to_string(),
            user: user.to_string(),
            private_key: private_key.to_path_buf(),
        }))
    }
}

struct SshSession {
    host: String,
    user: String,
    private_key: PathBuf,
}

impl SshSession {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn base_args(&self) -> [&str; 4] {
        [
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-o",
            "BatchMode=yes",
        ]
    }
}

impl Transport for SshSession {
    fn run_command(&self, command: &str) -> ProviderResult<CommandOutput> {
        debug!(host = %self.host, %command, "ssh");
        let output = Command::new("ssh")
            .args(self.base_args())
            .arg("-i")
            .arg(&self.private_key)
            .arg(self.destination())
            .arg(command)
            .output()?;

        let mut stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(CommandOutput::ok(stdout))
        } else {
            stdout.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok(CommandOutput::failed(stdout))
        }
    }

    fn upload_file(&self, local: &Path, remote: &str) -> ProviderResult<()> {
        debug!(host = %self.host, local = %local.display(), remote, "scp");
        let status = Command::new("scp")
            .args(self.base_args())
            .arg("-i")
            .arg(&self.private_key)
            .arg(local)
            .arg(format!("{}:{remote}", self.destination()))
            .status()?;
        if !status.success() {
            return Err(ProviderError::Backend(format!(
                "scp of '{}' to {} failed",
                local.display(),
                self.host
            )));
        }
        Ok(())
    }
}
